use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::SyncConfig;
use crate::error::RemoteError;
use crate::models::serde_helpers::deserialize_remote_id;
use crate::models::{Credentials, EntityKind};

// ===== TENANT HEADERS =====

pub const HEADER_PLATFORM_ID: &str = "x-platform-id";
pub const HEADER_API_KEY: &str = "x-api-key";
pub const HEADER_BUSINESS_ID: &str = "x-business-id";

// ===== RESPONSE TYPES =====

/// Minimal shape of a create/update/lookup response: only `id` is relied on.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RemoteRecord {
    #[serde(default, deserialize_with = "deserialize_remote_id")]
    pub id: Option<String>,
}

impl RemoteRecord {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self { id: Some(id.into()) }
    }

    pub fn into_id(self) -> Result<String, RemoteError> {
        self.id.ok_or(RemoteError::MissingId)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LookupResponse {
    List(Vec<RemoteRecord>),
    Wrapped { data: Vec<RemoteRecord> },
}

/// Time window accepted by the analytics endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "today")]
    Today,
    #[serde(rename = "7d")]
    LastWeek,
    #[serde(rename = "30d")]
    LastMonth,
    #[serde(rename = "90d")]
    LastQuarter,
}

impl TimeRange {
    pub fn as_token(&self) -> &'static str {
        match self {
            TimeRange::Today => "today",
            TimeRange::LastWeek => "7d",
            TimeRange::LastMonth => "30d",
            TimeRange::LastQuarter => "90d",
        }
    }
}

impl FromStr for TimeRange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "today" => Ok(TimeRange::Today),
            "7d" => Ok(TimeRange::LastWeek),
            "30d" => Ok(TimeRange::LastMonth),
            "90d" => Ok(TimeRange::LastQuarter),
            other => Err(anyhow!(
                "Unknown time range: {} (expected today, 7d, 30d or 90d)",
                other
            )),
        }
    }
}

// ===== PLATFORM SEAM =====

/// The entity operations the reconciliation core needs from the remote side.
///
/// Credentials are an argument of every call; implementations must not keep
/// tenant state between calls.
#[async_trait]
pub trait RemotePlatform: Send + Sync {
    async fn create(
        &self,
        credentials: &Credentials,
        kind: EntityKind,
        body: Value,
    ) -> Result<RemoteRecord, RemoteError>;

    async fn update(
        &self,
        credentials: &Credentials,
        kind: EntityKind,
        remote_id: &str,
        body: Value,
    ) -> Result<RemoteRecord, RemoteError>;

    async fn delete(
        &self,
        credentials: &Credentials,
        kind: EntityKind,
        remote_id: &str,
    ) -> Result<(), RemoteError>;

    /// Looks up a record previously created for the given local id.
    async fn find_by_external_id(
        &self,
        credentials: &Credentials,
        kind: EntityKind,
        external_id: &str,
    ) -> Result<Option<RemoteRecord>, RemoteError>;
}

// ===== CLIENT IMPLEMENTATION =====

/// HTTP client for one remote base URL.
///
/// Cheap to clone; the underlying connection pool is shared. No per-tenant
/// state lives here.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    base_url: Url,
    http: reqwest::Client,
}

impl RemoteClient {
    /// Creates a new RemoteClient with a fixed request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| anyhow!("Invalid remote base URL {}: {}", base_url, e))?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self { base_url, http })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::new(&config.remote_base_url, config.request_timeout())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds an endpoint URL, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                RemoteError::Transport(format!("Base URL cannot be a base: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url, credentials: &Credentials) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(HEADER_PLATFORM_ID, &credentials.platform_id)
            .header(HEADER_API_KEY, &credentials.api_key)
            .header(HEADER_BUSINESS_ID, &credentials.business_remote_id)
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        credentials: &Credentials,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<T, RemoteError> {
        let url = self.endpoint(segments)?;
        debug!(method = "GET", url = %url, "Remote request");
        let response = self.request(Method::GET, url, credentials).query(query).send().await?;
        Self::read_json(response).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        credentials: &Credentials,
        segments: &[&str],
        body: &B,
    ) -> Result<T, RemoteError> {
        let url = self.endpoint(segments)?;
        debug!(method = "POST", url = %url, "Remote request");
        let response = self.request(Method::POST, url, credentials).json(body).send().await?;
        Self::read_json(response).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        credentials: &Credentials,
        segments: &[&str],
        body: &B,
    ) -> Result<T, RemoteError> {
        let url = self.endpoint(segments)?;
        debug!(method = "PUT", url = %url, "Remote request");
        let response = self.request(Method::PUT, url, credentials).json(body).send().await?;
        Self::read_json(response).await
    }

    /// Deletes a resource; an empty response body yields `None`.
    pub async fn delete<T: DeserializeOwned>(
        &self,
        credentials: &Credentials,
        segments: &[&str],
    ) -> Result<Option<T>, RemoteError> {
        let url = self.endpoint(segments)?;
        debug!(method = "DELETE", url = %url, "Remote request");
        let response = self.request(Method::DELETE, url, credentials).send().await?;
        let body = Self::read_body(response).await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| RemoteError::Decode(format!("{} - Response: {}", e, body)))
    }

    /// Reads the body, turning a non-success status into `RemoteError::Status`
    async fn read_body(response: Response) -> Result<String, RemoteError> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return Ok(body);
        }

        // Prefer the platform's own error message when the body carries one
        let message = match serde_json::from_str::<Value>(&body) {
            Ok(value) => value
                .get("error")
                .or_else(|| value.get("message"))
                .map(|m| m.as_str().map(str::to_string).unwrap_or_else(|| m.to_string()))
                .unwrap_or(body),
            Err(_) => body,
        };

        Err(RemoteError::Status {
            status: status.as_u16(),
            body: message,
        })
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
        let body = Self::read_body(response).await?;
        serde_json::from_str(&body)
            .map_err(|e| RemoteError::Decode(format!("{} - Response: {}", e, body)))
    }

    // ===== ANALYTICS (read-only, used by dashboards) =====

    pub async fn zone_demographics(
        &self,
        credentials: &Credentials,
        zone_remote_id: &str,
        range: TimeRange,
    ) -> Result<Value, RemoteError> {
        self.get(
            credentials,
            &["zones", zone_remote_id, "demographics"],
            &[("range", range.as_token())],
        )
        .await
    }

    pub async fn zone_heatmap(
        &self,
        credentials: &Credentials,
        zone_remote_id: &str,
        range: TimeRange,
    ) -> Result<Value, RemoteError> {
        self.get(
            credentials,
            &["zones", zone_remote_id, "heatmap"],
            &[("range", range.as_token())],
        )
        .await
    }
}

#[async_trait]
impl RemotePlatform for RemoteClient {
    async fn create(
        &self,
        credentials: &Credentials,
        kind: EntityKind,
        body: Value,
    ) -> Result<RemoteRecord, RemoteError> {
        self.post(credentials, &[kind.collection()], &body).await
    }

    async fn update(
        &self,
        credentials: &Credentials,
        kind: EntityKind,
        remote_id: &str,
        body: Value,
    ) -> Result<RemoteRecord, RemoteError> {
        self.put(credentials, &[kind.collection(), remote_id], &body).await
    }

    async fn delete(
        &self,
        credentials: &Credentials,
        kind: EntityKind,
        remote_id: &str,
    ) -> Result<(), RemoteError> {
        RemoteClient::delete::<Value>(self, credentials, &[kind.collection(), remote_id])
            .await
            .map(|_| ())
    }

    async fn find_by_external_id(
        &self,
        credentials: &Credentials,
        kind: EntityKind,
        external_id: &str,
    ) -> Result<Option<RemoteRecord>, RemoteError> {
        let response: LookupResponse = self
            .get(credentials, &[kind.collection()], &[("external_id", external_id)])
            .await?;
        let records = match response {
            LookupResponse::List(records) => records,
            LookupResponse::Wrapped { data } => data,
        };
        Ok(records.into_iter().find(|r| r.id.is_some()))
    }
}
