use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_BACKFILL_CONCURRENCY: usize = 4;
const DEFAULT_CLAIM_TTL_SECS: u64 = 300;
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub remote_base_url: String,
    pub request_timeout_secs: u64,
    pub db_path: Option<String>,
    pub backfill_concurrency: usize,
    pub claim_ttl_secs: u64,
    pub bind_addr: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_base_url: String::new(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            db_path: None,
            backfill_concurrency: DEFAULT_BACKFILL_CONCURRENCY,
            claim_ttl_secs: DEFAULT_CLAIM_TTL_SECS,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
        }
    }
}

impl SyncConfig {
    /// Creates a new config from environment variables (and `.env`, if present)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut remote_base_url = lookup("REMOTE_PLATFORM_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("REMOTE_PLATFORM_URL environment variable is required"))?;

        // Endpoint paths are joined onto the base, so it must end with a slash
        if !remote_base_url.ends_with('/') {
            remote_base_url.push('/');
        }
        url::Url::parse(&remote_base_url)
            .map_err(|e| anyhow!("REMOTE_PLATFORM_URL is not a valid URL: {}", e))?;

        let request_timeout_secs =
            parse_or_default(&lookup, "REMOTE_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;
        let backfill_concurrency =
            parse_or_default(&lookup, "BACKFILL_CONCURRENCY", DEFAULT_BACKFILL_CONCURRENCY)?
                .max(1);
        let claim_ttl_secs =
            parse_or_default(&lookup, "SYNC_CLAIM_TTL_SECS", DEFAULT_CLAIM_TTL_SECS)?;

        Ok(SyncConfig {
            remote_base_url,
            request_timeout_secs,
            db_path: lookup("SYNC_DB_PATH").filter(|v| !v.trim().is_empty()),
            backfill_concurrency,
            claim_ttl_secs,
            bind_addr: lookup("SYNC_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn claim_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.claim_ttl_secs as i64)
    }
}

fn parse_or_default<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow!("{} must be a non-negative integer, got {:?}", key, raw)),
        None => Ok(default),
    }
}
