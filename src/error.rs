use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Failure of a single call to the remote platform.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Remote platform returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Remote transport error: {0}")]
    Transport(String),

    #[error("Failed to decode remote response: {0}")]
    Decode(String),

    #[error("Remote response did not contain an id")]
    MissingId,
}

impl RemoteError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Transport(_) => true,
            RemoteError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            RemoteError::Transport(e.to_string())
        }
    }
}

/// Request-scoped failures surfaced by mutations and jobs.
///
/// A skipped sync (missing credentials or unsynced parent) is not an error and
/// never appears here.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Remote sync failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SyncError::Validation(_) => StatusCode::BAD_REQUEST,
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::Permission(_) => StatusCode::FORBIDDEN,
            SyncError::Remote(_) => StatusCode::BAD_GATEWAY,
            SyncError::Storage(_) | SyncError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = match &self {
            SyncError::Validation(_) => "VALIDATION_ERROR",
            SyncError::NotFound(_) => "NOT_FOUND",
            SyncError::Permission(_) => "FORBIDDEN",
            SyncError::Remote(_) => "REMOTE_ERROR",
            SyncError::Storage(_) => "STORAGE_ERROR",
            SyncError::Config(_) => "CONFIG_ERROR",
        };
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": code,
        });
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(e: anyhow::Error) -> Self {
        SyncError::Storage(format!("{:#}", e))
    }
}

impl From<native_db::db_type::Error> for SyncError {
    fn from(e: native_db::db_type::Error) -> Self {
        SyncError::Storage(e.to_string())
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
