use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::SyncResult;
use crate::models::EntityKind;
use crate::sync::{Attempt, SkipReason};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedEntity {
    pub id_local: String,
    pub remote_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedEntity {
    pub id_local: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEntity {
    pub id_local: String,
    pub reason: String,
}

/// Summary of one job run over one entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub entity: EntityKind,
    pub candidates: usize,
    pub succeeded: usize,
    pub synced: Vec<SyncedEntity>,
    pub skipped: Vec<SkippedEntity>,
    pub failed: Vec<FailedEntity>,
}

impl SyncReport {
    pub fn new(entity: EntityKind, candidates: usize) -> Self {
        Self {
            entity,
            candidates,
            succeeded: 0,
            synced: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Files one candidate's outcome. Errors count as failures of that
    /// candidate only.
    pub fn record(&mut self, id_local: String, result: SyncResult<Attempt>) {
        match result {
            Ok(Attempt::Synced { remote_id }) => {
                self.succeeded += 1;
                self.synced.push(SyncedEntity { id_local, remote_id });
            }
            Ok(Attempt::Skipped { reason }) => {
                self.skipped.push(SkippedEntity { id_local, reason });
            }
            Ok(Attempt::Failed { error }) => {
                self.failed.push(FailedEntity {
                    id_local,
                    reason: error,
                });
            }
            Err(e) => {
                self.failed.push(FailedEntity {
                    id_local,
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Orders entries by local id; candidates finish in arbitrary order.
    pub fn finish(mut self) -> Self {
        self.synced.sort_by(|a, b| a.id_local.cmp(&b.id_local));
        self.skipped.sort_by(|a, b| a.id_local.cmp(&b.id_local));
        self.failed.sort_by(|a, b| a.id_local.cmp(&b.id_local));
        self
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates == 0
    }
}

/// HTTP status and body for a trigger call covering one or more reports.
///
/// `label` is the plural noun used in messages ("properties", "entities").
pub fn trigger_response(label: &str, result: SyncResult<Vec<SyncReport>>) -> (StatusCode, Value) {
    let reports = match result {
        Ok(reports) => reports,
        Err(e) => {
            let status = e.status_code();
            return (status, json!({ "error": e.to_string() }));
        }
    };

    if reports.iter().all(SyncReport::is_empty) {
        return (
            StatusCode::NOT_FOUND,
            json!({ "message": format!("No {} found without remote id", label) }),
        );
    }

    let succeeded: usize = reports.iter().map(|r| r.succeeded).sum();
    let status = if reports.iter().any(SyncReport::has_failures) {
        StatusCode::MULTI_STATUS
    } else {
        StatusCode::OK
    };

    let report = match reports.as_slice() {
        [single] => json!(single),
        many => json!(many),
    };

    (
        status,
        json!({
            "message": format!("Successfully synced {} {}", succeeded, label),
            "report": report,
        }),
    )
}
