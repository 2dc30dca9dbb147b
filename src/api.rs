use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{error, info};

use crate::error::{SyncError, SyncResult};
use crate::models::{
    BuildingLocal, CameraLocal, EntityKind, PropertyLocal, SyncState, Syncable, ZoneLocal,
};
use crate::report::trigger_response;
use crate::sync::SyncEngine;

pub type AppState = Arc<SyncEngine>;

/// Sync fields of one local entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySyncStatus {
    pub entity: EntityKind,
    pub id_local: String,
    pub remote_id: Option<String>,
    #[serde(flatten)]
    pub sync: SyncState,
}

impl EntitySyncStatus {
    fn of<T: Syncable>(row: T, id_local: &str) -> Self {
        Self {
            entity: T::KIND,
            id_local: id_local.to_string(),
            remote_id: row.remote_id(),
            sync: row.sync_state().clone(),
        }
    }
}

pub fn router(engine: AppState) -> Router {
    Router::new()
        .route("/sync/:target", post(trigger_sync))
        .route("/sync/status/:kind/:id_local", get(sync_status))
        .with_state(engine)
}

/// `POST /sync/{properties|buildings|zones|cameras|all}`
async fn trigger_sync(
    State(engine): State<AppState>,
    Path(target): Path<String>,
) -> impl IntoResponse {
    let (label, result) = if target.eq_ignore_ascii_case("all") {
        ("entities", engine.backfill_all().await)
    } else {
        let kind = match target.parse::<EntityKind>() {
            Ok(kind) => kind,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": e.to_string() })),
                );
            }
        };
        (kind.collection(), engine.backfill(kind).await.map(|r| vec![r]))
    };

    if let Err(e) = &result {
        error!(target = %target, error = %e, "Sync trigger failed");
    }
    let (status, body) = trigger_response(label, result);
    info!(target = %target, status = status.as_u16(), "Sync trigger handled");
    (status, Json(body))
}

/// `GET /sync/status/{kind}/{id_local}`
async fn sync_status(
    State(engine): State<AppState>,
    Path((kind, id_local)): Path<(String, String)>,
) -> Result<Json<EntitySyncStatus>, SyncError> {
    let kind: EntityKind = kind
        .parse()
        .map_err(|e: anyhow::Error| SyncError::Validation(e.to_string()))?;
    Ok(Json(entity_status(&engine, kind, &id_local)?))
}

pub fn entity_status(
    engine: &SyncEngine,
    kind: EntityKind,
    id_local: &str,
) -> SyncResult<EntitySyncStatus> {
    let status = match kind {
        EntityKind::Property => {
            EntitySyncStatus::of(engine.require::<PropertyLocal>(id_local)?, id_local)
        }
        EntityKind::Building => {
            EntitySyncStatus::of(engine.require::<BuildingLocal>(id_local)?, id_local)
        }
        EntityKind::Zone => EntitySyncStatus::of(engine.require::<ZoneLocal>(id_local)?, id_local),
        EntityKind::Camera => {
            EntitySyncStatus::of(engine.require::<CameraLocal>(id_local)?, id_local)
        }
    };
    Ok(status)
}
