use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use native_db::ToInput;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::client::{RemoteClient, RemotePlatform};
use crate::config::SyncConfig;
use crate::credentials::resolve_credentials;
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::models::{
    BuildingLocal, Business, CameraLocal, Credentials, EntityKind, PropertyLocal, StoreLocal,
    SyncStatus, Syncable, ZoneLocal,
};
use crate::payload::{self, PayloadMode};
use crate::storage::{Claim, LocalDelete, LocalStorage, CREATE_IN_FLIGHT};

// ===== ACTORS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Viewer,
}

/// Who is asking for a mutation. An actor without a business is a platform
/// operator and may act on any tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub business_id_local: Option<String>,
    pub role: Role,
}

impl Actor {
    pub fn operator() -> Self {
        Self {
            business_id_local: None,
            role: Role::Admin,
        }
    }

    pub fn member(business_id_local: impl Into<String>, role: Role) -> Self {
        Self {
            business_id_local: Some(business_id_local.into()),
            role,
        }
    }

    pub fn sees(&self, business_id_local: &str) -> bool {
        match &self.business_id_local {
            Some(own) => own == business_id_local,
            None => true,
        }
    }

    /// Referenced parents outside the actor's business are reported as missing.
    pub fn scope(&self, business_id_local: &str, what: &str) -> SyncResult<()> {
        if self.sees(business_id_local) {
            Ok(())
        } else {
            Err(SyncError::NotFound(what.to_string()))
        }
    }

    pub fn authorize(&self, business_id_local: &str) -> SyncResult<()> {
        if !self.sees(business_id_local) {
            return Err(SyncError::Permission(format!(
                "entity belongs to business {}",
                business_id_local
            )));
        }
        if self.role == Role::Viewer {
            return Err(SyncError::Permission("viewers cannot modify sites".to_string()));
        }
        Ok(())
    }
}

// ===== SKIPS & ATTEMPTS =====

/// Why an entity was left for a later run. Never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingCredentials,
    ParentNotSynced,
    AlreadyClaimed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingCredentials => f.write_str("business has no remote credentials"),
            SkipReason::ParentNotSynced => f.write_str("parent has no remote id yet"),
            SkipReason::AlreadyClaimed => f.write_str("another writer claimed or synced it first"),
        }
    }
}

/// A remote request ready to send, or the reason it cannot be sent yet.
pub enum Prepared {
    Ready { credentials: Credentials, body: Value },
    Skip(SkipReason),
}

/// Result of one remote call for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Attempt {
    Synced { remote_id: String },
    Skipped { reason: SkipReason },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RemoteDelete {
    /// Remote record gone (or never existed); local row removed.
    Deleted,
    /// Remote delete could not be confirmed; local row kept as a tombstone.
    Tombstoned { error: String },
}

// ===== REMOTE ENTITIES =====

/// A syncable row that knows how to resolve its lineage into a remote request.
pub trait RemoteEntity: ToInput + Syncable + Clone + Send + Sync + 'static {
    /// Local id of the owning business.
    fn business_id_local(&self, engine: &SyncEngine) -> SyncResult<String>;

    /// Resolves credentials and parent remote ids; skips when either is absent.
    fn prepare(&self, engine: &SyncEngine, mode: PayloadMode) -> SyncResult<Prepared>;

    /// Credentials only, for calls that need no payload (delete).
    fn credentials(&self, engine: &SyncEngine) -> SyncResult<Option<Credentials>> {
        let business: Business = engine.require(&self.business_id_local(engine)?)?;
        Ok(resolve_credentials(&business))
    }
}

fn ready<T: Serialize>(credentials: Credentials, payload: &T) -> SyncResult<Prepared> {
    Ok(Prepared::Ready {
        credentials,
        body: payload::to_body(payload)?,
    })
}

impl RemoteEntity for PropertyLocal {
    fn business_id_local(&self, _engine: &SyncEngine) -> SyncResult<String> {
        Ok(self.business_id_local.clone())
    }

    fn prepare(&self, engine: &SyncEngine, _mode: PayloadMode) -> SyncResult<Prepared> {
        let Some(credentials) = self.credentials(engine)? else {
            return Ok(Prepared::Skip(SkipReason::MissingCredentials));
        };
        let payload = payload::property_payload(self, &credentials);
        ready(credentials, &payload)
    }
}

impl RemoteEntity for BuildingLocal {
    fn business_id_local(&self, engine: &SyncEngine) -> SyncResult<String> {
        let property: PropertyLocal = engine.require(&self.property_id_local)?;
        Ok(property.business_id_local)
    }

    fn prepare(&self, engine: &SyncEngine, _mode: PayloadMode) -> SyncResult<Prepared> {
        let property: PropertyLocal = engine.require(&self.property_id_local)?;
        let Some(credentials) = property.credentials(engine)? else {
            return Ok(Prepared::Skip(SkipReason::MissingCredentials));
        };
        let Some(property_remote_id) = property.remote_id else {
            return Ok(Prepared::Skip(SkipReason::ParentNotSynced));
        };
        let payload = payload::building_payload(self, &property_remote_id);
        ready(credentials, &payload)
    }
}

impl RemoteEntity for ZoneLocal {
    fn business_id_local(&self, engine: &SyncEngine) -> SyncResult<String> {
        let building: BuildingLocal = engine.require(&self.building_id_local)?;
        building.business_id_local(engine)
    }

    fn prepare(&self, engine: &SyncEngine, mode: PayloadMode) -> SyncResult<Prepared> {
        let building: BuildingLocal = engine.require(&self.building_id_local)?;
        let property: PropertyLocal = engine.require(&building.property_id_local)?;
        let Some(credentials) = property.credentials(engine)? else {
            return Ok(Prepared::Skip(SkipReason::MissingCredentials));
        };
        let (Some(property_remote_id), Some(building_remote_id)) =
            (property.remote_id.as_deref(), building.remote_id.as_deref())
        else {
            return Ok(Prepared::Skip(SkipReason::ParentNotSynced));
        };

        let store = match self.store_id_local.as_deref() {
            Some(id) => engine.storage().get::<StoreLocal>(id)?,
            None => None,
        };
        let payload = payload::zone_payload(
            self,
            property_remote_id,
            building_remote_id,
            store.as_ref(),
            mode,
        );
        ready(credentials, &payload)
    }
}

impl RemoteEntity for CameraLocal {
    fn business_id_local(&self, engine: &SyncEngine) -> SyncResult<String> {
        let zone: ZoneLocal = engine.require(&self.zone_id_local)?;
        zone.business_id_local(engine)
    }

    fn prepare(&self, engine: &SyncEngine, _mode: PayloadMode) -> SyncResult<Prepared> {
        let zone: ZoneLocal = engine.require(&self.zone_id_local)?;
        let Some(credentials) = zone.credentials(engine)? else {
            return Ok(Prepared::Skip(SkipReason::MissingCredentials));
        };
        let Some(zone_remote_id) = zone.remote_id.as_deref() else {
            return Ok(Prepared::Skip(SkipReason::ParentNotSynced));
        };
        let payload = payload::camera_payload(self, zone_remote_id);
        ready(credentials, &payload)
    }
}

// ===== ENGINE =====

/// Shared context for inline mirrors and backfill jobs.
///
/// Holds no tenant state: credentials are resolved per entity and passed to
/// every remote call.
#[derive(Clone)]
pub struct SyncEngine {
    storage: Arc<LocalStorage>,
    remote: Arc<dyn RemotePlatform>,
    concurrency: usize,
    claim_ttl: chrono::Duration,
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("concurrency", &self.concurrency)
            .field("claim_ttl", &self.claim_ttl)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(storage: Arc<LocalStorage>, remote: Arc<dyn RemotePlatform>) -> Self {
        let defaults = SyncConfig::default();
        Self {
            storage,
            remote,
            concurrency: defaults.backfill_concurrency,
            claim_ttl: defaults.claim_ttl(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let storage = LocalStorage::open(config.db_path.as_deref())?;
        let remote = RemoteClient::from_config(config)?;
        info!(
            base_url = %remote.base_url(),
            db_path = ?config.db_path,
            concurrency = config.backfill_concurrency,
            "Sync engine ready"
        );
        Ok(Self::new(Arc::new(storage), Arc::new(remote))
            .with_concurrency(config.backfill_concurrency)
            .with_claim_ttl(config.claim_ttl()))
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_claim_ttl(mut self, claim_ttl: chrono::Duration) -> Self {
        self.claim_ttl = claim_ttl;
        self
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Loads a row or fails with `NotFound`.
    pub fn require<T: ToInput>(&self, id_local: &str) -> SyncResult<T> {
        self.storage
            .get::<T>(id_local)?
            .ok_or_else(|| SyncError::NotFound(format!("local record {}", id_local)))
    }

    // ===== REMOTE PRIMITIVES =====

    /// Claims the row, sends the create and records the outcome.
    ///
    /// Exactly one writer at a time can hold the claim; the others, and any
    /// writer arriving after the row got its remote id, see `AlreadyClaimed`.
    pub async fn sync_create<T: RemoteEntity>(&self, id_local: &str) -> SyncResult<Attempt> {
        let row: T = self.require(id_local)?;
        if row.remote_id().is_some() {
            // Synced by a concurrent writer since the caller looked
            return Ok(Attempt::Skipped {
                reason: SkipReason::AlreadyClaimed,
            });
        }

        let (credentials, body) = match row.prepare(self, PayloadMode::Create)? {
            Prepared::Ready { credentials, body } => (credentials, body),
            Prepared::Skip(reason) => {
                debug!(entity = %T::KIND, id_local, %reason, "Skipping remote create");
                return Ok(Attempt::Skipped { reason });
            }
        };

        match self
            .storage
            .claim_for_create::<T>(id_local, Utc::now(), self.claim_ttl)?
        {
            Claim::Acquired(_) => {}
            Claim::Missing => {
                return Err(SyncError::NotFound(format!("{} {}", T::KIND, id_local)));
            }
            Claim::Busy | Claim::NotNeeded => {
                debug!(entity = %T::KIND, id_local, "Row already claimed by another writer");
                return Ok(Attempt::Skipped {
                    reason: SkipReason::AlreadyClaimed,
                });
            }
        }

        let remote_id = match self.create_or_adopt(&credentials, T::KIND, id_local, body).await {
            Ok(remote_id) => remote_id,
            Err(e) => {
                let error = e.to_string();
                warn!(entity = %T::KIND, id_local, error = %error, "Remote create failed");
                let row = self.storage.record_failure::<T>(id_local, &error, Utc::now())?;
                if row.is_some_and(|r| r.sync_state().status == SyncStatus::PendingDelete) {
                    // Deleted while in flight and nothing was created remotely
                    self.storage.remove::<T>(id_local)?;
                }
                return Ok(Attempt::Failed { error });
            }
        };

        let recorded = self
            .storage
            .record_created::<T>(id_local, &remote_id, Utc::now())?;
        match recorded {
            Some(row) if row.sync_state().status != SyncStatus::PendingDelete => {
                info!(
                    entity = %T::KIND,
                    id_local,
                    remote_id = %remote_id,
                    business = %credentials.business_remote_id,
                    "Created remote record"
                );
                Ok(Attempt::Synced { remote_id })
            }
            Some(_) => {
                // Deleted locally while the create was in flight
                let error = match self.sync_delete::<T>(id_local).await? {
                    RemoteDelete::Deleted => format!(
                        "deleted while remote create was in flight; remote record {} removed",
                        remote_id
                    ),
                    RemoteDelete::Tombstoned { error } => format!(
                        "deleted while remote create was in flight; remote record {} kept as tombstone: {}",
                        remote_id, error
                    ),
                };
                warn!(entity = %T::KIND, id_local, remote_id = %remote_id, "{}", error);
                Ok(Attempt::Failed { error })
            }
            None => Ok(Attempt::Failed {
                error: self
                    .compensate_create(&credentials, T::KIND, id_local, &remote_id)
                    .await,
            }),
        }
    }

    /// Removes a remote record whose local row vanished before the create
    /// could be recorded.
    async fn compensate_create(
        &self,
        credentials: &Credentials,
        kind: EntityKind,
        id_local: &str,
        remote_id: &str,
    ) -> String {
        match self.remote.delete(credentials, kind, remote_id).await {
            Ok(()) => {
                warn!(
                    entity = %kind,
                    id_local,
                    remote_id,
                    "Local row gone after create, removed remote record"
                );
                format!("local row deleted during create; remote record {} removed", remote_id)
            }
            Err(e) if e.is_not_found() => {
                format!("local row deleted during create; remote record {} already gone", remote_id)
            }
            Err(e) => {
                error!(
                    entity = %kind,
                    id_local,
                    remote_id,
                    error = %e,
                    "Local row gone after create and remote delete failed, remote record orphaned"
                );
                format!(
                    "local row deleted during create; remote record {} orphaned: {}",
                    remote_id, e
                )
            }
        }
    }

    /// A 409 means the record already exists remotely; adopt it by external id.
    async fn create_or_adopt(
        &self,
        credentials: &Credentials,
        kind: EntityKind,
        id_local: &str,
        body: Value,
    ) -> Result<String, RemoteError> {
        match self.remote.create(credentials, kind, body).await {
            Ok(record) => record.into_id(),
            Err(e) if e.is_conflict() => {
                debug!(entity = %kind, id_local, "Create conflicted, looking up existing record");
                match self.remote.find_by_external_id(credentials, kind, id_local).await? {
                    Some(record) => record.into_id(),
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Sends the current local state of an already-created row.
    pub async fn sync_update<T: RemoteEntity>(
        &self,
        id_local: &str,
    ) -> SyncResult<Option<Attempt>> {
        let row: T = self.require(id_local)?;
        let Some(remote_id) = row.remote_id() else {
            return Ok(None);
        };

        let (credentials, body) = match row.prepare(self, PayloadMode::Update)? {
            Prepared::Ready { credentials, body } => (credentials, body),
            Prepared::Skip(reason) => {
                // The remote record is now stale; leave it for retry_failed_updates
                debug!(entity = %T::KIND, id_local, %reason, "Skipping remote update");
                self.storage
                    .record_failure::<T>(id_local, &reason.to_string(), Utc::now())?;
                return Ok(Some(Attempt::Skipped { reason }));
            }
        };

        match self.remote.update(&credentials, T::KIND, &remote_id, body).await {
            Ok(_) => {
                self.storage.record_synced::<T>(id_local, Utc::now())?;
                debug!(
                    entity = %T::KIND,
                    id_local,
                    remote_id = %remote_id,
                    "Updated remote record"
                );
                Ok(Some(Attempt::Synced { remote_id }))
            }
            Err(e) => {
                let error = e.to_string();
                warn!(
                    entity = %T::KIND,
                    id_local,
                    remote_id = %remote_id,
                    error = %error,
                    "Remote update failed"
                );
                self.storage.record_failure::<T>(id_local, &error, Utc::now())?;
                Ok(Some(Attempt::Failed { error }))
            }
        }
    }

    /// Deletes the remote record first; the local row goes only once the
    /// remote side confirms (or reports the record as already gone).
    ///
    /// A row never created remotely is removed at once, unless a create is in
    /// flight: then it is tombstoned and the creating writer deletes the new
    /// remote record.
    pub async fn sync_delete<T: RemoteEntity>(&self, id_local: &str) -> SyncResult<RemoteDelete> {
        let row: T = match self
            .storage
            .delete_unsynced::<T>(id_local, Utc::now(), self.claim_ttl)?
        {
            LocalDelete::HasRemote(row) => row,
            LocalDelete::Removed => {
                debug!(entity = %T::KIND, id_local, "Deleted local-only record");
                return Ok(RemoteDelete::Deleted);
            }
            LocalDelete::Tombstoned => {
                debug!(entity = %T::KIND, id_local, "Remote create in flight, keeping tombstone");
                return Ok(RemoteDelete::Tombstoned {
                    error: CREATE_IN_FLIGHT.to_string(),
                });
            }
            LocalDelete::Missing => {
                return Err(SyncError::NotFound(format!("local record {}", id_local)));
            }
        };
        let Some(remote_id) = row.remote_id() else {
            return Err(SyncError::Storage(format!(
                "{} {} lost its remote id",
                T::KIND,
                id_local
            )));
        };

        let result = match row.credentials(self)? {
            Some(credentials) => self.remote.delete(&credentials, T::KIND, &remote_id).await,
            None => {
                let error = SkipReason::MissingCredentials.to_string();
                self.storage
                    .mark_pending_delete::<T>(id_local, Some(error.clone()), Utc::now())?;
                return Ok(RemoteDelete::Tombstoned { error });
            }
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(
                    entity = %T::KIND,
                    id_local,
                    remote_id = %remote_id,
                    "Remote record already gone"
                );
            }
            Err(e) => {
                let error = e.to_string();
                warn!(
                    entity = %T::KIND,
                    id_local,
                    remote_id = %remote_id,
                    error = %error,
                    "Remote delete failed, keeping tombstone"
                );
                self.storage
                    .mark_pending_delete::<T>(id_local, Some(error.clone()), Utc::now())?;
                return Ok(RemoteDelete::Tombstoned { error });
            }
        }

        self.storage.remove::<T>(id_local)?;
        info!(
            entity = %T::KIND,
            id_local,
            remote_id = %remote_id,
            "Deleted remote and local record"
        );
        Ok(RemoteDelete::Deleted)
    }
}
