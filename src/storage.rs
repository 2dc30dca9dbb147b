//! Local persistence for the site tree, backed by native_db.
//!
//! Every write that depends on the current row state (claims, recording a
//! remote id, tombstoning) happens inside a single read-write transaction, so
//! two writers can never both observe "no remote id" and both claim a row.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use native_db::{Builder, Database, Models, ToInput};
use once_cell::sync::OnceCell;
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    AncestorLocal, BuildingLocal, Business, CameraLocal, Credentials, PropertyLocal, StoreLocal,
    SyncStatus, Syncable, ZoneLocal,
};

static MODELS: OnceCell<Models> = OnceCell::new();

/// Tombstone reason for a delete that arrived while a remote create was running.
pub const CREATE_IN_FLIGHT: &str = "remote create in flight";

fn models() -> Result<&'static Models> {
    MODELS.get_or_try_init(|| {
        let mut models = Models::new();
        models.define::<Business>()?;
        models.define::<StoreLocal>()?;
        models.define::<PropertyLocal>()?;
        models.define::<BuildingLocal>()?;
        models.define::<ZoneLocal>()?;
        models.define::<CameraLocal>()?;
        Ok(models)
    })
}

/// Outcome of trying to claim a row for a remote create.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim<T> {
    /// The row is now `Pending` and owned by the caller.
    Acquired(T),
    /// Another writer holds a fresh claim.
    Busy,
    /// The row already has a remote id or is tombstoned.
    NotNeeded,
    Missing,
}

/// Outcome of the local half of a delete.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalDelete<T> {
    /// Never created remotely; the row is gone.
    Removed,
    /// A remote create is in flight; the row is now a `PendingDelete` tombstone.
    Tombstoned,
    /// The row has a remote id; the remote delete must go first.
    HasRemote(T),
    Missing,
}

pub struct LocalStorage {
    db: Database<'static>,
}

impl std::fmt::Debug for LocalStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStorage").finish_non_exhaustive()
    }
}

impl LocalStorage {
    /// Opens (or creates) an on-disk database, or an in-memory one when `path` is `None`
    pub fn open(path: Option<&str>) -> Result<Self> {
        let models = models()?;
        let db = match path {
            Some(path) => Builder::new()
                .create(models, path)
                .map_err(|e| anyhow!("Failed to open local database at {}: {}", path, e))?,
            None => Builder::new().create_in_memory(models)?,
        };
        Ok(Self { db })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(None)
    }

    // ===== GENERIC ACCESS =====

    pub fn get<T: ToInput>(&self, id_local: &str) -> Result<Option<T>> {
        let r = self.db.r_transaction()?;
        Ok(r.get().primary::<T>(Some(id_local.to_string()))?)
    }

    pub fn all<T: ToInput>(&self) -> Result<Vec<T>> {
        let r = self.db.r_transaction()?;
        let items = r
            .scan()
            .primary::<T>()?
            .all()?
            .collect::<std::result::Result<Vec<T>, _>>()?;
        Ok(items)
    }

    /// Inserts a new syncable row, assigning a fresh local id when it has none
    pub fn insert_new<T: ToInput + Syncable + Clone>(&self, mut item: T) -> Result<T> {
        if item.id_local().is_none() {
            item.set_id_local(Uuid::new_v4().to_string());
        }
        let rw = self.db.rw_transaction()?;
        rw.insert(item.clone())?;
        rw.commit()?;
        debug!(entity = %T::KIND, id_local = ?item.id_local(), "Inserted local row");
        Ok(item)
    }

    /// Applies `change` to the current row inside one write transaction.
    ///
    /// The row is written back only when `change` returns `true`.
    pub fn modify<T, F>(&self, id_local: &str, change: F) -> Result<Option<T>>
    where
        T: ToInput + Clone,
        F: FnOnce(&mut T) -> bool,
    {
        let rw = self.db.rw_transaction()?;
        let current: Option<T> = rw.get().primary(Some(id_local.to_string()))?;
        let Some(mut row) = current else {
            return Ok(None);
        };
        if change(&mut row) {
            rw.upsert(row.clone())?;
            rw.commit()?;
        }
        Ok(Some(row))
    }

    /// Removes a row by local id, returning it if it existed
    pub fn remove<T: ToInput>(&self, id_local: &str) -> Result<Option<T>> {
        let rw = self.db.rw_transaction()?;
        let current: Option<T> = rw.get().primary(Some(id_local.to_string()))?;
        let removed = match current {
            Some(row) => Some(rw.remove(row)?),
            None => None,
        };
        rw.commit()?;
        Ok(removed)
    }

    // ===== BUSINESSES & STORES =====

    pub fn insert_business(&self, mut business: Business) -> Result<Business> {
        if business.id_local.is_none() {
            business.id_local = Some(Uuid::new_v4().to_string());
        }
        business.inserted_at = Some(Utc::now().to_rfc3339());
        let rw = self.db.rw_transaction()?;
        rw.insert(business.clone())?;
        rw.commit()?;
        Ok(business)
    }

    /// Replaces (or clears) a business's credentials
    pub fn set_credentials(
        &self,
        business_id_local: &str,
        credentials: Option<Credentials>,
    ) -> Result<Option<Business>> {
        self.modify::<Business, _>(business_id_local, |business| {
            business.credentials = credentials;
            true
        })
    }

    pub fn insert_store(&self, mut store: StoreLocal) -> Result<StoreLocal> {
        if store.id_local.is_none() {
            store.id_local = Some(Uuid::new_v4().to_string());
        }
        store.inserted_at = Some(Utc::now().to_rfc3339());
        let rw = self.db.rw_transaction()?;
        rw.insert(store.clone())?;
        rw.commit()?;
        Ok(store)
    }

    // ===== HIERARCHY =====

    /// Rows whose direct ancestor is `parent_id_local`, tombstones included
    pub fn children_of<T: ToInput + AncestorLocal>(&self, parent_id_local: &str) -> Result<Vec<T>> {
        Ok(self
            .all::<T>()?
            .into_iter()
            .filter(|row| row.ancestor_id_local().as_deref() == Some(parent_id_local))
            .collect())
    }

    // ===== SYNC QUERIES =====

    /// Rows still lacking a remote id, excluding tombstones
    pub fn missing_remote_id<T: ToInput + Syncable>(&self) -> Result<Vec<T>> {
        Ok(self
            .all::<T>()?
            .into_iter()
            .filter(|row| {
                row.remote_id().is_none() && row.sync_state().status != SyncStatus::PendingDelete
            })
            .collect())
    }

    pub fn with_status<T: ToInput + Syncable>(&self, status: SyncStatus) -> Result<Vec<T>> {
        Ok(self
            .all::<T>()?
            .into_iter()
            .filter(|row| row.sync_state().status == status)
            .collect())
    }

    // ===== CLAIMS =====

    /// Atomically marks a row `Pending` if it still needs a remote create and
    /// nobody else holds a fresh claim on it.
    pub fn claim_for_create<T>(
        &self,
        id_local: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<Claim<T>>
    where
        T: ToInput + Syncable + Clone,
    {
        let rw = self.db.rw_transaction()?;
        let current: Option<T> = rw.get().primary(Some(id_local.to_string()))?;
        let Some(mut row) = current else {
            return Ok(Claim::Missing);
        };

        let state = row.sync_state();
        if row.remote_id().is_some() || state.status == SyncStatus::PendingDelete {
            return Ok(Claim::NotNeeded);
        }
        if state.status == SyncStatus::Pending && !state.is_claim_stale(now, ttl) {
            return Ok(Claim::Busy);
        }

        row.sync_state_mut().mark_pending(now);
        rw.upsert(row.clone())?;
        rw.commit()?;
        Ok(Claim::Acquired(row))
    }

    /// Stores the remote id returned by a successful create.
    ///
    /// A row tombstoned while its create was in flight keeps `PendingDelete`
    /// so the caller can delete the fresh remote record.
    pub fn record_created<T>(
        &self,
        id_local: &str,
        remote_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<T>>
    where
        T: ToInput + Syncable + Clone,
    {
        self.modify::<T, _>(id_local, |row| {
            row.set_remote_id(remote_id.to_string());
            if row.sync_state().status != SyncStatus::PendingDelete {
                row.sync_state_mut().mark_synced(now);
            }
            true
        })
    }

    pub fn record_synced<T>(&self, id_local: &str, now: DateTime<Utc>) -> Result<Option<T>>
    where
        T: ToInput + Syncable + Clone,
    {
        self.modify::<T, _>(id_local, |row| {
            row.sync_state_mut().mark_synced(now);
            true
        })
    }

    /// Records a failed remote call. A tombstone keeps its status.
    pub fn record_failure<T>(
        &self,
        id_local: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<T>>
    where
        T: ToInput + Syncable + Clone,
    {
        self.modify::<T, _>(id_local, |row| {
            if row.sync_state().status == SyncStatus::PendingDelete {
                return false;
            }
            row.sync_state_mut().mark_failed(now, error.to_string());
            true
        })
    }

    /// Removes a row that was never created remotely, in the same write
    /// transaction that checks for an in-flight create.
    ///
    /// A row under a fresh `Pending` claim is tombstoned instead, so the
    /// claimant finds it and deletes the remote record it just created.
    pub fn delete_unsynced<T>(
        &self,
        id_local: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<LocalDelete<T>>
    where
        T: ToInput + Syncable + Clone,
    {
        let rw = self.db.rw_transaction()?;
        let current: Option<T> = rw.get().primary(Some(id_local.to_string()))?;
        let Some(mut row) = current else {
            return Ok(LocalDelete::Missing);
        };
        if row.remote_id().is_some() {
            return Ok(LocalDelete::HasRemote(row));
        }

        let state = row.sync_state();
        if state.status == SyncStatus::Pending && !state.is_claim_stale(now, ttl) {
            row.sync_state_mut()
                .mark_pending_delete(now, Some(CREATE_IN_FLIGHT.to_string()));
            rw.upsert(row)?;
            rw.commit()?;
            return Ok(LocalDelete::Tombstoned);
        }

        rw.remove(row)?;
        rw.commit()?;
        Ok(LocalDelete::Removed)
    }

    pub fn mark_pending_delete<T>(
        &self,
        id_local: &str,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<T>>
    where
        T: ToInput + Syncable + Clone,
    {
        self.modify::<T, _>(id_local, |row| {
            row.sync_state_mut().mark_pending_delete(now, error);
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_with_property() -> (LocalStorage, PropertyLocal) {
        let storage = LocalStorage::in_memory().unwrap();
        let business = storage
            .insert_business(Business::new("Acme".to_string(), None))
            .unwrap();
        let property = storage
            .insert_new(PropertyLocal {
                business_id_local: business.id_local.clone().unwrap(),
                name: "Harbour Mall".to_string(),
                ..Default::default()
            })
            .unwrap();
        (storage, property)
    }

    #[test]
    fn test_insert_assigns_local_id() {
        let (storage, property) = storage_with_property();
        let id = property.id_local.clone().unwrap();
        let loaded: PropertyLocal = storage.get(&id).unwrap().unwrap();
        assert_eq!(loaded.name, "Harbour Mall");
        assert_eq!(loaded.remote_id, None);
    }

    #[test]
    fn test_claim_is_exclusive_until_stale() {
        let (storage, property) = storage_with_property();
        let id = property.id_local.unwrap();
        let now = Utc::now();
        let ttl = chrono::Duration::seconds(300);

        let first = storage.claim_for_create::<PropertyLocal>(&id, now, ttl).unwrap();
        assert!(matches!(first, Claim::Acquired(_)));

        let second = storage.claim_for_create::<PropertyLocal>(&id, now, ttl).unwrap();
        assert_eq!(second, Claim::Busy);

        let later = now + chrono::Duration::seconds(301);
        let third = storage.claim_for_create::<PropertyLocal>(&id, later, ttl).unwrap();
        assert!(matches!(third, Claim::Acquired(_)));
    }

    #[test]
    fn test_claim_not_needed_after_create() {
        let (storage, property) = storage_with_property();
        let id = property.id_local.unwrap();
        let now = Utc::now();

        storage.record_created::<PropertyLocal>(&id, "P1", now).unwrap();
        let claim = storage
            .claim_for_create::<PropertyLocal>(&id, now, chrono::Duration::seconds(300))
            .unwrap();
        assert_eq!(claim, Claim::NotNeeded);
        assert!(storage.missing_remote_id::<PropertyLocal>().unwrap().is_empty());
    }

    #[test]
    fn test_tombstones_are_not_backfill_candidates() {
        let (storage, property) = storage_with_property();
        let id = property.id_local.unwrap();
        storage
            .mark_pending_delete::<PropertyLocal>(&id, None, Utc::now())
            .unwrap();

        assert!(storage.missing_remote_id::<PropertyLocal>().unwrap().is_empty());
        assert_eq!(
            storage.with_status::<PropertyLocal>(SyncStatus::PendingDelete).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_delete_unsynced_tombstones_fresh_claim() {
        let (storage, property) = storage_with_property();
        let id = property.id_local.unwrap();
        let now = Utc::now();
        let ttl = chrono::Duration::seconds(300);

        storage.claim_for_create::<PropertyLocal>(&id, now, ttl).unwrap();
        let outcome = storage.delete_unsynced::<PropertyLocal>(&id, now, ttl).unwrap();
        assert_eq!(outcome, LocalDelete::Tombstoned);

        // The claimant's create lands on the tombstone without reviving it
        let row = storage
            .record_created::<PropertyLocal>(&id, "P1", now)
            .unwrap()
            .unwrap();
        assert_eq!(row.remote_id.as_deref(), Some("P1"));
        assert_eq!(row.sync.status, SyncStatus::PendingDelete);
        assert_eq!(row.sync.last_error.as_deref(), Some(CREATE_IN_FLIGHT));
    }

    #[test]
    fn test_delete_unsynced_removes_idle_row() {
        let (storage, property) = storage_with_property();
        let id = property.id_local.unwrap();
        let ttl = chrono::Duration::seconds(300);

        let outcome = storage
            .delete_unsynced::<PropertyLocal>(&id, Utc::now(), ttl)
            .unwrap();
        assert_eq!(outcome, LocalDelete::Removed);
        assert!(storage.get::<PropertyLocal>(&id).unwrap().is_none());

        let recorded = storage
            .record_created::<PropertyLocal>(&id, "P1", Utc::now())
            .unwrap();
        assert!(recorded.is_none());
    }

    #[test]
    fn test_children_of_filters_by_parent() {
        let (storage, property) = storage_with_property();
        let id = property.id_local.unwrap();
        for name in ["North", "South"] {
            storage
                .insert_new(BuildingLocal {
                    property_id_local: id.clone(),
                    name: name.to_string(),
                    ..Default::default()
                })
                .unwrap();
        }
        storage
            .insert_new(BuildingLocal {
                property_id_local: "elsewhere".to_string(),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(storage.children_of::<BuildingLocal>(&id).unwrap().len(), 2);
        assert!(storage.children_of::<ZoneLocal>(&id).unwrap().is_empty());
    }

    #[test]
    fn test_on_disk_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");
        let path = path.to_str().unwrap();

        let id = {
            let storage = LocalStorage::open(Some(path)).unwrap();
            let business = storage
                .insert_business(Business::new("Acme".to_string(), None))
                .unwrap();
            business.id_local.unwrap()
        };

        let reopened = LocalStorage::open(Some(path)).unwrap();
        let business: Option<Business> = reopened.get(&id).unwrap();
        assert_eq!(business.map(|b| b.name), Some("Acme".to_string()));
    }
}
