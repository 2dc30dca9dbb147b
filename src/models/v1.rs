use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use native_db::{native_db, ToKey};
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

// ===== TRAITS =====

/// A local row that is mirrored to the remote platform.
///
/// `remote_id` is only ever assigned from a successful remote create (or an
/// adopted lookup after a conflict); `id_local` is the native_db primary key.
pub trait Syncable {
    const KIND: EntityKind;

    fn remote_id(&self) -> Option<String>;
    fn set_remote_id(&mut self, remote_id: String);
    fn id_local(&self) -> Option<String>;
    fn set_id_local(&mut self, id_local: String);
    fn sync_state(&self) -> &SyncState;
    fn sync_state_mut(&mut self) -> &mut SyncState;
    fn set_updated_at(&mut self, updated_at: String);
}

/// The local id of the row this entity hangs off (Business for a Property,
/// Property for a Building, and so on).
pub trait AncestorLocal {
    fn ancestor_id_local(&self) -> Option<String>;
    fn set_ancestor_id_local(&mut self, ancestor_id_local: String);
}

// ===== ENUMS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Property,
    Building,
    Zone,
    Camera,
}

impl EntityKind {
    /// Backfill order: each kind only advances once its parent kind is synced.
    pub const ORDERED: [EntityKind; 4] = [
        EntityKind::Property,
        EntityKind::Building,
        EntityKind::Zone,
        EntityKind::Camera,
    ];

    /// Path segment of the remote endpoint family.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Property => "properties",
            EntityKind::Building => "buildings",
            EntityKind::Zone => "zones",
            EntityKind::Camera => "cameras",
        }
    }

    pub fn singular(&self) -> &'static str {
        match self {
            EntityKind::Property => "property",
            EntityKind::Building => "building",
            EntityKind::Zone => "zone",
            EntityKind::Camera => "camera",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.singular())
    }
}

impl FromStr for EntityKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "property" | "properties" => Ok(EntityKind::Property),
            "building" | "buildings" => Ok(EntityKind::Building),
            "zone" | "zones" => Ok(EntityKind::Zone),
            "camera" | "cameras" => Ok(EntityKind::Camera),
            other => Err(anyhow!("Unknown entity kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Never attempted, or left behind by a skip.
    Unsynced,
    /// Claimed by a writer; a remote create is in flight.
    Pending,
    Synced,
    /// Last remote call failed; `last_error` says why.
    Failed,
    /// Tombstone: local delete waits for a confirmed remote delete.
    PendingDelete,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus::Unsynced
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    Entrance,
    Store,
    Retail,
    FoodCourt,
    Parking,
    Corridor,
    Other,
}

impl ZoneType {
    pub fn is_retail_like(&self) -> bool {
        matches!(self, ZoneType::Store | ZoneType::Retail)
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CameraStatus {
    Active,
    Inactive,
    Maintenance,
}

// ===== SYNC STATE =====

/// Remote-sync bookkeeping carried by every syncable row, kept apart from
/// "`remote_id` is null" so failed and never-attempted rows can be told apart.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncState {
    pub status: SyncStatus,
    pub last_attempt: Option<String>,
    pub last_error: Option<String>,
}

impl SyncState {
    pub fn mark_pending(&mut self, now: DateTime<Utc>) {
        self.status = SyncStatus::Pending;
        self.last_attempt = Some(now.to_rfc3339());
    }

    pub fn mark_synced(&mut self, now: DateTime<Utc>) {
        self.status = SyncStatus::Synced;
        self.last_attempt = Some(now.to_rfc3339());
        self.last_error = None;
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>, error: String) {
        self.status = SyncStatus::Failed;
        self.last_attempt = Some(now.to_rfc3339());
        self.last_error = Some(error);
    }

    pub fn mark_pending_delete(&mut self, now: DateTime<Utc>, error: Option<String>) {
        self.status = SyncStatus::PendingDelete;
        self.last_attempt = Some(now.to_rfc3339());
        self.last_error = error;
    }

    /// A `Pending` claim older than `ttl` is treated as abandoned.
    pub fn is_claim_stale(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        if self.status != SyncStatus::Pending {
            return false;
        }
        match self
            .last_attempt
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        {
            Some(at) => now.signed_duration_since(at.with_timezone(&Utc)) >= ttl,
            None => true,
        }
    }
}

// ===== CREDENTIALS =====

/// Remote-platform credentials for one Business.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub platform_id: String,
    pub api_key: String,
    pub business_remote_id: String,
}

impl Credentials {
    pub fn new(platform_id: String, api_key: String, business_remote_id: String) -> Self {
        Self {
            platform_id,
            api_key,
            business_remote_id,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("platform_id", &self.platform_id)
            .field("api_key", &"<redacted>")
            .field("business_remote_id", &self.business_remote_id)
            .finish()
    }
}

// ===== LOCAL ROWS =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 1, version = 1)]
#[native_db]
pub struct Business {
    #[primary_key]
    pub id_local: Option<String>,
    pub name: String,
    pub credentials: Option<Credentials>,
    pub inserted_at: Option<String>,
}

impl Default for Business {
    fn default() -> Self {
        Self {
            id_local: None,
            name: String::new(),
            credentials: None,
            inserted_at: None,
        }
    }
}

impl Business {
    pub fn new(name: String, credentials: Option<Credentials>) -> Self {
        Self {
            name,
            credentials,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 2, version = 1)]
#[native_db]
pub struct StoreLocal {
    #[primary_key]
    pub id_local: Option<String>,
    pub business_id_local: String,
    pub name: String,
    pub inserted_at: Option<String>,
}

impl StoreLocal {
    pub fn new(business_id_local: String, name: String) -> Self {
        Self {
            id_local: None,
            business_id_local,
            name,
            inserted_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 3, version = 1)]
#[native_db]
pub struct PropertyLocal {
    #[primary_key]
    pub id_local: Option<String>,
    pub remote_id: Option<String>,
    pub business_id_local: String,
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub timezone: Option<String>,
    pub inserted_at: Option<String>,
    pub updated_at: Option<String>,
    pub sync: SyncState,
}

impl Default for PropertyLocal {
    fn default() -> Self {
        Self {
            id_local: None,
            remote_id: None,
            business_id_local: String::new(),
            name: String::new(),
            address: None,
            city: None,
            country: None,
            timezone: None,
            inserted_at: None,
            updated_at: None,
            sync: SyncState::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 4, version = 1)]
#[native_db]
pub struct BuildingLocal {
    #[primary_key]
    pub id_local: Option<String>,
    pub remote_id: Option<String>,
    pub property_id_local: String,
    pub name: String,
    pub floor_count: u32,
    pub below_ground_floors: Option<u32>,
    pub inserted_at: Option<String>,
    pub updated_at: Option<String>,
    pub sync: SyncState,
}

impl Default for BuildingLocal {
    fn default() -> Self {
        Self {
            id_local: None,
            remote_id: None,
            property_id_local: String::new(),
            name: String::new(),
            floor_count: 1,
            below_ground_floors: None,
            inserted_at: None,
            updated_at: None,
            sync: SyncState::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 5, version = 1)]
#[native_db]
pub struct ZoneLocal {
    #[primary_key]
    pub id_local: Option<String>,
    pub remote_id: Option<String>,
    pub building_id_local: String,
    pub property_id_local: String,
    pub store_id_local: Option<String>,
    pub name: String,
    pub zone_type: ZoneType,
    pub floor: Option<i32>,
    pub inserted_at: Option<String>,
    pub updated_at: Option<String>,
    pub sync: SyncState,
}

impl Default for ZoneLocal {
    fn default() -> Self {
        Self {
            id_local: None,
            remote_id: None,
            building_id_local: String::new(),
            property_id_local: String::new(),
            store_id_local: None,
            name: String::new(),
            zone_type: ZoneType::Other,
            floor: None,
            inserted_at: None,
            updated_at: None,
            sync: SyncState::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 6, version = 1)]
#[native_db]
pub struct CameraLocal {
    #[primary_key]
    pub id_local: Option<String>,
    pub remote_id: Option<String>,
    pub zone_id_local: String,
    pub name: String,
    pub rtsp_url: String,
    pub status: CameraStatus,
    pub capabilities: BTreeMap<String, bool>,
    pub location: Option<String>,
    pub direction: Option<String>,
    pub inserted_at: Option<String>,
    pub updated_at: Option<String>,
    pub sync: SyncState,
}

impl Default for CameraLocal {
    fn default() -> Self {
        Self {
            id_local: None,
            remote_id: None,
            zone_id_local: String::new(),
            name: String::new(),
            rtsp_url: String::new(),
            status: CameraStatus::Active,
            capabilities: BTreeMap::new(),
            location: None,
            direction: None,
            inserted_at: None,
            updated_at: None,
            sync: SyncState::default(),
        }
    }
}

// ===== TRAIT IMPLS =====

macro_rules! impl_syncable {
    ($ty:ty, $kind:expr, $ancestor:ident) => {
        impl Syncable for $ty {
            const KIND: EntityKind = $kind;

            fn remote_id(&self) -> Option<String> {
                self.remote_id.clone()
            }

            fn set_remote_id(&mut self, remote_id: String) {
                self.remote_id = Some(remote_id);
            }

            fn id_local(&self) -> Option<String> {
                self.id_local.clone()
            }

            fn set_id_local(&mut self, id_local: String) {
                self.id_local = Some(id_local);
            }

            fn sync_state(&self) -> &SyncState {
                &self.sync
            }

            fn sync_state_mut(&mut self) -> &mut SyncState {
                &mut self.sync
            }

            fn set_updated_at(&mut self, updated_at: String) {
                self.updated_at = Some(updated_at);
            }
        }

        impl AncestorLocal for $ty {
            fn ancestor_id_local(&self) -> Option<String> {
                Some(self.$ancestor.clone()).filter(|id| !id.is_empty())
            }

            fn set_ancestor_id_local(&mut self, ancestor_id_local: String) {
                self.$ancestor = ancestor_id_local;
            }
        }
    };
}

impl_syncable!(PropertyLocal, EntityKind::Property, business_id_local);
impl_syncable!(BuildingLocal, EntityKind::Building, property_id_local);
impl_syncable!(ZoneLocal, EntityKind::Zone, building_id_local);
impl_syncable!(CameraLocal, EntityKind::Camera, zone_id_local);
