pub mod serde_helpers;
pub mod v1;

// ===== VERSIONED MODELS FOLLOWING NATIVE_DB PATTERN =====
// Following the pattern from the native_db documentation:
// https://docs.rs/native_db/latest/native_db/

pub mod data {
    // Type aliases pointing to the latest versions
    pub type Business = super::v1::Business;
    pub type StoreLocal = super::v1::StoreLocal;
    pub type PropertyLocal = super::v1::PropertyLocal;
    pub type BuildingLocal = super::v1::BuildingLocal;
    pub type ZoneLocal = super::v1::ZoneLocal;
    pub type CameraLocal = super::v1::CameraLocal;

    // Re-export versioned modules for direct access
    pub use super::v1;
}

pub use data::*;

// Re-export common traits and enums that are shared across versions
pub use v1::{
    AncestorLocal, CameraStatus, Credentials, EntityKind, SyncState, SyncStatus, Syncable,
    ZoneType,
};
