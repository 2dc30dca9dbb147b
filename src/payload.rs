//! Request bodies for the remote platform, built from local rows plus the
//! already-resolved remote ids of their parents.
//!
//! Optional local fields are omitted when absent, never sent as `null`.
//! The one exception is a zone's `store_id` on update, which is sent as an
//! explicit `null` so the remote side clears a previously linked store.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::RemoteError;
use crate::models::{
    BuildingLocal, CameraLocal, CameraStatus, Credentials, PropertyLocal, StoreLocal, ZoneLocal,
    ZoneType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadMode {
    Create,
    Update,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyPayload {
    pub external_id: String,
    pub business_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildingPayload {
    pub external_id: String,
    pub property_id: String,
    pub name: String,
    pub floor_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub below_ground_floor: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZonePayload {
    pub external_id: String,
    pub property_id: String,
    pub building_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub zone_type: ZoneType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub floor: Option<i32>,
    /// `None` omits the key, `Some(None)` sends `null`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_id: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraPayload {
    pub external_id: String,
    pub zone_id: String,
    pub name: String,
    pub rtsp_url: String,
    pub status: CameraStatus,
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
}

pub fn property_payload(property: &PropertyLocal, credentials: &Credentials) -> PropertyPayload {
    PropertyPayload {
        external_id: property.id_local.clone().unwrap_or_default(),
        business_id: credentials.business_remote_id.clone(),
        name: property.name.clone(),
        address: non_blank(&property.address),
        city: non_blank(&property.city),
        country: non_blank(&property.country),
        timezone: non_blank(&property.timezone),
    }
}

pub fn building_payload(building: &BuildingLocal, property_remote_id: &str) -> BuildingPayload {
    BuildingPayload {
        external_id: building.id_local.clone().unwrap_or_default(),
        property_id: property_remote_id.to_string(),
        name: building.name.clone(),
        floor_count: building.floor_count,
        below_ground_floor: building.below_ground_floors,
    }
}

pub fn zone_payload(
    zone: &ZoneLocal,
    property_remote_id: &str,
    building_remote_id: &str,
    store: Option<&StoreLocal>,
    mode: PayloadMode,
) -> ZonePayload {
    let linked_store = store
        .filter(|_| zone.zone_type.is_retail_like())
        .and_then(|s| s.id_local.clone());

    let store_id = match (linked_store, mode) {
        (Some(id), _) => Some(Some(id)),
        (None, PayloadMode::Create) => None,
        (None, PayloadMode::Update) => Some(None),
    };

    ZonePayload {
        external_id: zone.id_local.clone().unwrap_or_default(),
        property_id: property_remote_id.to_string(),
        building_id: building_remote_id.to_string(),
        name: zone.name.clone(),
        zone_type: zone.zone_type,
        floor: zone.floor,
        store_id,
    }
}

pub fn camera_payload(camera: &CameraLocal, zone_remote_id: &str) -> CameraPayload {
    CameraPayload {
        external_id: camera.id_local.clone().unwrap_or_default(),
        zone_id: zone_remote_id.to_string(),
        name: camera.name.clone(),
        rtsp_url: camera.rtsp_url.clone(),
        status: camera.status,
        capabilities: flatten_capabilities(&camera.capabilities),
        location: non_blank(&camera.location),
        direction: non_blank(&camera.direction),
    }
}

/// Keeps only the capability names whose flag is `true`.
pub fn flatten_capabilities(capabilities: &BTreeMap<String, bool>) -> Vec<String> {
    capabilities
        .iter()
        .filter(|(_, enabled)| **enabled)
        .map(|(name, _)| name.clone())
        .collect()
}

pub fn to_body<T: Serialize>(payload: &T) -> Result<serde_json::Value, RemoteError> {
    serde_json::to_value(payload).map_err(|e| RemoteError::Decode(e.to_string()))
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
