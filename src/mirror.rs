//! Create/update/delete of site entities with an immediate best-effort remote
//! mirror.
//!
//! The local write always happens first and always reflects the caller's
//! request; the remote attempt is reported alongside it and never turns a
//! successful local mutation into a failure. Deletes are the exception: the
//! local row is only removed once the remote side confirms.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::error::{SyncError, SyncResult};
use crate::models::{
    BuildingLocal, Business, CameraLocal, CameraStatus, PropertyLocal, StoreLocal, SyncStatus,
    Syncable, ZoneLocal, ZoneType,
};
use crate::sync::{Actor, Attempt, RemoteDelete, RemoteEntity, SyncEngine};

// ===== INPUTS =====

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyFields {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingFields {
    pub name: String,
    pub floor_count: u32,
    #[serde(default)]
    pub below_ground_floors: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneFields {
    pub name: String,
    pub zone_type: ZoneType,
    #[serde(default)]
    pub floor: Option<i32>,
    #[serde(default)]
    pub store_id_local: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraFields {
    pub name: String,
    pub rtsp_url: String,
    pub status: CameraStatus,
    #[serde(default)]
    pub capabilities: BTreeMap<String, bool>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
}

// ===== OUTCOMES =====

/// The committed local row plus what happened remotely. `remote` is `None`
/// when no remote call applied (an update of a row that was never created
/// remotely).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MirrorOutcome<T> {
    pub entity: T,
    pub remote: Option<Attempt>,
}

// ===== VALIDATION =====

fn required_name(name: &str, what: &str) -> SyncResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SyncError::Validation(format!("{} name must not be empty", what)));
    }
    Ok(name.to_string())
}

fn validate_building(fields: &BuildingFields) -> SyncResult<()> {
    required_name(&fields.name, "building")?;
    if fields.floor_count == 0 {
        return Err(SyncError::Validation(
            "floor_count must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_camera(fields: &CameraFields) -> SyncResult<()> {
    required_name(&fields.name, "camera")?;
    let url = Url::parse(fields.rtsp_url.trim())
        .map_err(|e| SyncError::Validation(format!("rtsp_url is not a valid URL: {}", e)))?;
    if !matches!(url.scheme(), "rtsp" | "rtsps") {
        return Err(SyncError::Validation(format!(
            "rtsp_url must use rtsp:// or rtsps://, got {}://",
            url.scheme()
        )));
    }
    Ok(())
}

fn ensure_not_deleting<T: Syncable>(row: &T, id_local: &str) -> SyncResult<()> {
    if row.sync_state().status == SyncStatus::PendingDelete {
        return Err(SyncError::Validation(format!(
            "{} {} is being deleted",
            T::KIND,
            id_local
        )));
    }
    Ok(())
}

fn ensure_childless(children: usize, kind: &str, id_local: &str, child: &str) -> SyncResult<()> {
    if children > 0 {
        return Err(SyncError::Validation(format!(
            "{} {} still has {} {}",
            kind, id_local, children, child
        )));
    }
    Ok(())
}

impl SyncEngine {
    // ===== SHARED FLOW =====

    async fn mirror_create<T: RemoteEntity>(&self, row: T) -> SyncResult<MirrorOutcome<T>> {
        let row = self.storage().insert_new(row)?;
        let id_local = row
            .id_local()
            .ok_or_else(|| SyncError::Storage("inserted row has no local id".to_string()))?;
        info!(entity = %T::KIND, id_local = %id_local, "Created local record");

        let attempt = self.sync_create::<T>(&id_local).await?;
        Ok(MirrorOutcome {
            entity: self.require(&id_local)?,
            remote: Some(attempt),
        })
    }

    async fn mirror_update<T, F>(&self, id_local: &str, apply: F) -> SyncResult<MirrorOutcome<T>>
    where
        T: RemoteEntity,
        F: FnOnce(&mut T),
    {
        let now = Utc::now().to_rfc3339();
        self.storage()
            .modify::<T, _>(id_local, |row| {
                apply(row);
                row.set_updated_at(now);
                true
            })?
            .ok_or_else(|| SyncError::NotFound(format!("{} {}", T::KIND, id_local)))?;

        let attempt = self.sync_update::<T>(id_local).await?;
        Ok(MirrorOutcome {
            entity: self.require(id_local)?,
            remote: attempt,
        })
    }

    fn load_for_write<T: RemoteEntity>(&self, actor: &Actor, id_local: &str) -> SyncResult<T> {
        let row: T = self
            .storage()
            .get(id_local)?
            .ok_or_else(|| SyncError::NotFound(format!("{} {}", T::KIND, id_local)))?;
        actor.authorize(&row.business_id_local(self)?)?;
        ensure_not_deleting(&row, id_local)?;
        Ok(row)
    }

    fn load_parent<T: RemoteEntity>(&self, actor: &Actor, id_local: &str) -> SyncResult<T> {
        let what = format!("{} {}", T::KIND, id_local);
        let parent: T = self
            .storage()
            .get(id_local)?
            .ok_or_else(|| SyncError::NotFound(what.clone()))?;
        let business = parent.business_id_local(self)?;
        actor.scope(&business, &what)?;
        actor.authorize(&business)?;
        ensure_not_deleting(&parent, id_local)?;
        Ok(parent)
    }

    fn load_store(&self, business_id_local: &str, store_id_local: Option<&str>) -> SyncResult<()> {
        let Some(store_id) = store_id_local else {
            return Ok(());
        };
        match self.storage().get::<StoreLocal>(store_id)? {
            Some(store) if store.business_id_local == business_id_local => Ok(()),
            _ => Err(SyncError::NotFound(format!("store {}", store_id))),
        }
    }

    // ===== PROPERTIES =====

    pub async fn create_property(
        &self,
        actor: &Actor,
        business_id_local: &str,
        fields: PropertyFields,
    ) -> SyncResult<MirrorOutcome<PropertyLocal>> {
        let name = required_name(&fields.name, "property")?;
        let what = format!("business {}", business_id_local);
        actor.scope(business_id_local, &what)?;
        self.storage()
            .get::<Business>(business_id_local)?
            .ok_or(SyncError::NotFound(what))?;
        actor.authorize(business_id_local)?;

        let now = Utc::now().to_rfc3339();
        self.mirror_create(PropertyLocal {
            business_id_local: business_id_local.to_string(),
            name,
            address: fields.address,
            city: fields.city,
            country: fields.country,
            timezone: fields.timezone,
            inserted_at: Some(now.clone()),
            updated_at: Some(now),
            ..Default::default()
        })
        .await
    }

    pub async fn update_property(
        &self,
        actor: &Actor,
        id_local: &str,
        fields: PropertyFields,
    ) -> SyncResult<MirrorOutcome<PropertyLocal>> {
        let name = required_name(&fields.name, "property")?;
        self.load_for_write::<PropertyLocal>(actor, id_local)?;
        self.mirror_update::<PropertyLocal, _>(id_local, |p| {
            p.name = name;
            p.address = fields.address;
            p.city = fields.city;
            p.country = fields.country;
            p.timezone = fields.timezone;
        })
        .await
    }

    pub async fn delete_property(&self, actor: &Actor, id_local: &str) -> SyncResult<RemoteDelete> {
        self.load_for_write::<PropertyLocal>(actor, id_local)?;
        let children = self.storage().children_of::<BuildingLocal>(id_local)?.len();
        ensure_childless(children, "property", id_local, "buildings")?;
        self.sync_delete::<PropertyLocal>(id_local).await
    }

    // ===== BUILDINGS =====

    pub async fn create_building(
        &self,
        actor: &Actor,
        property_id_local: &str,
        fields: BuildingFields,
    ) -> SyncResult<MirrorOutcome<BuildingLocal>> {
        validate_building(&fields)?;
        self.load_parent::<PropertyLocal>(actor, property_id_local)?;

        let now = Utc::now().to_rfc3339();
        self.mirror_create(BuildingLocal {
            property_id_local: property_id_local.to_string(),
            name: fields.name.trim().to_string(),
            floor_count: fields.floor_count,
            below_ground_floors: fields.below_ground_floors,
            inserted_at: Some(now.clone()),
            updated_at: Some(now),
            ..Default::default()
        })
        .await
    }

    pub async fn update_building(
        &self,
        actor: &Actor,
        id_local: &str,
        fields: BuildingFields,
    ) -> SyncResult<MirrorOutcome<BuildingLocal>> {
        validate_building(&fields)?;
        self.load_for_write::<BuildingLocal>(actor, id_local)?;
        self.mirror_update::<BuildingLocal, _>(id_local, |b| {
            b.name = fields.name.trim().to_string();
            b.floor_count = fields.floor_count;
            b.below_ground_floors = fields.below_ground_floors;
        })
        .await
    }

    pub async fn delete_building(&self, actor: &Actor, id_local: &str) -> SyncResult<RemoteDelete> {
        self.load_for_write::<BuildingLocal>(actor, id_local)?;
        let children = self.storage().children_of::<ZoneLocal>(id_local)?.len();
        ensure_childless(children, "building", id_local, "zones")?;
        self.sync_delete::<BuildingLocal>(id_local).await
    }

    // ===== ZONES =====

    pub async fn create_zone(
        &self,
        actor: &Actor,
        building_id_local: &str,
        fields: ZoneFields,
    ) -> SyncResult<MirrorOutcome<ZoneLocal>> {
        let name = required_name(&fields.name, "zone")?;
        let building = self.load_parent::<BuildingLocal>(actor, building_id_local)?;
        let business = building.business_id_local(self)?;
        self.load_store(&business, fields.store_id_local.as_deref())?;

        let now = Utc::now().to_rfc3339();
        self.mirror_create(ZoneLocal {
            building_id_local: building_id_local.to_string(),
            property_id_local: building.property_id_local,
            store_id_local: fields.store_id_local,
            name,
            zone_type: fields.zone_type,
            floor: fields.floor,
            inserted_at: Some(now.clone()),
            updated_at: Some(now),
            ..Default::default()
        })
        .await
    }

    pub async fn update_zone(
        &self,
        actor: &Actor,
        id_local: &str,
        fields: ZoneFields,
    ) -> SyncResult<MirrorOutcome<ZoneLocal>> {
        let name = required_name(&fields.name, "zone")?;
        let zone = self.load_for_write::<ZoneLocal>(actor, id_local)?;
        let business = zone.business_id_local(self)?;
        self.load_store(&business, fields.store_id_local.as_deref())?;

        self.mirror_update::<ZoneLocal, _>(id_local, |z| {
            z.name = name;
            z.zone_type = fields.zone_type;
            z.floor = fields.floor;
            z.store_id_local = fields.store_id_local;
        })
        .await
    }

    pub async fn delete_zone(&self, actor: &Actor, id_local: &str) -> SyncResult<RemoteDelete> {
        self.load_for_write::<ZoneLocal>(actor, id_local)?;
        let children = self.storage().children_of::<CameraLocal>(id_local)?.len();
        ensure_childless(children, "zone", id_local, "cameras")?;
        self.sync_delete::<ZoneLocal>(id_local).await
    }

    // ===== CAMERAS =====

    pub async fn create_camera(
        &self,
        actor: &Actor,
        zone_id_local: &str,
        fields: CameraFields,
    ) -> SyncResult<MirrorOutcome<CameraLocal>> {
        validate_camera(&fields)?;
        self.load_parent::<ZoneLocal>(actor, zone_id_local)?;

        let now = Utc::now().to_rfc3339();
        self.mirror_create(CameraLocal {
            zone_id_local: zone_id_local.to_string(),
            name: fields.name.trim().to_string(),
            rtsp_url: fields.rtsp_url.trim().to_string(),
            status: fields.status,
            capabilities: fields.capabilities,
            location: fields.location,
            direction: fields.direction,
            inserted_at: Some(now.clone()),
            updated_at: Some(now),
            ..Default::default()
        })
        .await
    }

    pub async fn update_camera(
        &self,
        actor: &Actor,
        id_local: &str,
        fields: CameraFields,
    ) -> SyncResult<MirrorOutcome<CameraLocal>> {
        validate_camera(&fields)?;
        self.load_for_write::<CameraLocal>(actor, id_local)?;
        self.mirror_update::<CameraLocal, _>(id_local, |c| {
            c.name = fields.name.trim().to_string();
            c.rtsp_url = fields.rtsp_url.trim().to_string();
            c.status = fields.status;
            c.capabilities = fields.capabilities;
            c.location = fields.location;
            c.direction = fields.direction;
        })
        .await
    }

    pub async fn delete_camera(&self, actor: &Actor, id_local: &str) -> SyncResult<RemoteDelete> {
        self.load_for_write::<CameraLocal>(actor, id_local)?;
        self.sync_delete::<CameraLocal>(id_local).await
    }
}
