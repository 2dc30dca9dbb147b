#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use site_sync::client::{RemotePlatform, RemoteRecord};
use site_sync::error::RemoteError;
use site_sync::models::{
    BuildingLocal, Business, CameraLocal, Credentials, EntityKind, PropertyLocal, SyncState,
    SyncStatus, ZoneLocal, ZoneType,
};
use site_sync::storage::LocalStorage;
use site_sync::sync::SyncEngine;

/// One call seen by the fake platform.
#[derive(Debug, Clone)]
pub struct Call {
    pub op: &'static str,
    pub kind: EntityKind,
    pub credentials: Credentials,
    pub remote_id: Option<String>,
    pub body: Option<Value>,
}

impl Call {
    pub fn external_id(&self) -> Option<&str> {
        self.body.as_ref()?.get("external_id")?.as_str()
    }
}

/// In-process stand-in for the remote platform.
///
/// Creates hand out ids like `P1`, `B2`; a second create for the same
/// external id answers 409 like a deduplicating platform would.
#[derive(Default)]
pub struct FakeRemote {
    calls: Mutex<Vec<Call>>,
    next_id: AtomicUsize,
    by_external_id: Mutex<HashMap<String, String>>,
    failing_creates: Mutex<HashSet<String>>,
    creates_down: Mutex<bool>,
    update_failure: Mutex<Option<u16>>,
    delete_failure: Mutex<Option<u16>>,
    latency: Mutex<Option<Duration>>,
}

fn prefix(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Property => "P",
        EntityKind::Building => "B",
        EntityKind::Zone => "Z",
        EntityKind::Camera => "C",
    }
}

fn status(status: u16) -> RemoteError {
    RemoteError::Status {
        status,
        body: format!("simulated HTTP {}", status),
    }
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        let remote = Self::default();
        *remote.latency.lock().unwrap() = Some(latency);
        Arc::new(remote)
    }

    pub fn fail_create_for(&self, external_id: &str) {
        self.failing_creates.lock().unwrap().insert(external_id.to_string());
    }

    /// Every create answers 503 until `heal_creates`.
    pub fn fail_all_creates(&self) {
        *self.creates_down.lock().unwrap() = true;
    }

    pub fn heal_creates(&self) {
        self.failing_creates.lock().unwrap().clear();
        *self.creates_down.lock().unwrap() = false;
    }

    pub fn fail_updates(&self, code: Option<u16>) {
        *self.update_failure.lock().unwrap() = code;
    }

    pub fn fail_deletes(&self, code: Option<u16>) {
        *self.delete_failure.lock().unwrap() = code;
    }

    /// Registers a record that already exists remotely for `external_id`.
    pub fn preexisting(&self, external_id: &str, remote_id: &str) {
        self.by_external_id
            .lock()
            .unwrap()
            .insert(external_id.to_string(), remote_id.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, op: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    fn record(
        &self,
        op: &'static str,
        kind: EntityKind,
        credentials: &Credentials,
        remote_id: Option<&str>,
        body: Option<Value>,
    ) {
        self.calls.lock().unwrap().push(Call {
            op,
            kind,
            credentials: credentials.clone(),
            remote_id: remote_id.map(str::to_string),
            body,
        });
    }

    async fn pause(&self) {
        let latency = *self.latency.lock().unwrap();
        match latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
    }
}

#[async_trait]
impl RemotePlatform for FakeRemote {
    async fn create(
        &self,
        credentials: &Credentials,
        kind: EntityKind,
        body: Value,
    ) -> Result<RemoteRecord, RemoteError> {
        self.record("create", kind, credentials, None, Some(body.clone()));
        self.pause().await;

        if *self.creates_down.lock().unwrap() {
            return Err(status(503));
        }
        let external_id = body["external_id"].as_str().unwrap_or_default().to_string();
        if self.failing_creates.lock().unwrap().contains(&external_id) {
            return Err(status(500));
        }

        let mut existing = self.by_external_id.lock().unwrap();
        if existing.contains_key(&external_id) {
            return Err(status(409));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let remote_id = format!("{}{}", prefix(kind), n);
        existing.insert(external_id, remote_id.clone());
        Ok(RemoteRecord::with_id(remote_id))
    }

    async fn update(
        &self,
        credentials: &Credentials,
        kind: EntityKind,
        remote_id: &str,
        body: Value,
    ) -> Result<RemoteRecord, RemoteError> {
        self.record("update", kind, credentials, Some(remote_id), Some(body));
        self.pause().await;
        match *self.update_failure.lock().unwrap() {
            Some(code) => Err(status(code)),
            None => Ok(RemoteRecord::with_id(remote_id)),
        }
    }

    async fn delete(
        &self,
        credentials: &Credentials,
        kind: EntityKind,
        remote_id: &str,
    ) -> Result<(), RemoteError> {
        self.record("delete", kind, credentials, Some(remote_id), None);
        self.pause().await;
        match *self.delete_failure.lock().unwrap() {
            Some(code) => Err(status(code)),
            None => Ok(()),
        }
    }

    async fn find_by_external_id(
        &self,
        credentials: &Credentials,
        kind: EntityKind,
        external_id: &str,
    ) -> Result<Option<RemoteRecord>, RemoteError> {
        self.record("find", kind, credentials, None, None);
        Ok(self
            .by_external_id
            .lock()
            .unwrap()
            .get(external_id)
            .map(|id| RemoteRecord::with_id(id.clone())))
    }
}

// ===== FIXTURES =====

pub struct Fixture {
    pub engine: SyncEngine,
    pub remote: Arc<FakeRemote>,
}

pub fn fixture() -> Fixture {
    fixture_with(FakeRemote::new())
}

pub fn fixture_with(remote: Arc<FakeRemote>) -> Fixture {
    let storage = LocalStorage::in_memory().unwrap();
    let engine = SyncEngine::new(Arc::new(storage), remote.clone());
    Fixture { engine, remote }
}

pub fn credentials_for(tag: &str) -> Credentials {
    Credentials::new(
        format!("platform-{}", tag),
        format!("key-{}", tag),
        format!("biz-{}", tag),
    )
}

impl Fixture {
    pub fn storage(&self) -> &LocalStorage {
        self.engine.storage()
    }

    /// A business whose remote business id is `biz-<tag>`.
    pub fn business(&self, tag: &str) -> String {
        self.storage()
            .insert_business(Business::new(tag.to_string(), Some(credentials_for(tag))))
            .unwrap()
            .id_local
            .unwrap()
    }

    pub fn business_without_credentials(&self, tag: &str) -> String {
        self.storage()
            .insert_business(Business::new(tag.to_string(), None))
            .unwrap()
            .id_local
            .unwrap()
    }

    pub fn seed_property(&self, business_id: &str, remote_id: Option<&str>) -> String {
        self.storage()
            .insert_new(PropertyLocal {
                business_id_local: business_id.to_string(),
                name: "Harbour Mall".to_string(),
                remote_id: remote_id.map(str::to_string),
                sync: seeded_state(remote_id),
                ..Default::default()
            })
            .unwrap()
            .id_local
            .unwrap()
    }

    pub fn seed_building(&self, property_id: &str, remote_id: Option<&str>) -> String {
        self.storage()
            .insert_new(BuildingLocal {
                property_id_local: property_id.to_string(),
                name: "North Tower".to_string(),
                floor_count: 4,
                remote_id: remote_id.map(str::to_string),
                sync: seeded_state(remote_id),
                ..Default::default()
            })
            .unwrap()
            .id_local
            .unwrap()
    }

    pub fn seed_zone(&self, building_id: &str, remote_id: Option<&str>) -> String {
        let building: BuildingLocal = self.storage().get(building_id).unwrap().unwrap();
        self.storage()
            .insert_new(ZoneLocal {
                building_id_local: building_id.to_string(),
                property_id_local: building.property_id_local,
                name: "Food hall".to_string(),
                zone_type: ZoneType::FoodCourt,
                remote_id: remote_id.map(str::to_string),
                sync: seeded_state(remote_id),
                ..Default::default()
            })
            .unwrap()
            .id_local
            .unwrap()
    }

    pub fn seed_camera(&self, zone_id: &str, remote_id: Option<&str>) -> String {
        self.storage()
            .insert_new(CameraLocal {
                zone_id_local: zone_id.to_string(),
                name: "Entrance cam".to_string(),
                rtsp_url: "rtsp://10.0.0.7/live".to_string(),
                remote_id: remote_id.map(str::to_string),
                sync: seeded_state(remote_id),
                ..Default::default()
            })
            .unwrap()
            .id_local
            .unwrap()
    }
}

fn seeded_state(remote_id: Option<&str>) -> SyncState {
    SyncState {
        status: if remote_id.is_some() {
            SyncStatus::Synced
        } else {
            SyncStatus::Unsynced
        },
        ..Default::default()
    }
}
