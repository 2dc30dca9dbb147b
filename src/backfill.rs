//! On-demand reconciliation jobs.
//!
//! Each job isolates its candidates: one failing remote call is recorded in
//! the report and never stops the others. Candidates run with bounded
//! parallelism; a child whose parent is still unsynced is skipped, so jobs
//! must run parent kinds first (`backfill_all` does).

use futures::stream::{self, StreamExt};
use tracing::info;

use crate::error::SyncResult;
use crate::models::{BuildingLocal, CameraLocal, EntityKind, PropertyLocal, SyncStatus, ZoneLocal};
use crate::report::SyncReport;
use crate::sync::{Attempt, RemoteDelete, RemoteEntity, SyncEngine};

impl SyncEngine {
    /// Creates remote records for every local row of `kind` still lacking a
    /// remote id.
    pub async fn backfill(&self, kind: EntityKind) -> SyncResult<SyncReport> {
        match kind {
            EntityKind::Property => self.backfill_kind::<PropertyLocal>().await,
            EntityKind::Building => self.backfill_kind::<BuildingLocal>().await,
            EntityKind::Zone => self.backfill_kind::<ZoneLocal>().await,
            EntityKind::Camera => self.backfill_kind::<CameraLocal>().await,
        }
    }

    /// Runs the four backfills parents-first, so one call can sync a whole
    /// freshly created tree.
    pub async fn backfill_all(&self) -> SyncResult<Vec<SyncReport>> {
        let mut reports = Vec::with_capacity(EntityKind::ORDERED.len());
        for kind in EntityKind::ORDERED {
            reports.push(self.backfill(kind).await?);
        }
        Ok(reports)
    }

    pub async fn backfill_kind<T: RemoteEntity>(&self) -> SyncResult<SyncReport> {
        let ids: Vec<String> = self
            .storage()
            .missing_remote_id::<T>()?
            .iter()
            .filter_map(|row| row.id_local())
            .collect();

        let mut report = SyncReport::new(T::KIND, ids.len());
        if ids.is_empty() {
            info!(entity = %T::KIND, "No candidates without remote id");
            return Ok(report);
        }

        let results: Vec<_> = stream::iter(ids)
            .map(|id_local| {
                let engine = self.clone();
                async move {
                    let result = engine.sync_create::<T>(&id_local).await;
                    (id_local, result)
                }
            })
            .buffer_unordered(self.concurrency())
            .collect()
            .await;

        for (id_local, result) in results {
            report.record(id_local, result);
        }
        let report = report.finish();

        info!(
            entity = %T::KIND,
            candidates = report.candidates,
            synced = report.succeeded,
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Backfill finished"
        );
        Ok(report)
    }

    /// Re-sends updates for rows whose last remote update failed.
    pub async fn retry_failed_updates(&self, kind: EntityKind) -> SyncResult<SyncReport> {
        match kind {
            EntityKind::Property => self.retry_failed_kind::<PropertyLocal>().await,
            EntityKind::Building => self.retry_failed_kind::<BuildingLocal>().await,
            EntityKind::Zone => self.retry_failed_kind::<ZoneLocal>().await,
            EntityKind::Camera => self.retry_failed_kind::<CameraLocal>().await,
        }
    }

    async fn retry_failed_kind<T: RemoteEntity>(&self) -> SyncResult<SyncReport> {
        // Failed rows without a remote id are create failures; backfill owns those.
        let ids: Vec<String> = self
            .storage()
            .with_status::<T>(SyncStatus::Failed)?
            .iter()
            .filter(|row| row.remote_id().is_some())
            .filter_map(|row| row.id_local())
            .collect();

        let mut report = SyncReport::new(T::KIND, ids.len());
        let results: Vec<_> = stream::iter(ids)
            .map(|id_local| {
                let engine = self.clone();
                async move {
                    let result = engine.sync_update::<T>(&id_local).await;
                    (id_local, result)
                }
            })
            .buffer_unordered(self.concurrency())
            .collect()
            .await;

        for (id_local, result) in results {
            if let Some(result) = result.transpose() {
                report.record(id_local, result);
            }
        }
        let report = report.finish();

        info!(
            entity = %T::KIND,
            candidates = report.candidates,
            synced = report.succeeded,
            failed = report.failed.len(),
            "Failed-update retry finished"
        );
        Ok(report)
    }

    /// Retries remote deletes for tombstoned rows, removing each local row once
    /// its remote record is confirmed gone.
    pub async fn purge_tombstones(&self, kind: EntityKind) -> SyncResult<SyncReport> {
        match kind {
            EntityKind::Property => self.purge_kind::<PropertyLocal>().await,
            EntityKind::Building => self.purge_kind::<BuildingLocal>().await,
            EntityKind::Zone => self.purge_kind::<ZoneLocal>().await,
            EntityKind::Camera => self.purge_kind::<CameraLocal>().await,
        }
    }

    async fn purge_kind<T: RemoteEntity>(&self) -> SyncResult<SyncReport> {
        let tombstones: Vec<(String, String)> = self
            .storage()
            .with_status::<T>(SyncStatus::PendingDelete)?
            .iter()
            .filter_map(|row| Some((row.id_local()?, row.remote_id().unwrap_or_default())))
            .collect();

        let mut report = SyncReport::new(T::KIND, tombstones.len());
        let results: Vec<_> = stream::iter(tombstones)
            .map(|(id_local, remote_id)| {
                let engine = self.clone();
                async move {
                    let result = engine
                        .sync_delete::<T>(&id_local)
                        .await
                        .map(|outcome| match outcome {
                            RemoteDelete::Deleted => Attempt::Synced { remote_id },
                            RemoteDelete::Tombstoned { error } => Attempt::Failed { error },
                        });
                    (id_local, result)
                }
            })
            .buffer_unordered(self.concurrency())
            .collect()
            .await;

        for (id_local, result) in results {
            report.record(id_local, result);
        }
        let report = report.finish();

        info!(
            entity = %T::KIND,
            candidates = report.candidates,
            deleted = report.succeeded,
            failed = report.failed.len(),
            "Tombstone purge finished"
        );
        Ok(report)
    }
}
