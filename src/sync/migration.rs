//! Migration engine: bulk, one-directional transfer from the local cache to the
//! remote store.
//!
//! A run exports a snapshot of the local cache, upserts every record into the remote
//! store and records per-record failures without stopping. Upserts are keyed by
//! `(entity_type, id)`, so re-running after a partial failure is safe.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::backend::RemoteStore;
use crate::error::LocalError;
use crate::records::{EntityType, Record};
use crate::storage::{LocalSnapshot, LocalStorage};

/// Top-level migration failures. Per-record failures live in the summary instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MigrationError {
    #[error("Migration aborted before any remote write, local export failed: {0}")]
    Export(LocalError),

    #[error("A migration is already running")]
    AlreadyRunning,

    #[error("No remote store configured")]
    RemoteUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStage {
    Export,
    Import,
    Finalize,
    Validate,
}

impl fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationStage::Export => write!(f, "export"),
            MigrationStage::Import => write!(f, "import"),
            MigrationStage::Finalize => write!(f, "finalize"),
            MigrationStage::Validate => write!(f, "validate"),
        }
    }
}

/// Progress notification pushed to observers of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationProgress {
    pub stage: MigrationStage,
    pub entity_type: Option<EntityType>,
    pub completed: usize,
    pub total: usize,
    pub percentage: f64,
    pub errors: usize,
}

/// One record that could not be migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecordError {
    pub entity_type: EntityType,
    pub record_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMigrationCount {
    pub entity_type: EntityType,
    /// Records in the local snapshot.
    pub total: usize,
    pub migrated: usize,
    pub failed: usize,
    pub processed: bool,
}

/// Immutable result of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSummary {
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total_records: usize,
    pub migrated_records: usize,
    pub errors: Vec<MigrationRecordError>,
    pub entity_counts: Vec<EntityMigrationCount>,
    pub cancelled: bool,
    pub success: bool,
}

impl MigrationSummary {
    /// Ids of the records that failed, in the order they were attempted.
    pub fn failed_ids(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.record_id.as_str()).collect()
    }

    pub fn entity_count(&self, entity_type: EntityType) -> Option<&EntityMigrationCount> {
        self.entity_counts.iter().find(|c| c.entity_type == entity_type)
    }
}

/// Mutable state of a run in progress.
#[derive(Debug)]
pub struct MigrationJob {
    id: Uuid,
    started_at: DateTime<Utc>,
    started: Instant,
    total_records: usize,
    migrated_records: usize,
    errors: Vec<MigrationRecordError>,
    entity_counts: Vec<EntityMigrationCount>,
    cancelled: bool,
}

impl MigrationJob {
    /// Start a job over `scope`, sizing it from the snapshot.
    pub fn new(scope: &[EntityType], snapshot: &LocalSnapshot) -> Self {
        let entity_counts: Vec<EntityMigrationCount> = scope
            .iter()
            .map(|&entity_type| EntityMigrationCount {
                entity_type,
                total: snapshot.count(entity_type),
                migrated: 0,
                failed: 0,
                processed: false,
            })
            .collect();

        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            started: Instant::now(),
            total_records: entity_counts.iter().map(|c| c.total).sum(),
            migrated_records: 0,
            errors: Vec::new(),
            entity_counts,
            cancelled: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn completed(&self) -> usize {
        self.migrated_records + self.errors.len()
    }

    pub fn percentage(&self) -> f64 {
        if self.total_records == 0 {
            return 100.0;
        }
        self.completed() as f64 / self.total_records as f64 * 100.0
    }

    fn counts_mut(&mut self, entity_type: EntityType) -> Option<&mut EntityMigrationCount> {
        self.entity_counts.iter_mut().find(|c| c.entity_type == entity_type)
    }

    pub fn record_success(&mut self, entity_type: EntityType) {
        self.migrated_records += 1;
        if let Some(counts) = self.counts_mut(entity_type) {
            counts.migrated += 1;
        }
    }

    pub fn record_failure(&mut self, entity_type: EntityType, record_id: &str, reason: String) {
        self.errors.push(MigrationRecordError {
            entity_type,
            record_id: record_id.to_string(),
            reason,
        });
        if let Some(counts) = self.counts_mut(entity_type) {
            counts.failed += 1;
        }
    }

    pub fn mark_processed(&mut self, entity_type: EntityType) {
        if let Some(counts) = self.counts_mut(entity_type) {
            counts.processed = true;
        }
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    fn progress(&self, stage: MigrationStage, entity_type: Option<EntityType>) -> MigrationProgress {
        MigrationProgress {
            stage,
            entity_type,
            completed: self.completed(),
            total: self.total_records,
            percentage: self.percentage(),
            errors: self.errors.len(),
        }
    }

    /// Close the job. Success requires no errors and every entity type processed.
    pub fn finalize(self) -> MigrationSummary {
        let all_processed = self.entity_counts.iter().all(|c| c.processed);
        MigrationSummary {
            job_id: self.id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_ms: self.started.elapsed().as_millis() as u64,
            total_records: self.total_records,
            migrated_records: self.migrated_records,
            success: self.errors.is_empty() && all_processed && !self.cancelled,
            errors: self.errors,
            entity_counts: self.entity_counts,
            cancelled: self.cancelled,
        }
    }
}

/// Stops a run from scheduling further records. In-flight writes complete.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Advisory count mismatch found by [`MigrationEngine::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub entity_type: EntityType,
    pub local_count: usize,
    /// `None` when the remote count could not be fetched.
    pub remote_count: Option<u64>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub checked_at: DateTime<Utc>,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Optional progress sink. A dropped receiver silently ends reporting.
struct ProgressSink(Option<mpsc::UnboundedSender<MigrationProgress>>);

impl ProgressSink {
    fn emit(&self, progress: MigrationProgress) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(progress);
        }
    }
}

/// Resets the running flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct MigrationEngine {
    local: LocalStorage,
    remote: Arc<dyn RemoteStore>,
    running: AtomicBool,
    clear_local_after: AtomicBool,
}

impl MigrationEngine {
    pub fn new(local: LocalStorage, remote: Arc<dyn RemoteStore>, clear_local_after: bool) -> Self {
        Self {
            local,
            remote,
            running: AtomicBool::new(false),
            clear_local_after: AtomicBool::new(clear_local_after),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_clear_local_after(&self, enabled: bool) {
        self.clear_local_after.store(enabled, Ordering::SeqCst);
    }

    /// Migrate every entity type.
    ///
    /// # Errors
    /// * `MigrationError::AlreadyRunning` if another run is in progress
    /// * `MigrationError::Export` if the local snapshot cannot be read; nothing was written remotely
    pub async fn migrate(
        &self,
        progress: Option<mpsc::UnboundedSender<MigrationProgress>>,
        cancel: Option<CancellationFlag>,
    ) -> Result<MigrationSummary, MigrationError> {
        self.run(&EntityType::ALL, progress, cancel).await
    }

    /// Migrate a single entity type.
    pub async fn migrate_entity(
        &self,
        entity_type: EntityType,
        progress: Option<mpsc::UnboundedSender<MigrationProgress>>,
        cancel: Option<CancellationFlag>,
    ) -> Result<MigrationSummary, MigrationError> {
        self.run(&[entity_type], progress, cancel).await
    }

    async fn run(
        &self,
        scope: &[EntityType],
        progress: Option<mpsc::UnboundedSender<MigrationProgress>>,
        cancel: Option<CancellationFlag>,
    ) -> Result<MigrationSummary, MigrationError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(MigrationError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.running);
        let sink = ProgressSink(progress);
        let cancelled = || cancel.as_ref().is_some_and(CancellationFlag::is_cancelled);

        sink.emit(MigrationProgress {
            stage: MigrationStage::Export,
            entity_type: None,
            completed: 0,
            total: 0,
            percentage: 0.0,
            errors: 0,
        });

        let snapshot = self.local.export_snapshot().map_err(|e| {
            warn!("❌ Migration aborted, could not export local cache: {e}");
            MigrationError::Export(e)
        })?;

        let mut job = MigrationJob::new(scope, &snapshot);
        info!(
            "Migrating {} local records to {} (job {})",
            job.total_records,
            self.remote.backend_type(),
            job.id()
        );

        'entities: for entity in snapshot.entities.iter().filter(|s| scope.contains(&s.entity_type)) {
            let entity_type = entity.entity_type;

            for record in &entity.records {
                if cancelled() {
                    job.mark_cancelled();
                    break 'entities;
                }

                match self.remote.upsert(entity_type, record.clone()).await {
                    Ok(_) => job.record_success(entity_type),
                    Err(e) => {
                        warn!("⚠️  Failed to migrate {entity_type} '{}': {e}", record.id);
                        job.record_failure(entity_type, &record.id, e.to_string());
                    }
                }
                sink.emit(job.progress(MigrationStage::Import, Some(entity_type)));
            }

            job.mark_processed(entity_type);

            let fully_migrated = job
                .counts_mut(entity_type)
                .is_some_and(|counts| counts.failed == 0);
            if fully_migrated && self.clear_local_after.load(Ordering::SeqCst) {
                self.remove_migrated(entity_type, &entity.records);
            }
        }

        if !job.is_cancelled() && cancelled() {
            job.mark_cancelled();
        }

        sink.emit(job.progress(MigrationStage::Finalize, None));
        let summary = job.finalize();

        if summary.success {
            info!(
                "✅ Migration finished: {} records in {} ms",
                summary.migrated_records, summary.duration_ms
            );
        } else {
            warn!(
                "⚠️  Migration finished with {} failed records{}",
                summary.errors.len(),
                if summary.cancelled { " (cancelled)" } else { "" }
            );
        }
        Ok(summary)
    }

    /// Delete migrated local records that were not modified during the run.
    fn remove_migrated(&self, entity_type: EntityType, records: &[Record]) {
        let mut removed = 0;
        for record in records {
            match self.local.get(entity_type, &record.id) {
                Ok(Some(current)) if current.updated_at == record.updated_at => {
                    match self.local.delete(entity_type, &record.id) {
                        Ok(true) => removed += 1,
                        Ok(false) => {}
                        Err(e) => warn!("⚠️  Could not remove migrated {entity_type} '{}': {e}", record.id),
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("⚠️  Could not read migrated {entity_type} '{}': {e}", record.id),
            }
        }
        info!("Removed {removed} migrated {entity_type} records from the local cache");
    }

    /// Compare remote counts against the snapshot counts of `summary`.
    ///
    /// Mismatches are advisory: local writes during the run, or remote data that
    /// predates it, legitimately change the counts.
    pub async fn validate(
        &self,
        summary: &MigrationSummary,
        progress: Option<mpsc::UnboundedSender<MigrationProgress>>,
    ) -> ValidationReport {
        let sink = ProgressSink(progress);
        let total = summary.entity_counts.len();
        let mut issues = Vec::new();

        for (index, counts) in summary.entity_counts.iter().enumerate() {
            let expected = counts.total;
            match self.remote.count(counts.entity_type).await {
                Ok(actual) if actual == expected as u64 => {}
                Ok(actual) => {
                    let message = if actual < expected as u64 {
                        format!("{} records missing remotely", expected as u64 - actual)
                    } else {
                        format!("remote holds {} more records than the local snapshot", actual - expected as u64)
                    };
                    issues.push(ValidationIssue {
                        entity_type: counts.entity_type,
                        local_count: expected,
                        remote_count: Some(actual),
                        message,
                    });
                }
                Err(e) => issues.push(ValidationIssue {
                    entity_type: counts.entity_type,
                    local_count: expected,
                    remote_count: None,
                    message: format!("could not count remote records: {e}"),
                }),
            }

            sink.emit(MigrationProgress {
                stage: MigrationStage::Validate,
                entity_type: Some(counts.entity_type),
                completed: index + 1,
                total,
                percentage: (index + 1) as f64 / total.max(1) as f64 * 100.0,
                errors: issues.len(),
            });
        }

        if !issues.is_empty() {
            warn!("⚠️  Migration validation found {} count mismatches", issues.len());
        }
        ValidationReport {
            checked_at: Utc::now(),
            issues,
        }
    }
}
