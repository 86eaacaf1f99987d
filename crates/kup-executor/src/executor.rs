//! Batched update execution with rollback
//!
//! Files are processed in fixed-size batches, concurrently within a batch.
//! Every file is backed up before it is touched, so any individual update and
//! any batch can be rolled back to its exact prior bytes. A batch whose
//! failure fraction exceeds the configured threshold rolls back its own
//! successes and stops the run.

use crate::result::{UpdateResult, UpdateStatus, ValidationVerdict};
use crate::strategy::{default_strategies, UpdateStrategy};
use futures::future::join_all;
use kup_backup::{BackupError, BackupStore};
use kup_impact::AffectedFile;
use kup_types::TechnologyChange;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::Mutex;

/// Executor tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Files per batch
    pub batch_size: usize,
    pub backups_enabled: bool,
    pub validation_enabled: bool,
    /// Roll back on critical validation failures and failing batches
    pub rollback_on_failure: bool,
    /// Fraction of failures within a batch that aborts the run
    pub batch_failure_threshold: f64,
    /// Root for resolving cross-references during validation
    pub workspace_root: Option<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            backups_enabled: true,
            validation_enabled: true,
            rollback_on_failure: true,
            batch_failure_threshold: 0.5,
            workspace_root: None,
        }
    }
}

/// Counter snapshot
#[derive(Debug, Clone, Default)]
pub struct ExecutorMetrics {
    pub total_updates: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
    pub rolled_back: u64,
    pub rollbacks_performed: u64,
    pub total_batches: u64,
    pub successful_batches: u64,
    pub avg_batch_size: f64,
    pub avg_update_ms: f64,
}

/// Backup-aware batched update executor
pub struct UpdateExecutor {
    strategies: Vec<Box<dyn UpdateStrategy>>,
    backups: BackupStore,
    config: ExecutorConfig,
    metrics: Mutex<ExecutorMetrics>,
}

impl UpdateExecutor {
    /// Executor with the built-in strategies
    #[must_use]
    pub fn new(backups: BackupStore, config: ExecutorConfig) -> Self {
        let strategies = default_strategies(config.workspace_root.clone());
        Self::with_strategies(backups, config, strategies)
    }

    /// Executor with a custom strategy list (evaluation order preserved)
    #[must_use]
    pub fn with_strategies(
        backups: BackupStore,
        config: ExecutorConfig,
        strategies: Vec<Box<dyn UpdateStrategy>>,
    ) -> Self {
        Self {
            strategies,
            backups,
            config,
            metrics: Mutex::new(ExecutorMetrics::default()),
        }
    }

    /// Apply updates for every affected file, in batches
    ///
    /// Returns one result per attempted file. When a batch exceeds the
    /// failure threshold its successes are rolled back and the remaining
    /// batches are not attempted.
    pub async fn execute_updates(
        &self,
        change: &TechnologyChange,
        affected: &[AffectedFile],
    ) -> Vec<UpdateResult> {
        let started = Instant::now();
        let mut results = Vec::with_capacity(affected.len());

        for (index, batch) in affected.chunks(self.config.batch_size.max(1)).enumerate() {
            tracing::info!(batch = index + 1, files = batch.len(), "processing update batch");

            let mut batch_results =
                join_all(batch.iter().map(|file| self.apply_one(change, file))).await;

            self.record_batch(&batch_results).await;

            let failures = batch_results.iter().filter(|r| r.is_failure()).count();
            let failure_fraction = failures as f64 / batch_results.len().max(1) as f64;
            if failure_fraction > self.config.batch_failure_threshold {
                tracing::warn!(
                    batch = index + 1,
                    failures,
                    total = batch_results.len(),
                    "batch failure threshold exceeded, stopping run"
                );
                if self.config.rollback_on_failure {
                    self.rollback_batch(&mut batch_results).await;
                }
                results.extend(batch_results);
                break;
            }
            results.extend(batch_results);
        }

        self.record_run(&results, started.elapsed().as_secs_f64() * 1000.0)
            .await;
        tracing::info!(
            technology = %change.technology,
            attempted = results.len(),
            successful = results.iter().filter(|r| r.is_success()).count(),
            "update execution finished"
        );
        results
    }

    /// Restore every rollbackable result to its backed-up bytes
    ///
    /// Results without a backup cannot be restored and come back as failures
    /// so callers can surface them.
    pub async fn rollback_updates(&self, results: &[UpdateResult]) -> Vec<UpdateResult> {
        tracing::info!(count = results.len(), "rolling back updates");
        let mut rollback_results = Vec::with_capacity(results.len());

        for result in results {
            let mut entry = UpdateResult::new(&result.path, result.category, UpdateStatus::Failed);
            match (&result.status, &result.backup) {
                (UpdateStatus::Success, Some(backup)) => match self.backups.restore(backup).await {
                    Ok(()) => {
                        entry.status = UpdateStatus::Success;
                        entry.description = "rollback successful".to_string();
                        entry.backup = Some(backup.clone());
                        self.metrics.lock().await.rollbacks_performed += 1;
                    }
                    Err(e) => {
                        tracing::error!(path = %result.path.display(), error = %e, "rollback failed");
                        entry.description = "rollback failed".to_string();
                        entry.error = Some(e.to_string());
                    }
                },
                _ => {
                    entry.description = "cannot roll back".to_string();
                    entry.error = Some("no backup available for rollback".to_string());
                }
            }
            rollback_results.push(entry);
        }
        rollback_results
    }

    /// Delete backups older than the retention window
    pub async fn prune_backups(&self, retention_days: u64) -> Result<usize, BackupError> {
        self.backups.prune_older_than(retention_days).await
    }

    /// Counter snapshot
    pub async fn metrics(&self) -> ExecutorMetrics {
        self.metrics.lock().await.clone()
    }

    async fn apply_one(&self, change: &TechnologyChange, file: &AffectedFile) -> UpdateResult {
        let started = Instant::now();
        let mut result = UpdateResult::new(&file.path, file.category, UpdateStatus::InProgress);

        // Backup first; a missing source is tolerated here and surfaces as a
        // strategy error below.
        if self.config.backups_enabled {
            match self.backups.snapshot(&file.path).await {
                Ok(info) => {
                    result.backup = Some(info);
                    result.rollback_available = true;
                }
                Err(e) => {
                    tracing::debug!(path = %file.path.display(), error = %e, "no backup taken");
                }
            }
        }

        let Some(strategy) = self
            .strategies
            .iter()
            .find(|s| s.can_handle(&file.path, file.category))
        else {
            result.status = UpdateStatus::Skipped;
            result.description = "no suitable update strategy".to_string();
            result.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
            return result;
        };

        let original = tokio::fs::read_to_string(&file.path)
            .await
            .unwrap_or_default();

        let applied = match strategy.apply(&file.path, change, file).await {
            Ok(applied) => applied,
            Err(e) => {
                tracing::error!(path = %file.path.display(), error = %e, "update failed");
                result.status = UpdateStatus::Failed;
                result.error = Some(e.to_string());
                result.quality_score = Some(0.0);
                result.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
                return result;
            }
        };
        result.description = applied.description;
        result.changes = applied.changes;

        if self.config.validation_enabled && applied.changed {
            let updated = tokio::fs::read_to_string(&file.path)
                .await
                .unwrap_or_default();
            let validation = strategy.validate(&file.path, &original, &updated).await;
            result.quality_score = Some(validation.quality_score);

            if validation.verdict == ValidationVerdict::Failed {
                if self.config.rollback_on_failure {
                    if let Some(backup) = &result.backup {
                        if self.backups.restore(backup).await.is_ok() {
                            tracing::warn!(
                                path = %file.path.display(),
                                "update rolled back after validation failure"
                            );
                            result.status = UpdateStatus::RolledBack;
                            result.error =
                                Some("rolled back due to validation failure".to_string());
                            result.rollback_available = false;
                            result.validation = Some(validation);
                            result.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
                            return result;
                        }
                    }
                }
                result.status = UpdateStatus::Failed;
                result.error = Some("validation failed".to_string());
                result.validation = Some(validation);
                result.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
                return result;
            }
            result.validation = Some(validation);
        }

        result.status = UpdateStatus::Success;
        result.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        result
    }

    async fn rollback_batch(&self, batch_results: &mut [UpdateResult]) {
        tracing::warn!("rolling back batch successes");
        for result in batch_results.iter_mut() {
            if result.status != UpdateStatus::Success {
                continue;
            }
            let Some(backup) = &result.backup else {
                continue;
            };
            if self.backups.restore(backup).await.is_ok() {
                result.status = UpdateStatus::RolledBack;
                result.error = Some("rolled back due to batch failure".to_string());
                result.rollback_available = false;
                self.metrics.lock().await.rollbacks_performed += 1;
            }
        }
    }

    async fn record_batch(&self, batch_results: &[UpdateResult]) {
        let mut metrics = self.metrics.lock().await;
        metrics.total_batches += 1;
        if batch_results.iter().all(UpdateResult::is_success) {
            metrics.successful_batches += 1;
        }
        let n = metrics.total_batches as f64;
        metrics.avg_batch_size =
            (metrics.avg_batch_size * (n - 1.0) + batch_results.len() as f64) / n;
    }

    async fn record_run(&self, results: &[UpdateResult], elapsed_ms: f64) {
        let mut metrics = self.metrics.lock().await;
        for result in results {
            metrics.total_updates += 1;
            match result.status {
                UpdateStatus::Success => metrics.successful += 1,
                UpdateStatus::Failed => metrics.failed += 1,
                UpdateStatus::Skipped => metrics.skipped += 1,
                UpdateStatus::RolledBack => metrics.rolled_back += 1,
                _ => {}
            }
        }
        if !results.is_empty() {
            let per_file = elapsed_ms / results.len() as f64;
            let total = metrics.total_updates as f64;
            let prior = total - results.len() as f64;
            metrics.avg_update_ms =
                (metrics.avg_update_ms * prior + per_file * results.len() as f64) / total;
        }
    }
}
