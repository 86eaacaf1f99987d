//! Pipeline orchestrator
//!
//! Drives each change through the fixed stage sequence, one task per
//! execution, bounded by a concurrency cap with rejection backpressure. The
//! four inner stages are gated by independent circuit breakers; stage
//! timeouts count as failures. Validation below the quality floor rolls back
//! every touched file and fails the execution. Storage writes are
//! best-effort: the in-memory record is the source of truth for a live run.

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::config::{ConfigError, PipelineConfig};
use crate::execution::{PipelineExecution, PipelineStage, PipelineStatus, ValidationSummary};
use chrono::Utc;
use dashmap::DashMap;
use kup_approval::{ApprovalEngine, ApprovalError, ApprovalRule};
use kup_backup::{BackupError, BackupStore};
use kup_executor::{UpdateExecutor, UpdateResult};
use kup_impact::{ImpactAnalyzer, ImpactAssessment};
use kup_types::{
    DependencyStore, EntityKind, ExecutionId, QualityValidator, RequestId, StateStore,
    TechnologyChange,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Failure surfaced by the operator API
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// In-flight cap reached; retry later
    #[error("pipeline at capacity ({active}/{max} executions in flight)")]
    AtCapacity { active: usize, max: usize },

    /// Shutdown in progress; no new work accepted
    #[error("pipeline is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),
}

/// Coarse health verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// One stage breaker's health line
#[derive(Debug, Clone, Serialize)]
pub struct StageBreakerHealth {
    pub stage: &'static str,
    pub state: BreakerState,
    pub consecutive_failures: u32,
}

/// Health report for operators
#[derive(Debug, Clone, Serialize)]
pub struct PipelineHealth {
    pub overall: HealthState,
    pub active_executions: usize,
    pub pending_approvals: usize,
    pub breakers: Vec<StageBreakerHealth>,
    pub failure_rate: f64,
    pub avg_duration_ms: f64,
}

/// Counter snapshot
#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub total_executions: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Completed without entering execution (approval not terminal-approved)
    pub skipped_unapproved: u64,
    pub avg_duration_ms: f64,
}

/// Quality-gated pipeline orchestrator
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    analyzer: Arc<ImpactAnalyzer>,
    approvals: Arc<ApprovalEngine>,
    executor: Arc<UpdateExecutor>,
    validator: Arc<dyn QualityValidator>,
    store: Arc<dyn StateStore>,
    active: DashMap<ExecutionId, PipelineExecution>,
    cancel_flags: DashMap<ExecutionId, Arc<AtomicBool>>,
    history: parking_lot::Mutex<std::collections::VecDeque<PipelineExecution>>,
    breakers: HashMap<PipelineStage, CircuitBreaker>,
    metrics: parking_lot::Mutex<PipelineMetrics>,
    in_flight: AtomicUsize,
    shutting_down: AtomicBool,
}

impl PipelineOrchestrator {
    /// Build an orchestrator over the injected collaborators
    pub async fn new(
        config: PipelineConfig,
        dependency_store: Arc<dyn DependencyStore>,
        validator: Arc<dyn QualityValidator>,
        store: Arc<dyn StateStore>,
    ) -> Result<Self, PipelineError> {
        let backups = BackupStore::open(config.backup.directory.clone()).await?;
        let analyzer = Arc::new(ImpactAnalyzer::new(
            dependency_store,
            config.impact.clone(),
        ));
        let approvals = Arc::new(ApprovalEngine::with_defaults());
        let executor = Arc::new(UpdateExecutor::new(backups, config.execution.clone()));

        let cooldown = Duration::from_secs(config.pipeline.breaker_cooldown_secs);
        let breakers = PipelineStage::GATED
            .iter()
            .map(|stage| {
                (
                    *stage,
                    CircuitBreaker::new(config.pipeline.breaker_failure_threshold, cooldown),
                )
            })
            .collect();

        tracing::info!(
            max_concurrent = config.pipeline.max_concurrent_executions,
            "pipeline orchestrator initialized"
        );
        Ok(Self {
            config,
            analyzer,
            approvals,
            executor,
            validator,
            store,
            active: DashMap::new(),
            cancel_flags: DashMap::new(),
            history: parking_lot::Mutex::new(std::collections::VecDeque::new()),
            breakers,
            metrics: parking_lot::Mutex::new(PipelineMetrics::default()),
            in_flight: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Accept a change for processing
    ///
    /// Returns the execution id immediately; the stages run on their own
    /// task. Rejects when the concurrency cap is reached or a shutdown is in
    /// progress.
    pub fn process(
        self: &Arc<Self>,
        change: TechnologyChange,
    ) -> Result<ExecutionId, PipelineError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(PipelineError::ShuttingDown);
        }
        let max = self.config.pipeline.max_concurrent_executions;
        // Reserve the slot with a single compare-and-swap so concurrent
        // submissions cannot overshoot the cap.
        if let Err(active) = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
        {
            tracing::warn!(active, max, technology = %change.technology, "pipeline at capacity");
            return Err(PipelineError::AtCapacity { active, max });
        }

        let execution = PipelineExecution::new(change);
        let execution_id = execution.execution_id;
        tracing::info!(
            execution_id = %execution_id,
            technology = %execution.change.technology,
            "pipeline execution accepted"
        );
        self.cancel_flags
            .insert(execution_id, Arc::new(AtomicBool::new(false)));
        self.active.insert(execution_id, execution);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drive(execution_id).await;
        });
        Ok(execution_id)
    }

    /// Look up an execution, active or retired
    #[must_use]
    pub fn get_execution_status(&self, execution_id: ExecutionId) -> Option<PipelineExecution> {
        if let Some(entry) = self.active.get(&execution_id) {
            return Some(entry.clone());
        }
        self.history
            .lock()
            .iter()
            .rev()
            .find(|e| e.execution_id == execution_id)
            .cloned()
    }

    /// Request cooperative cancellation of a running execution
    ///
    /// Takes effect at the next stage boundary; an in-flight stage call is
    /// never interrupted.
    pub fn cancel_execution(&self, execution_id: ExecutionId) -> bool {
        match self.cancel_flags.get(&execution_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                tracing::info!(execution_id = %execution_id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Manually approve a pending request
    pub fn manual_approve(
        &self,
        request_id: RequestId,
        approver: &str,
        comments: Option<&str>,
    ) -> bool {
        match self.approvals.approve(request_id, approver, comments) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "manual approval refused");
                false
            }
        }
    }

    /// Manually reject a pending request
    pub fn manual_reject(&self, request_id: RequestId, rejector: &str, reason: &str) -> bool {
        match self.approvals.reject(request_id, rejector, reason) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "manual rejection refused");
                false
            }
        }
    }

    /// Force-approve a pending request, bypassing its tier
    pub fn emergency_override(
        &self,
        request_id: RequestId,
        actor: &str,
        justification: &str,
    ) -> bool {
        self.approvals
            .emergency_override(request_id, actor, justification)
            .is_ok()
    }

    /// Replace the approval rule set atomically
    pub fn reload_approval_rules(&self, rules: Vec<ApprovalRule>) -> Result<(), PipelineError> {
        self.approvals.reload_rules(rules)?;
        Ok(())
    }

    /// Health report: breaker states, failure rate, latency
    #[must_use]
    pub fn health(&self) -> PipelineHealth {
        let breakers: Vec<StageBreakerHealth> = PipelineStage::GATED
            .iter()
            .map(|stage| {
                let breaker = &self.breakers[stage];
                StageBreakerHealth {
                    stage: stage.as_str(),
                    state: breaker.state(),
                    consecutive_failures: breaker.consecutive_failures(),
                }
            })
            .collect();

        let metrics = self.metrics.lock().clone();
        let failure_rate = if metrics.total_executions > 0 {
            metrics.failed as f64 / metrics.total_executions as f64
        } else {
            0.0
        };

        let open = breakers
            .iter()
            .filter(|b| b.state == BreakerState::Open)
            .count();
        let overall = if open >= 2 {
            HealthState::Unhealthy
        } else if open == 1 || failure_rate > self.config.pipeline.failure_rate_alert_threshold {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        PipelineHealth {
            overall,
            active_executions: self.active.len(),
            pending_approvals: self.approvals.pending_count(),
            breakers,
            failure_rate,
            avg_duration_ms: metrics.avg_duration_ms,
        }
    }

    /// Counter snapshot
    #[must_use]
    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics.lock().clone()
    }

    /// Approval engine handle (for sweepers and operator tooling)
    #[inline]
    #[must_use]
    pub fn approvals(&self) -> &Arc<ApprovalEngine> {
        &self.approvals
    }

    /// Impact analyzer handle
    #[inline]
    #[must_use]
    pub fn analyzer(&self) -> &Arc<ImpactAnalyzer> {
        &self.analyzer
    }

    /// Update executor handle
    #[inline]
    #[must_use]
    pub fn executor(&self) -> &Arc<UpdateExecutor> {
        &self.executor
    }

    /// Block until the execution leaves the active set, then return it
    pub async fn wait_for_completion(
        &self,
        execution_id: ExecutionId,
        timeout: Duration,
    ) -> Option<PipelineExecution> {
        let deadline = Instant::now() + timeout;
        while self.active.contains_key(&execution_id) {
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.get_execution_status(execution_id)
    }

    /// Periodically expire overdue approval requests until shutdown
    pub fn spawn_approval_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        let interval = Duration::from_secs(self.config.pipeline.approval_sweep_interval_secs.max(1));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if this.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                let expired = this.approvals.sweep_expired();
                if !expired.is_empty() {
                    tracing::info!(count = expired.len(), "expired approval requests swept");
                }
            }
        })
    }

    /// Stop accepting work and wait for in-flight executions to drain
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        tracing::info!("pipeline shutting down, draining active executions");
        while !self.active.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tracing::info!("pipeline drained");
    }

    async fn drive(&self, execution_id: ExecutionId) {
        let started = Instant::now();
        if let Some(change) = self.active.get(&execution_id).map(|e| e.change.clone()) {
            self.run_stages(execution_id, &change).await;
        }
        self.finalize(execution_id, started).await;
    }

    async fn run_stages(&self, execution_id: ExecutionId, change: &TechnologyChange) {
        let stage_timeout = Duration::from_secs(self.config.pipeline.stage_timeout_secs);

        // Impact analysis.
        let stage = PipelineStage::ImpactAnalysis;
        if !self.enter_stage(execution_id, stage) {
            return;
        }
        let assessment: Arc<ImpactAssessment> =
            match tokio::time::timeout(stage_timeout, self.analyzer.analyze(change)).await {
                Ok(assessment) => {
                    self.breakers[&stage].record_success();
                    assessment
                }
                Err(_) => {
                    self.breakers[&stage].record_failure();
                    self.fail_execution(execution_id, "stage impact_analysis timed out");
                    return;
                }
            };
        self.persist(EntityKind::Assessment, assessment.as_ref()).await;
        self.update_execution(execution_id, |e| {
            e.assessment = Some((*assessment).clone());
        });
        if self.check_cancelled(execution_id) {
            return;
        }

        // Approval processing.
        let stage = PipelineStage::ApprovalProcessing;
        if !self.enter_stage(execution_id, stage) {
            return;
        }
        let mut approval = self.approvals.process(change, Some(&assessment));
        self.breakers[&stage].record_success();
        self.persist(EntityKind::Approval, &approval).await;
        self.update_execution(execution_id, |e| {
            e.approval = Some(approval.clone());
        });

        // A pending request is decided through the side-channel operator
        // calls (approve/reject/override) or expires; park here until it is
        // terminal, checking for cancellation between polls.
        let poll = Duration::from_millis(self.config.pipeline.approval_poll_interval_ms.max(10));
        while approval.status.is_decidable() {
            if self.check_cancelled(execution_id) {
                return;
            }
            tokio::time::sleep(poll).await;
            self.approvals.sweep_expired();
            if let Some(current) = self.approvals.status(approval.request_id) {
                if current.status != approval.status {
                    approval = current;
                    self.persist(EntityKind::Approval, &approval).await;
                    self.update_execution(execution_id, |e| {
                        e.approval = Some(approval.clone());
                    });
                }
            }
        }
        let approved = approval.status.is_approved();
        if self.check_cancelled(execution_id) {
            return;
        }

        if !approved {
            tracing::info!(
                execution_id = %execution_id,
                status = approval.status.as_str(),
                "approval not terminal-approved, skipping execution and validation"
            );
            self.metrics.lock().skipped_unapproved += 1;
            self.update_execution(execution_id, PipelineExecution::complete);
            return;
        }

        // Update execution.
        let stage = PipelineStage::UpdateExecution;
        if !self.enter_stage(execution_id, stage) {
            return;
        }
        let results = match tokio::time::timeout(
            stage_timeout,
            self.executor
                .execute_updates(change, &assessment.affected_files),
        )
        .await
        {
            Ok(results) => {
                self.breakers[&stage].record_success();
                results
            }
            Err(_) => {
                self.breakers[&stage].record_failure();
                self.fail_execution(execution_id, "stage update_execution timed out");
                return;
            }
        };
        for result in &results {
            self.persist(EntityKind::UpdateResult, result).await;
        }
        self.update_execution(execution_id, |e| {
            e.update_results = results.clone();
        });
        if self.check_cancelled(execution_id) {
            return;
        }

        // Validation.
        if !self.config.validation.enabled {
            self.update_execution(execution_id, PipelineExecution::complete);
            return;
        }
        let stage = PipelineStage::Validation;
        if !self.enter_stage(execution_id, stage) {
            return;
        }
        let summary = match tokio::time::timeout(stage_timeout, self.validate_results(&results))
            .await
        {
            Ok(Ok(summary)) => {
                self.breakers[&stage].record_success();
                summary
            }
            Ok(Err(reason)) => {
                self.breakers[&stage].record_failure();
                self.fail_execution(execution_id, reason);
                return;
            }
            Err(_) => {
                self.breakers[&stage].record_failure();
                self.fail_execution(execution_id, "stage validation timed out");
                return;
            }
        };
        let overall = summary.overall_score;
        self.update_execution(execution_id, |e| {
            e.validation = Some(summary.clone());
        });

        if overall < self.config.validation.min_quality_score {
            tracing::warn!(
                execution_id = %execution_id,
                score = overall,
                minimum = self.config.validation.min_quality_score,
                "validation below quality floor, rolling back"
            );
            let rollbacks = self.executor.rollback_updates(&results).await;
            self.update_execution(execution_id, |e| {
                e.rollback_results = rollbacks.clone();
            });
            self.fail_execution(
                execution_id,
                format!(
                    "validation score {overall:.1} below minimum {:.1}, updates rolled back",
                    self.config.validation.min_quality_score
                ),
            );
            return;
        }

        self.update_execution(execution_id, PipelineExecution::complete);
    }

    /// Grade every successful update through the external quality framework
    async fn validate_results(
        &self,
        results: &[UpdateResult],
    ) -> Result<ValidationSummary, String> {
        let mut summary = ValidationSummary {
            total_updates: results.len(),
            successful_updates: 0,
            failed_updates: 0,
            scores: Vec::new(),
            overall_score: 100.0,
            validated_at: Utc::now(),
        };

        for result in results {
            if result.is_success() {
                summary.successful_updates += 1;
                let validation = self
                    .validator
                    .validate_file(&result.path)
                    .await
                    .map_err(|e| format!("validation framework unreachable: {e}"))?;
                summary.scores.push(validation.score);
            } else {
                summary.failed_updates += 1;
            }
        }

        if !summary.scores.is_empty() {
            summary.overall_score =
                summary.scores.iter().sum::<f64>() / summary.scores.len() as f64;
        } else if summary.total_updates > 0 {
            // Updates were attempted and none succeeded; there is nothing to
            // grade, and the run must not pass the gate.
            summary.overall_score = 0.0;
        }
        Ok(summary)
    }

    /// Gate a stage behind its breaker and record the transition
    fn enter_stage(&self, execution_id: ExecutionId, stage: PipelineStage) -> bool {
        if !self.breakers[&stage].can_execute() {
            self.fail_execution(
                execution_id,
                format!("circuit open for stage {}", stage.as_str()),
            );
            return false;
        }
        self.update_execution(execution_id, |e| e.advance(stage));
        true
    }

    fn check_cancelled(&self, execution_id: ExecutionId) -> bool {
        let cancelled = self
            .cancel_flags
            .get(&execution_id)
            .is_some_and(|flag| flag.load(Ordering::SeqCst));
        if cancelled {
            self.update_execution(execution_id, PipelineExecution::cancel);
        }
        cancelled
    }

    fn fail_execution(&self, execution_id: ExecutionId, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!(execution_id = %execution_id, reason = %reason, "pipeline execution failed");
        self.update_execution(execution_id, |e| e.fail(reason.clone()));
    }

    fn update_execution(&self, execution_id: ExecutionId, f: impl FnOnce(&mut PipelineExecution)) {
        if let Some(mut entry) = self.active.get_mut(&execution_id) {
            f(&mut entry);
        }
    }

    async fn finalize(&self, execution_id: ExecutionId, started: Instant) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.cancel_flags.remove(&execution_id);
        let Some((_, execution)) = self.active.remove(&execution_id) else {
            return;
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        {
            let mut metrics = self.metrics.lock();
            metrics.total_executions += 1;
            match execution.status {
                PipelineStatus::Completed => metrics.completed += 1,
                PipelineStatus::Failed => metrics.failed += 1,
                PipelineStatus::Cancelled => metrics.cancelled += 1,
                PipelineStatus::Running => {}
            }
            let n = metrics.total_executions as f64;
            metrics.avg_duration_ms = (metrics.avg_duration_ms * (n - 1.0) + elapsed_ms) / n;
        }

        tracing::info!(
            execution_id = %execution_id,
            stage = execution.stage.as_str(),
            duration_ms = elapsed_ms,
            "pipeline execution finished"
        );
        self.persist(EntityKind::Execution, &execution).await;

        let mut history = self.history.lock();
        history.push_back(execution);
        if history.len() > self.config.pipeline.history_max {
            let drop_count = history.len() - self.config.pipeline.history_trim_to;
            history.drain(..drop_count);
        }
    }

    /// Best-effort persistence: failures are logged, never fatal
    async fn persist(&self, entity: EntityKind, record: &(impl Serialize + ?Sized)) {
        match serde_json::to_value(record) {
            Ok(value) => {
                if let Err(e) = self.store.save(entity, value).await {
                    tracing::warn!(entity = entity.as_str(), error = %e, "state store write failed");
                }
            }
            Err(e) => {
                tracing::warn!(entity = entity.as_str(), error = %e, "record serialization failed");
            }
        }
    }
}
