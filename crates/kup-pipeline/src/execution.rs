//! Pipeline execution record
//!
//! One record per change under processing. The stage ordering is total and
//! fixed; an execution never re-enters a prior stage, and the full stage
//! sequence is kept on the record so the invariant is checkable after the
//! fact.

use chrono::{DateTime, Utc};
use kup_approval::ApprovalRequest;
use kup_executor::UpdateResult;
use kup_impact::ImpactAssessment;
use kup_types::{ExecutionId, TechnologyChange};
use serde::{Deserialize, Serialize};

/// Fixed pipeline stages, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    ChangeDetection,
    ImpactAnalysis,
    ApprovalProcessing,
    UpdateExecution,
    Validation,
    Completed,
    Failed,
}

impl PipelineStage {
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChangeDetection => "change_detection",
            Self::ImpactAnalysis => "impact_analysis",
            Self::ApprovalProcessing => "approval_processing",
            Self::UpdateExecution => "update_execution",
            Self::Validation => "validation",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Position in the fixed ordering; `Failed` is reachable from anywhere
    /// and sorts last
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        match self {
            Self::ChangeDetection => 0,
            Self::ImpactAnalysis => 1,
            Self::ApprovalProcessing => 2,
            Self::UpdateExecution => 3,
            Self::Validation => 4,
            Self::Completed => 5,
            Self::Failed => 6,
        }
    }

    /// The four breaker-gated stages
    pub const GATED: [Self; 4] = [
        Self::ImpactAnalysis,
        Self::ApprovalProcessing,
        Self::UpdateExecution,
        Self::Validation,
    ];
}

/// Coarse execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineStatus {
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Aggregate verdict from the validation stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total_updates: usize,
    pub successful_updates: usize,
    pub failed_updates: usize,
    pub scores: Vec<f64>,
    /// Mean score over validated files, 0..100
    pub overall_score: f64,
    pub validated_at: DateTime<Utc>,
}

/// One change's trip through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineExecution {
    pub execution_id: ExecutionId,
    pub change: TechnologyChange,
    pub stage: PipelineStage,
    pub status: PipelineStatus,
    /// Every stage entered, in order
    pub stage_history: Vec<PipelineStage>,
    pub assessment: Option<ImpactAssessment>,
    pub approval: Option<ApprovalRequest>,
    pub update_results: Vec<UpdateResult>,
    pub rollback_results: Vec<UpdateResult>,
    pub validation: Option<ValidationSummary>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineExecution {
    #[must_use]
    pub fn new(change: TechnologyChange) -> Self {
        let now = Utc::now();
        Self {
            execution_id: ExecutionId::new(),
            change,
            stage: PipelineStage::ChangeDetection,
            status: PipelineStatus::Running,
            stage_history: vec![PipelineStage::ChangeDetection],
            assessment: None,
            approval: None,
            update_results: Vec::new(),
            rollback_results: Vec::new(),
            validation: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Enter a stage, recording it in the history
    pub fn advance(&mut self, stage: PipelineStage) {
        debug_assert!(stage.index() >= self.stage.index() || stage == PipelineStage::Failed);
        self.stage = stage;
        self.stage_history.push(stage);
        self.updated_at = Utc::now();
    }

    /// Terminal success
    pub fn complete(&mut self) {
        self.advance(PipelineStage::Completed);
        self.status = PipelineStatus::Completed;
    }

    /// Terminal failure with a human-readable reason
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.error = Some(reason.into());
        self.advance(PipelineStage::Failed);
        self.status = PipelineStatus::Failed;
    }

    /// Cooperative cancellation
    pub fn cancel(&mut self) {
        self.error = Some("execution cancelled by operator".to_string());
        self.advance(PipelineStage::Failed);
        self.status = PipelineStatus::Cancelled;
    }

    /// Whether the recorded stage sequence is non-decreasing
    #[must_use]
    pub fn stages_monotonic(&self) -> bool {
        self.stage_history
            .windows(2)
            .all(|w| w[0].index() <= w[1].index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kup_types::ChangeCategory;

    fn execution() -> PipelineExecution {
        PipelineExecution::new(TechnologyChange::new("React", ChangeCategory::Feature))
    }

    #[test]
    fn starts_at_change_detection() {
        let exec = execution();
        assert_eq!(exec.stage, PipelineStage::ChangeDetection);
        assert_eq!(exec.status, PipelineStatus::Running);
        assert_eq!(exec.stage_history, vec![PipelineStage::ChangeDetection]);
    }

    #[test]
    fn full_run_is_monotonic() {
        let mut exec = execution();
        exec.advance(PipelineStage::ImpactAnalysis);
        exec.advance(PipelineStage::ApprovalProcessing);
        exec.advance(PipelineStage::UpdateExecution);
        exec.advance(PipelineStage::Validation);
        exec.complete();

        assert!(exec.stages_monotonic());
        assert!(exec.status.is_terminal());
    }

    #[test]
    fn failure_from_any_stage_is_monotonic() {
        let mut exec = execution();
        exec.advance(PipelineStage::ImpactAnalysis);
        exec.fail("circuit open for stage impact_analysis");

        assert!(exec.stages_monotonic());
        assert_eq!(exec.status, PipelineStatus::Failed);
        assert!(exec.error.as_deref().unwrap().contains("circuit open"));
    }

    #[test]
    fn skipped_execution_stages_stay_monotonic() {
        // Unapproved change: execution and validation never entered.
        let mut exec = execution();
        exec.advance(PipelineStage::ImpactAnalysis);
        exec.advance(PipelineStage::ApprovalProcessing);
        exec.complete();

        assert!(exec.stages_monotonic());
        assert!(!exec.stage_history.contains(&PipelineStage::UpdateExecution));
    }
}
