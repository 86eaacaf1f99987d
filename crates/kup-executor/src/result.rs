//! Update outcomes

use chrono::{DateTime, Utc};
use kup_backup::BackupInfo;
use kup_types::FileCategory;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Terminal (or in-flight) state of one file update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    RolledBack,
    Skipped,
}

impl UpdateStatus {
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
            Self::Skipped => "skipped",
        }
    }
}

/// Verdict from post-update shape validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationVerdict {
    Passed,
    Warning,
    Failed,
}

impl ValidationVerdict {
    /// Bucket a quality score: >= 0.8 passes, >= 0.6 warns, below fails
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::Passed
        } else if score >= 0.6 {
            Self::Warning
        } else {
            Self::Failed
        }
    }
}

/// Shape-validation report for one updated file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateValidation {
    pub verdict: ValidationVerdict,
    pub checks_performed: Vec<String>,
    pub issues: Vec<String>,
    /// Starts at 1.0, each issue subtracts a penalty
    pub quality_score: f64,
    pub recommendations: Vec<String>,
}

impl UpdateValidation {
    /// Clean pass with the given checks recorded
    #[must_use]
    pub fn passed(checks: Vec<String>) -> Self {
        Self {
            verdict: ValidationVerdict::Passed,
            checks_performed: checks,
            issues: Vec::new(),
            quality_score: 1.0,
            recommendations: Vec::new(),
        }
    }
}

/// Result of attempting to update one file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResult {
    pub path: PathBuf,
    pub category: FileCategory,
    pub status: UpdateStatus,
    pub description: String,
    pub changes: Vec<String>,
    pub backup: Option<BackupInfo>,
    pub validation: Option<UpdateValidation>,
    pub quality_score: Option<f64>,
    pub duration_ms: f64,
    pub error: Option<String>,
    pub rollback_available: bool,
    pub completed_at: DateTime<Utc>,
}

impl UpdateResult {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, category: FileCategory, status: UpdateStatus) -> Self {
        Self {
            path: path.into(),
            category,
            status,
            description: String::new(),
            changes: Vec::new(),
            backup: None,
            validation: None,
            quality_score: None,
            duration_ms: 0.0,
            error: None,
            rollback_available: false,
            completed_at: Utc::now(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == UpdateStatus::Success
    }

    #[inline]
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status == UpdateStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_buckets() {
        assert_eq!(ValidationVerdict::from_score(1.0), ValidationVerdict::Passed);
        assert_eq!(ValidationVerdict::from_score(0.8), ValidationVerdict::Passed);
        assert_eq!(ValidationVerdict::from_score(0.7), ValidationVerdict::Warning);
        assert_eq!(ValidationVerdict::from_score(0.5), ValidationVerdict::Failed);
    }

    #[test]
    fn status_strings() {
        assert_eq!(UpdateStatus::RolledBack.as_str(), "rolled_back");
    }
}
