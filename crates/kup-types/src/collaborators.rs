//! Collaborator contracts
//!
//! The pipeline treats change detection, dependency mapping, quality scoring,
//! and durable storage as black boxes behind these traits. Production
//! implementations live outside this workspace; test doubles live in
//! `kup-test-utils`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Error surfaced by an external collaborator
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    /// Collaborator could not be reached
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    /// Collaborator reached but the call failed
    #[error("collaborator call failed: {0}")]
    Backend(String),
}

/// Coarse classification of a downstream file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    /// Core knowledge-base instruction document
    Knowledge,
    /// Command / runbook document
    Command,
    /// General documentation
    Documentation,
    /// Configuration file (JSON/YAML/TOML)
    Config,
    /// Unclassified
    Unknown,
}

impl FileCategory {
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Knowledge => "knowledge",
            Self::Command => "command",
            Self::Documentation => "documentation",
            Self::Config => "config",
            Self::Unknown => "unknown",
        }
    }
}

/// How critical a dependency is to its consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    /// Consumers break without it; severity escalates one level
    Essential,
    /// Neutral
    Moderate,
    /// Nice to have; severity de-escalates one level
    Optional,
}

/// Whether the dependency mapping has been verified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Validated,
    Unvalidated,
    Unknown,
}

/// One known dependent of a technology, as reported by the mapping store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyRecord {
    pub file_path: PathBuf,
    pub file_category: FileCategory,
    pub criticality: Criticality,
    pub validation_status: ValidationStatus,
}

impl DependencyRecord {
    #[must_use]
    pub fn new(file_path: impl Into<PathBuf>, file_category: FileCategory) -> Self {
        Self {
            file_path: file_path.into(),
            file_category,
            criticality: Criticality::Moderate,
            validation_status: ValidationStatus::Unknown,
        }
    }

    /// With criticality
    #[inline]
    #[must_use]
    pub fn with_criticality(mut self, criticality: Criticality) -> Self {
        self.criticality = criticality;
        self
    }

    /// With validation status
    #[inline]
    #[must_use]
    pub fn with_validation_status(mut self, status: ValidationStatus) -> Self {
        self.validation_status = status;
        self
    }
}

/// External dependency-mapping store
#[async_trait]
pub trait DependencyStore: Send + Sync {
    /// All known dependents of a technology
    async fn dependencies_for(
        &self,
        technology: &str,
    ) -> Result<Vec<DependencyRecord>, CollaboratorError>;
}

/// Verdict from the external content-quality framework
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileValidation {
    /// Quality score in [0, 100]
    pub score: f64,
    /// Issues found
    pub issues: Vec<String>,
    /// Whether the framework considers the file acceptable
    pub approved: bool,
}

impl FileValidation {
    #[inline]
    #[must_use]
    pub fn passing(score: f64) -> Self {
        Self {
            score,
            issues: Vec::new(),
            approved: true,
        }
    }

    #[inline]
    #[must_use]
    pub fn failing(score: f64, issues: Vec<String>) -> Self {
        Self {
            score,
            issues,
            approved: false,
        }
    }
}

/// External content-quality validation framework
#[async_trait]
pub trait QualityValidator: Send + Sync {
    /// Grade one file
    async fn validate_file(&self, path: &Path) -> Result<FileValidation, CollaboratorError>;
}

/// Entity namespaces in the durable state store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Execution,
    Assessment,
    Approval,
    UpdateResult,
}

impl EntityKind {
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Execution => "execution",
            Self::Assessment => "assessment",
            Self::Approval => "approval",
            Self::UpdateResult => "update_result",
        }
    }
}

/// Durable audit-trail store
///
/// Write failures are logged by callers and never fail the pipeline stage
/// that produced the data; the in-memory execution record stays the source
/// of truth for an active run.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persist one record
    async fn save(
        &self,
        entity: EntityKind,
        record: serde_json::Value,
    ) -> Result<(), CollaboratorError>;

    /// Query records matching every key/value pair in `filter`
    async fn query(
        &self,
        entity: EntityKind,
        filter: serde_json::Value,
    ) -> Result<Vec<serde_json::Value>, CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_record_builder() {
        let dep = DependencyRecord::new("docs/setup.md", FileCategory::Documentation)
            .with_criticality(Criticality::Essential)
            .with_validation_status(ValidationStatus::Validated);

        assert_eq!(dep.criticality, Criticality::Essential);
        assert_eq!(dep.validation_status, ValidationStatus::Validated);
    }

    #[test]
    fn file_validation_constructors() {
        assert!(FileValidation::passing(92.0).approved);
        let failing = FileValidation::failing(40.0, vec!["broken link".to_string()]);
        assert!(!failing.approved);
        assert_eq!(failing.issues.len(), 1);
    }

    #[test]
    fn entity_kind_strings() {
        assert_eq!(EntityKind::UpdateResult.as_str(), "update_result");
    }
}
