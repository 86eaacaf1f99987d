//! Shared domain types for the KUP workspace
//!
//! Defines the vocabulary the pipeline crates speak:
//! - Immutable change records produced by change detection
//! - Ordinal impact/urgency scales with clamped escalation
//! - Newtype identifiers for executions, assessments, and approval requests
//! - Collaborator contracts (dependency mapping, quality validation, durable state)

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod change;
pub mod collaborators;
pub mod ids;

pub use change::{
    ChangeCategory, ImpactLevel, TechnologyChange, UrgencyLevel,
};
pub use collaborators::{
    CollaboratorError, Criticality, DependencyRecord, DependencyStore, EntityKind, FileCategory,
    FileValidation, QualityValidator, StateStore, ValidationStatus,
};
pub use ids::{AssessmentId, ExecutionId, RequestId};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
