//! Impact analysis for technology changes
//!
//! Given an immutable change record, resolves which downstream files are
//! affected (known dependents plus optional pattern scanning), builds a
//! heuristic dependency graph among them, analyzes cascades, and estimates
//! risk, effort, and quality impact. Assessments are cached by a
//! deterministic content hash so repeat analyses within the TTL are served
//! unchanged.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod analyzer;
pub mod graph;
pub mod patterns;
pub mod types;

pub use analyzer::{ImpactAnalyzer, ImpactConfig, ImpactMetrics};
pub use graph::{DependencyGraph, PathHeuristic, RelatednessPolicy};
pub use patterns::PatternRegistry;
pub use types::{
    AffectedFile, CascadeAnalysis, DependencyKind, EffortEstimate, ImpactAssessment,
    QualityImpact, RiskAssessment, RiskLevel, UpdatePriority,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
