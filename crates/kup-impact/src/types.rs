//! Assessment data model
//!
//! `ImpactAssessment` is created once per change and never mutated after
//! creation; a repeat analysis produces a new object (possibly served from
//! cache). `AffectedFile` entries are owned exclusively by their parent
//! assessment.

use chrono::{DateTime, Utc};
use kup_types::{
    AssessmentId, FileCategory, ImpactLevel, TechnologyChange, UrgencyLevel,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// How a file came to be considered affected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Directly listed as a dependent by the mapping store
    DirectReference,
    /// Reachable through another dependent
    Transitive,
    /// Found by content pattern scanning
    PatternMatch,
    /// Pinned by a version constraint
    VersionConstraint,
    /// Configuration-level dependency
    Config,
}

/// Per-file update priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePriority {
    Deferred,
    Low,
    Medium,
    High,
    Immediate,
}

impl UpdatePriority {
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deferred => "deferred",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Immediate => "immediate",
        }
    }

    /// Derive priority from change urgency and per-file severity
    #[must_use]
    pub fn derive(urgency: UrgencyLevel, severity: ImpactLevel) -> Self {
        match urgency {
            UrgencyLevel::Immediate => return Self::Immediate,
            UrgencyLevel::Urgent => return Self::High,
            _ => {}
        }
        match severity {
            ImpactLevel::Critical => Self::Immediate,
            ImpactLevel::High => Self::High,
            ImpactLevel::Medium => Self::Medium,
            ImpactLevel::Low | ImpactLevel::Minimal => Self::Low,
        }
    }
}

/// One file affected by a change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffectedFile {
    pub path: PathBuf,
    pub category: FileCategory,
    pub dependency_kind: DependencyKind,
    pub severity: ImpactLevel,
    pub priority: UpdatePriority,
    /// Confidence in [0, 1] that this file genuinely needs an update
    pub confidence: f64,
    /// Textual sections where the technology is referenced
    pub affected_sections: Vec<String>,
    /// Suggested edits for the updater
    pub suggested_edits: Vec<String>,
    /// Forward edges filled in during graph construction
    pub depends_on: Vec<PathBuf>,
    /// Back edges filled in during graph construction
    pub dependents: Vec<PathBuf>,
}

impl AffectedFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, category: FileCategory, kind: DependencyKind) -> Self {
        Self {
            path: path.into(),
            category,
            dependency_kind: kind,
            severity: ImpactLevel::Medium,
            priority: UpdatePriority::Medium,
            confidence: 0.5,
            affected_sections: Vec::new(),
            suggested_edits: Vec::new(),
            depends_on: Vec::new(),
            dependents: Vec::new(),
        }
    }

    /// With severity
    #[inline]
    #[must_use]
    pub fn with_severity(mut self, severity: ImpactLevel) -> Self {
        self.severity = severity;
        self
    }

    /// With priority
    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: UpdatePriority) -> Self {
        self.priority = priority;
        self
    }

    /// With confidence (clamped to [0, 1])
    #[inline]
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

/// Cascade traversal results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CascadeAnalysis {
    /// All simple paths found by the bounded DFS
    pub paths: Vec<Vec<PathBuf>>,
    /// Paths longer than the high-risk length
    pub high_risk_paths: Vec<Vec<PathBuf>>,
    /// Longest path seen
    pub max_depth: usize,
}

/// Bucketed risk level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Risk assessment for a change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    /// Additive score clamped to [0, 1]
    pub score: f64,
    pub factors: Vec<String>,
    pub mitigations: Vec<String>,
    /// Set when analysis degraded instead of completing; downstream stages
    /// must check this marker and proceed conservatively
    pub error: Option<String>,
}

impl RiskAssessment {
    /// Neutral assessment
    #[inline]
    #[must_use]
    pub fn neutral() -> Self {
        Self {
            level: RiskLevel::Medium,
            score: 0.5,
            factors: Vec::new(),
            mitigations: Vec::new(),
            error: None,
        }
    }

    /// Degraded assessment carrying the internal failure reason
    #[inline]
    #[must_use]
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::neutral()
        }
    }

    /// Whether the analysis completed normally
    #[inline]
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

/// Effort estimate for applying all updates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EffortEstimate {
    pub total_hours: f64,
    pub by_priority: BTreeMap<String, f64>,
    pub by_category: BTreeMap<String, f64>,
    pub complexity_factors: Vec<String>,
}

/// Advisory quality-impact prediction (never a gate)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityImpact {
    /// Predicted delta, positive is better
    pub score_delta: f64,
    pub positive: Vec<String>,
    pub negative: Vec<String>,
}

impl QualityImpact {
    /// Coarse direction of the predicted delta
    #[inline]
    #[must_use]
    pub fn direction(&self) -> &'static str {
        if self.score_delta > 0.05 {
            "positive"
        } else if self.score_delta < -0.05 {
            "negative"
        } else {
            "neutral"
        }
    }
}

/// Complete impact assessment for one change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactAssessment {
    pub assessment_id: AssessmentId,
    pub change: TechnologyChange,
    pub affected_files: Vec<AffectedFile>,
    /// File path -> paths it depends on
    pub dependency_graph: BTreeMap<PathBuf, Vec<PathBuf>>,
    pub cascade: CascadeAnalysis,
    pub recommendations: Vec<String>,
    pub risk: RiskAssessment,
    pub effort: EffortEstimate,
    pub quality_impact: QualityImpact,
    pub overall_impact: ImpactLevel,
    pub overall_urgency: UrgencyLevel,
    pub confidence: f64,
    pub analyzed_at: DateTime<Utc>,
}

impl ImpactAssessment {
    /// Number of affected files
    #[inline]
    #[must_use]
    pub fn affected_count(&self) -> usize {
        self.affected_files.len()
    }
}

/// Deterministic assessment id for a change
///
/// Hash of (technology, category, detection timestamp), so the identical
/// change always maps to the same cache slot.
#[must_use]
pub fn assessment_id_for(change: &TechnologyChange) -> AssessmentId {
    let mut hasher = Sha256::new();
    hasher.update(change.technology.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(change.category.as_str().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(change.detected_at.to_rfc3339().as_bytes());
    AssessmentId::from_digest(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kup_types::ChangeCategory;

    #[test]
    fn assessment_id_is_deterministic() {
        let change = TechnologyChange::new("React", ChangeCategory::Breaking);
        assert_eq!(assessment_id_for(&change), assessment_id_for(&change));
    }

    #[test]
    fn assessment_id_depends_on_category() {
        let breaking = TechnologyChange::new("React", ChangeCategory::Breaking);
        let mut security = breaking.clone();
        security.category = ChangeCategory::Security;
        assert_ne!(assessment_id_for(&breaking), assessment_id_for(&security));
    }

    #[test]
    fn priority_derivation_prefers_urgency() {
        assert_eq!(
            UpdatePriority::derive(UrgencyLevel::Immediate, ImpactLevel::Low),
            UpdatePriority::Immediate
        );
        assert_eq!(
            UpdatePriority::derive(UrgencyLevel::Urgent, ImpactLevel::Minimal),
            UpdatePriority::High
        );
        assert_eq!(
            UpdatePriority::derive(UrgencyLevel::Low, ImpactLevel::Critical),
            UpdatePriority::Immediate
        );
        assert_eq!(
            UpdatePriority::derive(UrgencyLevel::Low, ImpactLevel::Minimal),
            UpdatePriority::Low
        );
    }

    #[test]
    fn degraded_risk_carries_marker() {
        let risk = RiskAssessment::degraded("dependency store unreachable");
        assert!(risk.is_degraded());
        assert_eq!(risk.level, RiskLevel::Medium);
    }

    #[test]
    fn quality_direction_buckets() {
        let mut quality = QualityImpact::default();
        assert_eq!(quality.direction(), "neutral");
        quality.score_delta = 0.1;
        assert_eq!(quality.direction(), "positive");
        quality.score_delta = -0.1;
        assert_eq!(quality.direction(), "negative");
    }
}
