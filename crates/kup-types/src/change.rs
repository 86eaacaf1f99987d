//! Change records and the ordinal severity scales
//!
//! A `TechnologyChange` is produced by the external change-detection
//! collaborator and is never mutated inside the pipeline. Impact and urgency
//! are five-level ordinal scales; escalation clamps at the ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a detected change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCategory {
    /// Backwards-incompatible change
    Breaking,
    /// Security fix or advisory
    Security,
    /// Deprecation notice
    Deprecation,
    /// New feature
    Feature,
    /// Bug fix
    BugFix,
    /// Configuration format or defaults change
    Config,
}

impl ChangeCategory {
    /// Stable string form used in justifications and audit payloads
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Breaking => "breaking",
            Self::Security => "security",
            Self::Deprecation => "deprecation",
            Self::Feature => "feature",
            Self::BugFix => "bug_fix",
            Self::Config => "config",
        }
    }
}

/// Five-level ordinal impact scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl ImpactLevel {
    /// One level up, clamped at `Critical`
    #[inline]
    #[must_use]
    pub fn escalate(self) -> Self {
        match self {
            Self::Minimal => Self::Low,
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }

    /// One level down, clamped at `Minimal`
    #[inline]
    #[must_use]
    pub fn deescalate(self) -> Self {
        match self {
            Self::Critical => Self::High,
            Self::High => Self::Medium,
            Self::Medium => Self::Low,
            Self::Low | Self::Minimal => Self::Minimal,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Five-level ordinal urgency scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    Low,
    Medium,
    High,
    Urgent,
    Immediate,
}

impl UrgencyLevel {
    /// One level up, clamped at `Immediate`
    #[inline]
    #[must_use]
    pub fn escalate(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High => Self::Urgent,
            Self::Urgent | Self::Immediate => Self::Immediate,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
            Self::Immediate => "immediate",
        }
    }
}

/// A detected technology change (immutable input to the pipeline)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnologyChange {
    /// Technology the change applies to (e.g. "Next.js")
    pub technology: String,
    /// Change category
    pub category: ChangeCategory,
    /// Version before the change, when known
    pub old_version: Option<String>,
    /// Version after the change, when known
    pub new_version: Option<String>,
    /// Where the change was detected
    pub source_url: String,
    /// Detection time
    pub detected_at: DateTime<Utc>,
    /// Detector's impact estimate
    pub impact_level: ImpactLevel,
    /// Detector's urgency estimate
    pub urgency_level: UrgencyLevel,
    /// Detector confidence in [0, 1]
    pub confidence: f64,
    /// Free-text description
    pub description: String,
    /// Supporting evidence snippets
    pub evidence: Vec<String>,
}

impl TechnologyChange {
    /// Create a change record with neutral defaults
    #[must_use]
    pub fn new(technology: impl Into<String>, category: ChangeCategory) -> Self {
        Self {
            technology: technology.into(),
            category,
            old_version: None,
            new_version: None,
            source_url: String::new(),
            detected_at: Utc::now(),
            impact_level: ImpactLevel::Medium,
            urgency_level: UrgencyLevel::Medium,
            confidence: 0.5,
            description: String::new(),
            evidence: Vec::new(),
        }
    }

    /// With version transition; either side may be unknown
    #[inline]
    #[must_use]
    pub fn with_versions(mut self, old: Option<String>, new: Option<String>) -> Self {
        self.old_version = old;
        self.new_version = new;
        self
    }

    /// With impact level
    #[inline]
    #[must_use]
    pub fn with_impact(mut self, impact: ImpactLevel) -> Self {
        self.impact_level = impact;
        self
    }

    /// With urgency level
    #[inline]
    #[must_use]
    pub fn with_urgency(mut self, urgency: UrgencyLevel) -> Self {
        self.urgency_level = urgency;
        self
    }

    /// With confidence (clamped to [0, 1])
    #[inline]
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impact_escalation_clamps() {
        assert_eq!(ImpactLevel::Medium.escalate(), ImpactLevel::High);
        assert_eq!(ImpactLevel::Critical.escalate(), ImpactLevel::Critical);
        assert_eq!(ImpactLevel::Minimal.deescalate(), ImpactLevel::Minimal);
        assert_eq!(ImpactLevel::High.deescalate(), ImpactLevel::Medium);
    }

    #[test]
    fn urgency_escalation_clamps() {
        assert_eq!(UrgencyLevel::Urgent.escalate(), UrgencyLevel::Immediate);
        assert_eq!(UrgencyLevel::Immediate.escalate(), UrgencyLevel::Immediate);
    }

    #[test]
    fn impact_levels_are_ordered() {
        assert!(ImpactLevel::Minimal < ImpactLevel::Low);
        assert!(ImpactLevel::High < ImpactLevel::Critical);
    }

    #[test]
    fn change_builder() {
        let change = TechnologyChange::new("React", ChangeCategory::Breaking)
            .with_versions(Some("17.0.2".to_string()), Some("18.0.0".to_string()))
            .with_impact(ImpactLevel::High)
            .with_urgency(UrgencyLevel::Urgent)
            .with_confidence(1.5);

        assert_eq!(change.technology, "React");
        assert_eq!(change.old_version.as_deref(), Some("17.0.2"));
        assert_eq!(change.confidence, 1.0);

        let unversioned = TechnologyChange::new("React", ChangeCategory::BugFix)
            .with_versions(None, Some("18.0.1".to_string()));
        assert_eq!(unversioned.old_version, None);
        assert_eq!(unversioned.new_version.as_deref(), Some("18.0.1"));
    }

    #[test]
    fn category_serde_snake_case() {
        let json = serde_json::to_string(&ChangeCategory::BugFix).unwrap();
        assert_eq!(json, "\"bug_fix\"");
    }
}
