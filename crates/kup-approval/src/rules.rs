//! Approval rules
//!
//! An ordered rule list maps a change (plus its impact assessment) to an
//! action and an approval tier. Evaluation is first-match-wins over the
//! priority-sorted list, and a rule set is only valid when it ends in a
//! catch-all, so every change gets a decision.

use kup_impact::ImpactAssessment;
use kup_types::{ChangeCategory, ImpactLevel, TechnologyChange, UrgencyLevel};
use serde::{Deserialize, Serialize};

/// Who must sign off
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalTier {
    Automatic,
    TechnicalLead,
    EngineeringManager,
    SeniorLeadership,
    EmergencyOverride,
}

impl ApprovalTier {
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::TechnicalLead => "technical_lead",
            Self::EngineeringManager => "engineering_manager",
            Self::SeniorLeadership => "senior_leadership",
            Self::EmergencyOverride => "emergency_override",
        }
    }
}

/// Conjunctive match condition: every populated field must hold
///
/// An empty condition matches everything and marks the catch-all rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleCondition {
    pub categories: Option<Vec<ChangeCategory>>,
    pub impact_levels: Option<Vec<ImpactLevel>>,
    pub urgency_levels: Option<Vec<UrgencyLevel>>,
    pub technologies: Option<Vec<String>>,
    pub min_confidence: Option<f64>,
    pub max_affected_files: Option<usize>,
}

impl RuleCondition {
    /// Condition matching every change
    #[inline]
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_categories(mut self, categories: &[ChangeCategory]) -> Self {
        self.categories = Some(categories.to_vec());
        self
    }

    #[must_use]
    pub fn with_impact_levels(mut self, levels: &[ImpactLevel]) -> Self {
        self.impact_levels = Some(levels.to_vec());
        self
    }

    #[must_use]
    pub fn with_urgency_levels(mut self, levels: &[UrgencyLevel]) -> Self {
        self.urgency_levels = Some(levels.to_vec());
        self
    }

    #[must_use]
    pub fn with_technologies(mut self, technologies: &[&str]) -> Self {
        self.technologies = Some(technologies.iter().map(|t| (*t).to_string()).collect());
        self
    }

    #[must_use]
    pub fn with_min_confidence(mut self, confidence: f64) -> Self {
        self.min_confidence = Some(confidence);
        self
    }

    #[must_use]
    pub fn with_max_affected_files(mut self, max: usize) -> Self {
        self.max_affected_files = Some(max);
        self
    }

    /// Whether this condition has no constraints at all
    #[must_use]
    pub fn is_catch_all(&self) -> bool {
        self.categories.is_none()
            && self.impact_levels.is_none()
            && self.urgency_levels.is_none()
            && self.technologies.is_none()
            && self.min_confidence.is_none()
            && self.max_affected_files.is_none()
    }

    /// Evaluate against a change and its (optional) assessment
    #[must_use]
    pub fn matches(
        &self,
        change: &TechnologyChange,
        assessment: Option<&ImpactAssessment>,
    ) -> bool {
        if let Some(categories) = &self.categories {
            if !categories.contains(&change.category) {
                return false;
            }
        }
        if let Some(levels) = &self.impact_levels {
            if !levels.contains(&change.impact_level) {
                return false;
            }
        }
        if let Some(levels) = &self.urgency_levels {
            if !levels.contains(&change.urgency_level) {
                return false;
            }
        }
        if let Some(technologies) = &self.technologies {
            if !technologies
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&change.technology))
            {
                return false;
            }
        }
        if let Some(min) = self.min_confidence {
            if change.confidence < min {
                return false;
            }
        }
        if let Some(max) = self.max_affected_files {
            // Only enforceable when an assessment exists.
            if assessment.is_some_and(|a| a.affected_count() > max) {
                return false;
            }
        }
        true
    }
}

/// What a matched rule does with the change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleAction {
    /// Approve without a human in the loop
    AutoApprove,
    /// Queue for sign-off at the given tier
    RequireApproval { tier: ApprovalTier },
    /// Refuse outright
    Reject,
}

/// One approval rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub condition: RuleCondition,
    pub action: RuleAction,
    /// Hours until a pending request expires; 0 means it never expires
    pub timeout_hours: u64,
    /// Lower evaluates first
    pub priority: u32,
}

impl ApprovalRule {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        condition: RuleCondition,
        action: RuleAction,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            condition,
            action,
            timeout_hours: 24,
            priority: 100,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_timeout_hours(mut self, hours: u64) -> Self {
        self.timeout_hours = hours;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Tier this rule routes to
    #[must_use]
    pub fn tier(&self) -> ApprovalTier {
        match self.action {
            RuleAction::AutoApprove | RuleAction::Reject => ApprovalTier::Automatic,
            RuleAction::RequireApproval { tier } => tier,
        }
    }
}

/// Built-in rule set
///
/// Ordered from most to least specific, ending in the mandatory catch-all
/// that routes everything unmatched to a technical lead.
#[must_use]
pub fn default_rules() -> Vec<ApprovalRule> {
    vec![
        ApprovalRule::new(
            "security_emergency",
            "Emergency Security Updates",
            RuleCondition::any()
                .with_categories(&[ChangeCategory::Security])
                .with_urgency_levels(&[UrgencyLevel::Immediate, UrgencyLevel::Urgent])
                .with_min_confidence(0.8),
            RuleAction::AutoApprove,
        )
        .with_description("Auto-approve high-confidence urgent security updates")
        .with_timeout_hours(1)
        .with_priority(1),
        ApprovalRule::new(
            "low_impact_auto",
            "Low Impact Auto Approval",
            RuleCondition::any()
                .with_impact_levels(&[ImpactLevel::Minimal, ImpactLevel::Low])
                .with_categories(&[ChangeCategory::BugFix, ChangeCategory::Feature])
                .with_max_affected_files(5)
                .with_min_confidence(0.7),
            RuleAction::AutoApprove,
        )
        .with_description("Auto-approve low impact non-breaking changes")
        .with_timeout_hours(0)
        .with_priority(2),
        ApprovalRule::new(
            "breaking_changes",
            "Breaking Changes Approval",
            RuleCondition::any()
                .with_categories(&[ChangeCategory::Breaking])
                .with_impact_levels(&[ImpactLevel::High, ImpactLevel::Critical]),
            RuleAction::RequireApproval {
                tier: ApprovalTier::SeniorLeadership,
            },
        )
        .with_description("Senior leadership sign-off for breaking changes")
        .with_timeout_hours(48)
        .with_priority(3),
        ApprovalRule::new(
            "critical_tech",
            "Critical Technology Changes",
            RuleCondition::any()
                .with_technologies(&["React", "TypeScript", "Next.js", "Node.js"])
                .with_impact_levels(&[
                    ImpactLevel::Medium,
                    ImpactLevel::High,
                    ImpactLevel::Critical,
                ]),
            RuleAction::RequireApproval {
                tier: ApprovalTier::TechnicalLead,
            },
        )
        .with_description("Technical lead sign-off for core stack technologies")
        .with_timeout_hours(24)
        .with_priority(4),
        ApprovalRule::new(
            "high_impact",
            "High Impact Changes",
            RuleCondition::any()
                .with_impact_levels(&[ImpactLevel::High])
                .with_max_affected_files(50),
            RuleAction::RequireApproval {
                tier: ApprovalTier::EngineeringManager,
            },
        )
        .with_description("Engineering manager sign-off for high impact changes")
        .with_timeout_hours(24)
        .with_priority(5),
        ApprovalRule::new(
            "default_approval",
            "Default Technical Approval",
            RuleCondition::any(),
            RuleAction::RequireApproval {
                tier: ApprovalTier::TechnicalLead,
            },
        )
        .with_description("Catch-all: technical lead sign-off")
        .with_timeout_hours(24)
        .with_priority(10),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(category: ChangeCategory) -> TechnologyChange {
        TechnologyChange::new("React", category)
    }

    #[test]
    fn empty_condition_matches_everything() {
        let condition = RuleCondition::any();
        assert!(condition.is_catch_all());
        assert!(condition.matches(&change(ChangeCategory::Breaking), None));
        assert!(condition.matches(&change(ChangeCategory::Config), None));
    }

    #[test]
    fn conjunctive_condition_requires_all_fields() {
        let condition = RuleCondition::any()
            .with_categories(&[ChangeCategory::Security])
            .with_min_confidence(0.8);

        let low = change(ChangeCategory::Security).with_confidence(0.5);
        let high = change(ChangeCategory::Security).with_confidence(0.9);
        let wrong = change(ChangeCategory::BugFix).with_confidence(0.9);

        assert!(!condition.matches(&low, None));
        assert!(condition.matches(&high, None));
        assert!(!condition.matches(&wrong, None));
    }

    #[test]
    fn technology_match_is_case_insensitive() {
        let condition = RuleCondition::any().with_technologies(&["React"]);
        let c = TechnologyChange::new("react", ChangeCategory::Feature);
        assert!(condition.matches(&c, None));
    }

    #[test]
    fn max_affected_files_only_binds_with_an_assessment() {
        let condition = RuleCondition::any().with_max_affected_files(5);
        assert!(condition.matches(&change(ChangeCategory::Feature), None));
    }

    #[test]
    fn default_rules_end_in_catch_all() {
        let rules = default_rules();
        assert!(rules.last().map_or(false, |r| r.condition.is_catch_all()));
        let mut priorities: Vec<u32> = rules.iter().map(|r| r.priority).collect();
        let sorted = {
            let mut p = priorities.clone();
            p.sort_unstable();
            p
        };
        assert_eq!(priorities, sorted);
        priorities.dedup();
        assert_eq!(priorities.len(), rules.len());
    }

    #[test]
    fn rule_tier_follows_action() {
        let auto = ApprovalRule::new("a", "a", RuleCondition::any(), RuleAction::AutoApprove);
        assert_eq!(auto.tier(), ApprovalTier::Automatic);

        let manual = ApprovalRule::new(
            "m",
            "m",
            RuleCondition::any(),
            RuleAction::RequireApproval {
                tier: ApprovalTier::SeniorLeadership,
            },
        );
        assert_eq!(manual.tier(), ApprovalTier::SeniorLeadership);
    }
}
