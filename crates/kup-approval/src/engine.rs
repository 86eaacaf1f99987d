//! Approval engine
//!
//! Evaluates changes against the ordered rule list, tracks pending requests,
//! applies manual decisions and emergency overrides, and expires requests
//! whose timeout lapsed. Rule reloads swap the whole list atomically so
//! in-flight evaluations keep the set they started with.

use crate::rules::{default_rules, ApprovalRule, ApprovalTier, RuleAction};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use kup_impact::ImpactAssessment;
use kup_types::{AssessmentId, RequestId, TechnologyChange};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

const MAX_HISTORY: usize = 1000;
const HISTORY_TRIM_TO: usize = 500;

/// Request lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    AutoApproved,
    Approved,
    Rejected,
    Expired,
    Escalated,
}

impl ApprovalStatus {
    /// Whether execution may proceed
    #[inline]
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::AutoApproved | Self::Approved)
    }

    /// Whether a manual decision is still possible
    #[inline]
    #[must_use]
    pub fn is_decidable(&self) -> bool {
        matches!(self, Self::Pending | Self::Escalated)
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AutoApproved => "auto_approved",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Escalated => "escalated",
        }
    }
}

/// One approval request and its audit fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub request_id: RequestId,
    pub change: TechnologyChange,
    pub assessment_id: Option<AssessmentId>,
    pub affected_count: Option<usize>,
    pub tier: ApprovalTier,
    pub status: ApprovalStatus,
    pub requires_approval: bool,
    pub justification: String,
    pub applied_rule_id: Option<String>,
    pub approved_by: Option<String>,
    pub rejection_reason: Option<String>,
    pub emergency_override: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Engine failure
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    /// Rule list does not end in a catch-all
    #[error("rule set has no catch-all rule; every change must reach a decision")]
    MissingCatchAll,

    /// Unknown or already-archived request
    #[error("approval request {0} not found among active requests")]
    RequestNotFound(RequestId),

    /// Request is past the point of manual decisions
    #[error("approval request {id} is {status} and cannot be decided")]
    NotDecidable { id: RequestId, status: &'static str },
}

/// Counter snapshot
#[derive(Debug, Clone, Default)]
pub struct ApprovalMetrics {
    pub total_requests: u64,
    pub auto_approved: u64,
    pub manual_approved: u64,
    pub rejected: u64,
    pub expired: u64,
    pub overrides: u64,
    pub avg_processing_ms: f64,
}

/// Rule-based approval engine
pub struct ApprovalEngine {
    rules: RwLock<Arc<Vec<ApprovalRule>>>,
    active: DashMap<RequestId, ApprovalRequest>,
    history: Mutex<VecDeque<ApprovalRequest>>,
    metrics: Mutex<ApprovalMetrics>,
}

impl ApprovalEngine {
    /// Engine over an explicit rule list
    ///
    /// Rules are sorted by priority. Fails if no rule is a catch-all: a gap
    /// in coverage would leave some changes undecidable.
    pub fn new(mut rules: Vec<ApprovalRule>) -> Result<Self, ApprovalError> {
        rules.sort_by_key(|r| r.priority);
        if !rules.iter().any(|r| r.condition.is_catch_all()) {
            return Err(ApprovalError::MissingCatchAll);
        }
        tracing::info!(rules = rules.len(), "approval engine initialized");
        Ok(Self {
            rules: RwLock::new(Arc::new(rules)),
            active: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
            metrics: Mutex::new(ApprovalMetrics::default()),
        })
    }

    /// Engine with the built-in rule set
    #[must_use]
    pub fn with_defaults() -> Self {
        // The built-in set always carries a catch-all.
        Self::new(default_rules()).unwrap_or_else(|_| unreachable!())
    }

    /// Atomically replace the rule list
    pub fn reload_rules(&self, mut rules: Vec<ApprovalRule>) -> Result<(), ApprovalError> {
        rules.sort_by_key(|r| r.priority);
        if !rules.iter().any(|r| r.condition.is_catch_all()) {
            return Err(ApprovalError::MissingCatchAll);
        }
        let count = rules.len();
        *self.rules.write() = Arc::new(rules);
        tracing::info!(rules = count, "approval rules reloaded");
        Ok(())
    }

    /// Current rule list snapshot
    #[must_use]
    pub fn rules(&self) -> Arc<Vec<ApprovalRule>> {
        Arc::clone(&self.rules.read())
    }

    /// Decide a change: first matching rule wins
    pub fn process(
        &self,
        change: &TechnologyChange,
        assessment: Option<&ImpactAssessment>,
    ) -> ApprovalRequest {
        let started = Instant::now();
        let rules = self.rules();
        // new() guarantees a catch-all, so a match always exists.
        let rule = rules
            .iter()
            .find(|r| r.condition.matches(change, assessment))
            .unwrap_or_else(|| unreachable!());

        tracing::info!(
            technology = %change.technology,
            rule = %rule.name,
            tier = rule.tier().as_str(),
            "approval rule matched"
        );

        let now = Utc::now();
        let mut request = ApprovalRequest {
            request_id: RequestId::new(),
            change: change.clone(),
            assessment_id: assessment.map(|a| a.assessment_id.clone()),
            affected_count: assessment.map(ImpactAssessment::affected_count),
            tier: rule.tier(),
            status: ApprovalStatus::Pending,
            requires_approval: !matches!(rule.action, RuleAction::AutoApprove),
            justification: justification_for(change, assessment, rule),
            applied_rule_id: Some(rule.id.clone()),
            approved_by: None,
            rejection_reason: None,
            emergency_override: false,
            created_at: now,
            updated_at: now,
            expires_at: (rule.timeout_hours > 0)
                .then(|| now + ChronoDuration::hours(rule.timeout_hours as i64)),
        };

        match rule.action {
            RuleAction::AutoApprove => {
                request.status = ApprovalStatus::AutoApproved;
                request.approved_by = Some("system".to_string());
                tracing::info!(request_id = %request.request_id, "request auto-approved");
            }
            RuleAction::Reject => {
                request.status = ApprovalStatus::Rejected;
                request.rejection_reason = Some("automatically rejected by rule".to_string());
                tracing::info!(request_id = %request.request_id, "request auto-rejected");
            }
            RuleAction::RequireApproval { tier } => {
                tracing::info!(
                    request_id = %request.request_id,
                    tier = tier.as_str(),
                    "request queued for manual approval"
                );
            }
        }

        self.record_outcome(&request);
        if request.status.is_decidable() {
            self.active.insert(request.request_id, request.clone());
        } else {
            self.archive(request.clone());
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let mut metrics = self.metrics.lock();
        let n = metrics.total_requests as f64;
        metrics.avg_processing_ms = (metrics.avg_processing_ms * (n - 1.0) + elapsed_ms) / n;
        drop(metrics);

        request
    }

    /// Manually approve a pending request
    pub fn approve(
        &self,
        request_id: RequestId,
        approver: &str,
        comments: Option<&str>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let mut request = self.take_decidable(request_id)?;
        request.status = ApprovalStatus::Approved;
        request.approved_by = Some(approver.to_string());
        request.updated_at = Utc::now();
        if let Some(comments) = comments {
            request.justification.push_str(" | approval comments: ");
            request.justification.push_str(comments);
        }
        self.metrics.lock().manual_approved += 1;
        tracing::info!(request_id = %request_id, approver, "request manually approved");
        self.archive(request.clone());
        Ok(request)
    }

    /// Manually reject a pending request
    pub fn reject(
        &self,
        request_id: RequestId,
        rejector: &str,
        reason: &str,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let mut request = self.take_decidable(request_id)?;
        request.status = ApprovalStatus::Rejected;
        request.rejection_reason = Some(reason.to_string());
        request.updated_at = Utc::now();
        self.metrics.lock().rejected += 1;
        tracing::info!(request_id = %request_id, rejector, reason, "request manually rejected");
        self.archive(request.clone());
        Ok(request)
    }

    /// Escalate a pending request to a higher tier
    ///
    /// The request stays decidable; only the responsible tier changes.
    pub fn escalate(
        &self,
        request_id: RequestId,
        tier: ApprovalTier,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let mut entry = self
            .active
            .get_mut(&request_id)
            .ok_or(ApprovalError::RequestNotFound(request_id))?;
        if !entry.status.is_decidable() {
            return Err(ApprovalError::NotDecidable {
                id: request_id,
                status: entry.status.as_str(),
            });
        }
        entry.status = ApprovalStatus::Escalated;
        entry.tier = tier;
        entry.updated_at = Utc::now();
        tracing::warn!(request_id = %request_id, tier = tier.as_str(), "request escalated");
        Ok(entry.clone())
    }

    /// Immediately approve a pending request, bypassing its tier
    ///
    /// Audit-logged at warn level; the override flag and justification are
    /// recorded on the request.
    pub fn emergency_override(
        &self,
        request_id: RequestId,
        override_by: &str,
        justification: &str,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let mut request = self.take_decidable(request_id)?;
        request.status = ApprovalStatus::Approved;
        request.approved_by = Some(override_by.to_string());
        request.emergency_override = true;
        request.justification.push_str(" | EMERGENCY OVERRIDE: ");
        request.justification.push_str(justification);
        request.updated_at = Utc::now();
        let mut metrics = self.metrics.lock();
        metrics.manual_approved += 1;
        metrics.overrides += 1;
        drop(metrics);
        tracing::warn!(
            request_id = %request_id,
            override_by,
            justification,
            "emergency override applied"
        );
        self.archive(request.clone());
        Ok(request)
    }

    /// Expire pending requests whose deadline is before `now`
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> Vec<RequestId> {
        let expired: Vec<RequestId> = self
            .active
            .iter()
            .filter(|entry| {
                entry.status.is_decidable() && entry.expires_at.is_some_and(|at| now > at)
            })
            .map(|entry| *entry.key())
            .collect();

        for request_id in &expired {
            if let Some((_, mut request)) = self.active.remove(request_id) {
                request.status = ApprovalStatus::Expired;
                request.updated_at = now;
                self.metrics.lock().expired += 1;
                tracing::warn!(request_id = %request_id, "approval request expired");
                self.archive(request);
            }
        }
        expired
    }

    /// Expire pending requests whose deadline has passed
    pub fn sweep_expired(&self) -> Vec<RequestId> {
        self.sweep_expired_at(Utc::now())
    }

    /// Look up a request, active or archived
    #[must_use]
    pub fn status(&self, request_id: RequestId) -> Option<ApprovalRequest> {
        if let Some(entry) = self.active.get(&request_id) {
            return Some(entry.clone());
        }
        self.history
            .lock()
            .iter()
            .rev()
            .find(|r| r.request_id == request_id)
            .cloned()
    }

    /// Number of requests awaiting a decision
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.active.len()
    }

    /// Snapshot of the requests awaiting a decision
    #[must_use]
    pub fn pending_requests(&self) -> Vec<ApprovalRequest> {
        self.active.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Counter snapshot
    #[must_use]
    pub fn metrics(&self) -> ApprovalMetrics {
        self.metrics.lock().clone()
    }

    fn take_decidable(&self, request_id: RequestId) -> Result<ApprovalRequest, ApprovalError> {
        let entry = self
            .active
            .get(&request_id)
            .ok_or(ApprovalError::RequestNotFound(request_id))?;
        if !entry.status.is_decidable() {
            return Err(ApprovalError::NotDecidable {
                id: request_id,
                status: entry.status.as_str(),
            });
        }
        drop(entry);
        // Decidable entries are only removed by decisions and the sweeper,
        // both of which re-check, so the remove is safe to unwrap-or-error.
        self.active
            .remove(&request_id)
            .map(|(_, request)| request)
            .ok_or(ApprovalError::RequestNotFound(request_id))
    }

    fn record_outcome(&self, request: &ApprovalRequest) {
        let mut metrics = self.metrics.lock();
        metrics.total_requests += 1;
        match request.status {
            ApprovalStatus::AutoApproved => metrics.auto_approved += 1,
            ApprovalStatus::Rejected => metrics.rejected += 1,
            _ => {}
        }
    }

    fn archive(&self, request: ApprovalRequest) {
        let mut history = self.history.lock();
        history.push_back(request);
        if history.len() > MAX_HISTORY {
            let drop_count = history.len() - HISTORY_TRIM_TO;
            history.drain(..drop_count);
        }
    }
}

impl Default for ApprovalEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn justification_for(
    change: &TechnologyChange,
    assessment: Option<&ImpactAssessment>,
    rule: &ApprovalRule,
) -> String {
    let mut parts = vec![
        format!("technology: {}", change.technology),
        format!("category: {}", change.category.as_str()),
        format!("impact: {:?}", change.impact_level).to_lowercase(),
        format!("urgency: {:?}", change.urgency_level).to_lowercase(),
        format!("confidence: {:.2}", change.confidence),
        format!("rule: {}", rule.name),
    ];
    if let Some(assessment) = assessment {
        parts.push(format!("affected files: {}", assessment.affected_count()));
    }
    if let (Some(old), Some(new)) = (&change.old_version, &change.new_version) {
        parts.push(format!("version change: {old} -> {new}"));
    }
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleCondition;
    use kup_types::{ChangeCategory, ImpactLevel, UrgencyLevel};

    fn security_change() -> TechnologyChange {
        TechnologyChange::new("OpenSSL", ChangeCategory::Security)
            .with_urgency(UrgencyLevel::Immediate)
            .with_confidence(0.95)
    }

    fn breaking_change() -> TechnologyChange {
        TechnologyChange::new("Next.js", ChangeCategory::Breaking)
            .with_impact(ImpactLevel::High)
            .with_urgency(UrgencyLevel::Medium)
            .with_confidence(0.9)
    }

    #[test]
    fn construction_requires_a_catch_all() {
        let only_specific = vec![ApprovalRule::new(
            "narrow",
            "Narrow",
            RuleCondition::any().with_categories(&[ChangeCategory::Security]),
            RuleAction::AutoApprove,
        )];
        assert!(matches!(
            ApprovalEngine::new(only_specific),
            Err(ApprovalError::MissingCatchAll)
        ));
    }

    #[test]
    fn urgent_security_update_is_auto_approved() {
        let engine = ApprovalEngine::with_defaults();
        let request = engine.process(&security_change(), None);

        assert_eq!(request.status, ApprovalStatus::AutoApproved);
        assert_eq!(request.approved_by.as_deref(), Some("system"));
        assert_eq!(request.applied_rule_id.as_deref(), Some("security_emergency"));
        assert!(!request.requires_approval);
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn pending_requests_lists_only_undecided_requests() {
        let engine = ApprovalEngine::with_defaults();
        let pending = engine.process(&breaking_change(), None);
        engine.process(&security_change(), None);

        let listed = engine.pending_requests();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].request_id, pending.request_id);
        assert_eq!(listed[0].status, ApprovalStatus::Pending);
    }

    #[test]
    fn breaking_change_routes_to_senior_leadership() {
        let engine = ApprovalEngine::with_defaults();
        let request = engine.process(&breaking_change(), None);

        assert_eq!(request.status, ApprovalStatus::Pending);
        assert_eq!(request.tier, ApprovalTier::SeniorLeadership);
        assert!(request.requires_approval);
        let expires = request.expires_at.expect("48h deadline");
        let hours = (expires - request.created_at).num_hours();
        assert_eq!(hours, 48);
        assert_eq!(engine.pending_count(), 1);
    }

    #[test]
    fn unmatched_change_falls_through_to_catch_all() {
        let engine = ApprovalEngine::with_defaults();
        let change = TechnologyChange::new("ObscureTool", ChangeCategory::Config)
            .with_impact(ImpactLevel::Low)
            .with_confidence(0.5);
        let request = engine.process(&change, None);

        assert_eq!(request.applied_rule_id.as_deref(), Some("default_approval"));
        assert_eq!(request.tier, ApprovalTier::TechnicalLead);
    }

    #[test]
    fn manual_approval_finalizes_the_request() {
        let engine = ApprovalEngine::with_defaults();
        let request = engine.process(&breaking_change(), None);

        let approved = engine
            .approve(request.request_id, "lead@example", Some("reviewed the migration notes"))
            .unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);
        assert!(approved.justification.contains("reviewed the migration notes"));
        assert_eq!(engine.pending_count(), 0);

        // A second decision on the same request fails.
        assert!(matches!(
            engine.approve(request.request_id, "lead@example", None),
            Err(ApprovalError::RequestNotFound(_))
        ));
        // The archived record is still queryable.
        let archived = engine.status(request.request_id).unwrap();
        assert!(archived.status.is_approved());
    }

    #[test]
    fn rejection_records_the_reason() {
        let engine = ApprovalEngine::with_defaults();
        let request = engine.process(&breaking_change(), None);

        let rejected = engine
            .reject(request.request_id, "mgr@example", "migration plan incomplete")
            .unwrap();
        assert_eq!(rejected.status, ApprovalStatus::Rejected);
        assert_eq!(
            rejected.rejection_reason.as_deref(),
            Some("migration plan incomplete")
        );
    }

    #[test]
    fn escalated_request_stays_decidable() {
        let engine = ApprovalEngine::with_defaults();
        let request = engine.process(&breaking_change(), None);

        let escalated = engine
            .escalate(request.request_id, ApprovalTier::EmergencyOverride)
            .unwrap();
        assert_eq!(escalated.status, ApprovalStatus::Escalated);
        assert_eq!(escalated.tier, ApprovalTier::EmergencyOverride);

        let approved = engine.approve(request.request_id, "cto@example", None).unwrap();
        assert!(approved.status.is_approved());
    }

    #[test]
    fn emergency_override_is_flagged_and_audited() {
        let engine = ApprovalEngine::with_defaults();
        let request = engine.process(&breaking_change(), None);

        let overridden = engine
            .emergency_override(request.request_id, "cto@example", "production incident")
            .unwrap();
        assert!(overridden.status.is_approved());
        assert!(overridden.emergency_override);
        assert!(overridden.justification.contains("EMERGENCY OVERRIDE: production incident"));
        assert_eq!(engine.metrics().overrides, 1);
    }

    #[test]
    fn sweeper_expires_requests_past_their_deadline() {
        let engine = ApprovalEngine::with_defaults();
        let request = engine.process(&breaking_change(), None);

        assert!(engine.sweep_expired().is_empty());

        let expired = engine.sweep_expired_at(Utc::now() + ChronoDuration::hours(49));
        assert_eq!(expired, vec![request.request_id]);
        assert_eq!(engine.pending_count(), 0);
        assert_eq!(
            engine.status(request.request_id).unwrap().status,
            ApprovalStatus::Expired
        );
        assert_eq!(engine.metrics().expired, 1);
    }

    #[test]
    fn rule_reload_swaps_atomically() {
        let engine = ApprovalEngine::with_defaults();
        assert_eq!(
            engine.process(&breaking_change(), None).status,
            ApprovalStatus::Pending
        );

        let permissive = vec![ApprovalRule::new(
            "allow_all",
            "Allow All",
            RuleCondition::any(),
            RuleAction::AutoApprove,
        )];
        engine.reload_rules(permissive).unwrap();
        assert_eq!(
            engine.process(&breaking_change(), None).status,
            ApprovalStatus::AutoApproved
        );

        // Invalid reload is refused and the old rules stay.
        let invalid = vec![ApprovalRule::new(
            "narrow",
            "Narrow",
            RuleCondition::any().with_categories(&[ChangeCategory::Security]),
            RuleAction::Reject,
        )];
        assert!(engine.reload_rules(invalid).is_err());
        assert_eq!(engine.rules().len(), 1);
    }

    #[test]
    fn metrics_track_outcomes() {
        let engine = ApprovalEngine::with_defaults();
        engine.process(&security_change(), None);
        let pending = engine.process(&breaking_change(), None);
        engine.reject(pending.request_id, "mgr", "no").unwrap();

        let metrics = engine.metrics();
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.auto_approved, 1);
        assert_eq!(metrics.rejected, 1);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_change() -> impl Strategy<Value = TechnologyChange> {
            let categories = proptest::sample::select(vec![
                ChangeCategory::Breaking,
                ChangeCategory::Security,
                ChangeCategory::Deprecation,
                ChangeCategory::Feature,
                ChangeCategory::BugFix,
                ChangeCategory::Config,
            ]);
            let impacts = proptest::sample::select(vec![
                ImpactLevel::Minimal,
                ImpactLevel::Low,
                ImpactLevel::Medium,
                ImpactLevel::High,
                ImpactLevel::Critical,
            ]);
            let urgencies = proptest::sample::select(vec![
                UrgencyLevel::Low,
                UrgencyLevel::Medium,
                UrgencyLevel::High,
                UrgencyLevel::Urgent,
                UrgencyLevel::Immediate,
            ]);
            let technologies =
                proptest::sample::select(vec!["React", "Next.js", "LeftPad", "Docker"]);
            (categories, impacts, urgencies, technologies, 0.0f64..=1.0)
                .prop_map(|(category, impact, urgency, technology, confidence)| {
                    TechnologyChange::new(technology, category)
                        .with_impact(impact)
                        .with_urgency(urgency)
                        .with_confidence(confidence)
                })
        }

        proptest! {
            // The engine's decision always comes from the FIRST rule (in
            // priority order) whose condition matches.
            #[test]
            fn first_matching_rule_always_wins(change in arb_change()) {
                let engine = ApprovalEngine::with_defaults();
                let request = engine.process(&change, None);

                let mut rules = default_rules();
                rules.sort_by_key(|r| r.priority);
                let expected = rules
                    .iter()
                    .find(|r| r.condition.matches(&change, None))
                    .expect("catch-all guarantees a match");

                prop_assert_eq!(request.applied_rule_id.as_deref(), Some(expected.id.as_str()));
                prop_assert_eq!(request.tier, expected.tier());
            }

            // Every change reaches a decision: no panic, and terminal or
            // pending according to the matched action.
            #[test]
            fn every_change_is_decided(change in arb_change()) {
                let engine = ApprovalEngine::with_defaults();
                let request = engine.process(&change, None);
                prop_assert!(request.applied_rule_id.is_some());
                prop_assert!(!request.justification.is_empty());
            }
        }
    }
}
