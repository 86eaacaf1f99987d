//! Rule-based approval workflow
//!
//! Ordered, first-match-wins rules route each change to auto-approval,
//! rejection, or a manual approval tier. Pending requests carry deadlines and
//! are expired by a sweeper; manual decisions, escalations, and emergency
//! overrides are audit-logged. Rule sets are swappable at runtime without
//! disturbing in-flight evaluations.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod engine;
pub mod rules;

pub use engine::{
    ApprovalEngine, ApprovalError, ApprovalMetrics, ApprovalRequest, ApprovalStatus,
};
pub use rules::{default_rules, ApprovalRule, ApprovalTier, RuleAction, RuleCondition};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
