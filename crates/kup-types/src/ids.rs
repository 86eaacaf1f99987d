//! Newtype identifiers
//!
//! Executions and approval requests get random UUIDs; assessment ids are
//! deterministic content hashes so repeat analyses of the same change share
//! an identity (and a cache slot).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique pipeline execution identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    /// Generate new execution ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique approval request identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Generate new request ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic impact-assessment identifier
///
/// Hex digest of (technology, category, detection timestamp). Two analyses of
/// the identical change produce the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssessmentId(String);

impl AssessmentId {
    /// Wrap a precomputed digest
    #[inline]
    #[must_use]
    pub fn from_digest(digest: String) -> Self {
        Self(digest)
    }

    /// Digest as a hex string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AssessmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_ids_unique() {
        assert_ne!(ExecutionId::new(), ExecutionId::new());
    }

    #[test]
    fn assessment_id_round_trip() {
        let id = AssessmentId::from_digest("ab12".to_string());
        assert_eq!(id.as_str(), "ab12");
        assert_eq!(id.to_string(), "ab12");
    }
}
