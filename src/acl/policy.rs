//! Access Decisions

use crate::types::RuleId;

use serde::{Deserialize, Serialize};

/// Outcome of an access evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyDecision {
    /// A grant association matched and no gate failed
    Allow,

    /// A blocking association did not let the request through
    Deny { rule_id: RuleId, reason: String },

    /// Nothing granted access (closed world)
    NoMatch,
}

impl PolicyDecision {
    /// Check if the decision allows the operation
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allow)
    }

    /// Check if the decision denies the operation
    pub fn is_denied(&self) -> bool {
        !self.is_allowed()
    }

    /// Get the denial reason if this is a deny decision
    pub fn denial_reason(&self) -> Option<&str> {
        match self {
            PolicyDecision::Deny { reason, .. } => Some(reason),
            PolicyDecision::NoMatch => Some("No matching access rule"),
            PolicyDecision::Allow => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_allow_is_allowed() {
        assert!(PolicyDecision::Allow.is_allowed());
        assert!(PolicyDecision::NoMatch.is_denied());

        let deny = PolicyDecision::Deny {
            rule_id: 3,
            reason: "blocked".to_string(),
        };
        assert!(deny.is_denied());
        assert_eq!(deny.denial_reason(), Some("blocked"));
        assert_eq!(PolicyDecision::Allow.denial_reason(), None);
    }
}
