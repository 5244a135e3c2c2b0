//! Gate decisions with their reasons.

use affirm_core::Gate;
use serde::{Deserialize, Serialize};

/// Suffix marking a rule whose predicate failed to parse or evaluate
pub const ERROR_EFFECT: &str = "error";

/// Outcome of evaluating a policy against one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    /// Decided effect
    pub effect: Gate,
    /// `<rule>:<effect>` per triggered rule, `<rule>:error` per broken rule,
    /// in rule order
    pub reasons: Vec<String>,
    /// Version label of the policy that decided
    pub policy_version: String,
}

impl GateDecision {
    /// Create a decision with no reasons
    #[must_use]
    pub fn new(effect: Gate, policy_version: impl Into<String>) -> Self {
        Self {
            effect,
            reasons: Vec::new(),
            policy_version: policy_version.into(),
        }
    }

    /// Record a triggered rule
    pub fn record_trigger(&mut self, rule_id: &str, effect: Gate) {
        self.reasons.push(format!("{}:{}", rule_id, effect));
    }

    /// Record a rule that could not be evaluated
    pub fn record_error(&mut self, rule_id: &str) {
        self.reasons.push(format!("{}:{}", rule_id, ERROR_EFFECT));
    }

    /// Ids of rules that errored
    pub fn errored_rules(&self) -> impl Iterator<Item = &str> {
        self.reasons
            .iter()
            .filter_map(|r| r.strip_suffix(ERROR_EFFECT)?.strip_suffix(':'))
    }
}
