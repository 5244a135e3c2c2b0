//! Policy loading, compilation and evaluation.

use crate::context::EvalContext;
use crate::decision::GateDecision;
use crate::lang::{Expr, ParseError};
use affirm_core::{CoreError, Gate};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Version label of the bundled policy
pub const BUNDLED_POLICY_VERSION: &str = "default_policy.yaml";

const BUNDLED_POLICY: &str = include_str!("../policies/default_policy.yaml");

/// Policy result type
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Policy errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// Policy source missing or unreadable
    #[error("configuration error: {reason}")]
    Configuration {
        /// What is missing
        reason: String,
    },
    /// Policy document is not a valid rule set
    #[error("invalid policy document: {0}")]
    InvalidDocument(String),
    /// Predicate could not be parsed
    #[error("rule '{rule}': {source}")]
    Parse {
        /// Rule id
        rule: String,
        /// Parse failure
        #[source]
        source: ParseError,
    },
}

impl From<PolicyError> for CoreError {
    fn from(err: PolicyError) -> Self {
        CoreError::Validation {
            field: "policy".to_string(),
            reason: err.to_string(),
        }
    }
}

fn default_rule_id() -> String {
    "rule".to_string()
}

const fn default_effect() -> Gate {
    Gate::Review
}

/// One rule as written in a policy document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Rule id, used in reasons
    #[serde(default = "default_rule_id")]
    pub id: String,
    /// Predicate source
    #[serde(default)]
    pub when: String,
    /// Effect when the predicate holds
    #[serde(default = "default_effect")]
    pub effect: Gate,
}

/// A policy document: `{rules: [{id, when, effect}], defaults}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySpec {
    /// Rules in evaluation order
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
    /// Effect when no rule triggers
    #[serde(default = "default_effect")]
    pub defaults: Gate,
    /// Optional version label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl PolicySpec {
    /// Parse a YAML (or JSON) policy document
    ///
    /// # Errors
    ///
    /// Returns error if the document does not describe a rule set
    pub fn from_yaml(source: &str) -> PolicyResult<Self> {
        serde_yaml::from_str(source).map_err(|e| PolicyError::InvalidDocument(e.to_string()))
    }
}

/// Compiled rule
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRule {
    /// Rule id
    pub id: String,
    /// Effect when the predicate holds
    pub effect: Gate,
    /// Predicate source
    pub source: String,
    /// Parsed predicate, or why it could not be parsed
    pub predicate: Result<Expr, ParseError>,
}

impl CompiledRule {
    /// Whether the predicate parsed
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.predicate.is_ok()
    }
}

/// Compiled policy ready for evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPolicy {
    version: String,
    defaults: Gate,
    rules: Vec<CompiledRule>,
}

impl CompiledPolicy {
    /// Compile a policy document
    ///
    /// Rules whose predicate does not parse are kept; they report
    /// `<id>:error` on every evaluation. `fallback_version` labels the
    /// policy when the document carries no version.
    #[must_use]
    pub fn compile(spec: PolicySpec, fallback_version: &str) -> Self {
        let rules = spec
            .rules
            .into_iter()
            .map(|rule| {
                let predicate = Expr::parse(&rule.when);
                if let Err(e) = &predicate {
                    tracing::warn!(rule = %rule.id, error = %e, "policy rule does not parse");
                }
                CompiledRule {
                    id: rule.id,
                    effect: rule.effect,
                    source: rule.when,
                    predicate,
                }
            })
            .collect();

        Self {
            version: spec.version.unwrap_or_else(|| fallback_version.to_string()),
            defaults: spec.defaults,
            rules,
        }
    }

    /// Compile a YAML (or JSON) policy document
    ///
    /// # Errors
    ///
    /// Returns error if the document does not describe a rule set
    pub fn from_yaml(source: &str, fallback_version: &str) -> PolicyResult<Self> {
        Ok(Self::compile(PolicySpec::from_yaml(source)?, fallback_version))
    }

    /// Load and compile a policy file
    ///
    /// The file name is the version label unless the document sets one.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Configuration`] if the file is missing or
    /// unreadable
    pub fn load(path: &Path) -> PolicyResult<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| PolicyError::Configuration {
            reason: format!("policy file {}: {}", path.display(), e),
        })?;
        let label = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        let policy = Self::from_yaml(&source, &label)?;
        tracing::info!(path = %path.display(), version = %policy.version, rules = policy.rules.len(), "policy loaded");
        Ok(policy)
    }

    /// The policy bundled with this crate
    ///
    /// # Errors
    ///
    /// Returns error only if the bundled document is corrupt
    pub fn bundled() -> PolicyResult<Self> {
        Self::from_yaml(BUNDLED_POLICY, BUNDLED_POLICY_VERSION)
    }

    /// Version label
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Effect when no rule triggers
    #[must_use]
    pub fn defaults(&self) -> Gate {
        self.defaults
    }

    /// Compiled rules
    #[must_use]
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Check every rule parsed
    ///
    /// # Errors
    ///
    /// Returns the first parse failure
    pub fn strict(&self) -> PolicyResult<()> {
        for rule in &self.rules {
            if let Err(e) = &rule.predicate {
                return Err(PolicyError::Parse {
                    rule: rule.id.clone(),
                    source: e.clone(),
                });
            }
        }
        Ok(())
    }

    /// Evaluate every rule against `ctx`
    ///
    /// The decided effect is the strongest triggered effect (deny over
    /// review over pass); with nothing triggered the default applies. Rule
    /// errors are recorded as reasons and never change the effect.
    ///
    /// `defaults` is a fallback, not a contender: it is never ranked
    /// against triggered effects, so a single triggered `pass` wins over a
    /// `deny` default. Policies that want deny-unless-proven must express
    /// the deny as a rule.
    #[must_use]
    pub fn evaluate(&self, ctx: &EvalContext) -> GateDecision {
        let mut decision = GateDecision::new(self.defaults, self.version.clone());
        let mut strongest: Option<Gate> = None;

        for rule in &self.rules {
            let outcome = match &rule.predicate {
                Ok(expr) => ctx.test(expr).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match outcome {
                Ok(true) => {
                    tracing::debug!(rule = %rule.id, effect = %rule.effect, "policy rule triggered");
                    decision.record_trigger(&rule.id, rule.effect);
                    strongest = Some(strongest.map_or(rule.effect, |s| s.strongest(rule.effect)));
                }
                Ok(false) => {}
                Err(error) => {
                    tracing::debug!(rule = %rule.id, %error, "policy rule errored");
                    decision.record_error(&rule.id);
                }
            }
        }

        if let Some(effect) = strongest {
            decision.effect = effect;
        }
        decision
    }
}
