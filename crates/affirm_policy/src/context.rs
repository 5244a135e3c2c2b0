//! Evaluation context and predicate evaluation.

use crate::lang::{BinOp, Expr, PathSegment};
use crate::value::PolicyValue;
use affirm_core::{CandidateEntity, Score};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Tags that flag a PII leak
pub const PII_LEAK_TAGS: [&str; 2] = ["pii_leak", "pii-leak"];

/// Predicate evaluation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    /// Top-level name not present in the context
    #[error("unknown name '{0}'")]
    UnknownName(String),
    /// Operator applied to incompatible operands
    #[error("cannot apply '{op}' to {left} and {right}")]
    TypeMismatch {
        /// Operator spelling
        op: &'static str,
        /// Left operand type
        left: &'static str,
        /// Right operand type
        right: &'static str,
    },
    /// Member access on a non-map value
    #[error("cannot read '{key}' from {found}")]
    NotIndexable {
        /// Requested key
        key: String,
        /// Type of the value being indexed
        found: &'static str,
    },
    /// Unary minus on a non-number
    #[error("cannot negate {0}")]
    BadNegation(&'static str),
    /// Division by zero
    #[error("division by zero")]
    DivisionByZero,
}

/// Names visible to policy predicates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalContext {
    vars: BTreeMap<String, PolicyValue>,
}

impl EvalContext {
    /// Create an empty context
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the standard context for a scored entity
    ///
    /// `blocked_tags` decides `is_blocked`; the scoring engine owns that list.
    #[must_use]
    pub fn for_entity(
        entity: &CandidateEntity,
        score: &Score,
        blocked_tags: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let license = entity
            .declared_license()
            .map(str::to_uppercase)
            .unwrap_or_default();
        let tags = entity
            .tags
            .iter()
            .map(|t| PolicyValue::from(t.as_str()))
            .collect();
        let scores = score
            .scores
            .entries()
            .iter()
            .map(|(name, v)| ((*name).to_string(), PolicyValue::Number(*v)))
            .collect();
        let meta = entity
            .meta
            .iter()
            .map(|(k, v)| (k.clone(), PolicyValue::from(v.as_str())))
            .collect();

        Self::new()
            .with_var("has_license", !license.is_empty())
            .with_var("license", license)
            .with_var("tags", PolicyValue::List(tags))
            .with_var("composite", score.composite)
            .with_var("scores", PolicyValue::Map(scores))
            .with_var("meta", PolicyValue::Map(meta))
            .with_var("domain", entity.domain.as_str())
            .with_var("endpoint_count", entity.endpoints.len() as f64)
            .with_var(
                "has_pii_leak",
                PII_LEAK_TAGS.iter().any(|t| entity.tags.contains(*t)),
            )
            .with_var("is_blocked", entity.tags.iter().any(|t| blocked_tags.contains(t)))
            .with_var("last_update_days", entity.age_days(now).map(|d| d as f64))
    }

    /// Set a variable
    #[must_use]
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<PolicyValue>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Look up a variable
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PolicyValue> {
        self.vars.get(name)
    }

    /// Variable names in this context
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// Evaluate a predicate to its truth value
    ///
    /// # Errors
    ///
    /// Returns error on unknown names, type mismatches and division by zero
    pub fn test(&self, expr: &Expr) -> Result<bool, EvalError> {
        Ok(self.eval(expr)?.truthy())
    }

    /// Evaluate an expression
    ///
    /// # Errors
    ///
    /// Returns error on unknown names, type mismatches and division by zero
    pub fn eval(&self, expr: &Expr) -> Result<PolicyValue, EvalError> {
        match expr {
            Expr::Null => Ok(PolicyValue::Null),
            Expr::Bool(b) => Ok(PolicyValue::Bool(*b)),
            Expr::Number(n) => Ok(PolicyValue::Number(*n)),
            Expr::Str(s) => Ok(PolicyValue::String(s.clone())),
            Expr::List(items) => items
                .iter()
                .map(|e| self.eval(e))
                .collect::<Result<Vec<_>, _>>()
                .map(PolicyValue::List),
            Expr::Path { root, segments } => self.resolve(root, segments),
            Expr::Not(inner) => Ok(PolicyValue::Bool(!self.eval(inner)?.truthy())),
            Expr::Neg(inner) => match self.eval(inner)? {
                PolicyValue::Number(n) => Ok(PolicyValue::Number(-n)),
                other => Err(EvalError::BadNegation(other.type_name())),
            },
            Expr::Binary { op: BinOp::And, left, right } => {
                Ok(PolicyValue::Bool(self.test(left)? && self.test(right)?))
            }
            Expr::Binary { op: BinOp::Or, left, right } => {
                Ok(PolicyValue::Bool(self.test(left)? || self.test(right)?))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                apply(*op, &left, &right)
            }
        }
    }

    fn resolve(&self, root: &str, segments: &[PathSegment]) -> Result<PolicyValue, EvalError> {
        let mut current = self
            .vars
            .get(root)
            .ok_or_else(|| EvalError::UnknownName(root.to_string()))?;
        for segment in segments {
            let key = match segment {
                PathSegment::Field(k) | PathSegment::Key(k) => k,
            };
            match current {
                PolicyValue::Map(map) => match map.get(key) {
                    Some(next) => current = next,
                    None => return Ok(PolicyValue::Null),
                },
                other => {
                    return Err(EvalError::NotIndexable {
                        key: key.clone(),
                        found: other.type_name(),
                    });
                }
            }
        }
        Ok(current.clone())
    }
}

fn mismatch(op: BinOp, left: &PolicyValue, right: &PolicyValue) -> EvalError {
    EvalError::TypeMismatch {
        op: op.symbol(),
        left: left.type_name(),
        right: right.type_name(),
    }
}

fn apply(op: BinOp, left: &PolicyValue, right: &PolicyValue) -> Result<PolicyValue, EvalError> {
    use PolicyValue::{Bool, List, Map, Number, String as Str};

    let value = match op {
        BinOp::Eq | BinOp::Is => Bool(left == right),
        BinOp::Ne | BinOp::IsNot => Bool(left != right),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (left, right) {
                (Number(a), Number(b)) => a.partial_cmp(b),
                (Str(a), Str(b)) => Some(a.cmp(b)),
                _ => None,
            }
            .ok_or_else(|| mismatch(op, left, right))?;
            Bool(match op {
                BinOp::Lt => ordering == Ordering::Less,
                BinOp::Le => ordering != Ordering::Greater,
                BinOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
        BinOp::In | BinOp::NotIn => {
            let found = match (left, right) {
                (_, List(items)) => items.contains(left),
                (Str(needle), Str(haystack)) => haystack.contains(needle.as_str()),
                (Str(key), Map(map)) => map.contains_key(key),
                _ => return Err(mismatch(op, left, right)),
            };
            Bool(if op == BinOp::In { found } else { !found })
        }
        BinOp::Add => match (left, right) {
            (Number(a), Number(b)) => Number(a + b),
            (Str(a), Str(b)) => Str(format!("{}{}", a, b)),
            (List(a), List(b)) => List(a.iter().chain(b).cloned().collect()),
            _ => return Err(mismatch(op, left, right)),
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div => {
            let (Number(a), Number(b)) = (left, right) else {
                return Err(mismatch(op, left, right));
            };
            match op {
                BinOp::Sub => Number(a - b),
                BinOp::Mul => Number(a * b),
                _ if *b == 0.0 => return Err(EvalError::DivisionByZero),
                _ => Number(a / b),
            }
        }
        BinOp::And | BinOp::Or => Bool(match op {
            BinOp::And => left.truthy() && right.truthy(),
            _ => left.truthy() || right.truthy(),
        }),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use affirm_core::{EntityId, FactorScores, Gate};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn score(composite: f64) -> Score {
        Score {
            entity_id: EntityId::new("src:a").unwrap(),
            scores: FactorScores {
                provenance: 1.0,
                permission: 1.0,
                freshness: 1.0,
                quality: 0.8,
                safety: 1.0,
                reputation: 0.7,
            },
            composite,
            gate: Gate::Review,
        }
    }

    fn entity_context() -> EvalContext {
        let entity = CandidateEntity::new(EntityId::new("src:a").unwrap())
            .with_domain("example.org")
            .with_license("mit")
            .with_tag("pii-leak")
            .with_tag("spam")
            .with_meta("uptime", "0.99")
            .with_last_update(now() - Duration::days(400));
        let blocked: BTreeSet<String> = ["spam".to_string()].into();
        EvalContext::for_entity(&entity, &score(0.9), &blocked, now())
    }

    fn eval(ctx: &EvalContext, src: &str) -> Result<PolicyValue, EvalError> {
        ctx.eval(&Expr::parse(src).unwrap())
    }

    fn holds(ctx: &EvalContext, src: &str) -> bool {
        ctx.test(&Expr::parse(src).unwrap()).unwrap()
    }

    #[test]
    fn test_entity_context_fields() {
        let ctx = entity_context();
        assert!(holds(&ctx, "license == 'MIT' and has_license"));
        assert!(holds(&ctx, "has_pii_leak and is_blocked"));
        assert!(holds(&ctx, "'spam' in tags"));
        assert!(holds(&ctx, "scores.quality == 0.8 and scores['safety'] >= 1"));
        assert!(holds(&ctx, "meta.uptime == '0.99'"));
        assert!(holds(&ctx, "domain == 'example.org' and endpoint_count == 0"));
        assert!(holds(&ctx, "last_update_days is not None and last_update_days > 365"));
        assert!(holds(&ctx, "composite * 10 >= 9"));
    }

    #[test]
    fn test_unknown_last_update_is_null() {
        let entity = CandidateEntity::new(EntityId::new("src:b").unwrap());
        let ctx = EvalContext::for_entity(&entity, &score(0.1), &BTreeSet::new(), now());
        assert!(holds(&ctx, "last_update_days == null"));
        assert!(holds(&ctx, "not has_license and license == ''"));
        assert!(!holds(&ctx, "last_update_days != null and last_update_days > 365"));
    }

    #[test]
    fn test_missing_map_key_is_null() {
        let ctx = entity_context();
        assert_eq!(eval(&ctx, "meta.missing").unwrap(), PolicyValue::Null);
        assert!(holds(&ctx, "scores.nope is None"));
    }

    #[test]
    fn test_eval_errors() {
        let ctx = entity_context();
        assert_eq!(
            eval(&ctx, "nonexistent > 1"),
            Err(EvalError::UnknownName("nonexistent".to_string()))
        );
        assert!(matches!(eval(&ctx, "license > 3"), Err(EvalError::TypeMismatch { op: ">", .. })));
        assert!(matches!(eval(&ctx, "meta.missing < 3"), Err(EvalError::TypeMismatch { .. })));
        assert_eq!(eval(&ctx, "composite / 0"), Err(EvalError::DivisionByZero));
        assert!(matches!(eval(&ctx, "license.x"), Err(EvalError::NotIndexable { .. })));
        assert_eq!(eval(&ctx, "-license"), Err(EvalError::BadNegation("string")));
        assert!(matches!(eval(&ctx, "1 in 2"), Err(EvalError::TypeMismatch { op: "in", .. })));
    }

    #[test]
    fn test_short_circuit_skips_errors() {
        let ctx = entity_context();
        assert!(!holds(&ctx, "false and nonexistent"));
        assert!(holds(&ctx, "true or 1 / 0"));
    }

    #[test]
    fn test_membership_forms() {
        let ctx = EvalContext::new().with_var("name", "affirm-core");
        assert!(holds(&ctx, "'core' in name"));
        assert!(holds(&ctx, "3 not in [1, 2]"));
        assert!(holds(&ctx, "name in ['affirm-core', 'x']"));
    }

    #[test]
    fn test_arithmetic_and_strings() {
        let ctx = EvalContext::new();
        assert_eq!(eval(&ctx, "1 + 2 * 3 - 4 / 2").unwrap(), PolicyValue::Number(5.0));
        assert_eq!(eval(&ctx, "'a' + 'b'").unwrap(), PolicyValue::from("ab"));
        assert!(holds(&ctx, "'abc' < 'abd'"));
        assert!(holds(&ctx, "-(1 - 3) == 2"));
        assert!(holds(&ctx, "null == None"));
    }
}
