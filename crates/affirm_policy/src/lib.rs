//! AFFIRM Policy System
//!
//! Admission gating through declarative rules. Predicates are written in a
//! small closed expression grammar and evaluated against a context built
//! from a scored entity; every decision carries the reasons that produced it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compiler;
pub mod context;
pub mod decision;
pub mod lang;
pub mod value;

pub use compiler::{
    CompiledPolicy, CompiledRule, PolicyError, PolicyResult, PolicySpec, RuleSpec, BUNDLED_POLICY_VERSION,
};
pub use context::{EvalContext, EvalError, PII_LEAK_TAGS};
pub use decision::GateDecision;
pub use lang::{BinOp, Expr, ParseError, PathSegment};
pub use value::PolicyValue;
