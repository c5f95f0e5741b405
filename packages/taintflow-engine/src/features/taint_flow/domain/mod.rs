//! Taint-flow domain model: facts, contexts, and the declarative rule
//! schema.

pub mod context;
pub mod fact;
pub mod rules;

pub use context::{ContextId, ContextTable, EMPTY_CONTEXT};
pub use fact::{Fact, FactKey, FieldPath, FieldSeg, SlotKey, SourceTag};
pub use rules::{
    EndpointSpec, MatchKind, MatchSpec, RuleDef, RuleSet, ScopeSpec, ShapeSpec, StringConstraint,
    TransferRuleDef, DEFAULT_RULES,
};
