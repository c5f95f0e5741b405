//! Taint Facts
//!
//! A fact names one tainted location: (graph node, context, optional field
//! path). Identity deliberately excludes provenance: two derivations of
//! the same location under the same context are the same fact, which is
//! what makes the worklist a fixpoint over a finite set.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::features::taint_flow::domain::context::ContextId;
use crate::shared::models::NodeId;

/// A synthetic container slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotKey {
    /// Constant array index
    Index(u32),

    /// Literal map key
    Key(Arc<str>),

    /// Insert position for list/queue semantics
    Ordinal(u32),

    /// Unknown element: the whole container
    AnyElement,
}

impl SlotKey {
    /// Display name used in diagnostics and flow reports
    pub fn label(&self) -> String {
        match self {
            SlotKey::Index(i) => format!("[{}]", i),
            SlotKey::Key(k) => format!("[\"{}\"]", k),
            SlotKey::Ordinal(n) => format!("[#{}]", n),
            SlotKey::AnyElement => "[*]".to_string(),
        }
    }
}

/// One segment of a field path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldSeg {
    /// Named object field
    Field(Arc<str>),

    /// Synthetic container slot
    Slot(SlotKey),
}

impl FieldSeg {
    pub fn field(name: &str) -> Self {
        FieldSeg::Field(Arc::from(name))
    }
}

/// An immutable (possibly empty) path of field segments
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Arc<[FieldSeg]>);

impl FieldPath {
    /// The empty path (a whole-value fact)
    pub fn empty() -> Self {
        FieldPath(Arc::from(Vec::new().into_boxed_slice()))
    }

    /// Single named field
    pub fn single(name: &str) -> Self {
        FieldPath(Arc::from(vec![FieldSeg::field(name)].into_boxed_slice()))
    }

    /// Single container slot
    pub fn slot(slot: SlotKey) -> Self {
        FieldPath(Arc::from(vec![FieldSeg::Slot(slot)].into_boxed_slice()))
    }

    pub fn from_segs(segs: Vec<FieldSeg>) -> Self {
        FieldPath(Arc::from(segs.into_boxed_slice()))
    }

    /// Parse a dotted path ("profile.email") into named segments
    pub fn parse(dotted: &str) -> Self {
        if dotted.is_empty() {
            return Self::empty();
        }
        Self::from_segs(dotted.split('.').map(FieldSeg::field).collect())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn segs(&self) -> &[FieldSeg] {
        &self.0
    }

    pub fn first(&self) -> Option<&FieldSeg> {
        self.0.first()
    }

    /// The path without its first segment
    pub fn suffix(&self) -> FieldPath {
        FieldPath(Arc::from(self.0[1..].to_vec().into_boxed_slice()))
    }

    /// Dotted display form
    pub fn label(&self) -> String {
        self.0
            .iter()
            .map(|s| match s {
                FieldSeg::Field(f) => f.to_string(),
                FieldSeg::Slot(k) => k.label(),
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Provenance of a fact: where the taint entered and which source rule (if
/// any) introduced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceTag {
    /// Node where taint originated
    pub origin: NodeId,

    /// Source rule that seeded this taint, when rule-driven
    pub rule: Option<Arc<str>>,

    /// Human-readable label ("source:user-input", "heuristic:entry-param")
    pub label: Arc<str>,
}

impl SourceTag {
    pub fn from_rule(origin: NodeId, rule_id: &Arc<str>, label: &str) -> Self {
        Self {
            origin,
            rule: Some(rule_id.clone()),
            label: Arc::from(label),
        }
    }

    pub fn heuristic(origin: NodeId, label: &str) -> Self {
        Self {
            origin,
            rule: None,
            label: Arc::from(label),
        }
    }
}

/// Identity of a fact: (node, context, field path)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FactKey {
    pub node: NodeId,
    pub context: ContextId,
    pub field: FieldPath,
}

/// One tainted location, never mutated after creation
#[derive(Debug, Clone)]
pub struct Fact {
    /// Graph node carrying the taint
    pub node: NodeId,

    /// Calling context under which the node is tainted
    pub context: ContextId,

    /// Field path for heap-object field facts; empty for whole values
    pub field: FieldPath,

    /// Provenance
    pub source: SourceTag,
}

impl Fact {
    pub fn new(node: NodeId, context: ContextId, source: SourceTag) -> Self {
        Self {
            node,
            context,
            field: FieldPath::empty(),
            source,
        }
    }

    pub fn with_field(node: NodeId, context: ContextId, field: FieldPath, source: SourceTag) -> Self {
        Self {
            node,
            context,
            field,
            source,
        }
    }

    /// Identity for dedup; excludes provenance
    pub fn key(&self) -> FactKey {
        FactKey {
            node: self.node,
            context: self.context,
            field: self.field.clone(),
        }
    }

    /// A derived fact at a new location, same context and provenance
    pub fn derive(&self, node: NodeId) -> Fact {
        Fact {
            node,
            context: self.context,
            field: FieldPath::empty(),
            source: self.source.clone(),
        }
    }

    /// A derived fact at a new location under a different context
    pub fn derive_in(&self, node: NodeId, context: ContextId) -> Fact {
        Fact {
            node,
            context,
            field: FieldPath::empty(),
            source: self.source.clone(),
        }
    }

    /// A derived field fact (heap-object field)
    pub fn derive_field(&self, node: NodeId, field: FieldPath) -> Fact {
        Fact {
            node,
            context: self.context,
            field,
            source: self.source.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_identity_ignores_provenance() {
        let a = Fact::new(3, 0, SourceTag::heuristic(3, "seed-a"));
        let b = Fact::new(3, 0, SourceTag::heuristic(9, "seed-b"));
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_field_path_distinguishes_facts() {
        let tag = SourceTag::heuristic(1, "seed");
        let whole = Fact::new(1, 0, tag.clone());
        let field = Fact::with_field(1, 0, FieldPath::single("secret"), tag);
        assert_ne!(whole.key(), field.key());
    }

    #[test]
    fn test_path_parse_and_suffix() {
        let p = FieldPath::parse("profile.email");
        assert_eq!(p.len(), 2);
        assert_eq!(p.suffix(), FieldPath::single("email"));
        assert_eq!(p.label(), "profile.email");
        assert!(FieldPath::parse("").is_empty());
    }

    #[test]
    fn test_slot_keys_are_distinct() {
        assert_ne!(
            FieldPath::slot(SlotKey::Ordinal(0)),
            FieldPath::slot(SlotKey::Ordinal(1))
        );
        assert_ne!(
            FieldPath::slot(SlotKey::Index(0)),
            FieldPath::slot(SlotKey::Ordinal(0))
        );
    }
}
