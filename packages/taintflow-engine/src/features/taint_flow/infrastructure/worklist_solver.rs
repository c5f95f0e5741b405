//! Worklist Fixpoint Solver
//!
//! One FIFO of facts and one visited-identity set. Each dequeued fact is
//! pushed through every propagation-rule family; derived facts enter the
//! queue only if their identity is new. The visited set is finite (nodes ×
//! contexts × field paths) and grows monotonically, so the loop is a
//! classical fixpoint and terminates without an iteration cap.
//!
//! Families handled here: copy (with call/return context transitions),
//! expression, field store/load, container store/load with precise slots,
//! closure captures, synthetic call/return, constructor stores, promise
//! callbacks and payloads, rest arguments, reflect loads, and the
//! any-element suppression once precise slot modeling applies. Transfer
//! rules run per dequeue through the executor the engine passes in.

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::features::taint_flow::domain::context::{ContextId, ContextTable};
use crate::features::taint_flow::domain::fact::{Fact, FactKey, FieldPath, FieldSeg, SlotKey};
use crate::features::taint_flow::infrastructure::container_model::{ContainerModel, ReadTarget};
use crate::features::taint_flow::infrastructure::diagnostics::SolverStats;
use crate::features::taint_flow::infrastructure::edge_builders::{
    CallEdgeInfo, CallEdgeKind, EdgeArtifacts, PromiseKind,
};
use crate::features::taint_flow::infrastructure::transfer::TransferExecutor;
use crate::shared::models::{NodeId, ObjectId, ProgramGraph};

/// Field name front ends use for the unspecific "any array element" cell
pub const ANY_ELEMENT_FIELD: &str = "[*]";

/// The solver's append-only view of what is tainted. Also the query
/// surface for transfer "from" checks and sink endpoint checks.
#[derive(Debug, Default)]
pub struct TaintState {
    /// Fact identities ever enqueued
    visited: FxHashSet<FactKey>,

    /// All facts per node (scalar and heap-object nodes alike)
    by_node: FxHashMap<NodeId, Vec<Fact>>,

    /// Scalar locations recorded for sink matching
    marks: FxHashSet<(NodeId, ContextId)>,

    /// Precise container slots per object, for any-element suppression
    precise_slots: FxHashMap<ObjectId, FxHashSet<SlotKey>>,

    /// Transfer rule ids on the (first) derivation of a fact
    chains: FxHashMap<FactKey, Vec<Arc<str>>>,
}

impl TaintState {
    /// Total distinct facts
    pub fn len(&self) -> usize {
        self.visited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }

    pub fn contains(&self, key: &FactKey) -> bool {
        self.visited.contains(key)
    }

    /// All facts at a node
    pub fn facts_at(&self, node: NodeId) -> &[Fact] {
        self.by_node.get(&node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// First whole-value fact at a node, any context
    pub fn whole_fact_at(&self, node: NodeId) -> Option<&Fact> {
        self.facts_at(node).iter().find(|f| f.field.is_empty())
    }

    /// Is the node marked tainted under any context?
    pub fn is_marked(&self, node: NodeId) -> bool {
        self.facts_at(node).iter().any(|f| {
            f.field.is_empty() && self.marks.contains(&(node, f.context))
        })
    }

    /// A fact carried at `holder`'s points-to targets under `path`
    pub fn field_fact_through(
        &self,
        graph: &ProgramGraph,
        holder: NodeId,
        path: &FieldPath,
    ) -> Option<&Fact> {
        for &oid in graph.points_to(holder) {
            let obj_node = graph.object_node(oid)?;
            if let Some(f) = self.facts_at(obj_node).iter().find(|f| &f.field == path) {
                return Some(f);
            }
        }
        None
    }

    /// Transfer rules on the derivation of a fact
    pub fn chain_for(&self, key: &FactKey) -> &[Arc<str>] {
        self.chains.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn has_precise_slots(&self, oid: ObjectId) -> bool {
        self.precise_slots.get(&oid).is_some_and(|s| !s.is_empty())
    }
}

/// FIFO fixpoint solver over one scope's facts
pub struct WorklistSolver {
    graph: Arc<ProgramGraph>,
    edges: Arc<EdgeArtifacts>,
    containers: Arc<ContainerModel>,

    /// Per-run context table (runs never share mutable context state)
    pub contexts: ContextTable,

    pub state: TaintState,
    queue: VecDeque<Fact>,
    pub stats: SolverStats,
}

impl WorklistSolver {
    pub fn new(
        graph: Arc<ProgramGraph>,
        edges: Arc<EdgeArtifacts>,
        containers: Arc<ContainerModel>,
        k: usize,
    ) -> Self {
        Self {
            graph,
            edges,
            containers,
            contexts: ContextTable::new(k),
            state: TaintState::default(),
            queue: VecDeque::new(),
            stats: SolverStats::default(),
        }
    }

    /// Seed one fact; returns false when its identity is already known
    pub fn seed(&mut self, fact: Fact) -> bool {
        self.enqueue(fact, None)
    }

    /// Enqueue a fact if unseen. `parent` carries the deriving fact's
    /// identity plus a transfer rule id when the derivation was rule-driven.
    fn enqueue(&mut self, fact: Fact, parent: Option<(&FactKey, Option<&Arc<str>>)>) -> bool {
        let key = fact.key();
        if self.state.visited.contains(&key) {
            self.stats.dedup_skips += 1;
            return false;
        }

        // Provenance chain: copied from the parent, extended by the
        // transfer rule when one drove this derivation
        if let Some((parent_key, rule)) = parent {
            let mut chain = self.state.chain_for(parent_key).to_vec();
            if let Some(rule) = rule {
                chain.push(rule.clone());
            }
            if !chain.is_empty() {
                self.state.chains.insert(key.clone(), chain);
            }
        }

        if fact.field.is_empty() {
            self.state.marks.insert((fact.node, fact.context));
        } else if let Some(oid) = self.graph.node(fact.node).object_id() {
            if fact.field.len() == 1 {
                if let Some(FieldSeg::Slot(slot)) = fact.field.first() {
                    if *slot != SlotKey::AnyElement {
                        self.state
                            .precise_slots
                            .entry(oid)
                            .or_default()
                            .insert(slot.clone());
                    }
                }
            }
        }

        self.stats.facts_created += 1;
        self.state.visited.insert(key);
        self.state.by_node.entry(fact.node).or_default().push(fact.clone());
        self.queue.push_back(fact);
        true
    }

    /// Drain the queue to fixpoint, running transfer rules per dequeue
    pub fn solve(&mut self, transfer: &mut TransferExecutor) {
        let graph = Arc::clone(&self.graph);
        let edges = Arc::clone(&self.edges);
        while let Some(fact) = self.queue.pop_front() {
            self.stats.iterations += 1;

            if fact.field.is_empty() {
                self.propagate_value(&fact);
            } else {
                self.propagate_heap(&fact);
            }

            let results = transfer.from_fact(&graph, &edges, &fact);
            let parent_key = fact.key();
            for r in results {
                if self.enqueue(r.fact, Some((&parent_key, Some(&r.rule)))) {
                    self.stats.transfer_derived += 1;
                }
            }
        }
        debug!(
            facts = self.state.len(),
            iterations = self.stats.iterations,
            "worklist drained"
        );
    }

    /// Context transition over an annotated call/return edge; `None` means
    /// the transition was rejected
    fn transition(&mut self, ctx: ContextId, info: &CallEdgeInfo) -> Option<ContextId> {
        match info.kind {
            CallEdgeKind::Call => {
                let k = info.depth_override.unwrap_or(self.contexts.depth_bound());
                Some(self.contexts.callee_context_with_k(ctx, info.call_site, k))
            }
            CallEdgeKind::Return => {
                if info.depth_override == Some(0) {
                    // Edge collapsed to the empty context; nothing to check
                    return Some(self.contexts.empty());
                }
                match self.contexts.return_to(ctx, info.call_site) {
                    Some(restored) => Some(restored),
                    None => {
                        self.stats.context_rejections += 1;
                        None
                    }
                }
            }
        }
    }

    /// Families over a whole-value fact
    fn propagate_value(&mut self, fact: &Fact) {
        let graph = Arc::clone(&self.graph);
        let edges = Arc::clone(&self.edges);
        let containers = Arc::clone(&self.containers);
        let parent = fact.key();
        let node = graph.node(fact.node);

        // Copy edges, with context transitions at call boundaries
        for &dst in &node.copy_out {
            match edges.call_edges.get(&(fact.node, dst)) {
                Some(info) => {
                    let info = info.clone();
                    if let Some(ctx) = self.transition(fact.context, &info) {
                        if self.enqueue(fact.derive_in(dst, ctx), Some((&parent, None))) {
                            self.stats.copies += 1;
                        }
                    }
                }
                None => {
                    if self.enqueue(fact.derive(dst), Some((&parent, None))) {
                        self.stats.copies += 1;
                    }
                }
            }
        }

        // Derived expressions
        for expr in graph.exprs_using(fact.node) {
            if self.enqueue(fact.derive(expr.target), Some((&parent, None))) {
                self.stats.expressions += 1;
            }
        }

        // Field stores: taint the field on every points-to target
        for fw in &node.field_writes {
            let field = FieldPath::single(&fw.field);
            for &oid in graph.points_to(fw.base) {
                if let Some(obj_node) = graph.object_node(oid) {
                    if self.enqueue(
                        fact.derive_field(obj_node, field.clone()),
                        Some((&parent, None)),
                    ) {
                        self.stats.field_stores += 1;
                    }
                }
            }
        }

        // Container stores: synthetic slot on every points-to target
        for wop in containers.writes_for_value(fact.node) {
            let slot = FieldPath::slot(wop.slot.clone());
            for &oid in graph.points_to(wop.base) {
                if let Some(obj_node) = graph.object_node(oid) {
                    if self.enqueue(
                        fact.derive_field(obj_node, slot.clone()),
                        Some((&parent, None)),
                    ) {
                        self.stats.container_stores += 1;
                    }
                }
            }
        }

        // Capture edges: into the closure body under a derived context
        if let Some(capture_edges) = edges.capture_edges.get(&fact.node) {
            for ce in capture_edges.clone() {
                let ctx = self.contexts.callee_context(fact.context, ce.call_site);
                if self.enqueue(fact.derive_in(ce.inner, ctx), Some((&parent, None))) {
                    self.stats.captures += 1;
                }
            }
        }

        // Synthetic call edges (call graph had no edge here)
        if let Some(synth) = edges.synthetic_call.get(&fact.node) {
            for edge in synth.clone() {
                if let Some(ctx) = self.transition(fact.context, &edge.info) {
                    if self.enqueue(fact.derive_in(edge.target, ctx), Some((&parent, None))) {
                        self.stats.synthetic_calls += 1;
                    }
                }
            }
        }

        // Synthetic return edges, with the same realizability discipline
        if let Some(synth) = edges.synthetic_return.get(&fact.node) {
            for edge in synth.clone() {
                if let Some(ctx) = self.transition(fact.context, &edge.info) {
                    if self.enqueue(fact.derive_in(edge.target, ctx), Some((&parent, None))) {
                        self.stats.synthetic_returns += 1;
                    }
                }
            }
        }

        // Constructor stores: arg i taints result.field
        if let Some(stores) = edges.ctor_stores.get(&fact.node) {
            for cs in stores.clone() {
                let field = FieldPath::single(&cs.field);
                for &oid in graph.points_to(cs.result) {
                    if let Some(obj_node) = graph.object_node(oid) {
                        if self.enqueue(
                            fact.derive_field(obj_node, field.clone()),
                            Some((&parent, None)),
                        ) {
                            self.stats.ctor_stores += 1;
                        }
                    }
                }
            }
        }

        // Rest arguments: into the synthesized rest-array parameter
        if let Some(rest) = edges.rest_edges.get(&fact.node) {
            for re in rest.clone() {
                let ctx = self.contexts.callee_context(fact.context, re.call_site);
                if self.enqueue(fact.derive_in(re.rest_param, ctx), Some((&parent, None))) {
                    self.stats.rest_args += 1;
                }
            }
        }

        // Promise payload: resolve(v) makes the promise value tainted
        if let Some(payloads) = edges.promise_payloads.get(&fact.node) {
            for &promise in payloads.clone().iter() {
                if self.enqueue(fact.derive(promise), Some((&parent, None))) {
                    self.stats.promise_dispatches += 1;
                }
            }
        }

        // Promise callbacks on a tainted receiver
        if let Some(dispatches) = edges.promise_edges.get(&fact.node) {
            for pe in dispatches.clone() {
                let ctx = self.contexts.callee_context(fact.context, pe.call_site);
                let callback = graph.method(pe.callback);
                match pe.kind {
                    PromiseKind::Then | PromiseKind::Catch => {
                        if let Some(&param) = callback.param_nodes.first() {
                            if self.enqueue(fact.derive_in(param, ctx), Some((&parent, None))) {
                                self.stats.promise_dispatches += 1;
                            }
                        }
                    }
                    PromiseKind::Finally => {
                        // Success/failure payload shape is not reasoned
                        // about: every local of the callback body
                        let targets: Vec<NodeId> = callback
                            .param_nodes
                            .iter()
                            .chain(callback.local_nodes.iter())
                            .copied()
                            .collect();
                        for t in targets {
                            if self.enqueue(fact.derive_in(t, ctx), Some((&parent, None))) {
                                self.stats.promise_dispatches += 1;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Families over a heap-object field fact
    fn propagate_heap(&mut self, fact: &Fact) {
        let graph = Arc::clone(&self.graph);
        let edges = Arc::clone(&self.edges);
        let containers = Arc::clone(&self.containers);
        let parent = fact.key();
        let Some(oid) = graph.node(fact.node).object_id() else {
            return;
        };
        let Some(first) = fact.field.first().cloned() else {
            return;
        };

        match first {
            FieldSeg::Field(name) => {
                // Any-element suppression: precise slot facts already
                // cover this object, the broad cell stays quiet
                if &*name == ANY_ELEMENT_FIELD && self.state.has_precise_slots(oid) {
                    self.stats.any_element_suppressed += 1;
                    return;
                }

                let key = (oid, name.to_string());
                if let Some(readers) = edges.field_readers.get(&key) {
                    for &reader in readers.clone().iter() {
                        if fact.field.len() == 1 {
                            if self.enqueue(fact.derive(reader), Some((&parent, None))) {
                                self.stats.field_loads += 1;
                            }
                        } else {
                            // Deeper path: the reader now holds the inner
                            // object; re-anchor the remaining path there
                            let suffix = fact.field.suffix();
                            for &inner_oid in graph.points_to(reader) {
                                if let Some(obj_node) = graph.object_node(inner_oid) {
                                    if self.enqueue(
                                        fact.derive_field(obj_node, suffix.clone()),
                                        Some((&parent, None)),
                                    ) {
                                        self.stats.field_loads += 1;
                                    }
                                }
                            }
                        }
                    }
                }

                // Reflect loads: get(obj, "name") with the matching key
                if fact.field.len() == 1 {
                    if let Some(readers) = edges.reflect_loads.get(&key) {
                        for &reader in readers.clone().iter() {
                            if self.enqueue(fact.derive(reader), Some((&parent, None))) {
                                self.stats.reflect_loads += 1;
                            }
                        }
                    }
                }
            }
            FieldSeg::Slot(slot) => {
                if fact.field.len() != 1 {
                    return;
                }
                let reads: Vec<_> = containers
                    .reads_for_object(oid)
                    .filter(|op| {
                        matches!(slot, SlotKey::AnyElement) || containers.read_matches(op, &slot)
                    })
                    .cloned()
                    .collect();
                for op in reads {
                    match op.target {
                        ReadTarget::Result(r) => {
                            if self.enqueue(fact.derive(r), Some((&parent, None))) {
                                self.stats.container_loads += 1;
                            }
                        }
                        ReadTarget::CallbackParams(params) => {
                            let ctx = match op.call_site {
                                Some(site) => self.contexts.callee_context(fact.context, site),
                                None => fact.context,
                            };
                            for p in params {
                                if self.enqueue(fact.derive_in(p, ctx), Some((&parent, None))) {
                                    self.stats.container_loads += 1;
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::taint_flow::domain::fact::SourceTag;
    use crate::features::taint_flow::domain::rules::RuleSet;
    use crate::features::taint_flow::infrastructure::edge_builders::EdgeBuilderConfig;
    use crate::features::taint_flow::infrastructure::rule_index::compile;
    use crate::shared::builder::GraphBuilder;
    use crate::shared::models::{ExprKind, IndexExpr};

    fn empty_transfer() -> TransferExecutor {
        TransferExecutor::new(Arc::new(compile(&RuleSet::default()).expect("empty rules")))
    }

    struct Fixture {
        graph: Arc<ProgramGraph>,
        edges: Arc<EdgeArtifacts>,
        containers: Arc<ContainerModel>,
    }

    impl Fixture {
        fn new(graph: ProgramGraph) -> Self {
            let edges = Arc::new(EdgeArtifacts::build(&graph, &EdgeBuilderConfig::default()));
            let containers = Arc::new(ContainerModel::build(&graph));
            Self {
                graph: Arc::new(graph),
                edges,
                containers,
            }
        }

        fn solver(&self, k: usize) -> WorklistSolver {
            WorklistSolver::new(
                Arc::clone(&self.graph),
                Arc::clone(&self.edges),
                Arc::clone(&self.containers),
                k,
            )
        }
    }

    fn seed_tag(node: NodeId) -> SourceTag {
        SourceTag::heuristic(node, "seed")
    }

    #[test]
    fn test_seeding_is_idempotent() {
        let mut b = GraphBuilder::new();
        let m = b.add_method("main", "M.main()", "M", "m.src", "app", true);
        let x = b.add_local(m, "x");
        let fx = Fixture::new(b.finish());

        let mut solver = fx.solver(1);
        assert!(solver.seed(Fact::new(x, 0, seed_tag(x))));
        assert!(!solver.seed(Fact::new(x, 0, seed_tag(x))));
        assert_eq!(solver.state.len(), 1);
        assert_eq!(solver.stats.dedup_skips, 1);
    }

    #[test]
    fn test_copy_chain_propagates() {
        let mut b = GraphBuilder::new();
        let m = b.add_method("main", "M.main()", "M", "m.src", "app", true);
        let x = b.add_local(m, "x");
        let y = b.add_local(m, "y");
        let z = b.add_local(m, "z");
        b.copy(x, y);
        b.copy(y, z);
        let fx = Fixture::new(b.finish());

        let mut solver = fx.solver(1);
        solver.seed(Fact::new(x, 0, seed_tag(x)));
        solver.solve(&mut empty_transfer());

        assert!(solver.state.whole_fact_at(z).is_some());
        assert!(solver.state.is_marked(z));
        assert_eq!(solver.stats.copies, 2);
    }

    #[test]
    fn test_monotonicity_facts_only_grow() {
        let mut b = GraphBuilder::new();
        let m = b.add_method("main", "M.main()", "M", "m.src", "app", true);
        let x = b.add_local(m, "x");
        let y = b.add_local(m, "y");
        // Copy cycle: must converge, never remove facts
        b.copy(x, y);
        b.copy(y, x);
        let fx = Fixture::new(b.finish());

        let mut solver = fx.solver(1);
        solver.seed(Fact::new(x, 0, seed_tag(x)));
        let before = solver.state.len();
        solver.solve(&mut empty_transfer());
        assert!(solver.state.len() >= before);
        assert_eq!(solver.state.len(), 2);
    }

    #[test]
    fn test_call_and_return_context_discipline() {
        let mut b = GraphBuilder::new();
        let caller = b.add_method("caller", "C.caller()", "C", "c.src", "app", true);
        let callee = b.add_method("id", "D.id(String)", "D", "d.src", "app", true);
        let p = b.add_param(callee, "p");
        let ret = b.add_return(callee);
        b.copy(p, ret);

        let arg = b.add_local(caller, "arg");
        let result = b.add_local(caller, "result");
        b.copy(arg, p);
        b.copy(ret, result);
        b.invoke(caller, "D.id(String)", "id", None, vec![arg], Some(result), Some(callee));
        let fx = Fixture::new(b.finish());

        let mut solver = fx.solver(1);
        solver.seed(Fact::new(arg, 0, seed_tag(arg)));
        solver.solve(&mut empty_transfer());

        // Taint went in under the callee context and came back out to the
        // caller's empty context
        let back = solver.state.whole_fact_at(result).expect("result tainted");
        assert_eq!(back.context, 0);
        assert_eq!(solver.stats.context_rejections, 0);
    }

    #[test]
    fn test_mismatched_return_produces_nothing() {
        let mut b = GraphBuilder::new();
        let caller_a = b.add_method("a", "A.a()", "A", "a.src", "app", true);
        let caller_b = b.add_method("b", "B.b()", "B", "b.src", "app", true);
        let callee = b.add_method("id", "D.id(String)", "D", "d.src", "app", true);
        let p = b.add_param(callee, "p");
        let ret = b.add_return(callee);
        b.copy(p, ret);

        // a() calls id(x); only b() consumes a result edge
        let x = b.add_local(caller_a, "x");
        b.copy(x, p);
        b.invoke(caller_a, "D.id(String)", "id", None, vec![x], None, Some(callee));

        let rb = b.add_local(caller_b, "rb");
        b.copy(ret, rb);
        let dummy = b.add_local(caller_b, "dummy");
        b.invoke(caller_b, "D.id(String)", "id", None, vec![dummy], Some(rb), Some(callee));
        let fx = Fixture::new(b.finish());

        let mut solver = fx.solver(1);
        solver.seed(Fact::new(x, 0, seed_tag(x)));
        solver.solve(&mut empty_transfer());

        // The return into b's call site does not match a's call context
        assert!(solver.state.whole_fact_at(rb).is_none());
        assert!(solver.stats.context_rejections >= 1);
    }

    #[test]
    fn test_expression_taints_target() {
        let mut b = GraphBuilder::new();
        let m = b.add_method("main", "M.main()", "M", "m.src", "app", true);
        let x = b.add_local(m, "x");
        let other = b.add_local(m, "other");
        let sum = b.add_local(m, "sum");
        b.expr(ExprKind::Binary, vec![x, other], sum);
        let fx = Fixture::new(b.finish());

        let mut solver = fx.solver(1);
        solver.seed(Fact::new(x, 0, seed_tag(x)));
        solver.solve(&mut empty_transfer());

        assert!(solver.state.whole_fact_at(sum).is_some());
        assert_eq!(solver.stats.expressions, 1);
    }

    #[test]
    fn test_field_store_then_load_roundtrip() {
        let mut b = GraphBuilder::new();
        let m = b.add_method("main", "M.main()", "M", "m.src", "app", true);
        let (oid, _) = b.add_object(m, "new User");
        let u = b.add_local(m, "u");
        b.points_to(u, oid);
        let secret = b.add_local(m, "secret");
        b.field_write(secret, u, "email");
        let out = b.add_local(m, "out");
        b.field_load(out, u, "email");
        let fx = Fixture::new(b.finish());

        let mut solver = fx.solver(1);
        solver.seed(Fact::new(secret, 0, seed_tag(secret)));
        solver.solve(&mut empty_transfer());

        assert!(solver.state.whole_fact_at(out).is_some());
        assert_eq!(solver.stats.field_stores, 1);
        assert_eq!(solver.stats.field_loads, 1);
    }

    #[test]
    fn test_container_slot_isolation() {
        let mut b = GraphBuilder::new();
        let m = b.add_method("main", "M.main()", "M", "m.src", "app", true);
        let (oid, _) = b.add_object(m, "new ArrayList");
        let list = b.add_local(m, "list");
        b.points_to(list, oid);
        let tainted = b.add_local(m, "tainted");
        let clean = b.add_local(m, "clean");
        let r0 = b.add_local(m, "r0");
        let r1 = b.add_local(m, "r1");
        let zero = b.add_literal(m, "0");
        let one = b.add_literal(m, "1");

        b.invoke(m, "List.add(Object)", "add", Some(list), vec![tainted], None, None);
        b.invoke(m, "List.add(Object)", "add", Some(list), vec![clean], None, None);
        b.invoke(m, "List.get(int)", "get", Some(list), vec![zero], Some(r0), None);
        b.invoke(m, "List.get(int)", "get", Some(list), vec![one], Some(r1), None);
        let fx = Fixture::new(b.finish());

        let mut solver = fx.solver(1);
        solver.seed(Fact::new(tainted, 0, seed_tag(tainted)));
        solver.solve(&mut empty_transfer());

        assert!(solver.state.whole_fact_at(r0).is_some(), "get(0) reads the tainted slot");
        assert!(solver.state.whole_fact_at(r1).is_none(), "get(1) must stay clean");
    }

    #[test]
    fn test_array_precise_index_isolation() {
        let mut b = GraphBuilder::new();
        let m = b.add_method("main", "M.main()", "M", "m.src", "app", true);
        let (oid, _) = b.add_object(m, "new Array");
        let arr = b.add_local(m, "arr");
        b.points_to(arr, oid);
        let tainted = b.add_local(m, "tainted");
        let out0 = b.add_local(m, "out0");
        let out1 = b.add_local(m, "out1");
        b.array_store(arr, IndexExpr::Const(0), tainted);
        b.array_load(out0, arr, IndexExpr::Const(0));
        b.array_load(out1, arr, IndexExpr::Const(1));
        let fx = Fixture::new(b.finish());

        let mut solver = fx.solver(1);
        solver.seed(Fact::new(tainted, 0, seed_tag(tainted)));
        solver.solve(&mut empty_transfer());

        assert!(solver.state.whole_fact_at(out0).is_some());
        assert!(solver.state.whole_fact_at(out1).is_none());
    }

    #[test]
    fn test_any_element_suppressed_by_precise_slot() {
        let mut b = GraphBuilder::new();
        let m = b.add_method("main", "M.main()", "M", "m.src", "app", true);
        let (oid, _) = b.add_object(m, "new Array");
        let arr = b.add_local(m, "arr");
        b.points_to(arr, oid);
        let tainted = b.add_local(m, "tainted");
        let broad = b.add_local(m, "broad");
        // Precise store at index 0, plus a broad any-element reader
        b.array_store(arr, IndexExpr::Const(0), tainted);
        b.field_write(tainted, arr, ANY_ELEMENT_FIELD);
        b.field_load(broad, arr, ANY_ELEMENT_FIELD);
        let fx = Fixture::new(b.finish());

        let mut solver = fx.solver(1);
        solver.seed(Fact::new(tainted, 0, seed_tag(tainted)));
        solver.solve(&mut empty_transfer());

        assert!(
            solver.state.whole_fact_at(broad).is_none(),
            "broad cell suppressed once precise modeling applies"
        );
        assert!(solver.stats.any_element_suppressed >= 1);
    }

    #[test]
    fn test_capture_edge_reaches_closure_local() {
        let mut b = GraphBuilder::new();
        let outer_m = b.add_method("outer", "O.outer()", "O", "o.src", "app", true);
        let closure = b.add_method("lambda$0", "O.lambda$0()", "O", "o.src", "app", true);
        let outer_v = b.add_local(outer_m, "v");
        let inner_v = b.add_local(closure, "v");
        b.capture(outer_v, inner_v, closure);
        let f = b.add_local(outer_m, "f");
        b.bind_closure(f, closure);
        b.invoke(outer_m, "f()", "f", Some(f), vec![], None, None);
        let fx = Fixture::new(b.finish());

        let mut solver = fx.solver(1);
        solver.seed(Fact::new(outer_v, 0, seed_tag(outer_v)));
        solver.solve(&mut empty_transfer());

        let inner = solver.state.whole_fact_at(inner_v).expect("captured local tainted");
        assert_ne!(inner.context, 0, "closure body runs under a derived context");
    }

    #[test]
    fn test_promise_then_taints_callback_param() {
        let mut b = GraphBuilder::new();
        let m = b.add_method("main", "M.main()", "M", "m.src", "app", true);
        let cb = b.add_method("onValue", "M.onValue(Object)", "M", "m.src", "app", true);
        let payload_param = b.add_param(cb, "value");
        let promise = b.add_local(m, "promise");
        let f = b.add_local(m, "f");
        b.bind_closure(f, cb);
        b.invoke(m, "Promise.then(Function)", "then", Some(promise), vec![f], None, None);
        let fx = Fixture::new(b.finish());

        let mut solver = fx.solver(1);
        solver.seed(Fact::new(promise, 0, seed_tag(promise)));
        solver.solve(&mut empty_transfer());

        assert!(solver.state.whole_fact_at(payload_param).is_some());
    }

    #[test]
    fn test_promise_finally_taints_all_locals() {
        let mut b = GraphBuilder::new();
        let m = b.add_method("main", "M.main()", "M", "m.src", "app", true);
        let cb = b.add_method("cleanup", "M.cleanup()", "M", "m.src", "app", true);
        let l1 = b.add_local(cb, "a");
        let l2 = b.add_local(cb, "b");
        let promise = b.add_local(m, "promise");
        let f = b.add_local(m, "f");
        b.bind_closure(f, cb);
        b.invoke(m, "Promise.finally(Function)", "finally", Some(promise), vec![f], None, None);
        let fx = Fixture::new(b.finish());

        let mut solver = fx.solver(1);
        solver.seed(Fact::new(promise, 0, seed_tag(promise)));
        solver.solve(&mut empty_transfer());

        assert!(solver.state.whole_fact_at(l1).is_some());
        assert!(solver.state.whole_fact_at(l2).is_some());
    }

    #[test]
    fn test_rest_arg_taints_synthesized_array() {
        let mut b = GraphBuilder::new();
        let caller = b.add_method("caller", "C.caller()", "C", "c.src", "app", true);
        let callee = b.add_method("log", "L.log(String,Object[])", "L", "l.src", "app", true);
        b.add_param(callee, "fmt");
        let rest = b.add_rest_param(callee, "parts");
        let fmt = b.add_local(caller, "fmt");
        let tainted = b.add_local(caller, "tainted");
        b.invoke(caller, "L.log(String,Object[])", "log", None, vec![fmt, tainted], None, Some(callee));
        let fx = Fixture::new(b.finish());

        let mut solver = fx.solver(1);
        solver.seed(Fact::new(tainted, 0, seed_tag(tainted)));
        solver.solve(&mut empty_transfer());

        let f = solver.state.whole_fact_at(rest).expect("rest param tainted");
        assert_ne!(f.context, 0);
    }

    #[test]
    fn test_reflect_load_matches_literal_key() {
        let mut b = GraphBuilder::new();
        let m = b.add_method("main", "M.main()", "M", "m.src", "app", true);
        let (oid, _) = b.add_object(m, "new Config");
        let cfg = b.add_local(m, "cfg");
        b.points_to(cfg, oid);
        let secret = b.add_local(m, "secret");
        b.field_write(secret, cfg, "token");

        let key_hit = b.add_literal(m, "token");
        let key_miss = b.add_literal(m, "other");
        let hit = b.add_local(m, "hit");
        let miss = b.add_local(m, "miss");
        b.invoke(m, "Reflect.get(Object,String)", "get", None, vec![cfg, key_hit], Some(hit), None);
        b.invoke(m, "Reflect.get(Object,String)", "get", None, vec![cfg, key_miss], Some(miss), None);
        let fx = Fixture::new(b.finish());

        let mut solver = fx.solver(1);
        solver.seed(Fact::new(secret, 0, seed_tag(secret)));
        solver.solve(&mut empty_transfer());

        assert!(solver.state.whole_fact_at(hit).is_some());
        assert!(solver.state.whole_fact_at(miss).is_none());
    }

    #[test]
    fn test_synthetic_call_edge_used_when_unresolved() {
        let mut b = GraphBuilder::new();
        let caller = b.add_method("caller", "C.caller()", "C", "c.src", "app", true);
        let callee = b.add_method("handle", "H.handle(String)", "H", "h.src", "app", false);
        let p = b.add_param(callee, "p");
        let recv = b.add_local(caller, "h");
        b.set_type(recv, "H");
        let arg = b.add_local(caller, "arg");
        b.invoke(caller, "?.handle(?)", "handle", Some(recv), vec![arg], None, None);
        let fx = Fixture::new(b.finish());

        let mut solver = fx.solver(1);
        solver.seed(Fact::new(arg, 0, seed_tag(arg)));
        solver.solve(&mut empty_transfer());

        assert!(solver.state.whole_fact_at(p).is_some());
        assert_eq!(solver.stats.synthetic_calls, 1);
    }
}
