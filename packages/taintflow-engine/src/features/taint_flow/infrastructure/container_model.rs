//! Container Model
//!
//! The underlying points-to graph does not distinguish container elements,
//! so container operations are modeled as synthetic field slots on the
//! receiver's points-to targets: constant array indices, literal map keys,
//! and ordinal insert positions for list/queue semantics.
//!
//! Ordinals are assigned statically: the n-th add-family call on the same
//! receiver value, in statement order, writes ordinal n. `pop` reads the
//! maximum statically observed store position and `shift` reads position
//! zero. That approximation is deliberately kept for arrays mutated across
//! branches; downstream fixtures are calibrated against it.

use rustc_hash::FxHashMap;

use crate::features::taint_flow::domain::fact::SlotKey;
use crate::shared::models::{CallSiteId, IndexExpr, NodeId, ObjectId, ProgramGraph};

/// Where a container read lands
#[derive(Debug, Clone)]
pub enum ReadTarget {
    /// The call result node
    Result(NodeId),

    /// Element parameters of an iteration callback
    CallbackParams(Vec<NodeId>),
}

/// Which slots a read consults
#[derive(Debug, Clone)]
pub enum ReadMode {
    /// Specific slots (a numeric key probes both index and ordinal forms)
    Slots(Vec<SlotKey>),

    /// The maximum statically observed store position on this receiver
    PopLast,

    /// Every slot of the receiver (iteration, concat, unknown key)
    Any,
}

/// One modeled container write
#[derive(Debug, Clone)]
pub struct WriteOp {
    pub base: NodeId,
    pub value: NodeId,
    pub slot: SlotKey,
}

/// One modeled container read
#[derive(Debug, Clone)]
pub struct ReadOp {
    pub base: NodeId,
    pub target: ReadTarget,
    pub mode: ReadMode,

    /// Call site, for callback context derivation
    pub call_site: Option<CallSiteId>,
}

/// Precomputed container operations for one scope
#[derive(Debug, Default)]
pub struct ContainerModel {
    /// Stored value → writes it feeds
    writes_by_value: FxHashMap<NodeId, Vec<WriteOp>>,

    /// Receiver value → reads on it
    reads_by_base: FxHashMap<NodeId, Vec<ReadOp>>,

    /// Object → receiver values whose points-to set contains it
    bases_by_object: FxHashMap<ObjectId, Vec<NodeId>>,

    /// Receiver value → maximum observed ordinal store position
    max_ordinal: FxHashMap<NodeId, u32>,

    /// Receiver value → maximum observed constant index store
    max_index: FxHashMap<NodeId, u32>,
}

fn is_add_family(name: &str) -> bool {
    matches!(name, "add" | "push" | "append" | "offer")
}

fn is_iteration(name: &str) -> bool {
    matches!(name, "forEach" | "map" | "filter" | "each")
}

impl ContainerModel {
    /// Build the model for one scope; runs once and is cached with the
    /// other edge artifacts
    pub fn build(graph: &ProgramGraph) -> Self {
        let mut model = ContainerModel::default();
        let mut ordinals: FxHashMap<NodeId, u32> = FxHashMap::default();

        for inv in graph.invokes() {
            let Some(base) = inv.base else { continue };
            let name = inv.method_name.as_str();

            // Writes
            if is_add_family(name) && inv.args.len() == 1 {
                let ordinal = {
                    let n = ordinals.entry(base).or_insert(0);
                    let cur = *n;
                    *n += 1;
                    cur
                };
                model.record_max_ordinal(base, ordinal);
                model.push_write(base, inv.args[0], SlotKey::Ordinal(ordinal));
                continue;
            }
            if name == "unshift" && inv.args.len() == 1 {
                model.record_max_ordinal(base, 0);
                model.push_write(base, inv.args[0], SlotKey::Ordinal(0));
                continue;
            }
            if matches!(name, "set" | "put") && inv.args.len() == 2 {
                let slot = match Self::literal_key(graph, inv.args[0]) {
                    Some(LiteralKey::Numeric(i)) => {
                        model.record_max_index(base, i);
                        SlotKey::Index(i)
                    }
                    Some(LiteralKey::Text(k)) => SlotKey::Key(k.into()),
                    None => SlotKey::AnyElement,
                };
                model.push_write(base, inv.args[1], slot);
                continue;
            }

            // Reads
            if name == "get" && inv.args.len() == 1 {
                if let Some(result) = inv.result {
                    let mode = match Self::literal_key(graph, inv.args[0]) {
                        Some(LiteralKey::Numeric(i)) => {
                            ReadMode::Slots(vec![SlotKey::Index(i), SlotKey::Ordinal(i)])
                        }
                        Some(LiteralKey::Text(k)) => ReadMode::Slots(vec![SlotKey::Key(k.into())]),
                        None => ReadMode::Any,
                    };
                    model.push_read(base, ReadTarget::Result(result), mode, None);
                }
                continue;
            }
            if matches!(name, "getFirst" | "first" | "peek") && inv.args.is_empty() {
                if let Some(result) = inv.result {
                    model.push_read(
                        base,
                        ReadTarget::Result(result),
                        ReadMode::Slots(vec![SlotKey::Ordinal(0), SlotKey::Index(0)]),
                        None,
                    );
                }
                continue;
            }
            if name == "pop" && inv.args.is_empty() {
                if let Some(result) = inv.result {
                    model.push_read(base, ReadTarget::Result(result), ReadMode::PopLast, None);
                }
                continue;
            }
            if matches!(name, "shift" | "poll") && inv.args.is_empty() {
                if let Some(result) = inv.result {
                    model.push_read(
                        base,
                        ReadTarget::Result(result),
                        ReadMode::Slots(vec![SlotKey::Ordinal(0), SlotKey::Index(0)]),
                        None,
                    );
                }
                continue;
            }
            if name == "concat" {
                if let Some(result) = inv.result {
                    model.push_read(base, ReadTarget::Result(result), ReadMode::Any, None);
                }
                continue;
            }
            if is_iteration(name) && !inv.args.is_empty() {
                if let Some(closure) = graph.closure_method(inv.args[0]) {
                    let params: Vec<NodeId> =
                        graph.method(closure).param_nodes.first().copied().into_iter().collect();
                    if !params.is_empty() {
                        model.push_read(
                            base,
                            ReadTarget::CallbackParams(params),
                            ReadMode::Any,
                            Some(inv.call_site),
                        );
                    }
                }
                continue;
            }
        }

        // Indexed array element accesses, with structural index identity
        for st in graph.array_stores() {
            let slot = match graph.resolve_index(st.index) {
                Some(i) => {
                    model.record_max_index(st.array, i);
                    SlotKey::Index(i)
                }
                None => SlotKey::AnyElement,
            };
            model.push_write(st.array, st.value, slot);
        }
        for ld in graph.array_loads() {
            let mode = match graph.resolve_index(ld.index) {
                Some(i) => ReadMode::Slots(vec![SlotKey::Index(i)]),
                None => ReadMode::Any,
            };
            model.push_read(ld.array, ReadTarget::Result(ld.target), mode, None);
        }

        // Reverse alias index: object → receiver values
        let bases: Vec<NodeId> = model.reads_by_base.keys().copied().collect();
        for base in bases {
            for &oid in graph.points_to(base) {
                model.bases_by_object.entry(oid).or_default().push(base);
            }
        }

        model
    }

    fn push_write(&mut self, base: NodeId, value: NodeId, slot: SlotKey) {
        self.writes_by_value
            .entry(value)
            .or_default()
            .push(WriteOp { base, value, slot });
    }

    fn push_read(
        &mut self,
        base: NodeId,
        target: ReadTarget,
        mode: ReadMode,
        call_site: Option<CallSiteId>,
    ) {
        self.reads_by_base
            .entry(base)
            .or_default()
            .push(ReadOp {
                base,
                target,
                mode,
                call_site,
            });
    }

    fn record_max_ordinal(&mut self, base: NodeId, ordinal: u32) {
        let entry = self.max_ordinal.entry(base).or_insert(ordinal);
        *entry = (*entry).max(ordinal);
    }

    fn record_max_index(&mut self, base: NodeId, index: u32) {
        let entry = self.max_index.entry(base).or_insert(index);
        *entry = (*entry).max(index);
    }

    /// Container writes fed by this value
    pub fn writes_for_value(&self, value: NodeId) -> &[WriteOp] {
        self.writes_by_value
            .get(&value)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Container reads on receivers that may alias this object
    pub fn reads_for_object(&self, object: ObjectId) -> impl Iterator<Item = &ReadOp> {
        self.bases_by_object
            .get(&object)
            .into_iter()
            .flatten()
            .flat_map(move |base| {
                self.reads_by_base
                    .get(base)
                    .into_iter()
                    .flatten()
            })
    }

    /// Does a read consult the given tainted slot?
    pub fn read_matches(&self, op: &ReadOp, slot: &SlotKey) -> bool {
        match &op.mode {
            ReadMode::Any => true,
            ReadMode::Slots(slots) => slots.contains(slot),
            ReadMode::PopLast => {
                let last_ordinal = self.max_ordinal.get(&op.base).copied();
                let last_index = self.max_index.get(&op.base).copied();
                match slot {
                    SlotKey::Ordinal(n) => last_ordinal == Some(*n),
                    SlotKey::Index(i) => last_index == Some(*i),
                    SlotKey::AnyElement => true,
                    SlotKey::Key(_) => false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::builder::GraphBuilder;

    /// list.add(x); list.add(y); r0 = list.get(0); r1 = list.get(1)
    fn list_fixture() -> (ProgramGraph, NodeId, NodeId, ObjectId) {
        let mut b = GraphBuilder::new();
        let m = b.add_method("main", "Main.main()", "Main", "m.src", "app", true);
        let (oid, _onode) = b.add_object(m, "new ArrayList");
        let list = b.add_local(m, "list");
        b.points_to(list, oid);
        let x = b.add_local(m, "x");
        let y = b.add_local(m, "y");
        let r0 = b.add_local(m, "r0");
        let r1 = b.add_local(m, "r1");
        let zero = b.add_literal(m, "0");
        let one = b.add_literal(m, "1");

        b.invoke(m, "List.add(Object)", "add", Some(list), vec![x], None, None);
        b.invoke(m, "List.add(Object)", "add", Some(list), vec![y], None, None);
        b.invoke(m, "List.get(int)", "get", Some(list), vec![zero], Some(r0), None);
        b.invoke(m, "List.get(int)", "get", Some(list), vec![one], Some(r1), None);
        (b.finish(), x, r0, oid)
    }

    #[test]
    fn test_add_family_assigns_increasing_ordinals() {
        let (g, x, _r0, _oid) = list_fixture();
        let model = ContainerModel::build(&g);

        let writes = model.writes_for_value(x);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].slot, SlotKey::Ordinal(0));
    }

    #[test]
    fn test_get_probes_matching_ordinal_only() {
        let (g, _x, _r0, oid) = list_fixture();
        let model = ContainerModel::build(&g);

        let reads: Vec<&ReadOp> = model.reads_for_object(oid).collect();
        assert_eq!(reads.len(), 2);

        let slot0 = SlotKey::Ordinal(0);
        let matching: Vec<&&ReadOp> = reads
            .iter()
            .filter(|op| model.read_matches(op, &slot0))
            .collect();
        assert_eq!(matching.len(), 1, "only get(0) consults ordinal 0");
    }

    #[test]
    fn test_pop_matches_maximum_observed_store() {
        let mut b = GraphBuilder::new();
        let m = b.add_method("main", "Main.main()", "Main", "m.src", "app", true);
        let (oid, _) = b.add_object(m, "new Array");
        let arr = b.add_local(m, "arr");
        b.points_to(arr, oid);
        let a = b.add_local(m, "a");
        let bb = b.add_local(m, "b");
        let out = b.add_local(m, "out");
        b.array_store(arr, IndexExpr::Const(0), a);
        b.array_store(arr, IndexExpr::Const(1), bb);
        b.invoke(m, "Array.pop()", "pop", Some(arr), vec![], Some(out), None);
        let g = b.finish();

        let model = ContainerModel::build(&g);
        let pop = model.reads_for_object(oid).next().expect("pop read");
        assert!(model.read_matches(pop, &SlotKey::Index(1)));
        assert!(!model.read_matches(pop, &SlotKey::Index(0)));
    }

    #[test]
    fn test_keyed_map_slots() {
        let mut b = GraphBuilder::new();
        let m = b.add_method("main", "Main.main()", "Main", "m.src", "app", true);
        let (oid, _) = b.add_object(m, "new HashMap");
        let map = b.add_local(m, "map");
        b.points_to(map, oid);
        let k = b.add_literal(m, "token");
        let v = b.add_local(m, "v");
        let out = b.add_local(m, "out");
        b.invoke(m, "Map.put(Object,Object)", "put", Some(map), vec![k, v], None, None);
        let k2 = b.add_literal(m, "token");
        b.invoke(m, "Map.get(Object)", "get", Some(map), vec![k2], Some(out), None);
        let g = b.finish();

        let model = ContainerModel::build(&g);
        let writes = model.writes_for_value(v);
        assert_eq!(writes[0].slot, SlotKey::Key("token".into()));

        let read = model.reads_for_object(oid).next().expect("get read");
        assert!(model.read_matches(read, &SlotKey::Key("token".into())));
        assert!(!model.read_matches(read, &SlotKey::Key("other".into())));
    }

    #[test]
    fn test_iteration_callback_param_is_read_target() {
        let mut b = GraphBuilder::new();
        let m = b.add_method("main", "Main.main()", "Main", "m.src", "app", true);
        let cb = b.add_method("lambda$0", "Main.lambda$0(Object)", "Main", "m.src", "app", true);
        let elem = b.add_param(cb, "item");
        let (oid, _) = b.add_object(m, "new ArrayList");
        let list = b.add_local(m, "list");
        b.points_to(list, oid);
        let f = b.add_local(m, "f");
        b.bind_closure(f, cb);
        b.invoke(m, "List.forEach(Consumer)", "forEach", Some(list), vec![f], None, None);
        let g = b.finish();

        let model = ContainerModel::build(&g);
        let read = model.reads_for_object(oid).next().expect("iteration read");
        match &read.target {
            ReadTarget::CallbackParams(params) => assert_eq!(params, &vec![elem]),
            other => panic!("unexpected target {:?}", other),
        }
        assert!(model.read_matches(read, &SlotKey::Ordinal(3)));
    }
}

/// Literal key classification for set/put/get
enum LiteralKey {
    Numeric(u32),
    Text(String),
}

impl ContainerModel {
    fn literal_key(graph: &ProgramGraph, key: NodeId) -> Option<LiteralKey> {
        let lit = graph.literal_text(key)?;
        Some(match lit.parse::<u32>() {
            Ok(i) => LiteralKey::Numeric(i),
            Err(_) => LiteralKey::Text(lit.to_string()),
        })
    }
}
