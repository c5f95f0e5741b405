//! Graph Builder
//!
//! The single mutation surface for [`ProgramGraph`]. The external front end
//! (and every test fixture) records nodes, edges, and statements through
//! this builder; `finish()` freezes the graph, computes the derived lookup
//! indexes, and issues the scope handle used by the shared artifact cache.

use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;

use super::models::*;

/// Monotonic scope-handle source. Each finished graph gets a process-unique
/// key, so cached artifacts can never outlive or collide with their scope.
static NEXT_SCOPE_KEY: AtomicU64 = AtomicU64::new(1);

/// Builder for one program scope
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<GraphNode>,
    methods: Vec<MethodInfo>,
    invokes: Vec<InvokeStmt>,
    exprs: Vec<ExprStmt>,
    field_loads: Vec<FieldLoad>,
    array_stores: Vec<ArrayStore>,
    array_loads: Vec<ArrayLoad>,
    captures: Vec<CaptureInfo>,
    object_nodes: FxHashMap<ObjectId, NodeId>,
    closures: FxHashMap<NodeId, MethodId>,
    next_object: ObjectId,
    next_call_site: CallSiteId,
}

impl GraphBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method
    #[allow(clippy::too_many_arguments)]
    pub fn add_method(
        &mut self,
        name: impl Into<String>,
        signature: impl Into<String>,
        class_name: impl Into<String>,
        file: impl Into<String>,
        module: impl Into<String>,
        is_static: bool,
    ) -> MethodId {
        let id = self.methods.len() as MethodId;
        self.methods.push(MethodInfo {
            id,
            name: name.into(),
            signature: signature.into(),
            class_name: class_name.into(),
            file: file.into(),
            module: module.into(),
            is_static,
            is_constructor: false,
            param_nodes: Vec::new(),
            rest_param: None,
            local_nodes: Vec::new(),
            return_node: None,
        });
        id
    }

    /// Mark a previously added method as a constructor
    pub fn mark_constructor(&mut self, method: MethodId) {
        self.methods[method as usize].is_constructor = true;
    }

    fn add_scalar(&mut self, method: MethodId, name: String, kind: ValueKind) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(GraphNode {
            id,
            kind: NodeKind::Scalar,
            value: ValueInfo {
                name,
                declared_type: None,
                method,
                kind,
                literal: None,
            },
            copy_out: Vec::new(),
            field_writes: Vec::new(),
            points_to: Vec::new(),
        });
        id
    }

    /// Add a formal parameter node at the next index
    pub fn add_param(&mut self, method: MethodId, name: impl Into<String>) -> NodeId {
        let index = self.methods[method as usize].param_nodes.len() as u32;
        let id = self.add_scalar(method, name.into(), ValueKind::Param(index));
        self.methods[method as usize].param_nodes.push(id);
        id
    }

    /// Add a variadic ("rest") formal; the returned node is the synthesized
    /// rest-array parameter
    pub fn add_rest_param(&mut self, method: MethodId, name: impl Into<String>) -> NodeId {
        let index = self.methods[method as usize].param_nodes.len() as u32;
        let id = self.add_scalar(method, name.into(), ValueKind::Param(index));
        let m = &mut self.methods[method as usize];
        m.param_nodes.push(id);
        m.rest_param = Some((index, id));
        id
    }

    /// Add a named local
    pub fn add_local(&mut self, method: MethodId, name: impl Into<String>) -> NodeId {
        let id = self.add_scalar(method, name.into(), ValueKind::Local);
        self.methods[method as usize].local_nodes.push(id);
        id
    }

    /// Add the `this` receiver node
    pub fn add_this(&mut self, method: MethodId) -> NodeId {
        self.add_scalar(method, "this".to_string(), ValueKind::This)
    }

    /// Add (and register) the return slot node
    pub fn add_return(&mut self, method: MethodId) -> NodeId {
        let id = self.add_scalar(method, "<ret>".to_string(), ValueKind::Return);
        self.methods[method as usize].return_node = Some(id);
        id
    }

    /// Add a compiler temporary
    pub fn add_temp(&mut self, method: MethodId, name: impl Into<String>) -> NodeId {
        self.add_scalar(method, name.into(), ValueKind::Temp)
    }

    /// Add a literal constant node
    pub fn add_literal(&mut self, method: MethodId, text: impl Into<String>) -> NodeId {
        let text = text.into();
        let id = self.add_scalar(method, text.clone(), ValueKind::Literal);
        self.nodes[id as usize].value.literal = Some(text);
        id
    }

    /// Set the declared type of a node
    pub fn set_type(&mut self, node: NodeId, ty: impl Into<String>) {
        self.nodes[node as usize].value.declared_type = Some(ty.into());
    }

    /// Allocate an abstract heap object; returns (object id, object node)
    pub fn add_object(&mut self, method: MethodId, label: impl Into<String>) -> (ObjectId, NodeId) {
        let oid = self.next_object;
        self.next_object += 1;

        let id = self.nodes.len() as NodeId;
        self.nodes.push(GraphNode {
            id,
            kind: NodeKind::HeapObject(oid),
            value: ValueInfo {
                name: label.into(),
                declared_type: None,
                method,
                kind: ValueKind::Temp,
                literal: None,
            },
            copy_out: Vec::new(),
            field_writes: Vec::new(),
            points_to: vec![oid],
        });
        self.object_nodes.insert(oid, id);
        (oid, id)
    }

    /// Record that `node` may point to `object`
    pub fn points_to(&mut self, node: NodeId, object: ObjectId) {
        let pts = &mut self.nodes[node as usize].points_to;
        if !pts.contains(&object) {
            pts.push(object);
        }
    }

    /// Add a copy edge `src → dst`
    pub fn copy(&mut self, src: NodeId, dst: NodeId) {
        self.nodes[src as usize].copy_out.push(dst);
    }

    /// Record `base.field = src`
    pub fn field_write(&mut self, src: NodeId, base: NodeId, field: impl Into<String>) {
        self.nodes[src as usize].field_writes.push(FieldWrite {
            field: field.into(),
            base,
        });
    }

    /// Record `target = base.field`
    pub fn field_load(&mut self, target: NodeId, base: NodeId, field: impl Into<String>) {
        self.field_loads.push(FieldLoad {
            target,
            base,
            field: field.into(),
        });
    }

    /// Record a call statement; allocates its call-site id
    #[allow(clippy::too_many_arguments)]
    pub fn invoke(
        &mut self,
        caller: MethodId,
        signature: impl Into<String>,
        method_name: impl Into<String>,
        base: Option<NodeId>,
        args: Vec<NodeId>,
        result: Option<NodeId>,
        resolved: Option<MethodId>,
    ) -> StmtId {
        let id = self.invokes.len() as StmtId;
        let call_site = self.next_call_site;
        self.next_call_site += 1;
        self.invokes.push(InvokeStmt {
            id,
            call_site,
            signature: signature.into(),
            method_name: method_name.into(),
            base,
            result,
            args,
            caller,
            resolved,
        });
        id
    }

    /// Record a derived expression `target = op(operands...)`
    pub fn expr(&mut self, kind: ExprKind, operands: Vec<NodeId>, target: NodeId) {
        self.exprs.push(ExprStmt {
            kind,
            operands,
            target,
        });
    }

    /// Record `array[index] = value`
    pub fn array_store(&mut self, array: NodeId, index: IndexExpr, value: NodeId) {
        self.array_stores.push(ArrayStore {
            array,
            index,
            value,
        });
    }

    /// Record `target = array[index]`
    pub fn array_load(&mut self, target: NodeId, array: NodeId, index: IndexExpr) {
        self.array_loads.push(ArrayLoad {
            target,
            array,
            index,
        });
    }

    /// Bind a closure-valued node to the method holding the closure body
    pub fn bind_closure(&mut self, node: NodeId, closure: MethodId) {
        self.closures.insert(node, closure);
    }

    /// Record a closure capture
    pub fn capture(&mut self, outer: NodeId, inner: NodeId, closure: MethodId) {
        self.captures.push(CaptureInfo {
            outer,
            inner,
            closure,
        });
    }

    /// Freeze the graph: build derived indexes and issue the scope handle
    pub fn finish(self) -> ProgramGraph {
        let mut methods_by_signature: FxHashMap<String, Vec<MethodId>> = FxHashMap::default();
        let mut methods_by_name: FxHashMap<String, Vec<MethodId>> = FxHashMap::default();
        for m in &self.methods {
            methods_by_signature
                .entry(m.signature.clone())
                .or_default()
                .push(m.id);
            methods_by_name
                .entry(m.name.clone())
                .or_default()
                .push(m.id);
        }

        let mut exprs_by_operand: FxHashMap<NodeId, Vec<usize>> = FxHashMap::default();
        for (i, e) in self.exprs.iter().enumerate() {
            for &op in &e.operands {
                exprs_by_operand.entry(op).or_default().push(i);
            }
        }

        // Incoming copy-edge counts; only single-assignment chains are
        // usable for structural index resolution.
        let mut copy_in: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
        for n in &self.nodes {
            for &dst in &n.copy_out {
                copy_in.entry(dst).or_default().push(n.id);
            }
        }
        let single_copy_in: FxHashMap<NodeId, NodeId> = copy_in
            .into_iter()
            .filter_map(|(dst, srcs)| (srcs.len() == 1).then(|| (dst, srcs[0])))
            .collect();

        let stats = GraphStats {
            total_nodes: self.nodes.len(),
            total_objects: self.object_nodes.len(),
            total_methods: self.methods.len(),
            total_invokes: self.invokes.len(),
            total_copy_edges: self.nodes.iter().map(|n| n.copy_out.len()).sum(),
            total_field_writes: self.nodes.iter().map(|n| n.field_writes.len()).sum(),
        };

        ProgramGraph {
            scope_key: NEXT_SCOPE_KEY.fetch_add(1, Ordering::Relaxed),
            nodes: self.nodes,
            methods: self.methods,
            invokes: self.invokes,
            exprs: self.exprs,
            field_loads: self.field_loads,
            array_stores: self.array_stores,
            array_loads: self.array_loads,
            captures: self.captures,
            object_nodes: self.object_nodes,
            closures: self.closures,
            methods_by_signature,
            methods_by_name,
            exprs_by_operand,
            single_copy_in,
            stats,
        }
    }
}
