//! Program-Graph Model
//!
//! The finalized, read-only view of one program scope that the engine
//! analyzes: scalar/heap-object nodes with copy and field-write edges,
//! points-to sets, the method index, and the statement views (invokes,
//! derived expressions, field loads, array element accesses, closure
//! captures) the propagation rules consume.
//!
//! The graph is produced by an external front end through
//! [`crate::shared::builder::GraphBuilder`] and never mutated afterwards;
//! every analysis run borrows it immutably, so independent runs may share
//! one `Arc<ProgramGraph>`.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Graph node identifier
pub type NodeId = u32;

/// Abstract heap object identifier (from the external pointer analysis)
pub type ObjectId = u32;

/// Call-site identifier (one per call statement)
pub type CallSiteId = u32;

/// Method identifier
pub type MethodId = u32;

/// Statement identifier
pub type StmtId = u32;

/// Node kind: scalar value or abstract heap object
///
/// Closed enumeration so every dispatch over node kinds is checked for
/// exhaustiveness by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// A scalar program value (local, parameter, temporary, return slot)
    Scalar,

    /// The abstract heap object allocated at one site
    HeapObject(ObjectId),
}

/// What kind of program value a scalar node represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    /// Formal parameter at the given index
    Param(u32),

    /// Named local variable
    Local,

    /// Receiver of an instance method
    This,

    /// Method return slot
    Return,

    /// Compiler temporary
    Temp,

    /// Literal constant (its text is in [`ValueInfo::literal`])
    Literal,
}

/// The program value behind one graph node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueInfo {
    /// Source-level name ("userInput", "this", "$tmp3", alloc label)
    pub name: String,

    /// Declared type of the value, when the front end knows one
    pub declared_type: Option<String>,

    /// Owning method
    pub method: MethodId,

    /// Value kind
    pub kind: ValueKind,

    /// Literal text, for `ValueKind::Literal` nodes (reflect-load keys)
    pub literal: Option<String>,
}

/// Outgoing field-write edge: this node is stored into `base.field`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldWrite {
    /// Field name written
    pub field: String,

    /// Base value whose points-to targets receive the field
    pub base: NodeId,
}

/// One node of the points-to graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    /// Node ID
    pub id: NodeId,

    /// Scalar value or heap object
    pub kind: NodeKind,

    /// Program value this node represents
    pub value: ValueInfo,

    /// Outgoing copy edges (assignments, parameter/return bindings)
    pub copy_out: Vec<NodeId>,

    /// Outgoing field-write edges
    pub field_writes: Vec<FieldWrite>,

    /// Objects this node may refer to at runtime
    pub points_to: Vec<ObjectId>,
}

impl GraphNode {
    /// The object id when this is a heap-object node
    pub fn object_id(&self) -> Option<ObjectId> {
        match self.kind {
            NodeKind::HeapObject(oid) => Some(oid),
            NodeKind::Scalar => None,
        }
    }
}

/// Method metadata for resolution, scoping, and seeding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodInfo {
    /// Method ID
    pub id: MethodId,

    /// Simple name
    pub name: String,

    /// Full signature text ("Foo.save(java.lang.String)")
    pub signature: String,

    /// Declaring class
    pub class_name: String,

    /// Source file
    pub file: String,

    /// Module / package
    pub module: String,

    /// Static vs instance shape
    pub is_static: bool,

    /// Whether this is a constructor
    pub is_constructor: bool,

    /// Formal parameter nodes, in declaration order
    pub param_nodes: Vec<NodeId>,

    /// Variadic ("rest") formal: (declared index, synthesized array node)
    pub rest_param: Option<(u32, NodeId)>,

    /// Local variable nodes declared in the body
    pub local_nodes: Vec<NodeId>,

    /// Return slot node, if the method returns a value
    pub return_node: Option<NodeId>,
}

impl MethodInfo {
    /// Formal parameter count (excluding a rest formal's expansion)
    pub fn arity(&self) -> usize {
        self.param_nodes.len()
    }
}

/// One call statement as the front end recorded it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeStmt {
    /// Statement ID
    pub id: StmtId,

    /// Call-site ID used for context transitions
    pub call_site: CallSiteId,

    /// Resolved signature text of the invoked target
    pub signature: String,

    /// Invoked method name
    pub method_name: String,

    /// Receiver value, for instance calls
    pub base: Option<NodeId>,

    /// Result value, when the call result is used
    pub result: Option<NodeId>,

    /// Actual argument values
    pub args: Vec<NodeId>,

    /// Method containing the call
    pub caller: MethodId,

    /// Call-graph verdict; `None` means the call graph has no edge here
    pub resolved: Option<MethodId>,
}

/// Expression kinds whose targets inherit operand taint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExprKind {
    Binary,
    Unary,
    Cast,
    UnknownCall,
}

/// A derived expression: `target = op(operands...)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExprStmt {
    pub kind: ExprKind,
    pub operands: Vec<NodeId>,
    pub target: NodeId,
}

/// A field read: `target = base.field`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldLoad {
    pub target: NodeId,
    pub base: NodeId,
    pub field: String,
}

/// Array index expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexExpr {
    /// Statically known constant index
    Const(u32),

    /// Index held in a value; resolved structurally where possible
    Dynamic(NodeId),
}

/// Indexed array element store: `array[index] = value`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayStore {
    pub array: NodeId,
    pub index: IndexExpr,
    pub value: NodeId,
}

/// Indexed array element load: `target = array[index]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayLoad {
    pub target: NodeId,
    pub array: NodeId,
    pub index: IndexExpr,
}

/// A local captured by a closure body: writes through `outer` must reach
/// `inner` inside the closure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureInfo {
    /// The enclosing method's local
    pub outer: NodeId,

    /// The closure body's view of that local
    pub inner: NodeId,

    /// The closure method
    pub closure: MethodId,
}

/// Statistics about one program graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_objects: usize,
    pub total_methods: usize,
    pub total_invokes: usize,
    pub total_copy_edges: usize,
    pub total_field_writes: usize,
}

/// The finalized program scope: points-to graph + call graph + statements
///
/// Immutable after [`crate::shared::builder::GraphBuilder::finish`]; the
/// engine only ever reads it.
#[derive(Debug)]
pub struct ProgramGraph {
    /// Stable identity of this scope for artifact caching
    pub(crate) scope_key: u64,

    pub(crate) nodes: Vec<GraphNode>,
    pub(crate) methods: Vec<MethodInfo>,
    pub(crate) invokes: Vec<InvokeStmt>,
    pub(crate) exprs: Vec<ExprStmt>,
    pub(crate) field_loads: Vec<FieldLoad>,
    pub(crate) array_stores: Vec<ArrayStore>,
    pub(crate) array_loads: Vec<ArrayLoad>,
    pub(crate) captures: Vec<CaptureInfo>,

    /// Heap-object node per object id
    pub(crate) object_nodes: FxHashMap<ObjectId, NodeId>,

    /// Closure-valued nodes → the closure's method body
    pub(crate) closures: FxHashMap<NodeId, MethodId>,

    /// Derived: signature → methods (usually a singleton)
    pub(crate) methods_by_signature: FxHashMap<String, Vec<MethodId>>,

    /// Derived: simple name → methods
    pub(crate) methods_by_name: FxHashMap<String, Vec<MethodId>>,

    /// Derived: operand node → expressions using it
    pub(crate) exprs_by_operand: FxHashMap<NodeId, Vec<usize>>,

    /// Derived: copy-edge source → single assignment source (for index
    /// chain resolution); only present when the node has exactly one
    /// incoming copy edge
    pub(crate) single_copy_in: FxHashMap<NodeId, NodeId>,

    /// Statistics
    pub stats: GraphStats,
}

impl ProgramGraph {
    /// Scope identity for the shared artifact cache
    #[inline]
    pub fn scope_key(&self) -> u64 {
        self.scope_key
    }

    /// Node lookup; panics only on front-end-corrupted ids
    #[inline]
    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id as usize]
    }

    /// Checked node lookup
    #[inline]
    pub fn try_node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(id as usize)
    }

    #[inline]
    pub fn method(&self, id: MethodId) -> &MethodInfo {
        &self.methods[id as usize]
    }

    #[inline]
    pub fn invoke(&self, id: StmtId) -> &InvokeStmt {
        &self.invokes[id as usize]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter()
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodInfo> {
        self.methods.iter()
    }

    pub fn invokes(&self) -> impl Iterator<Item = &InvokeStmt> {
        self.invokes.iter()
    }

    pub fn exprs(&self) -> &[ExprStmt] {
        &self.exprs
    }

    pub fn field_loads(&self) -> &[FieldLoad] {
        &self.field_loads
    }

    pub fn array_stores(&self) -> &[ArrayStore] {
        &self.array_stores
    }

    pub fn array_loads(&self) -> &[ArrayLoad] {
        &self.array_loads
    }

    pub fn captures(&self) -> &[CaptureInfo] {
        &self.captures
    }

    /// Points-to set of a node
    #[inline]
    pub fn points_to(&self, id: NodeId) -> &[ObjectId] {
        &self.nodes[id as usize].points_to
    }

    /// The heap-object node backing an object id
    #[inline]
    pub fn object_node(&self, oid: ObjectId) -> Option<NodeId> {
        self.object_nodes.get(&oid).copied()
    }

    /// Methods with exactly this signature
    pub fn methods_by_signature(&self, signature: &str) -> &[MethodId] {
        self.methods_by_signature
            .get(signature)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Methods with this simple name
    pub fn methods_by_name(&self, name: &str) -> &[MethodId] {
        self.methods_by_name
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Expressions that use `node` as an operand
    pub fn exprs_using(&self, node: NodeId) -> impl Iterator<Item = &ExprStmt> {
        self.exprs_by_operand
            .get(&node)
            .into_iter()
            .flatten()
            .map(move |&i| &self.exprs[i])
    }

    /// Literal text a node carries, chasing single assignments
    pub fn literal_text(&self, node: NodeId) -> Option<&str> {
        const MAX_CHAIN: usize = 16;

        let mut cur = node;
        for _ in 0..MAX_CHAIN {
            let n = self.try_node(cur)?;
            if let Some(lit) = &n.value.literal {
                return Some(lit.as_str());
            }
            match self.single_copy_in.get(&cur) {
                Some(&src) => cur = src,
                None => return None,
            }
        }
        None
    }

    /// The closure method a node holds, chasing single assignments
    pub fn closure_method(&self, node: NodeId) -> Option<MethodId> {
        const MAX_CHAIN: usize = 16;

        let mut cur = node;
        for _ in 0..MAX_CHAIN {
            if let Some(&m) = self.closures.get(&cur) {
                return Some(m);
            }
            match self.single_copy_in.get(&cur) {
                Some(&src) => cur = src,
                None => return None,
            }
        }
        None
    }

    /// Resolve an index expression to a constant by chasing single
    /// assignments through the copy chain.
    ///
    /// Structural element identity: `a[i]` and `a[j]` stay distinct unless
    /// both chains bottom out at the same constant. Unresolvable indices
    /// return `None` and degrade to the whole-array slot.
    pub fn resolve_index(&self, index: IndexExpr) -> Option<u32> {
        const MAX_CHAIN: usize = 16;

        match index {
            IndexExpr::Const(i) => Some(i),
            IndexExpr::Dynamic(mut node) => {
                for _ in 0..MAX_CHAIN {
                    let n = self.try_node(node)?;
                    if let Some(lit) = &n.value.literal {
                        return lit.parse::<u32>().ok();
                    }
                    match self.single_copy_in.get(&node) {
                        Some(&src) => node = src,
                        None => return None,
                    }
                }
                None
            }
        }
    }
}
