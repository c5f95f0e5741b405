//! Taint-flow infrastructure: compiled rules, precomputed edge maps, the
//! container model, the transfer executor, and the worklist solver.

pub mod artifact_cache;
pub mod callee_resolver;
pub mod container_model;
pub mod diagnostics;
pub mod edge_builders;
pub mod invoke_view;
pub mod rule_index;
pub mod transfer;
pub mod worklist_solver;

pub use artifact_cache::{ArtifactCache, ScopeArtifacts};
pub use callee_resolver::{CalleeResolver, ResolutionOutcome, MAX_FANOUT};
pub use container_model::{ContainerModel, ReadMode, ReadOp, ReadTarget, WriteOp};
pub use diagnostics::{DiagnosticsSnapshot, SolverStats, TransferStats};
pub use edge_builders::{
    CallEdgeInfo, CallEdgeKind, CaptureEdge, CtorStore, EdgeArtifacts, EdgeBuilderConfig,
    PromiseEdge, PromiseKind, ResolutionStats, RestEdge, SyntheticEdge,
};
pub use invoke_view::{InvokeView, InvokeViewCache};
pub use rule_index::{
    compile, rule_set_hash, CompiledRules, Endpoint, MatchClass, RuleIndex, RuleKind,
    RuntimeEndpoint, RuntimeRule,
};
pub use transfer::{endpoint_node, TransferExecutor, TransferResult};
pub use worklist_solver::{TaintState, WorklistSolver, ANY_ELEMENT_FIELD};
