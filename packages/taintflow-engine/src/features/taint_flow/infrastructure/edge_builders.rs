//! Edge Builders
//!
//! One-time maps from graph node/edge identity to context-transition
//! metadata, built once per program scope and reused across every
//! seed/solve run on that scope:
//!
//! - call/return annotations for graph-native copy edges
//! - synthetic call/return edges for sites the call graph left unresolved
//! - constructor parameter→field store summaries
//! - closure capture edges (zero-arg call chains, discovered transitively)
//! - rest-argument edges into synthesized variadic parameters
//! - promise callback and payload edges
//! - the (object, field) → readers index
//! - the value → call-sites index

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use tracing::info;

use crate::features::taint_flow::infrastructure::callee_resolver::{
    CalleeResolver, ResolutionOutcome,
};
use crate::features::taint_flow::infrastructure::invoke_view::InvokeViewCache;
use crate::shared::models::{
    CallSiteId, MethodId, NodeId, ObjectId, ProgramGraph, StmtId, ValueKind,
};

/// Call vs return transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEdgeKind {
    Call,
    Return,
}

/// Context-transition metadata for one edge
#[derive(Debug, Clone)]
pub struct CallEdgeInfo {
    pub kind: CallEdgeKind,
    pub call_site: CallSiteId,
    pub caller_name: Arc<str>,
    pub callee_name: Arc<str>,

    /// Per-edge context depth; `Some(0)` makes this edge
    /// context-insensitive, `None` uses the engine-wide k
    pub depth_override: Option<usize>,
}

/// A synthesized copy edge keyed directly by its source node
#[derive(Debug, Clone)]
pub struct SyntheticEdge {
    pub target: NodeId,
    pub info: CallEdgeInfo,
}

/// Constructor store: tainting `arg` taints `result.field`
#[derive(Debug, Clone)]
pub struct CtorStore {
    pub result: NodeId,
    pub field: String,
}

/// Capture edge: tainting the outer local reaches the closure's inner view
/// under a context derived at the invoking site
#[derive(Debug, Clone)]
pub struct CaptureEdge {
    pub inner: NodeId,
    pub call_site: CallSiteId,
    pub closure: MethodId,
}

/// Rest-argument edge: a value at/after the variadic position taints the
/// synthesized rest-array parameter
#[derive(Debug, Clone)]
pub struct RestEdge {
    pub rest_param: NodeId,
    pub call_site: CallSiteId,
}

/// Promise callback kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseKind {
    Then,
    Catch,
    Finally,
}

/// Promise callback dispatch: a tainted receiver reaches the resolved
/// callback's parameters (or, for `finally`, all of its locals)
#[derive(Debug, Clone)]
pub struct PromiseEdge {
    pub kind: PromiseKind,
    pub callback: MethodId,
    pub call_site: CallSiteId,
}

/// Resolution diagnostics accumulated while building synthetic edges
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolutionStats {
    pub unresolved_sites: u64,
    pub synthetic_resolved: u64,
    pub no_candidates: u64,
    pub fanout_exceeded: u64,
}

/// All precomputed edge maps for one scope
#[derive(Debug, Default)]
pub struct EdgeArtifacts {
    /// Graph-native copy edges crossing a call/return boundary
    pub call_edges: FxHashMap<(NodeId, NodeId), CallEdgeInfo>,

    /// Synthetic arg→param edges, keyed by source node
    pub synthetic_call: FxHashMap<NodeId, Vec<SyntheticEdge>>,

    /// Synthetic return→result edges, keyed by source node
    pub synthetic_return: FxHashMap<NodeId, Vec<SyntheticEdge>>,

    /// Synthetic constructor stores, keyed by argument node
    pub ctor_stores: FxHashMap<NodeId, Vec<CtorStore>>,

    /// Capture edges, keyed by the outer local
    pub capture_edges: FxHashMap<NodeId, Vec<CaptureEdge>>,

    /// Rest-argument edges, keyed by the actual argument node
    pub rest_edges: FxHashMap<NodeId, Vec<RestEdge>>,

    /// Promise callback edges, keyed by the receiver node
    pub promise_edges: FxHashMap<NodeId, Vec<PromiseEdge>>,

    /// Promise payload edges (`resolve(v)` / promise construction):
    /// argument → promise value
    pub promise_payloads: FxHashMap<NodeId, Vec<NodeId>>,

    /// (object, field) → nodes that previously read it
    pub field_readers: FxHashMap<(ObjectId, String), Vec<NodeId>>,

    /// Generic key-based accessor reads `r = get(obj, "key")`:
    /// (object, literal key) → result nodes
    pub reflect_loads: FxHashMap<(ObjectId, String), Vec<NodeId>>,

    /// Value → call statements using it as base or argument
    pub value_invokes: FxHashMap<NodeId, Vec<StmtId>>,

    pub resolution: ResolutionStats,
}

/// Optional per-call-site context depth overrides
#[derive(Debug, Clone, Default)]
pub struct EdgeBuilderConfig {
    pub depth_overrides: FxHashMap<CallSiteId, usize>,
}

impl EdgeArtifacts {
    /// Build every edge map for one scope
    pub fn build(graph: &ProgramGraph, config: &EdgeBuilderConfig) -> Self {
        let mut artifacts = EdgeArtifacts::default();
        let mut views = InvokeViewCache::new();

        let mut invokes_by_caller: FxHashMap<MethodId, Vec<StmtId>> = FxHashMap::default();
        for inv in graph.invokes() {
            invokes_by_caller.entry(inv.caller).or_default().push(inv.id);
        }

        let mut ctor_cache: FxHashMap<MethodId, Arc<Vec<(u32, String)>>> = FxHashMap::default();

        for inv in graph.invokes() {
            let caller_name: Arc<str> = Arc::from(graph.method(inv.caller).name.as_str());
            let depth_override = config.depth_overrides.get(&inv.call_site).copied();

            // Value → invoke index
            for &n in inv.base.iter().chain(inv.args.iter()) {
                let sites = artifacts.value_invokes.entry(n).or_default();
                if sites.last() != Some(&inv.id) {
                    sites.push(inv.id);
                }
            }

            // Promise modeling
            let promise_kind = match inv.method_name.as_str() {
                "then" => Some(PromiseKind::Then),
                "catch" => Some(PromiseKind::Catch),
                "finally" => Some(PromiseKind::Finally),
                _ => None,
            };
            if let (Some(kind), Some(base)) = (promise_kind, inv.base) {
                if let Some(callback) = inv.args.first().and_then(|&a| graph.closure_method(a)) {
                    artifacts.promise_edges.entry(base).or_default().push(PromiseEdge {
                        kind,
                        callback,
                        call_site: inv.call_site,
                    });
                }
            }
            if matches!(inv.method_name.as_str(), "resolve" | "reject")
                || inv.method_name == "Promise"
            {
                if let (Some(&arg), Some(result)) = (inv.args.first(), inv.result) {
                    artifacts.promise_payloads.entry(arg).or_default().push(result);
                }
            }

            // Generic key-based accessor: r = get(obj, key)
            if inv.method_name == "get" && inv.args.len() == 2 && inv.base.is_none() {
                if let (Some(result), Some(key)) = (inv.result, graph.literal_text(inv.args[1])) {
                    for &oid in graph.points_to(inv.args[0]) {
                        artifacts
                            .reflect_loads
                            .entry((oid, key.to_string()))
                            .or_default()
                            .push(result);
                    }
                }
            }

            match inv.resolved {
                Some(callee_id) => {
                    // Annotate graph-native call/return copy edges
                    let callee = graph.method(callee_id);
                    let callee_name: Arc<str> = Arc::from(callee.name.as_str());
                    for (i, &arg) in inv.args.iter().enumerate() {
                        if let Some(&param) = callee.param_nodes.get(i) {
                            artifacts.call_edges.insert(
                                (arg, param),
                                CallEdgeInfo {
                                    kind: CallEdgeKind::Call,
                                    call_site: inv.call_site,
                                    caller_name: caller_name.clone(),
                                    callee_name: callee_name.clone(),
                                    depth_override,
                                },
                            );
                        }
                    }
                    if let (Some(ret), Some(result)) = (callee.return_node, inv.result) {
                        artifacts.call_edges.insert(
                            (ret, result),
                            CallEdgeInfo {
                                kind: CallEdgeKind::Return,
                                call_site: inv.call_site,
                                caller_name: caller_name.clone(),
                                callee_name: callee_name.clone(),
                                depth_override,
                            },
                        );
                    }
                    Self::add_rest_edges(&mut artifacts, inv.call_site, &inv.args, callee);
                }
                None => {
                    // Best-effort synthetic edges
                    artifacts.resolution.unresolved_sites += 1;
                    let view = views.view(graph, inv.id);
                    let (candidates, outcome) = CalleeResolver::resolve(graph, &view);
                    match outcome {
                        ResolutionOutcome::NoCandidates => {
                            artifacts.resolution.no_candidates += 1
                        }
                        ResolutionOutcome::FanOutExceeded => {
                            artifacts.resolution.fanout_exceeded += 1
                        }
                        _ => artifacts.resolution.synthetic_resolved += 1,
                    }

                    for callee_id in candidates {
                        let callee = graph.method(callee_id);
                        let callee_name: Arc<str> = Arc::from(callee.name.as_str());

                        for (i, &arg) in inv.args.iter().enumerate() {
                            if let Some(&param) = callee.param_nodes.get(i) {
                                artifacts.synthetic_call.entry(arg).or_default().push(
                                    SyntheticEdge {
                                        target: param,
                                        info: CallEdgeInfo {
                                            kind: CallEdgeKind::Call,
                                            call_site: inv.call_site,
                                            caller_name: caller_name.clone(),
                                            callee_name: callee_name.clone(),
                                            depth_override,
                                        },
                                    },
                                );
                            }
                        }
                        if let (Some(ret), Some(result)) = (callee.return_node, inv.result) {
                            artifacts.synthetic_return.entry(ret).or_default().push(
                                SyntheticEdge {
                                    target: result,
                                    info: CallEdgeInfo {
                                        kind: CallEdgeKind::Return,
                                        call_site: inv.call_site,
                                        caller_name: caller_name.clone(),
                                        callee_name: callee_name.clone(),
                                        depth_override,
                                    },
                                },
                            );
                        }
                        Self::add_rest_edges(&mut artifacts, inv.call_site, &inv.args, callee);

                        // Constructor store summaries
                        if callee.is_constructor {
                            if let Some(result) = inv.result {
                                let summary = ctor_summary(
                                    graph,
                                    callee_id,
                                    &invokes_by_caller,
                                    &mut ctor_cache,
                                    &mut FxHashSet::default(),
                                );
                                for &(pi, ref field) in summary.iter() {
                                    if let Some(&arg) = inv.args.get(pi as usize) {
                                        artifacts.ctor_stores.entry(arg).or_default().push(
                                            CtorStore {
                                                result,
                                                field: field.clone(),
                                            },
                                        );
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        artifacts.build_capture_edges(graph);

        // (object, field) → readers
        for load in graph.field_loads() {
            for &oid in graph.points_to(load.base) {
                artifacts
                    .field_readers
                    .entry((oid, load.field.clone()))
                    .or_default()
                    .push(load.target);
            }
        }

        info!(
            call_edges = artifacts.call_edges.len(),
            synthetic = artifacts.synthetic_call.len(),
            captures = artifacts.capture_edges.len(),
            unresolved = artifacts.resolution.unresolved_sites,
            "edge artifacts built"
        );
        artifacts
    }

    fn add_rest_edges(
        artifacts: &mut EdgeArtifacts,
        call_site: CallSiteId,
        args: &[NodeId],
        callee: &crate::shared::models::MethodInfo,
    ) {
        let Some((rest_index, rest_node)) = callee.rest_param else {
            return;
        };
        for &arg in args.iter().skip(rest_index as usize) {
            artifacts.rest_edges.entry(arg).or_default().push(RestEdge {
                rest_param: rest_node,
                call_site,
            });
        }
    }

    /// Capture edges: for each captured local, find the zero-arg call
    /// chain that enters the closure body. Chains may pass through other
    /// closures; the visited set breaks mutual-recursion cycles.
    fn build_capture_edges(&mut self, graph: &ProgramGraph) {
        // closure method → zero-arg call sites entering it
        let mut entry_sites: FxHashMap<MethodId, Vec<CallSiteId>> = FxHashMap::default();
        for inv in graph.invokes() {
            if !inv.args.is_empty() {
                continue;
            }
            let target = inv
                .resolved
                .or_else(|| inv.base.and_then(|b| graph.closure_method(b)));
            if let Some(mid) = target {
                entry_sites.entry(mid).or_default().push(inv.call_site);
            }
        }

        for cap in graph.captures() {
            let mut visited: FxHashSet<MethodId> = FxHashSet::default();
            if let Some(site) = find_entry_site(cap.closure, &entry_sites, graph, &mut visited) {
                self.capture_edges.entry(cap.outer).or_default().push(CaptureEdge {
                    inner: cap.inner,
                    call_site: site,
                    closure: cap.closure,
                });
            }
        }
    }
}

/// Locate a zero-arg call site reaching `closure`, possibly through other
/// closures (a closure returned and invoked elsewhere). The visited set is
/// the explicit cycle breaker for mutually-recursive chains.
fn find_entry_site(
    closure: MethodId,
    entry_sites: &FxHashMap<MethodId, Vec<CallSiteId>>,
    graph: &ProgramGraph,
    visited: &mut FxHashSet<MethodId>,
) -> Option<CallSiteId> {
    if !visited.insert(closure) {
        return None;
    }
    if let Some(sites) = entry_sites.get(&closure) {
        if let Some(&site) = sites.first() {
            return Some(site);
        }
    }
    // A closure wrapping this one: any closure whose body is just a
    // zero-arg trampoline is itself a candidate entry
    for cap in graph.captures() {
        if cap.closure == closure {
            continue;
        }
        let wraps = graph
            .invokes()
            .any(|inv| inv.caller == cap.closure && inv.resolved == Some(closure));
        if wraps {
            if let Some(site) = find_entry_site(cap.closure, entry_sites, graph, visited) {
                return Some(site);
            }
        }
    }
    None
}

/// Constructor summary: parameter index → field stored on `this`,
/// following delegated constructor calls. The in-progress set prevents
/// divergence on mutually-recursive constructors.
fn ctor_summary(
    graph: &ProgramGraph,
    ctor: MethodId,
    invokes_by_caller: &FxHashMap<MethodId, Vec<StmtId>>,
    cache: &mut FxHashMap<MethodId, Arc<Vec<(u32, String)>>>,
    in_progress: &mut FxHashSet<MethodId>,
) -> Arc<Vec<(u32, String)>> {
    if let Some(cached) = cache.get(&ctor) {
        return cached.clone();
    }
    if !in_progress.insert(ctor) {
        return Arc::new(Vec::new());
    }

    let method = graph.method(ctor);
    let mut summary: Vec<(u32, String)> = Vec::new();

    for (i, &param) in method.param_nodes.iter().enumerate() {
        // Copy closure of the parameter within this constructor
        let mut reachable: Vec<NodeId> = vec![param];
        let mut seen: FxHashSet<NodeId> = FxHashSet::default();
        seen.insert(param);
        let mut cursor = 0;
        while cursor < reachable.len() {
            let n = reachable[cursor];
            cursor += 1;
            for &next in &graph.node(n).copy_out {
                if graph.node(next).value.method == ctor && seen.insert(next) {
                    reachable.push(next);
                }
            }
        }

        for &n in &reachable {
            // Direct store onto `this`
            for fw in &graph.node(n).field_writes {
                let base = graph.node(fw.base);
                if base.value.method == ctor && base.value.kind == ValueKind::This {
                    summary.push((i as u32, fw.field.clone()));
                }
            }

            // Delegation: this value passed into another constructor
            for &stmt in invokes_by_caller.get(&ctor).into_iter().flatten() {
                let inv = graph.invoke(stmt);
                let Some(delegate) = inv.resolved else { continue };
                if !graph.method(delegate).is_constructor {
                    continue;
                }
                for (j, &arg) in inv.args.iter().enumerate() {
                    if arg != n {
                        continue;
                    }
                    let inner = ctor_summary(graph, delegate, invokes_by_caller, cache, in_progress);
                    for &(pj, ref field) in inner.iter() {
                        if pj as usize == j {
                            summary.push((i as u32, field.clone()));
                        }
                    }
                }
            }
        }
    }

    summary.sort();
    summary.dedup();
    in_progress.remove(&ctor);
    let summary = Arc::new(summary);
    cache.insert(ctor, summary.clone());
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::builder::GraphBuilder;

    #[test]
    fn test_resolved_call_edges_are_annotated() {
        let mut b = GraphBuilder::new();
        let caller = b.add_method("caller", "C.caller()", "C", "c.src", "app", true);
        let callee = b.add_method("callee", "D.callee(String)", "D", "d.src", "app", true);
        let param = b.add_param(callee, "p");
        let ret = b.add_return(callee);
        let arg = b.add_local(caller, "arg");
        let result = b.add_local(caller, "result");
        b.copy(arg, param);
        b.copy(ret, result);
        let stmt = b.invoke(caller, "D.callee(String)", "callee", None, vec![arg], Some(result), Some(callee));
        let g = b.finish();
        let site = g.invoke(stmt).call_site;

        let artifacts = EdgeArtifacts::build(&g, &EdgeBuilderConfig::default());
        let call = artifacts.call_edges.get(&(arg, param)).expect("call edge");
        assert_eq!(call.kind, CallEdgeKind::Call);
        assert_eq!(call.call_site, site);

        let ret_edge = artifacts.call_edges.get(&(ret, result)).expect("return edge");
        assert_eq!(ret_edge.kind, CallEdgeKind::Return);
        assert_eq!(ret_edge.call_site, site);
    }

    #[test]
    fn test_unresolved_site_gets_synthetic_edges() {
        let mut b = GraphBuilder::new();
        let caller = b.add_method("caller", "C.caller()", "C", "c.src", "app", true);
        let callee = b.add_method("handle", "H.handle(String)", "H", "h.src", "app", false);
        let param = b.add_param(callee, "p");
        let arg = b.add_local(caller, "arg");
        let recv = b.add_local(caller, "h");
        b.set_type(recv, "H");
        b.invoke(caller, "?.handle(?)", "handle", Some(recv), vec![arg], None, None);
        let g = b.finish();

        let artifacts = EdgeArtifacts::build(&g, &EdgeBuilderConfig::default());
        assert_eq!(artifacts.resolution.unresolved_sites, 1);
        assert_eq!(artifacts.resolution.synthetic_resolved, 1);
        let edges = artifacts.synthetic_call.get(&arg).expect("synthetic edge");
        assert_eq!(edges[0].target, param);
    }

    #[test]
    fn test_over_fanout_site_emits_nothing() {
        let mut b = GraphBuilder::new();
        let caller = b.add_method("caller", "C.caller()", "C", "c.src", "app", true);
        for i in 0..6 {
            let m = b.add_method("go", format!("H{}.go(String)", i), format!("H{}", i), "h.src", "app", false);
            b.add_param(m, "x");
        }
        let recv = b.add_local(caller, "h");
        let arg = b.add_local(caller, "x");
        b.invoke(caller, "go(?)", "go", Some(recv), vec![arg], None, None);
        let g = b.finish();

        let artifacts = EdgeArtifacts::build(&g, &EdgeBuilderConfig::default());
        assert!(artifacts.synthetic_call.is_empty());
        assert_eq!(artifacts.resolution.fanout_exceeded, 1);
    }

    #[test]
    fn test_ctor_summary_follows_delegation() {
        let mut b = GraphBuilder::new();
        let caller = b.add_method("caller", "C.caller()", "C", "c.src", "app", true);

        // Outer(v) { Inner(v) }   Inner(x) { this.data = x }
        let outer = b.add_method("Outer", "Outer.<init>(String)", "Outer", "o.src", "app", false);
        b.mark_constructor(outer);
        let outer_p = b.add_param(outer, "v");

        let inner = b.add_method("Inner", "Inner.<init>(String)", "Inner", "i.src", "app", false);
        b.mark_constructor(inner);
        let inner_p = b.add_param(inner, "x");
        let inner_this = b.add_this(inner);
        b.field_write(inner_p, inner_this, "data");

        b.invoke(outer, "Inner.<init>(String)", "Inner", None, vec![outer_p], None, Some(inner));

        let arg = b.add_local(caller, "secret");
        let result = b.add_local(caller, "obj");
        // Unresolved constructor call → synthetic candidates via name match
        b.invoke(caller, "Outer.<init>(String)", "Outer", None, vec![arg], Some(result), None);
        let g = b.finish();

        let artifacts = EdgeArtifacts::build(&g, &EdgeBuilderConfig::default());
        let stores = artifacts.ctor_stores.get(&arg).expect("ctor store");
        assert_eq!(stores[0].result, result);
        assert_eq!(stores[0].field, "data");
    }

    #[test]
    fn test_capture_edge_found_through_zero_arg_chain() {
        let mut b = GraphBuilder::new();
        let outer_m = b.add_method("outer", "O.outer()", "O", "o.src", "app", true);
        let closure = b.add_method("lambda$0", "O.lambda$0()", "O", "o.src", "app", true);
        let outer_v = b.add_local(outer_m, "v");
        let inner_v = b.add_local(closure, "v");
        b.capture(outer_v, inner_v, closure);

        let f = b.add_local(outer_m, "f");
        b.bind_closure(f, closure);
        b.invoke(outer_m, "f()", "f", Some(f), vec![], None, None);
        let g = b.finish();

        let artifacts = EdgeArtifacts::build(&g, &EdgeBuilderConfig::default());
        let edges = artifacts.capture_edges.get(&outer_v).expect("capture edge");
        assert_eq!(edges[0].inner, inner_v);
        assert_eq!(edges[0].closure, closure);
    }

    #[test]
    fn test_rest_edges_cover_trailing_args() {
        let mut b = GraphBuilder::new();
        let caller = b.add_method("caller", "C.caller()", "C", "c.src", "app", true);
        let callee = b.add_method("log", "L.log(String,Object[])", "L", "l.src", "app", true);
        b.add_param(callee, "fmt");
        let rest = b.add_rest_param(callee, "parts");
        let a0 = b.add_local(caller, "fmt");
        let a1 = b.add_local(caller, "x");
        let a2 = b.add_local(caller, "y");
        b.invoke(caller, "L.log(String,Object[])", "log", None, vec![a0, a1, a2], None, Some(callee));
        let g = b.finish();

        let artifacts = EdgeArtifacts::build(&g, &EdgeBuilderConfig::default());
        assert!(artifacts.rest_edges.get(&a0).is_none());
        assert_eq!(artifacts.rest_edges.get(&a1).unwrap()[0].rest_param, rest);
        assert_eq!(artifacts.rest_edges.get(&a2).unwrap()[0].rest_param, rest);
    }

    #[test]
    fn test_field_reader_index() {
        let mut b = GraphBuilder::new();
        let m = b.add_method("main", "M.main()", "M", "m.src", "app", true);
        let (oid, _) = b.add_object(m, "new User");
        let u = b.add_local(m, "u");
        b.points_to(u, oid);
        let out = b.add_local(m, "out");
        b.field_load(out, u, "email");
        let g = b.finish();

        let artifacts = EdgeArtifacts::build(&g, &EdgeBuilderConfig::default());
        assert_eq!(
            artifacts.field_readers.get(&(oid, "email".to_string())).unwrap(),
            &vec![out]
        );
    }
}
