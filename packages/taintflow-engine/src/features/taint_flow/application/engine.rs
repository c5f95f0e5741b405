//! Taint-Flow Engine
//!
//! The orchestrator: owns the context table, edge maps, transfer executor,
//! and solver for one analysis; exposes seeding (rule-driven or heuristic)
//! and sink-detection entry points; aggregates diagnostics. Compiled rule
//! and edge structures come from the shared artifact cache and are reused
//! across runs on the same scope.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashMap;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::errors::{Result, TaintFlowError};
use crate::features::taint_flow::domain::context::EMPTY_CONTEXT;
use crate::features::taint_flow::domain::fact::{Fact, SourceTag};
use crate::features::taint_flow::domain::rules::{MatchKind, RuleSet, DEFAULT_RULES};
use crate::features::taint_flow::infrastructure::artifact_cache::{ArtifactCache, ScopeArtifacts};
use crate::features::taint_flow::infrastructure::diagnostics::DiagnosticsSnapshot;
use crate::features::taint_flow::infrastructure::edge_builders::EdgeBuilderConfig;
use crate::features::taint_flow::infrastructure::invoke_view::InvokeViewCache;
use crate::features::taint_flow::infrastructure::rule_index::RuntimeRule;
use crate::features::taint_flow::infrastructure::transfer::{endpoint_node, TransferExecutor};
use crate::features::taint_flow::infrastructure::worklist_solver::WorklistSolver;
use crate::shared::models::{CallSiteId, MethodId, NodeId, ProgramGraph, StmtId, ValueKind};

/// Engine construction options
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Validated, layer-merged rule set; defaults to the built-in table
    pub rules: Arc<RuleSet>,

    /// Per-call-site context depth overrides (engine-local, uncached)
    pub depth_overrides: FxHashMap<CallSiteId, usize>,

    /// Extra debug logging
    pub debug: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            rules: Arc::new(DEFAULT_RULES.clone()),
            depth_overrides: FxHashMap::default(),
            debug: false,
        }
    }
}

impl EngineOptions {
    pub fn with_rules(rules: RuleSet) -> Self {
        Self {
            rules: Arc::new(rules),
            ..Default::default()
        }
    }
}

/// What seeding produced, for diagnostics
#[derive(Debug, Clone, Default)]
pub struct SeedSummary {
    pub seeded: usize,

    /// Seeded locals with their names
    pub locals: Vec<(NodeId, String)>,
}

/// Bounded-work policy for sink detection. Curtails how much of the
/// tainted set is checked, never whether the fixpoint completes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowPolicy {
    pub max_flows: Option<usize>,
}

impl FlowPolicy {
    pub fn unbounded() -> Self {
        Self { max_flows: None }
    }

    pub fn first_flow() -> Self {
        Self { max_flows: Some(1) }
    }

    fn reached(&self, found: usize) -> bool {
        self.max_flows.is_some_and(|cap| found >= cap)
    }
}

/// One detected source-to-sink flow, with full rule provenance
#[derive(Debug, Clone)]
pub struct Flow {
    pub source: SourceTag,
    pub sink_site: CallSiteId,
    pub sink_method: String,
    pub tainted_node: NodeId,

    pub source_rule: Option<Arc<str>>,
    pub sink_rule: Arc<str>,
    pub transfer_rules: Vec<Arc<str>>,
}

/// Per-entry result of a batched analysis
#[derive(Debug)]
pub struct EntryOutcome {
    pub entry: MethodId,
    pub result: std::result::Result<EntryReport, String>,
}

/// Flows and seed counts for one entry point
#[derive(Debug)]
pub struct EntryReport {
    pub seeded: usize,
    pub flows: Vec<Flow>,
}

/// One analysis over one scope
pub struct TaintFlowEngine {
    graph: Arc<ProgramGraph>,
    artifacts: Arc<ScopeArtifacts>,
    options: EngineOptions,

    entry: Option<MethodId>,
    solver: WorklistSolver,
    transfer: TransferExecutor,

    /// Engine-local view cache for seeding and sink matching
    views: InvokeViewCache,

    /// Result node → producing invoke, for sanitizer guards
    result_of: FxHashMap<NodeId, StmtId>,

    /// Source/sink rule hits (transfer hits live in the executor)
    rule_hits: AHashMap<Arc<str>, u64>,

    solve_elapsed_micros: u64,
}

impl TaintFlowEngine {
    /// Construct an engine for one scope with context depth `k`
    pub fn new(graph: Arc<ProgramGraph>, k: usize, options: EngineOptions) -> Result<Self> {
        let config = EdgeBuilderConfig {
            depth_overrides: options.depth_overrides.clone(),
        };
        let artifacts = ArtifactCache::global().get_or_build(&graph, &options.rules, &config)?;

        let solver = WorklistSolver::new(
            Arc::clone(&graph),
            Arc::clone(&artifacts.edges),
            Arc::clone(&artifacts.containers),
            k,
        );
        let transfer = TransferExecutor::new(Arc::clone(&artifacts.rules));

        let mut result_of = FxHashMap::default();
        for inv in graph.invokes() {
            if let Some(r) = inv.result {
                result_of.insert(r, inv.id);
            }
        }

        info!(
            scope = graph.scope_key(),
            k,
            nodes = graph.stats.total_nodes,
            "taint-flow engine constructed"
        );

        Ok(Self {
            graph,
            artifacts,
            options,
            entry: None,
            solver,
            transfer,
            views: InvokeViewCache::new(),
            result_of,
            rule_hits: AHashMap::new(),
            solve_elapsed_micros: 0,
        })
    }

    /// Restrict seeding to one entry method
    pub fn select_entry(&mut self, entry: MethodId) -> Result<()> {
        if (entry as usize) >= self.graph.stats.total_methods {
            return Err(TaintFlowError::config(format!(
                "unknown entry method {}",
                entry
            )));
        }
        self.entry = Some(entry);
        Ok(())
    }

    fn in_entry_scope(&self, method: MethodId) -> bool {
        self.entry.map_or(true, |e| e == method)
    }

    /// Seed facts from the configured source rules. Idempotent: re-seeding
    /// the same location is deduplicated by fact identity.
    pub fn seed_from_sources(&mut self) -> SeedSummary {
        let graph = Arc::clone(&self.graph);
        let artifacts = Arc::clone(&self.artifacts);
        let mut summary = SeedSummary::default();

        for rule in &artifacts.rules.sources {
            if matches!(rule.match_kind, MatchKind::LocalNameRegex) {
                // Seed locals and parameters whose names match
                for node in graph.nodes() {
                    if node.object_id().is_some() {
                        continue;
                    }
                    if !matches!(node.value.kind, ValueKind::Local | ValueKind::Param(_)) {
                        continue;
                    }
                    if !self.in_entry_scope(node.value.method) {
                        continue;
                    }
                    if rule.matches_local_name(&node.value.name) {
                        self.seed_with_rule(node.id, rule, &mut summary);
                    }
                }
            } else {
                // Seed the endpoint of matching call sites
                for inv in graph.invokes() {
                    if !self.in_entry_scope(inv.caller) {
                        continue;
                    }
                    let view = self.views.view(&graph, inv.id);
                    if !rule.matches_site(&view) {
                        continue;
                    }
                    let Some(target) = &rule.target else { continue };
                    if let Some(node) = endpoint_node(&view, target.endpoint) {
                        self.seed_with_rule(node, rule, &mut summary);
                    }
                }
            }
        }

        debug!(seeded = summary.seeded, "source rules seeded");
        summary
    }

    fn seed_with_rule(&mut self, node: NodeId, rule: &RuntimeRule, summary: &mut SeedSummary) {
        let name = self.graph.node(node).value.name.clone();
        let tag = SourceTag::from_rule(node, &rule.id, &format!("source:{}", rule.id));
        if self.solver.seed(Fact::new(node, EMPTY_CONTEXT, tag)) {
            *self.rule_hits.entry(rule.id.clone()).or_insert(0) += 1;
            summary.seeded += 1;
            summary.locals.push((node, name));
        }
    }

    /// Seed explicit nodes (entry-parameter heuristics)
    pub fn seed_nodes(&mut self, nodes: &[NodeId], label: &str) -> usize {
        let mut seeded = 0;
        for &node in nodes {
            let tag = SourceTag::heuristic(node, label);
            if self.solver.seed(Fact::new(node, EMPTY_CONTEXT, tag)) {
                seeded += 1;
            }
        }
        seeded
    }

    /// Run the fixpoint. Returns the number of distinct facts reached.
    pub fn solve(&mut self) -> usize {
        let started = Instant::now();
        self.solver.solve(&mut self.transfer);
        self.solve_elapsed_micros += started.elapsed().as_micros() as u64;
        if self.options.debug {
            debug!(
                facts = self.solver.state.len(),
                iterations = self.solver.stats.iterations,
                elapsed_micros = self.solve_elapsed_micros,
                "solve completed"
            );
        }
        self.solver.state.len()
    }

    /// Match the final tainted set against the configured sink rules
    pub fn detect_sinks(&mut self, policy: FlowPolicy) -> Vec<Flow> {
        let graph = Arc::clone(&self.graph);
        let artifacts = Arc::clone(&self.artifacts);
        let mut flows: Vec<Flow> = Vec::new();

        'sites: for inv in graph.invokes() {
            if policy.reached(flows.len()) {
                break;
            }
            let view = self.views.view(&graph, inv.id);

            let candidates = artifacts.rules.sink_index.candidates_for(&view);
            let mut matched: Vec<&RuntimeRule> = Vec::new();
            for idx in candidates {
                let rule = &artifacts.rules.sinks[idx];
                if rule.matches_site(&view) {
                    matched.push(rule);
                }
            }
            let Some(best) = matched.iter().map(|r| r.class).min() else {
                continue;
            };
            matched.retain(|r| r.class == best);

            for rule in matched {
                let Some(target) = &rule.target else { continue };
                let Some(node) = endpoint_node(&view, target.endpoint) else {
                    continue;
                };

                let fact = if target.field.is_empty() {
                    self.solver.state.whole_fact_at(node).cloned()
                } else {
                    self.solver
                        .state
                        .field_fact_through(&graph, node, &target.field)
                        .cloned()
                };
                let Some(fact) = fact else { continue };

                if self.is_sanitized(node) {
                    debug!(site = view.call_site, "sink hit excluded by sanitizer");
                    continue;
                }

                *self.rule_hits.entry(rule.id.clone()).or_insert(0) += 1;
                flows.push(Flow {
                    source: fact.source.clone(),
                    sink_site: view.call_site,
                    sink_method: view.method_name.clone(),
                    tainted_node: node,
                    source_rule: fact.source.rule.clone(),
                    sink_rule: rule.id.clone(),
                    transfer_rules: self.solver.state.chain_for(&fact.key()).to_vec(),
                });

                if policy.reached(flows.len()) {
                    break 'sites;
                }
            }
        }

        info!(flows = flows.len(), "sink detection finished");
        flows
    }

    /// Raw sink detection by signature/keyword, without a configured rule
    pub fn detect_sinks_by_signature(&mut self, text: &str, policy: FlowPolicy) -> Vec<Flow> {
        let graph = Arc::clone(&self.graph);
        let synthetic_rule: Arc<str> = Arc::from(format!("signature:{}", text));
        let mut flows: Vec<Flow> = Vec::new();

        'sites: for inv in graph.invokes() {
            if policy.reached(flows.len()) {
                break;
            }
            if !inv.signature.contains(text) && !inv.method_name.contains(text) {
                continue;
            }
            let view = self.views.view(&graph, inv.id);
            for node in view.base.iter().chain(view.args.iter()).copied() {
                let Some(fact) = self.solver.state.whole_fact_at(node).cloned() else {
                    continue;
                };
                if self.is_sanitized(node) {
                    continue;
                }
                flows.push(Flow {
                    source: fact.source.clone(),
                    sink_site: view.call_site,
                    sink_method: view.method_name.clone(),
                    tainted_node: node,
                    source_rule: fact.source.rule.clone(),
                    sink_rule: synthetic_rule.clone(),
                    transfer_rules: self.solver.state.chain_for(&fact.key()).to_vec(),
                });
                if policy.reached(flows.len()) {
                    break 'sites;
                }
            }
        }
        flows
    }

    /// A value is considered sanitized when it is (a copy of) the result
    /// of a call matched by a sanitizer rule
    fn is_sanitized(&mut self, node: NodeId) -> bool {
        const MAX_CHAIN: usize = 16;
        let graph = Arc::clone(&self.graph);
        let artifacts = Arc::clone(&self.artifacts);

        let mut cur = node;
        for _ in 0..MAX_CHAIN {
            if let Some(&stmt) = self.result_of.get(&cur) {
                let view = self.views.view(&graph, stmt);
                let hits = artifacts
                    .rules
                    .sanitizer_index
                    .candidates_for(&view)
                    .into_iter()
                    .any(|idx| artifacts.rules.sanitizers[idx].matches_site(&view));
                if hits {
                    return true;
                }
            }
            match graph.single_copy_in.get(&cur) {
                Some(&src) => cur = src,
                None => return false,
            }
        }
        false
    }

    /// Merged rule-hit counters (sources, sinks, transfers)
    pub fn rule_hits(&self) -> HashMap<String, u64> {
        let mut merged: HashMap<String, u64> = HashMap::new();
        for (id, n) in &self.rule_hits {
            *merged.entry(id.to_string()).or_insert(0) += n;
        }
        for (id, n) in &self.transfer.rule_hits {
            *merged.entry(id.to_string()).or_insert(0) += n;
        }
        merged
    }

    /// Profiling snapshot of this engine instance
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            solver: self.solver.stats.clone(),
            transfer: self.transfer.stats.clone(),
            contexts_interned: self.solver.contexts.len(),
            invoke_views: self.views.len() + self.transfer.views_built(),
            facts_total: self.solver.state.len(),
            rule_hits: self.rule_hits(),
            solve_elapsed_micros: self.solve_elapsed_micros,
        }
    }

    /// Reset per-run diagnostics; cached rule/edge structures stay intact
    pub fn reset_diagnostics(&mut self) {
        self.solver.stats = Default::default();
        self.transfer.reset_stats();
        self.rule_hits.clear();
        self.solve_elapsed_micros = 0;
    }

    /// Read-only view of the solver state (for collaborators and tests)
    pub fn state(&self) -> &crate::features::taint_flow::infrastructure::worklist_solver::TaintState {
        &self.solver.state
    }
}

/// Analyze many entry points concurrently. Each entry owns its queue,
/// visited set, and context table; the graph and compiled artifacts are
/// shared read-only. A failure (or panic) in one entry becomes that
/// entry's status and never aborts the batch.
pub fn analyze_entries(
    graph: &Arc<ProgramGraph>,
    k: usize,
    options: &EngineOptions,
    entries: &[MethodId],
    policy: FlowPolicy,
) -> Vec<EntryOutcome> {
    entries
        .par_iter()
        .map(|&entry| {
            let graph = Arc::clone(graph);
            let options = options.clone();
            let outcome = catch_unwind(AssertUnwindSafe(|| -> Result<EntryReport> {
                let mut engine = TaintFlowEngine::new(graph, k, options)?;
                engine.select_entry(entry)?;
                let summary = engine.seed_from_sources();
                engine.solve();
                let flows = engine.detect_sinks(policy);
                Ok(EntryReport {
                    seeded: summary.seeded,
                    flows,
                })
            }));
            let result = match outcome {
                Ok(Ok(report)) => Ok(report),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err("analysis panicked".to_string()),
            };
            EntryOutcome { entry, result }
        })
        .collect()
}
