//! Transfer Executor
//!
//! Rule-driven extra flows: given one tainted fact, find the call sites
//! that could observe it, match the configured transfer rules against
//! those sites, and emit derived facts at the rules' "to" endpoints. This
//! is the configurable extension point beyond graph-native copy/store/load
//! edges.
//!
//! Priority: exact-match-kind rules beat scope/shape-constrained rules
//! beat unconstrained ones: when a stronger class matches a site, weaker
//! classes are not consulted there at all.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashMap;
use lru::LruCache;
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::features::taint_flow::domain::fact::{Fact, FactKey};
use crate::features::taint_flow::infrastructure::diagnostics::TransferStats;
use crate::features::taint_flow::infrastructure::edge_builders::EdgeArtifacts;
use crate::features::taint_flow::infrastructure::invoke_view::{InvokeView, InvokeViewCache};
use crate::features::taint_flow::infrastructure::rule_index::{
    CompiledRules, Endpoint, MatchClass, RuntimeRule,
};
use crate::shared::models::{NodeId, ObjectId, ProgramGraph, StmtId};

/// Alias memo capacity; one entry per heap object actually queried
const ALIAS_MEMO_CAPACITY: usize = 256;

/// One derived transfer flow
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub fact: Fact,
    pub rule: Arc<str>,
    pub site: StmtId,
}

/// Resolve an endpoint to the concrete node at a call site
pub fn endpoint_node(view: &InvokeView, endpoint: Endpoint) -> Option<NodeId> {
    match endpoint {
        Endpoint::Base => view.base,
        Endpoint::Result => view.result,
        Endpoint::Arg(n) => view.args.get(n as usize).copied(),
    }
}

/// Rule-driven flow executor, one per engine instance
pub struct TransferExecutor {
    rules: Arc<CompiledRules>,
    views: InvokeViewCache,

    /// Alias locals per heap object, computed once and reused
    alias_memo: LruCache<ObjectId, Arc<Vec<NodeId>>>,

    /// Per-scope dedup across invocations, keyed by exactly
    /// (input fact, site, rule): never coarser, so no unseen combination
    /// is ever suppressed
    seen: FxHashSet<(FactKey, StmtId, Arc<str>)>,

    pub stats: TransferStats,

    /// Rule id → matches where the "from" endpoint carried the fact
    pub rule_hits: AHashMap<Arc<str>, u64>,
}

impl TransferExecutor {
    pub fn new(rules: Arc<CompiledRules>) -> Self {
        Self {
            rules,
            views: InvokeViewCache::new(),
            alias_memo: LruCache::new(
                NonZeroUsize::new(ALIAS_MEMO_CAPACITY).expect("nonzero capacity"),
            ),
            seen: FxHashSet::default(),
            stats: TransferStats::default(),
            rule_hits: AHashMap::new(),
        }
    }

    /// Number of invoke views built so far (diagnostics)
    pub fn views_built(&self) -> usize {
        self.views.len()
    }

    /// Reset per-run diagnostics without dropping compiled state
    pub fn reset_stats(&mut self) {
        self.stats = TransferStats::default();
        self.rule_hits.clear();
    }

    /// Evaluate all transfer rules against the call sites this fact can
    /// reach; returns the derived facts with rule provenance
    pub fn from_fact(
        &mut self,
        graph: &ProgramGraph,
        edges: &EdgeArtifacts,
        fact: &Fact,
    ) -> Vec<TransferResult> {
        if self.rules.transfers.is_empty() {
            return Vec::new();
        }
        let started = Instant::now();
        self.stats.facts_processed += 1;

        let rules = self.rules.clone();
        let sites = self.candidate_sites(graph, edges, fact);
        let fact_key = fact.key();
        let mut results: Vec<TransferResult> = Vec::new();

        for stmt in sites {
            self.stats.invoke_sites_scanned += 1;
            let view = self.views.view(graph, stmt);

            // Candidate rules via the bucketed index, then priority cut
            let candidates = rules.transfer_index.candidates_for(&view);
            let mut matched: Vec<&RuntimeRule> = Vec::new();
            for idx in candidates {
                let rule = &rules.transfers[idx];
                self.stats.rule_checks += 1;
                if rule.matches_site(&view) {
                    matched.push(rule);
                }
            }
            let Some(best) = matched.iter().map(|r| r.class).min() else {
                continue;
            };
            matched.retain(|r| r.class == best);

            for rule in matched {
                self.stats.rule_matches += 1;

                let key = (fact_key.clone(), stmt, rule.id.clone());
                if self.seen.contains(&key) {
                    self.stats.dedup_skips += 1;
                    continue;
                }

                self.stats.endpoint_checks += 1;
                if !Self::from_carries_fact(graph, &view, rule, fact) {
                    continue;
                }
                self.stats.endpoint_matches += 1;
                *self.rule_hits.entry(rule.id.clone()).or_insert(0) += 1;
                self.seen.insert(key);

                let Some(to) = &rule.to else { continue };
                let Some(to_node) = endpoint_node(&view, to.endpoint) else {
                    continue;
                };

                if to.field.is_empty() {
                    results.push(TransferResult {
                        fact: fact.derive(to_node),
                        rule: rule.id.clone(),
                        site: stmt,
                    });
                } else {
                    // Path-qualified target: one fact per points-to object
                    for &oid in graph.points_to(to_node) {
                        if let Some(obj_node) = graph.object_node(oid) {
                            results.push(TransferResult {
                                fact: fact.derive_field(obj_node, to.field.clone()),
                                rule: rule.id.clone(),
                                site: stmt,
                            });
                        }
                    }
                }
            }
        }

        // Dedup within this invocation by (rule, site, emitted identity)
        let mut emitted: FxHashSet<(Arc<str>, StmtId, FactKey)> = FxHashSet::default();
        results.retain(|r| emitted.insert((r.rule.clone(), r.site, r.fact.key())));

        self.stats.elapsed_micros += started.elapsed().as_micros() as u64;
        if !results.is_empty() {
            debug!(count = results.len(), "transfer rules derived facts");
        }
        results
    }

    /// Call sites that could observe the fact: direct uses for a scalar,
    /// uses of any alias local for a heap-object fact
    fn candidate_sites(
        &mut self,
        graph: &ProgramGraph,
        edges: &EdgeArtifacts,
        fact: &Fact,
    ) -> Vec<StmtId> {
        let node = graph.node(fact.node);
        match node.object_id() {
            None => edges
                .value_invokes
                .get(&fact.node)
                .cloned()
                .unwrap_or_default(),
            Some(oid) => {
                let locals = self.alias_locals(graph, oid);
                let mut sites: Vec<StmtId> = Vec::new();
                for &local in locals.iter() {
                    if let Some(s) = edges.value_invokes.get(&local) {
                        sites.extend_from_slice(s);
                    }
                }
                sites.sort_unstable();
                sites.dedup();
                sites
            }
        }
    }

    /// All scalar locals whose points-to set contains the object;
    /// memoized per object id
    fn alias_locals(&mut self, graph: &ProgramGraph, oid: ObjectId) -> Arc<Vec<NodeId>> {
        self.stats.alias_queries += 1;
        if let Some(cached) = self.alias_memo.get(&oid) {
            self.stats.alias_cache_hits += 1;
            return cached.clone();
        }
        let locals: Arc<Vec<NodeId>> = Arc::new(
            graph
                .nodes()
                .filter(|n| n.object_id().is_none() && n.points_to.contains(&oid))
                .map(|n| n.id)
                .collect(),
        );
        self.alias_memo.put(oid, locals.clone());
        locals
    }

    /// Does the rule's "from" endpoint currently denote a location
    /// carrying the input fact?
    ///
    /// Whole-value facts match the endpoint node directly; path-qualified
    /// facts match when the endpoint's points-to set contains the fact's
    /// object and the declared path equals the fact's path.
    fn from_carries_fact(
        graph: &ProgramGraph,
        view: &InvokeView,
        rule: &RuntimeRule,
        fact: &Fact,
    ) -> bool {
        let Some(from) = &rule.from else { return false };
        let Some(from_node) = endpoint_node(view, from.endpoint) else {
            return false;
        };

        if from.field.is_empty() {
            fact.field.is_empty() && from_node == fact.node
        } else {
            if fact.field != from.field {
                return false;
            }
            let Some(oid) = graph.node(fact.node).object_id() else {
                return false;
            };
            graph.points_to(from_node).contains(&oid)
        }
    }
}
