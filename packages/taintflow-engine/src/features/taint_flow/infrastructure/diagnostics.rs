//! Diagnostics
//!
//! Counters and profiling snapshots for performance diagnosis. All
//! counters are plain integers: one solve run is single-threaded, and the
//! snapshot is taken between runs. Resetting diagnostics never touches the
//! cached rule/edge artifacts.

use std::collections::HashMap;

use serde::Serialize;

/// Worklist solver counters, one per propagation-rule family plus the
/// bookkeeping every family shares
#[derive(Debug, Clone, Default, Serialize)]
pub struct SolverStats {
    pub iterations: u64,
    pub facts_created: u64,
    pub dedup_skips: u64,

    /// Return edges dropped by the context realizability check
    pub context_rejections: u64,

    /// Any-element loads suppressed by precise slot coverage
    pub any_element_suppressed: u64,

    pub copies: u64,
    pub expressions: u64,
    pub field_stores: u64,
    pub field_loads: u64,
    pub container_stores: u64,
    pub container_loads: u64,
    pub captures: u64,
    pub synthetic_calls: u64,
    pub synthetic_returns: u64,
    pub ctor_stores: u64,
    pub promise_dispatches: u64,
    pub rest_args: u64,
    pub reflect_loads: u64,
    pub transfer_derived: u64,
}

/// Transfer executor counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferStats {
    pub facts_processed: u64,
    pub invoke_sites_scanned: u64,
    pub rule_checks: u64,
    pub rule_matches: u64,
    pub endpoint_checks: u64,
    pub endpoint_matches: u64,
    pub dedup_skips: u64,
    pub alias_queries: u64,
    pub alias_cache_hits: u64,
    pub elapsed_micros: u64,
}

/// One profiling snapshot of an engine instance
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticsSnapshot {
    pub solver: SolverStats,
    pub transfer: TransferStats,

    /// Distinct contexts interned during the run
    pub contexts_interned: usize,

    /// Invoke views built so far
    pub invoke_views: usize,

    /// Total facts in the visited set
    pub facts_total: usize,

    /// Rule id → number of times it matched
    pub rule_hits: HashMap<String, u64>,

    /// Wall time of the last solve, in microseconds
    pub solve_elapsed_micros: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_serializes() {
        let mut snap = DiagnosticsSnapshot::default();
        snap.solver.iterations = 42;
        snap.rule_hits.insert("sink-eval".to_string(), 3);

        let json = serde_json::to_string(&snap).expect("serializable");
        assert!(json.contains("\"iterations\":42"));
        assert!(json.contains("sink-eval"));
    }
}
