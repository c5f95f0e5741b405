/*
 * Taintflow Engine - Context-Sensitive Taint-Flow Analysis
 *
 * Feature-First Hexagonal Architecture:
 * - shared/      : Program-graph model + builder (the front-end interface)
 * - features/    : Vertical slices (taint_flow: domain → infra → app → ports)
 *
 * The engine consumes a finalized points-to graph and call graph, seeds
 * taint from declarative source rules or entry-parameter heuristics, runs
 * a worklist fixpoint over ~12 propagation-rule families, and matches the
 * tainted set against sink rules with sanitizer exclusions. One solve run
 * is single-threaded; independent analyses share the read-only graph and
 * the compiled rule/edge caches.
 */

#![allow(dead_code)] // Some accessors reserved for collaborator use
#![allow(clippy::too_many_arguments)] // Analysis constructors need many params
#![allow(clippy::collapsible_if)] // Readability over brevity

pub mod errors;
pub mod features;
pub mod shared;

pub use errors::{Result, TaintFlowError};
pub use features::taint_flow::application::{
    analyze_entries, EngineOptions, EntryOutcome, EntryReport, Flow, FlowPolicy, SeedSummary,
    TaintFlowEngine,
};
pub use features::taint_flow::domain::{
    ContextTable, Fact, FieldPath, MatchKind, RuleSet, SlotKey, SourceTag,
};
pub use features::taint_flow::ports::{
    run_analysis, AnalysisOutcome, AnalysisRequest, FlowDto, RuleProvider, StaticRules,
};
pub use shared::{GraphBuilder, ProgramGraph};
