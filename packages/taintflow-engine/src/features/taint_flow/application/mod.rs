//! Taint-flow application layer: the engine facade collaborators drive.

pub mod engine;

pub use engine::{
    analyze_entries, EngineOptions, EntryOutcome, EntryReport, Flow, FlowPolicy, SeedSummary,
    TaintFlowEngine,
};
