/*
 * Taint-Flow Ports
 *
 * Boundary between the engine and its collaborators (CLI, reporting,
 * rule loading). Input side: analysis requests and the driving helper
 * that walks one request through seed → solve → detect. Output side:
 * serializable flow/outcome DTOs for report rendering, which happens
 * outside this crate.
 */

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::features::taint_flow::application::engine::{
    EngineOptions, Flow, FlowPolicy, TaintFlowEngine,
};
use crate::features::taint_flow::domain::rules::RuleSet;
use crate::features::taint_flow::infrastructure::diagnostics::DiagnosticsSnapshot;
use crate::shared::models::{CallSiteId, MethodId, NodeId, ProgramGraph};

/// The rule-loading collaborator: delivers a validated, already
/// layer-merged rule set. Loading, schema validation, and merge-by-id
/// happen outside this crate.
pub trait RuleProvider {
    fn rules(&self) -> Result<RuleSet>;
}

/// A fixed, in-memory rule set (tests, embedding callers)
pub struct StaticRules(pub RuleSet);

impl RuleProvider for StaticRules {
    fn rules(&self) -> Result<RuleSet> {
        Ok(self.0.clone())
    }
}

/// One analysis request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Entry method to seed within; `None` seeds the whole scope
    pub entry: Option<MethodId>,

    /// Context depth k (0 = context-insensitive)
    pub context_depth: usize,

    /// Extra heuristic seed nodes (entry parameters)
    #[serde(default)]
    pub seed_nodes: Vec<NodeId>,

    /// Stop after this many flows; `None` checks everything
    #[serde(default)]
    pub max_flows: Option<usize>,
}

/// Serializable form of one detected flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDto {
    pub source_label: String,
    pub sink_method: String,
    pub sink_site: CallSiteId,
    pub source_rule: Option<String>,
    pub sink_rule: String,
    pub transfer_rules: Vec<String>,
}

impl From<&Flow> for FlowDto {
    fn from(flow: &Flow) -> Self {
        Self {
            source_label: flow.source.label.to_string(),
            sink_method: flow.sink_method.clone(),
            sink_site: flow.sink_site,
            source_rule: flow.source_rule.as_deref().map(str::to_string),
            sink_rule: flow.sink_rule.to_string(),
            transfer_rules: flow.transfer_rules.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// Outcome of one analysis request
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub seeded: usize,
    pub facts: usize,
    pub flows: Vec<FlowDto>,
    pub diagnostics: DiagnosticsSnapshot,
}

/// Drive one request end to end: seed from rules (plus any heuristic
/// nodes), solve to fixpoint, detect sinks under the request's policy
pub fn run_analysis(
    graph: Arc<ProgramGraph>,
    request: &AnalysisRequest,
    provider: &dyn RuleProvider,
) -> Result<AnalysisOutcome> {
    let rules = provider.rules()?;
    let mut engine = TaintFlowEngine::new(
        graph,
        request.context_depth,
        EngineOptions::with_rules(rules),
    )?;

    if let Some(entry) = request.entry {
        engine.select_entry(entry)?;
    }

    let summary = engine.seed_from_sources();
    let mut seeded = summary.seeded;
    if !request.seed_nodes.is_empty() {
        seeded += engine.seed_nodes(&request.seed_nodes, "heuristic:entry-param");
    }

    let facts = engine.solve();
    let flows = engine.detect_sinks(FlowPolicy {
        max_flows: request.max_flows,
    });

    Ok(AnalysisOutcome {
        seeded,
        facts,
        flows: flows.iter().map(FlowDto::from).collect(),
        diagnostics: engine.diagnostics(),
    })
}
