//! Artifact Cache
//!
//! Process-wide cache of compiled rule/edge structures, keyed by
//! (scope handle, rule-set content hash). Scope handles are issued by the
//! graph builder and never reused, so entries can be evicted explicitly
//! when an analysis session ends instead of relying on weak references.
//!
//! Racing population is harmless: two analyses of the same scope may
//! build the same artifacts redundantly, and the second insert overwrites
//! with an equal value, never a partial one.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::errors::Result;
use crate::features::taint_flow::domain::rules::RuleSet;
use crate::features::taint_flow::infrastructure::container_model::ContainerModel;
use crate::features::taint_flow::infrastructure::edge_builders::{
    EdgeArtifacts, EdgeBuilderConfig,
};
use crate::features::taint_flow::infrastructure::rule_index::{
    compile, rule_set_hash, CompiledRules,
};
use crate::shared::models::ProgramGraph;

/// Everything compiled once per (scope, rule set) and shared read-only
/// across analyses
#[derive(Debug)]
pub struct ScopeArtifacts {
    pub rules: Arc<CompiledRules>,
    pub edges: Arc<EdgeArtifacts>,
    pub containers: Arc<ContainerModel>,
}

/// The cache service
#[derive(Debug, Default)]
pub struct ArtifactCache {
    entries: DashMap<(u64, String), Arc<ScopeArtifacts>>,
}

static GLOBAL: Lazy<ArtifactCache> = Lazy::new(ArtifactCache::default);

impl ArtifactCache {
    /// The process-wide cache instance
    pub fn global() -> &'static ArtifactCache {
        &GLOBAL
    }

    /// Entries currently cached
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fetch or build the artifacts for one (scope, rule set) pair.
    ///
    /// Call sites with per-edge depth overrides bypass the cache: the
    /// overrides change edge metadata, and such configurations are
    /// engine-local by nature.
    pub fn get_or_build(
        &self,
        graph: &ProgramGraph,
        rules: &RuleSet,
        config: &EdgeBuilderConfig,
    ) -> Result<Arc<ScopeArtifacts>> {
        if !config.depth_overrides.is_empty() {
            return Self::build(graph, rules, config);
        }

        let key = (graph.scope_key(), rule_set_hash(rules));
        if let Some(entry) = self.entries.get(&key) {
            debug!(scope = key.0, "artifact cache hit");
            return Ok(entry.clone());
        }

        let artifacts = Self::build(graph, rules, config)?;
        self.entries.insert(key, artifacts.clone());
        Ok(artifacts)
    }

    fn build(
        graph: &ProgramGraph,
        rules: &RuleSet,
        config: &EdgeBuilderConfig,
    ) -> Result<Arc<ScopeArtifacts>> {
        let compiled = Arc::new(compile(rules)?);
        let edges = Arc::new(EdgeArtifacts::build(graph, config));
        let containers = Arc::new(ContainerModel::build(graph));
        Ok(Arc::new(ScopeArtifacts {
            rules: compiled,
            edges,
            containers,
        }))
    }

    /// Drop every entry for a scope; call when its analysis session ends
    pub fn evict_scope(&self, scope_key: u64) {
        self.entries.retain(|(key, _), _| *key != scope_key);
    }
}
