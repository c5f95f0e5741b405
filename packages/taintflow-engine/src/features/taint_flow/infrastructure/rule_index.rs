//! Compiled Rules and the Bucketed Candidate Index
//!
//! Rule compilation runs once per (scope, rule-set) pair: every regex is
//! compiled exactly once, endpoints are parsed into a closed sum, and the
//! rules are bucketed by their match value so candidate lookup per call
//! site is a handful of map probes plus a short universal scan.
//!
//! Validation is aggregated: all problems in a rule set are reported in a
//! single failure, and a rule set that validated once can never fail later
//! during solving.

use std::sync::Arc;

use regex::Regex;
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::errors::{Result, TaintFlowError};
use crate::features::taint_flow::domain::fact::FieldPath;
use crate::features::taint_flow::domain::rules::{
    MatchKind, RuleDef, RuleSet, ShapeSpec, StringConstraint, TransferRuleDef,
};
use crate::features::taint_flow::infrastructure::invoke_view::InvokeView;

/// Which rule table a runtime rule came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Source,
    Sink,
    Sanitizer,
    Transfer,
}

/// Priority class; lower is stronger. When any `Exact` rule matches a call
/// site, weaker classes are not considered for that site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchClass {
    Exact,
    Constrained,
    Fuzzy,
}

/// Precompiled match predicate
#[derive(Debug, Clone)]
pub enum Predicate {
    Equals(String),
    Contains(String),
    Pattern(Regex),
}

impl Predicate {
    fn matches(&self, text: &str) -> bool {
        match self {
            Predicate::Equals(v) => text == v,
            Predicate::Contains(v) => text.contains(v.as_str()),
            Predicate::Pattern(re) => re.is_match(text),
        }
    }
}

/// A compiled scope constraint
#[derive(Debug, Clone)]
pub enum CompiledConstraint {
    Equals(String),
    Contains(String),
    Pattern(Regex),
}

impl CompiledConstraint {
    fn matches(&self, text: &str) -> bool {
        match self {
            CompiledConstraint::Equals(v) => text == v,
            CompiledConstraint::Contains(v) => text.contains(v.as_str()),
            CompiledConstraint::Pattern(re) => re.is_match(text),
        }
    }
}

/// Compiled scope filter over the calling method's location
#[derive(Debug, Clone, Default)]
pub struct CompiledScope {
    pub file: Option<CompiledConstraint>,
    pub module: Option<CompiledConstraint>,
    pub class: Option<CompiledConstraint>,
    pub method: Option<CompiledConstraint>,
}

impl CompiledScope {
    pub fn is_empty(&self) -> bool {
        self.file.is_none() && self.module.is_none() && self.class.is_none() && self.method.is_none()
    }

    fn matches(&self, view: &InvokeView) -> bool {
        if let Some(c) = &self.file {
            if !c.matches(&view.caller_file) {
                return false;
            }
        }
        if let Some(c) = &self.module {
            if !c.matches(&view.caller_module) {
                return false;
            }
        }
        if let Some(c) = &self.class {
            if !c.matches(&view.caller_class) {
                return false;
            }
        }
        if let Some(c) = &self.method {
            if !c.matches(&view.caller_name) {
                return false;
            }
        }
        true
    }
}

/// Closed endpoint sum: invalid endpoint combinations are unrepresentable
/// once compilation succeeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Base,
    Result,
    Arg(u32),
}

impl Endpoint {
    fn parse(text: &str) -> Option<Endpoint> {
        match text {
            "base" => Some(Endpoint::Base),
            "result" => Some(Endpoint::Result),
            _ => text
                .strip_prefix("arg")
                .and_then(|n| n.parse::<u32>().ok())
                .map(Endpoint::Arg),
        }
    }
}

/// Compiled endpoint: position + optional nested field path
#[derive(Debug, Clone)]
pub struct RuntimeEndpoint {
    pub endpoint: Endpoint,
    pub field: FieldPath,
}

/// One compiled rule in its runtime form
#[derive(Debug, Clone)]
pub struct RuntimeRule {
    pub id: Arc<str>,
    pub kind: RuleKind,
    pub match_kind: MatchKind,
    pub predicate: Predicate,
    pub class: MatchClass,
    pub scope: Option<CompiledScope>,
    pub shape: Option<ShapeSpec>,

    /// Source/sink/sanitizer endpoint
    pub target: Option<RuntimeEndpoint>,

    /// Transfer endpoints
    pub from: Option<RuntimeEndpoint>,
    pub to: Option<RuntimeEndpoint>,

    pub description: String,
}

impl RuntimeRule {
    /// Does the predicate hold for this call site? `LocalNameRegex` rules
    /// never match call sites; they seed locals directly.
    pub fn predicate_matches(&self, view: &InvokeView) -> bool {
        match self.match_kind {
            MatchKind::SignatureEquals | MatchKind::SignatureContains | MatchKind::SignatureRegex => {
                self.predicate.matches(&view.signature)
            }
            MatchKind::MethodNameEquals | MatchKind::MethodNameRegex => {
                self.predicate.matches(&view.method_name)
            }
            MatchKind::CalleeSignatureEquals => view
                .callee_signature
                .as_deref()
                .is_some_and(|s| self.predicate.matches(s)),
            MatchKind::DeclaringClassEquals => view
                .declaring_class
                .as_deref()
                .is_some_and(|c| self.predicate.matches(c)),
            MatchKind::LocalNameRegex => false,
        }
    }

    /// Static shape + scope filters
    pub fn static_filters_match(&self, view: &InvokeView) -> bool {
        if let Some(shape) = &self.shape {
            if let Some(instance) = shape.instance {
                if view.is_instance != instance {
                    return false;
                }
            }
            if let Some(count) = shape.arg_count {
                if view.args.len() != count {
                    return false;
                }
            }
            if let Some(ty) = &shape.base_type {
                if view.base_type.as_deref() != Some(ty.as_str()) {
                    return false;
                }
            }
        }
        if let Some(scope) = &self.scope {
            if !scope.matches(view) {
                return false;
            }
        }
        true
    }

    /// Full site match: predicate plus static filters
    pub fn matches_site(&self, view: &InvokeView) -> bool {
        self.predicate_matches(view) && self.static_filters_match(view)
    }

    /// Local-name predicate, for `LocalNameRegex` source seeding
    pub fn matches_local_name(&self, name: &str) -> bool {
        matches!(self.match_kind, MatchKind::LocalNameRegex) && self.predicate.matches(name)
    }
}

/// Bucketed candidate index over one rule table
///
/// Buckets: exact signature / callee signature / declaring class / method
/// name, else the universal bucket scanned linearly.
#[derive(Debug, Default)]
pub struct RuleIndex {
    by_signature: FxHashMap<String, Vec<usize>>,
    by_callee_signature: FxHashMap<String, Vec<usize>>,
    by_class: FxHashMap<String, Vec<usize>>,
    by_method_name: FxHashMap<String, Vec<usize>>,
    universal: Vec<usize>,
}

impl RuleIndex {
    fn build(rules: &[RuntimeRule]) -> Self {
        let mut index = RuleIndex::default();
        for (i, rule) in rules.iter().enumerate() {
            let value = match &rule.predicate {
                Predicate::Equals(v) => v.clone(),
                _ => {
                    index.universal.push(i);
                    continue;
                }
            };
            match rule.match_kind {
                MatchKind::SignatureEquals => {
                    index.by_signature.entry(value).or_default().push(i)
                }
                MatchKind::CalleeSignatureEquals => {
                    index.by_callee_signature.entry(value).or_default().push(i)
                }
                MatchKind::DeclaringClassEquals => {
                    index.by_class.entry(value).or_default().push(i)
                }
                MatchKind::MethodNameEquals => {
                    index.by_method_name.entry(value).or_default().push(i)
                }
                _ => index.universal.push(i),
            }
        }
        index
    }

    /// Candidate rule indices for a call site; a superset of the matching
    /// rules, deduplicated
    pub fn candidates_for(&self, view: &InvokeView) -> Vec<usize> {
        let mut out: Vec<usize> = Vec::new();
        if let Some(v) = self.by_signature.get(&view.signature) {
            out.extend_from_slice(v);
        }
        if let Some(sig) = &view.callee_signature {
            if let Some(v) = self.by_callee_signature.get(sig) {
                out.extend_from_slice(v);
            }
        }
        if let Some(class) = &view.declaring_class {
            if let Some(v) = self.by_class.get(class) {
                out.extend_from_slice(v);
            }
        }
        if let Some(v) = self.by_method_name.get(&view.method_name) {
            out.extend_from_slice(v);
        }
        out.extend_from_slice(&self.universal);
        out.sort_unstable();
        out.dedup();
        out
    }
}

/// The compiled form of one rule set, cached per (scope, rule hash)
#[derive(Debug)]
pub struct CompiledRules {
    pub sources: Vec<RuntimeRule>,
    pub sinks: Vec<RuntimeRule>,
    pub sanitizers: Vec<RuntimeRule>,
    pub transfers: Vec<RuntimeRule>,

    pub sink_index: RuleIndex,
    pub sanitizer_index: RuleIndex,
    pub transfer_index: RuleIndex,

    /// Content hash of the declarative rule set
    pub rule_hash: String,
}

/// Content hash of a rule set; part of the artifact cache key
pub fn rule_set_hash(rules: &RuleSet) -> String {
    let bytes = serde_json::to_vec(rules).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("{:x}", digest)
}

struct Validator {
    errors: Vec<String>,
    seen_ids: FxHashMap<String, ()>,
}

impl Validator {
    fn new() -> Self {
        Self {
            errors: Vec::new(),
            seen_ids: FxHashMap::default(),
        }
    }

    fn check_id(&mut self, id: &str) {
        if id.is_empty() {
            self.errors.push("rule with empty id".to_string());
        } else if self.seen_ids.insert(id.to_string(), ()).is_some() {
            self.errors.push(format!("duplicate rule id '{}'", id));
        }
    }

    fn predicate(&mut self, id: &str, kind: MatchKind, value: &str) -> Option<Predicate> {
        if value.is_empty() {
            self.errors.push(format!("rule '{}': empty match value", id));
            return None;
        }
        match kind {
            MatchKind::SignatureEquals
            | MatchKind::MethodNameEquals
            | MatchKind::CalleeSignatureEquals
            | MatchKind::DeclaringClassEquals => Some(Predicate::Equals(value.to_string())),
            MatchKind::SignatureContains => Some(Predicate::Contains(value.to_string())),
            MatchKind::SignatureRegex | MatchKind::MethodNameRegex | MatchKind::LocalNameRegex => {
                match Regex::new(value) {
                    Ok(re) => Some(Predicate::Pattern(re)),
                    Err(e) => {
                        self.errors
                            .push(format!("rule '{}': invalid regex: {}", id, e));
                        None
                    }
                }
            }
        }
    }

    fn constraint(&mut self, id: &str, c: &StringConstraint) -> Option<CompiledConstraint> {
        match c {
            StringConstraint::Equals(v) => Some(CompiledConstraint::Equals(v.clone())),
            StringConstraint::Contains(v) => Some(CompiledConstraint::Contains(v.clone())),
            StringConstraint::Regex(v) => match Regex::new(v) {
                Ok(re) => Some(CompiledConstraint::Pattern(re)),
                Err(e) => {
                    self.errors
                        .push(format!("rule '{}': invalid scope regex: {}", id, e));
                    None
                }
            },
        }
    }

    fn scope(
        &mut self,
        id: &str,
        spec: &Option<crate::features::taint_flow::domain::rules::ScopeSpec>,
    ) -> Option<CompiledScope> {
        let spec = spec.as_ref()?;
        if spec.is_empty() {
            return None;
        }
        let compiled = CompiledScope {
            file: spec.file.as_ref().and_then(|c| self.constraint(id, c)),
            module: spec.module.as_ref().and_then(|c| self.constraint(id, c)),
            class: spec.class.as_ref().and_then(|c| self.constraint(id, c)),
            method: spec.method.as_ref().and_then(|c| self.constraint(id, c)),
        };
        Some(compiled)
    }

    fn endpoint(
        &mut self,
        id: &str,
        spec: &crate::features::taint_flow::domain::rules::EndpointSpec,
    ) -> Option<RuntimeEndpoint> {
        match Endpoint::parse(&spec.endpoint) {
            Some(endpoint) => Some(RuntimeEndpoint {
                endpoint,
                field: FieldPath::parse(&spec.field),
            }),
            None => {
                self.errors.push(format!(
                    "rule '{}': invalid endpoint '{}' (expected base | result | argN)",
                    id, spec.endpoint
                ));
                None
            }
        }
    }
}

fn match_class(kind: MatchKind, has_scope: bool, has_shape: bool) -> MatchClass {
    if kind.is_exact() {
        MatchClass::Exact
    } else if has_scope || has_shape {
        MatchClass::Constrained
    } else {
        MatchClass::Fuzzy
    }
}

fn compile_basic(
    v: &mut Validator,
    def: &RuleDef,
    kind: RuleKind,
    default_target: Endpoint,
) -> Option<RuntimeRule> {
    v.check_id(&def.id);
    let predicate = v.predicate(&def.id, def.matcher.kind, &def.matcher.value)?;
    let scope = v.scope(&def.id, &def.scope);
    let shape = def.shape.clone().filter(|s| !s.is_empty());

    let target = match &def.target {
        Some(spec) => v.endpoint(&def.id, spec)?,
        None => RuntimeEndpoint {
            endpoint: default_target,
            field: FieldPath::empty(),
        },
    };

    let class = match_class(def.matcher.kind, scope.is_some(), shape.is_some());
    Some(RuntimeRule {
        id: Arc::from(def.id.as_str()),
        kind,
        match_kind: def.matcher.kind,
        predicate,
        class,
        scope,
        shape,
        target: Some(target),
        from: None,
        to: None,
        description: def.description.clone(),
    })
}

fn compile_transfer(v: &mut Validator, def: &TransferRuleDef) -> Option<RuntimeRule> {
    v.check_id(&def.id);
    let predicate = v.predicate(&def.id, def.matcher.kind, &def.matcher.value)?;
    if matches!(def.matcher.kind, MatchKind::LocalNameRegex) {
        v.errors.push(format!(
            "rule '{}': local-name-regex cannot drive a transfer rule",
            def.id
        ));
        return None;
    }
    let scope = v.scope(&def.id, &def.scope);
    let shape = def.shape.clone().filter(|s| !s.is_empty());
    let from = v.endpoint(&def.id, &def.from)?;
    let to = v.endpoint(&def.id, &def.to)?;

    let class = match_class(def.matcher.kind, scope.is_some(), shape.is_some());
    Some(RuntimeRule {
        id: Arc::from(def.id.as_str()),
        kind: RuleKind::Transfer,
        match_kind: def.matcher.kind,
        predicate,
        class,
        scope,
        shape,
        target: None,
        from: Some(from),
        to: Some(to),
        description: def.description.clone(),
    })
}

/// Compile a declarative rule set into its indexed runtime form.
///
/// All validation errors are aggregated into one
/// [`TaintFlowError::RuleValidation`]; a partially valid set is never
/// returned.
pub fn compile(rules: &RuleSet) -> Result<CompiledRules> {
    let mut v = Validator::new();

    let sources: Vec<RuntimeRule> = rules
        .sources
        .iter()
        .filter(|r| r.enabled)
        .filter_map(|r| compile_basic(&mut v, r, RuleKind::Source, Endpoint::Result))
        .collect();
    let sinks: Vec<RuntimeRule> = rules
        .sinks
        .iter()
        .filter(|r| r.enabled)
        .filter_map(|r| compile_basic(&mut v, r, RuleKind::Sink, Endpoint::Arg(0)))
        .collect();
    let sanitizers: Vec<RuntimeRule> = rules
        .sanitizers
        .iter()
        .filter(|r| r.enabled)
        .filter_map(|r| compile_basic(&mut v, r, RuleKind::Sanitizer, Endpoint::Arg(0)))
        .collect();
    let transfers: Vec<RuntimeRule> = rules
        .transfers
        .iter()
        .filter(|r| r.enabled)
        .filter_map(|r| compile_transfer(&mut v, r))
        .collect();

    if !v.errors.is_empty() {
        return Err(TaintFlowError::RuleValidation { errors: v.errors });
    }

    let sink_index = RuleIndex::build(&sinks);
    let sanitizer_index = RuleIndex::build(&sanitizers);
    let transfer_index = RuleIndex::build(&transfers);

    info!(
        sources = sources.len(),
        sinks = sinks.len(),
        sanitizers = sanitizers.len(),
        transfers = transfers.len(),
        "rule set compiled"
    );

    Ok(CompiledRules {
        sources,
        sinks,
        sanitizers,
        transfers,
        sink_index,
        sanitizer_index,
        transfer_index,
        rule_hash: rule_set_hash(rules),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::taint_flow::domain::rules::{EndpointSpec, ScopeSpec};

    fn ruleset_with_transfer(kind: MatchKind, value: &str) -> RuleSet {
        RuleSet {
            transfers: vec![TransferRuleDef::new(
                "t1",
                kind,
                value,
                EndpointSpec::arg(0),
                EndpointSpec::result(),
            )],
            ..Default::default()
        }
    }

    #[test]
    fn test_compile_assigns_priority_classes() {
        let mut rules = ruleset_with_transfer(MatchKind::SignatureEquals, "Foo.bar()");
        rules.transfers.push(TransferRuleDef::new(
            "t2",
            MatchKind::MethodNameRegex,
            "bar.*",
            EndpointSpec::arg(0),
            EndpointSpec::result(),
        ));
        let mut constrained = TransferRuleDef::new(
            "t3",
            MatchKind::MethodNameRegex,
            "bar.*",
            EndpointSpec::arg(0),
            EndpointSpec::result(),
        );
        constrained.scope = Some(ScopeSpec {
            class: Some(StringConstraint::Equals("Handler".to_string())),
            ..Default::default()
        });
        rules.transfers.push(constrained);

        let compiled = compile(&rules).expect("valid rules");
        assert_eq!(compiled.transfers[0].class, MatchClass::Exact);
        assert_eq!(compiled.transfers[1].class, MatchClass::Fuzzy);
        assert_eq!(compiled.transfers[2].class, MatchClass::Constrained);
    }

    #[test]
    fn test_validation_aggregates_all_errors() {
        let mut rules = RuleSet::default();
        rules.sources.push(RuleDef::new("", MatchKind::LocalNameRegex, "ok.*"));
        rules
            .sources
            .push(RuleDef::new("dup", MatchKind::LocalNameRegex, "(unclosed"));
        rules
            .sinks
            .push(RuleDef::new("dup", MatchKind::MethodNameEquals, "execute"));
        rules.sinks.push(
            RuleDef::new("bad-ep", MatchKind::MethodNameEquals, "run")
                .with_target(EndpointSpec {
                    endpoint: "argx".to_string(),
                    field: String::new(),
                }),
        );

        let err = compile(&rules).expect_err("must fail");
        match err {
            TaintFlowError::RuleValidation { errors } => {
                assert!(errors.len() >= 4, "all errors aggregated: {:?}", errors);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_disabled_rules_are_skipped() {
        let mut rules = ruleset_with_transfer(MatchKind::MethodNameEquals, "put");
        rules.transfers[0].enabled = false;
        let compiled = compile(&rules).expect("valid");
        assert!(compiled.transfers.is_empty());
    }

    #[test]
    fn test_rule_hash_is_content_sensitive() {
        let a = ruleset_with_transfer(MatchKind::MethodNameEquals, "put");
        let b = ruleset_with_transfer(MatchKind::MethodNameEquals, "putAll");
        assert_ne!(rule_set_hash(&a), rule_set_hash(&b));
        assert_eq!(rule_set_hash(&a), rule_set_hash(&a));
    }

    #[test]
    fn test_endpoint_parse() {
        assert_eq!(Endpoint::parse("base"), Some(Endpoint::Base));
        assert_eq!(Endpoint::parse("result"), Some(Endpoint::Result));
        assert_eq!(Endpoint::parse("arg2"), Some(Endpoint::Arg(2)));
        assert_eq!(Endpoint::parse("argument"), None);
        assert_eq!(Endpoint::parse(""), None);
    }
}
