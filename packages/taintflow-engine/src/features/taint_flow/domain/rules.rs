//! Declarative Rule Schema
//!
//! Source / sink / sanitizer / transfer rules as the (out-of-scope) rule
//! loader hands them over: already layer-merged and JSON-shaped. The engine
//! compiles this schema once per (scope, rule-set) into the indexed runtime
//! form in `infrastructure::rule_index`.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// How a rule's predicate is matched against a call site or local
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchKind {
    /// Full signature text equality
    SignatureEquals,

    /// Signature contains the given text
    SignatureContains,

    /// Signature matches the given regex
    SignatureRegex,

    /// Invoked method name equality
    MethodNameEquals,

    /// Invoked method name matches the given regex
    MethodNameRegex,

    /// Local/parameter name matches the given regex (source seeding)
    LocalNameRegex,

    /// Resolved callee signature equality
    CalleeSignatureEquals,

    /// Declaring class equality
    DeclaringClassEquals,
}

impl MatchKind {
    /// Equals-kind predicates form the exact priority class
    pub fn is_exact(&self) -> bool {
        matches!(
            self,
            MatchKind::SignatureEquals
                | MatchKind::MethodNameEquals
                | MatchKind::CalleeSignatureEquals
                | MatchKind::DeclaringClassEquals
        )
    }
}

/// Match predicate: kind + value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchSpec {
    pub kind: MatchKind,
    pub value: String,
}

/// A single string constraint used in scope filters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StringConstraint {
    Equals(String),
    Contains(String),
    Regex(String),
}

/// Where a rule applies: constraints on the calling method's location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<StringConstraint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<StringConstraint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<StringConstraint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<StringConstraint>,
}

impl ScopeSpec {
    pub fn is_empty(&self) -> bool {
        self.file.is_none() && self.module.is_none() && self.class.is_none() && self.method.is_none()
    }
}

/// Invoke-shape constraints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShapeSpec {
    /// Instance (true) vs static (false) call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<bool>,

    /// Exact actual-argument count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg_count: Option<usize>,

    /// Declared type of the receiver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_type: Option<String>,
}

impl ShapeSpec {
    pub fn is_empty(&self) -> bool {
        self.instance.is_none() && self.arg_count.is_none() && self.base_type.is_none()
    }
}

/// Endpoint descriptor as declared: "base" | "result" | "argN", with an
/// optional dotted field path. Parsed into the closed
/// [`crate::features::taint_flow::infrastructure::rule_index::Endpoint`]
/// sum at compile time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSpec {
    /// "base", "result", or "argN"
    pub endpoint: String,

    /// Optional dotted field path ("profile.email")
    #[serde(default)]
    pub field: String,
}

impl EndpointSpec {
    pub fn base() -> Self {
        Self {
            endpoint: "base".to_string(),
            field: String::new(),
        }
    }

    pub fn result() -> Self {
        Self {
            endpoint: "result".to_string(),
            field: String::new(),
        }
    }

    pub fn arg(n: usize) -> Self {
        Self {
            endpoint: format!("arg{}", n),
            field: String::new(),
        }
    }

    pub fn with_field(mut self, field: &str) -> Self {
        self.field = field.to_string();
        self
    }
}

fn default_enabled() -> bool {
    true
}

/// A source, sink, or sanitizer rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDef {
    pub id: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(rename = "match")]
    pub matcher: MatchSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ScopeSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<ShapeSpec>,

    /// Seeded/checked endpoint. Defaults at compile time: `result` for
    /// sources, `arg0` for sinks. Ignored for `LocalNameRegex` sources,
    /// which seed the matching local itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<EndpointSpec>,

    /// Description for reports
    #[serde(default)]
    pub description: String,
}

impl RuleDef {
    pub fn new(id: &str, kind: MatchKind, value: &str) -> Self {
        Self {
            id: id.to_string(),
            enabled: true,
            matcher: MatchSpec {
                kind,
                value: value.to_string(),
            },
            scope: None,
            shape: None,
            target: None,
            description: String::new(),
        }
    }

    pub fn with_target(mut self, target: EndpointSpec) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_scope(mut self, scope: ScopeSpec) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_shape(mut self, shape: ShapeSpec) -> Self {
        self.shape = Some(shape);
        self
    }
}

/// A transfer rule: taint moves from one endpoint of a matched call site to
/// another, modeling flows the graph does not natively carry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRuleDef {
    pub id: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(rename = "match")]
    pub matcher: MatchSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ScopeSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<ShapeSpec>,

    pub from: EndpointSpec,

    pub to: EndpointSpec,

    #[serde(default)]
    pub description: String,
}

impl TransferRuleDef {
    pub fn new(id: &str, kind: MatchKind, value: &str, from: EndpointSpec, to: EndpointSpec) -> Self {
        Self {
            id: id.to_string(),
            enabled: true,
            matcher: MatchSpec {
                kind,
                value: value.to_string(),
            },
            scope: None,
            shape: None,
            from,
            to,
            description: String::new(),
        }
    }
}

/// A validated, layer-merged rule set as the loader delivers it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub sources: Vec<RuleDef>,

    #[serde(default)]
    pub sinks: Vec<RuleDef>,

    #[serde(default)]
    pub sanitizers: Vec<RuleDef>,

    #[serde(default)]
    pub transfers: Vec<TransferRuleDef>,
}

impl RuleSet {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
            && self.sinks.is_empty()
            && self.sanitizers.is_empty()
            && self.transfers.is_empty()
    }
}

lazy_static! {
    /// Built-in fallback rule set, used when the loader supplies nothing.
    /// Mirrors the usual suspects: user input sources, execution and
    /// storage sinks, the common sanitizer names.
    pub static ref DEFAULT_RULES: RuleSet = RuleSet {
        sources: vec![
            RuleDef::new("src-user-input", MatchKind::LocalNameRegex, r"(?i)(user|request|input|argv|payload)"),
            RuleDef::new("src-getenv", MatchKind::MethodNameEquals, "getenv")
                .with_target(EndpointSpec::result()),
            RuleDef::new("src-read-line", MatchKind::MethodNameRegex, r"(?i)read(Line|Input)?$")
                .with_target(EndpointSpec::result()),
        ],
        sinks: vec![
            RuleDef::new("sink-sql-execute", MatchKind::MethodNameRegex, r"^execute(Query|Update|Many)?$")
                .with_target(EndpointSpec::arg(0)),
            RuleDef::new("sink-eval", MatchKind::MethodNameEquals, "eval")
                .with_target(EndpointSpec::arg(0)),
            RuleDef::new("sink-command", MatchKind::SignatureContains, "Runtime.exec")
                .with_target(EndpointSpec::arg(0)),
            RuleDef::new("sink-log", MatchKind::MethodNameRegex, r"(?i)^(log|info|warn|error)$")
                .with_target(EndpointSpec::arg(0)),
        ],
        sanitizers: vec![
            RuleDef::new("san-escape", MatchKind::MethodNameRegex, r"(?i)(escape|sanitize|clean|quote)")
                .with_target(EndpointSpec::arg(0)),
        ],
        transfers: vec![],
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_set_from_json() {
        let json = r#"{
            "sources": [
                {"id": "s1", "match": {"kind": "local-name-regex", "value": "user.*"}}
            ],
            "sinks": [
                {"id": "k1", "match": {"kind": "method-name-equals", "value": "execute"},
                 "target": {"endpoint": "arg0"}}
            ],
            "transfers": [
                {"id": "t1", "match": {"kind": "signature-contains", "value": "Map.put"},
                 "from": {"endpoint": "arg1"}, "to": {"endpoint": "base", "field": "value"}}
            ]
        }"#;

        let rules: RuleSet = serde_json::from_str(json).expect("schema parses");
        assert_eq!(rules.sources.len(), 1);
        assert!(rules.sources[0].enabled, "enabled defaults to true");
        assert_eq!(rules.sinks[0].target.as_ref().unwrap().endpoint, "arg0");
        assert_eq!(rules.transfers[0].to.field, "value");
    }

    #[test]
    fn test_match_kind_exactness() {
        assert!(MatchKind::SignatureEquals.is_exact());
        assert!(MatchKind::DeclaringClassEquals.is_exact());
        assert!(!MatchKind::SignatureRegex.is_exact());
        assert!(!MatchKind::MethodNameRegex.is_exact());
    }

    #[test]
    fn test_default_rules_nonempty() {
        assert!(!DEFAULT_RULES.sources.is_empty());
        assert!(!DEFAULT_RULES.sinks.is_empty());
    }
}
