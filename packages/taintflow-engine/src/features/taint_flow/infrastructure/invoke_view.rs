//! Invoke Views
//!
//! A cached, denormalized view of one call statement: everything rule
//! matching and endpoint resolution need without re-walking the graph.
//! Views are built lazily per statement and memoized for the lifetime of
//! one engine instance.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::shared::models::{CallSiteId, MethodId, NodeId, ProgramGraph, StmtId};

/// Denormalized call-site view
#[derive(Debug, Clone)]
pub struct InvokeView {
    pub stmt: StmtId,
    pub call_site: CallSiteId,

    /// Signature text as the front end resolved it
    pub signature: String,

    /// Invoked method name
    pub method_name: String,

    pub base: Option<NodeId>,
    pub result: Option<NodeId>,
    pub args: Vec<NodeId>,

    /// Calling method identity, for scope constraints
    pub caller: MethodId,
    pub caller_name: String,
    pub caller_class: String,
    pub caller_file: String,
    pub caller_module: String,

    /// Instance vs static call shape
    pub is_instance: bool,

    /// Declared type of the receiver, when known
    pub base_type: Option<String>,

    /// Resolved callee signature (call-graph verdict), when present
    pub callee_signature: Option<String>,

    /// Declaring class of the invoked method: the resolved method's class,
    /// else the receiver's declared type
    pub declaring_class: Option<String>,
}

/// Per-engine memo of invoke views
#[derive(Debug, Default)]
pub struct InvokeViewCache {
    views: FxHashMap<StmtId, Arc<InvokeView>>,
}

impl InvokeViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of views built so far
    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Fetch the view for a statement, building it on first use
    pub fn view(&mut self, graph: &ProgramGraph, stmt: StmtId) -> Arc<InvokeView> {
        if let Some(v) = self.views.get(&stmt) {
            return v.clone();
        }

        let inv = graph.invoke(stmt);
        let caller = graph.method(inv.caller);

        let base_type = inv
            .base
            .and_then(|b| graph.node(b).value.declared_type.clone());

        let (callee_signature, resolved_class) = match inv.resolved {
            Some(mid) => {
                let m = graph.method(mid);
                (Some(m.signature.clone()), Some(m.class_name.clone()))
            }
            None => (None, None),
        };
        let declaring_class = resolved_class.or_else(|| base_type.clone());

        let view = Arc::new(InvokeView {
            stmt,
            call_site: inv.call_site,
            signature: inv.signature.clone(),
            method_name: inv.method_name.clone(),
            base: inv.base,
            result: inv.result,
            args: inv.args.clone(),
            caller: inv.caller,
            caller_name: caller.name.clone(),
            caller_class: caller.class_name.clone(),
            caller_file: caller.file.clone(),
            caller_module: caller.module.clone(),
            is_instance: inv.base.is_some(),
            base_type,
            callee_signature,
            declaring_class,
        });

        debug!(stmt, site = inv.call_site, "invoke view built");
        self.views.insert(stmt, view.clone());
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::builder::GraphBuilder;

    #[test]
    fn test_view_is_memoized() {
        let mut b = GraphBuilder::new();
        let m = b.add_method("caller", "C.caller()", "C", "c.src", "app", false);
        let callee = b.add_method("save", "Repo.save(String)", "Repo", "repo.src", "app", false);
        let arg = b.add_local(m, "x");
        let recv = b.add_local(m, "repo");
        b.set_type(recv, "Repo");
        let stmt = b.invoke(
            m,
            "Repo.save(String)",
            "save",
            Some(recv),
            vec![arg],
            None,
            Some(callee),
        );
        let g = b.finish();

        let mut cache = InvokeViewCache::new();
        let v1 = cache.view(&g, stmt);
        let v2 = cache.view(&g, stmt);
        assert!(Arc::ptr_eq(&v1, &v2));
        assert_eq!(cache.len(), 1);

        assert!(v1.is_instance);
        assert_eq!(v1.base_type.as_deref(), Some("Repo"));
        assert_eq!(v1.declaring_class.as_deref(), Some("Repo"));
        assert_eq!(v1.callee_signature.as_deref(), Some("Repo.save(String)"));
    }

    #[test]
    fn test_unresolved_call_falls_back_to_base_type() {
        let mut b = GraphBuilder::new();
        let m = b.add_method("caller", "C.caller()", "C", "c.src", "app", false);
        let recv = b.add_local(m, "svc");
        b.set_type(recv, "Service");
        let stmt = b.invoke(m, "?.dispatch(Object)", "dispatch", Some(recv), vec![], None, None);
        let g = b.finish();

        let mut cache = InvokeViewCache::new();
        let v = cache.view(&g, stmt);
        assert_eq!(v.callee_signature, None);
        assert_eq!(v.declaring_class.as_deref(), Some("Service"));
    }
}
