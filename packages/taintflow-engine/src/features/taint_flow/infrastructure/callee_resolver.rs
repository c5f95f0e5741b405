//! Best-Effort Callee Resolution
//!
//! Used only for call sites the call graph could not resolve. Exact path:
//! a unique signature match in the scope's method index. Fallback: filter
//! by name, compatible arity, and instance/static shape, narrowing to an
//! expected owner type when one can be inferred.
//!
//! Returns no candidates (rather than a guess) when the filtered set is
//! empty or exceeds the fan-out bound: a missed edge degrades precision by
//! omission, many wrong edges would poison the whole result.

use tracing::debug;

use crate::features::taint_flow::infrastructure::invoke_view::InvokeView;
use crate::shared::models::{MethodId, ProgramGraph};

/// Upper bound on name-fallback candidates; above this the site is left
/// unresolved
pub const MAX_FANOUT: usize = 4;

/// Resolution outcome, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    Exact,
    Fallback,
    NoCandidates,
    FanOutExceeded,
}

#[derive(Debug, Default)]
pub struct CalleeResolver;

impl CalleeResolver {
    /// Resolve a call site to candidate methods
    pub fn resolve(graph: &ProgramGraph, view: &InvokeView) -> (Vec<MethodId>, ResolutionOutcome) {
        // Exact path: unique signature match
        let exact = graph.methods_by_signature(&view.signature);
        if exact.len() == 1 {
            return (exact.to_vec(), ResolutionOutcome::Exact);
        }

        // Name + arity + shape fallback
        let actuals = view.args.len();
        let mut candidates: Vec<MethodId> = graph
            .methods_by_name(&view.method_name)
            .iter()
            .copied()
            .filter(|&mid| {
                let m = graph.method(mid);
                let arity_ok = m.arity() == actuals
                    || (m.arity() == 1 && actuals > 1)
                    || m.rest_param
                        .is_some_and(|(idx, _)| actuals >= idx as usize);
                let shape_ok = m.is_static != view.is_instance;
                arity_ok && shape_ok
            })
            .collect();

        // Owner narrowing when an expected type is inferable
        if let Some(owner) = Self::infer_owner(view) {
            candidates.retain(|&mid| graph.method(mid).class_name == owner);
        }

        if candidates.is_empty() {
            debug!(site = view.call_site, name = %view.method_name, "no callee candidates");
            (Vec::new(), ResolutionOutcome::NoCandidates)
        } else if candidates.len() > MAX_FANOUT {
            debug!(
                site = view.call_site,
                name = %view.method_name,
                count = candidates.len(),
                "callee fan-out bound exceeded"
            );
            (Vec::new(), ResolutionOutcome::FanOutExceeded)
        } else {
            (candidates, ResolutionOutcome::Fallback)
        }
    }

    /// Expected owner type: the resolved declaring class, the receiver's
    /// declared type, or the class prefix of the signature text
    fn infer_owner(view: &InvokeView) -> Option<String> {
        if let Some(class) = &view.declaring_class {
            return Some(class.clone());
        }
        let prefix = view.signature.split('(').next()?;
        prefix
            .rsplit_once('.')
            .map(|(owner, _)| owner)
            .filter(|owner| !owner.is_empty() && !owner.contains('?'))
            .map(|owner| owner.to_string())
    }
}
