//! Call-String Contexts
//!
//! k-limited call-site stacks with canonical interning. A context is an
//! opaque id into the table; two contexts are equal iff their stacks are
//! equal element-wise, so id equality is stack equality.
//!
//! Realizability: pushing call site X onto caller context C must be
//! reversible; a return edge whose expected site differs from the top of
//! the current stack is rejected (dropped, not retried) so unrelated call
//! chains never merge.

use rustc_hash::FxHashMap;

use crate::shared::models::CallSiteId;

/// Opaque handle into the context table. Id 0 is always the empty context.
pub type ContextId = u32;

/// The globally shared empty-context sentinel
pub const EMPTY_CONTEXT: ContextId = 0;

/// Interning table for k-limited call-string contexts
///
/// Stacks are stored newest-first: element 0 is the most recent call site.
#[derive(Debug)]
pub struct ContextTable {
    /// Default context depth bound
    k: usize,

    /// Interned stacks, indexed by ContextId
    stacks: Vec<Box<[CallSiteId]>>,

    /// Canonicalization map: stack → id
    intern: FxHashMap<Box<[CallSiteId]>, ContextId>,
}

impl ContextTable {
    /// Create a table with the given default depth bound
    pub fn new(k: usize) -> Self {
        let empty: Box<[CallSiteId]> = Vec::new().into_boxed_slice();
        let mut intern = FxHashMap::default();
        intern.insert(empty.clone(), EMPTY_CONTEXT);
        Self {
            k,
            stacks: vec![empty],
            intern,
        }
    }

    /// The configured default depth bound
    #[inline]
    pub fn depth_bound(&self) -> usize {
        self.k
    }

    /// The empty context sentinel
    #[inline]
    pub fn empty(&self) -> ContextId {
        EMPTY_CONTEXT
    }

    /// Number of distinct contexts interned so far
    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.len() == 1
    }

    fn intern_stack(&mut self, stack: Vec<CallSiteId>) -> ContextId {
        let boxed = stack.into_boxed_slice();
        if let Some(&id) = self.intern.get(&boxed) {
            return id;
        }
        let id = self.stacks.len() as ContextId;
        self.stacks.push(boxed.clone());
        self.intern.insert(boxed, id);
        id
    }

    /// Stack elements of a context, newest first
    #[inline]
    pub fn stack(&self, ctx: ContextId) -> &[CallSiteId] {
        &self.stacks[ctx as usize]
    }

    /// Most recent call site of a context
    #[inline]
    pub fn top(&self, ctx: ContextId) -> Option<CallSiteId> {
        self.stacks[ctx as usize].first().copied()
    }

    /// Callee context for a call edge: push the site, k-limit to the
    /// default bound. With k = 0 every context collapses to empty and the
    /// edge is context-insensitive by construction.
    pub fn callee_context(&mut self, caller: ContextId, call_site: CallSiteId) -> ContextId {
        self.callee_context_with_k(caller, call_site, self.k)
    }

    /// Callee context with a per-edge depth override
    pub fn callee_context_with_k(
        &mut self,
        caller: ContextId,
        call_site: CallSiteId,
        k: usize,
    ) -> ContextId {
        if k == 0 {
            return EMPTY_CONTEXT;
        }
        let old = self.stack(caller);
        let mut stack = Vec::with_capacity((old.len() + 1).min(k));
        stack.push(call_site);
        stack.extend(old.iter().take(k - 1).copied());
        self.intern_stack(stack)
    }

    /// Caller context at an unconditional restore: drop the most recent
    /// element. The empty context restores to itself.
    pub fn caller_context(&mut self, callee: ContextId) -> ContextId {
        let old = self.stack(callee);
        if old.is_empty() {
            return EMPTY_CONTEXT;
        }
        let stack = old[1..].to_vec();
        self.intern_stack(stack)
    }

    /// Caller context at a return edge, with realizability check: `None`
    /// when the expected call site does not match the top of the stack.
    ///
    /// The empty context is realizable for every return (k-limiting may
    /// have truncated the matching push away).
    pub fn return_to(
        &mut self,
        callee: ContextId,
        expected_site: CallSiteId,
    ) -> Option<ContextId> {
        match self.top(callee) {
            None => Some(EMPTY_CONTEXT),
            Some(top) if top == expected_site => Some(self.caller_context(callee)),
            Some(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_shared_sentinel() {
        let mut table = ContextTable::new(2);
        assert_eq!(table.empty(), EMPTY_CONTEXT);
        assert_eq!(table.top(EMPTY_CONTEXT), None);
        // k = 0 on the edge collapses to empty
        assert_eq!(table.callee_context_with_k(EMPTY_CONTEXT, 7, 0), EMPTY_CONTEXT);
    }

    #[test]
    fn test_push_then_return_restores_caller() {
        let mut table = ContextTable::new(2);
        let caller = table.callee_context(EMPTY_CONTEXT, 11);
        let callee = table.callee_context(caller, 22);

        let restored = table.return_to(callee, 22);
        assert_eq!(restored, Some(caller));
    }

    #[test]
    fn test_mismatched_return_is_rejected() {
        let mut table = ContextTable::new(2);
        let callee = table.callee_context(EMPTY_CONTEXT, 11);
        assert_eq!(table.return_to(callee, 99), None);
    }

    #[test]
    fn test_empty_context_return_is_realizable() {
        let mut table = ContextTable::new(1);
        // k-limiting may have truncated the push; returning from the empty
        // stack stays empty rather than rejecting.
        assert_eq!(table.return_to(EMPTY_CONTEXT, 5), Some(EMPTY_CONTEXT));
    }

    #[test]
    fn test_k_limiting_keeps_most_recent() {
        let mut table = ContextTable::new(2);
        let c1 = table.callee_context(EMPTY_CONTEXT, 1);
        let c2 = table.callee_context(c1, 2);
        let c3 = table.callee_context(c2, 3);
        assert_eq!(table.stack(c3), &[3, 2]);
    }

    #[test]
    fn test_interning_makes_equal_stacks_identical() {
        let mut table = ContextTable::new(2);
        let a1 = table.callee_context(EMPTY_CONTEXT, 4);
        let a2 = table.callee_context(a1, 5);

        let b1 = table.callee_context(EMPTY_CONTEXT, 4);
        let b2 = table.callee_context(b1, 5);

        assert_eq!(a2, b2);
        assert_eq!(table.len(), 3); // empty, [4], [5,4]
    }

    #[test]
    fn test_distinct_chains_stay_distinct() {
        let mut table = ContextTable::new(2);
        let via_a = table.callee_context(EMPTY_CONTEXT, 1);
        let bar_a = table.callee_context(via_a, 3);

        let via_b = table.callee_context(EMPTY_CONTEXT, 2);
        let bar_b = table.callee_context(via_b, 3);

        assert_ne!(bar_a, bar_b);
    }
}
