//! Audit-hook chain
//!
//! Grounded in `Python/pystate.c`'s `_Py_AuditHookEntry` singly-linked,
//! append-only list consulted at interpreter create/clear/delete. Only the
//! chain data structure and its invocation contract at those lifecycle
//! points are implemented — the audit *event* taxonomy and `sys.audit()`
//! call surface are out of scope, per SPEC_FULL.md's supplement note.

use std::sync::{Arc, Mutex};

type HookFn = dyn Fn(&str, &str) + Send + Sync;

/// Append-only chain of audit hooks. Cloning an `Arc<AuditChain>` is cheap;
/// hooks themselves are never removed once registered, matching
/// `PySys_AddAuditHook`'s one-way contract.
pub struct AuditChain {
    hooks: Mutex<Vec<Arc<HookFn>>>,
}

impl AuditChain {
    pub fn new() -> Self {
        Self {
            hooks: Mutex::new(Vec::new()),
        }
    }

    /// Append a hook to the chain. Hooks run in registration order.
    pub fn add_hook(&self, hook: impl Fn(&str, &str) + Send + Sync + 'static) {
        self.hooks.lock().unwrap().push(Arc::new(hook));
    }

    /// Invoke every registered hook with `event`/`data`. Hooks are run
    /// best-effort: this crate has no exception propagation path for audit
    /// hooks (no evaluator), so a panicking hook is the caller's bug, not
    /// something this chain catches.
    pub fn fire(&self, event: &str, data: &str) {
        let hooks = self.hooks.lock().unwrap();
        if hooks.is_empty() {
            return;
        }
        tracing::debug!(event, data, hook_count = hooks.len(), "audit event");
        for hook in hooks.iter() {
            hook(event, data);
        }
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.lock().unwrap().len()
    }
}

impl Default for AuditChain {
    fn default() -> Self {
        Self::new()
    }
}
