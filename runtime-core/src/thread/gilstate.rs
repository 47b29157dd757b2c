//! Ensure/Release: the foreign-thread bridge
//!
//! Lets native code running on an OS thread with no bound thread-state call
//! into the runtime safely and re-entrantly. Grounded in
//! `Python/pystate.c`'s `PyGILState_Ensure`/`PyGILState_Release`: a
//! thread-local slot holding the gilstate-bound thread-state, a nesting
//! counter, and a token recording whether the GEL was already held so
//! release knows whether to detach.

use super::ThreadState;
use crate::interp::Interpreter;
use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static GILSTATE_SLOT: RefCell<Option<Arc<ThreadState>>> = const { RefCell::new(None) };
}

/// Whether the GEL was already held by this thread-state before `ensure`
/// was called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Locked,
    Unlocked,
}

/// Read the calling OS thread's gilstate-bound thread-state, if any, without
/// creating one.
pub fn get_this_thread_state() -> Option<Arc<ThreadState>> {
    GILSTATE_SLOT.with(|slot| slot.borrow().clone())
}

/// Whether the calling OS thread currently has a gilstate-bound
/// thread-state. Mirrors `PyGILState_Check`.
pub fn check() -> bool {
    get_this_thread_state().is_some()
}

/// Record `ts` as this OS thread's gilstate-bound thread-state. Called from
/// [`ThreadState::bind`] the first time a thread binds.
pub(super) fn bind_if_unbound(ts: &Arc<ThreadState>) {
    GILSTATE_SLOT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_none() {
            *slot = Some(ts.clone());
        }
    });
}

pub(super) fn unbind() {
    GILSTATE_SLOT.with(|slot| *slot.borrow_mut() = None);
}

/// Acquire the bridge, creating and binding a new thread-state in the
/// designated gilstate interpreter (the main interpreter) if this OS thread
/// doesn't have one yet.
pub fn ensure(main_interpreter: &Arc<Interpreter>) -> Token {
    let ts = GILSTATE_SLOT.with(|slot| {
        let mut slot_ref = slot.borrow_mut();
        if slot_ref.is_none() {
            let created = ThreadState::new(main_interpreter.clone());
            created.bind();
            created.mark_auto_created();
            *slot_ref = Some(created);
        }
        slot_ref.as_ref().unwrap().clone()
    });

    let was_attached = ts.is_attached();
    if !was_attached {
        ts.attach().expect("ensure: attach failed on gilstate thread-state");
    }
    ts.gilstate_counter_incr();
    if was_attached {
        Token::Locked
    } else {
        Token::Unlocked
    }
}

/// Release one level of nesting. At nesting depth 0, a thread-state that was
/// auto-created by `ensure` is cleared and deleted; otherwise, an
/// [`Token::Unlocked`] token detaches the GEL the matching `ensure` acquired.
pub fn release(token: Token) {
    let ts = get_this_thread_state().expect("release called without a matching ensure");
    let remaining = ts.gilstate_counter_decr();
    if remaining == 0 {
        ts.clear();
        if ts.is_auto_created() {
            ts.delete_current();
            unbind();
        } else if matches!(token, Token::Unlocked) {
            ts.detach();
        }
    } else if matches!(token, Token::Unlocked) {
        ts.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::Interpreter;
    use crate::runtime::Runtime;

    fn fresh_main() -> Arc<Interpreter> {
        let rt = Runtime::new_for_test();
        rt.main_interpreter()
    }

    #[test]
    fn ensure_without_prior_state_creates_and_tears_down() {
        let main = fresh_main();
        assert!(!check());
        let token = ensure(&main);
        assert_eq!(token, Token::Unlocked);
        assert!(check());
        release(token);
        assert!(!check());
    }

    #[test]
    fn nested_ensure_release_restores_counter() {
        let main = fresh_main();
        let outer = ensure(&main);
        let ts = get_this_thread_state().unwrap();
        let before = ts.gilstate_counter();
        let inner = ensure(&main);
        assert_eq!(ts.gilstate_counter(), before + 1);
        release(inner);
        assert_eq!(ts.gilstate_counter(), before);
        release(outer);
    }
}
