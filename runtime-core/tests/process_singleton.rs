//! Exercises the real process-wide `Runtime::initialize`/`finalize` pair.
//!
//! Kept in its own binary (a fresh process per `cargo test` integration
//! test file) since it mutates genuinely global state (the singleton slot,
//! the finalizing-thread marker) that would otherwise leak into sibling
//! tests sharing this process.

use runtime_core::runtime::Runtime;
use runtime_core::thread::ThreadState;
use runtime_core::PreConfig;

#[test]
fn initialize_populates_the_singleton_and_finalize_tears_it_down() {
    let runtime = Runtime::initialize(PreConfig::default()).expect("first initialize succeeds");
    assert_eq!(runtime.interpreter_count(), 1);
    assert_eq!(runtime.main_interpreter().get_id(), 0);

    // Re-entrant initialize without an intervening finalize is rejected.
    assert!(Runtime::initialize(PreConfig::default()).is_err());

    let ts = ThreadState::new(runtime.main_interpreter());
    runtime.finalize(&ts);
    assert_eq!(runtime.interpreter_count(), 0);
    assert!(Runtime::global().is_none());

    // `initialize ∘ finalize ∘ initialize`: the slot was cleared, so a
    // fresh initialize must succeed and install a new main interpreter
    // rather than staying rejected forever.
    let runtime2 = Runtime::initialize(PreConfig::default()).expect("re-initialize succeeds");
    assert_eq!(runtime2.interpreter_count(), 1);
    assert_eq!(runtime2.main_interpreter().get_id(), 0);
    assert!(std::ptr::eq(runtime2, Runtime::global().unwrap()));

    let ts2 = ThreadState::new(runtime2.main_interpreter());
    runtime2.finalize(&ts2);
}
