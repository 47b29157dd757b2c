//! Thread-state lifecycle
//!
//! Grounded in `Python/pystate.c`'s `PyThreadState` family: `new`, `bind`,
//! `attach`/`detach` (the source's `PyEval_AcquireThread` /
//! `PyEval_ReleaseThread` pair, renamed here to match the GEL terminology
//! this crate uses throughout), `clear`, `delete`, and the critical-section
//! suspend/resume contract around detach/attach.

pub mod framestack;
pub mod gilstate;

use crate::error::RuntimeError;
use crate::gel::AcquireOutcome;
use crate::interp::Interpreter;
use framestack::FrameStack;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Status bits, monotonic except `ACTIVE` (togglable) and `UNBOUND` (set
/// once a previously-bound state is shed).
pub mod status_bits {
    pub const INITIALIZED: u32 = 1 << 0;
    pub const BOUND: u32 = 1 << 1;
    pub const UNBOUND: u32 = 1 << 2;
    pub const BOUND_GILSTATE: u32 = 1 << 3;
    pub const ACTIVE: u32 = 1 << 4;
    pub const FINALIZING: u32 = 1 << 5;
    pub const CLEARED: u32 = 1 << 6;
    pub const FINALIZED: u32 = 1 << 7;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    Detached,
    Attached,
    Suspended,
}

fn encode_attach(s: AttachState) -> u8 {
    match s {
        AttachState::Detached => 0,
        AttachState::Attached => 1,
        AttachState::Suspended => 2,
    }
}

fn decode_attach(bits: u8) -> AttachState {
    match bits {
        0 => AttachState::Detached,
        1 => AttachState::Attached,
        2 => AttachState::Suspended,
        other => unreachable!("invalid AttachState encoding {other}"),
    }
}

/// One frame of the exception-state chain a generator swaps in on resume
/// and restores on yield. Modeled explicitly per DESIGN NOTES even though no
/// generator machinery exists in this crate.
#[derive(Debug, Clone, Default)]
pub struct ExcFrame {
    pub exc_type: Option<String>,
    pub exc_value: Option<String>,
}

/// A fine-grained lock a thread can hold across a detach/attach cycle.
/// Modeled with an explicit locked/unlocked flag and condvar rather than a
/// `MutexGuard` (which cannot outlive the call that acquired it), so that
/// "suspend" and "resume" are first-class operations instead of an artifact
/// of Rust's borrow-scoped guards.
pub struct CriticalSection {
    locked: Mutex<bool>,
    condvar: Condvar,
}

impl CriticalSection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            locked: Mutex::new(false),
            condvar: Condvar::new(),
        })
    }

    pub fn acquire(&self) {
        let mut locked = self.locked.lock().unwrap();
        while *locked {
            locked = self.condvar.wait(locked).unwrap();
        }
        *locked = true;
    }

    pub fn release(&self) {
        let mut locked = self.locked.lock().unwrap();
        *locked = false;
        self.condvar.notify_one();
    }
}

/// Per-OS-thread, per-interpreter execution context.
pub struct ThreadState {
    pub interp: Arc<Interpreter>,
    pub id: u64,
    os_thread_id: AtomicU64,
    native_thread_id: AtomicU64,
    status: std::sync::atomic::AtomicU32,
    attach_state: AtomicU8,
    frame_stack: Mutex<FrameStack>,
    exc_chain: Mutex<Vec<ExcFrame>>,
    held_sections: Mutex<Vec<Arc<CriticalSection>>>,
    suspended_sections: Mutex<Vec<Arc<CriticalSection>>>,
    gilstate_counter: AtomicI64,
    recursion_remaining: AtomicI32,
    c_recursion_remaining: AtomicI32,
    on_delete: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    on_delete_fired: AtomicBool,
    auto_created: AtomicBool,
    dict: Mutex<HashMap<String, serde_json::Value>>,
}

impl ThreadState {
    /// Create a fresh thread-state on `interp`, linking it at the head of
    /// the interpreter's thread list. `DETACHED`, not bound, recursion
    /// budgets seeded from `interp.config`.
    pub fn new(interp: Arc<Interpreter>) -> Arc<Self> {
        let id = interp.allocate_thread_id();
        let (recursion_limit, c_recursion_limit) = interp.config.recursion_limits();
        let ts = Arc::new(Self {
            interp: interp.clone(),
            id,
            os_thread_id: AtomicU64::new(0),
            native_thread_id: AtomicU64::new(0),
            status: std::sync::atomic::AtomicU32::new(status_bits::INITIALIZED),
            attach_state: AtomicU8::new(encode_attach(AttachState::Detached)),
            frame_stack: Mutex::new(FrameStack::new()),
            exc_chain: Mutex::new(Vec::new()),
            held_sections: Mutex::new(Vec::new()),
            suspended_sections: Mutex::new(Vec::new()),
            gilstate_counter: AtomicI64::new(0),
            recursion_remaining: AtomicI32::new(recursion_limit),
            c_recursion_remaining: AtomicI32::new(c_recursion_limit),
            on_delete: Mutex::new(None),
            on_delete_fired: AtomicBool::new(false),
            auto_created: AtomicBool::new(false),
            dict: Mutex::new(HashMap::new()),
        });
        interp.link_thread_state(ts.clone());
        ts
    }

    pub fn get_id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> u32 {
        self.status.load(Ordering::Acquire)
    }

    fn set_status_bit(&self, bit: u32) {
        self.status.fetch_or(bit, Ordering::AcqRel);
    }

    fn clear_status_bit(&self, bit: u32) {
        self.status.fetch_and(!bit, Ordering::AcqRel);
    }

    pub fn attach_state(&self) -> AttachState {
        decode_attach(self.attach_state.load(Ordering::Acquire))
    }

    pub fn is_attached(&self) -> bool {
        self.attach_state() == AttachState::Attached
    }

    /// Record the current OS thread as this state's bound thread. Must run
    /// on the OS thread that will own the state.
    pub fn bind(self: &Arc<Self>) {
        let tid = thread_id_as_u64();
        self.os_thread_id.store(tid, Ordering::Release);
        self.native_thread_id
            .store(native_thread_id(), Ordering::Release);
        self.set_status_bit(status_bits::BOUND);
        if gilstate::get_this_thread_state().is_none() {
            gilstate::bind_if_unbound(self);
            self.set_status_bit(status_bits::BOUND_GILSTATE);
        }
    }

    /// Acquire the owning interpreter's GEL, become `fast_current`, and
    /// resume any critical sections suspended by a prior detach.
    ///
    /// Returns `Err` when the daemon-thread-exit contract applies (the
    /// runtime is finalizing and this is not the finalizing thread) — the
    /// caller must treat this as "terminate this OS thread now", not as a
    /// recoverable failure.
    pub fn attach(self: &Arc<Self>) -> Result<(), RuntimeError> {
        let finalizing = crate::runtime::is_finalizing();
        let is_finalizer = crate::runtime::is_finalizing_thread_state(self);
        match self.interp.gel.acquire(self.id, finalizing, is_finalizer) {
            AcquireOutcome::MustExit => Err(RuntimeError::os(
                "runtime finalizing: thread must exit (daemon-thread contract)",
            )),
            AcquireOutcome::Acquired => {
                crate::runtime::fast_current_set(self.clone());
                self.set_status_bit(status_bits::ACTIVE);
                self.attach_state
                    .store(encode_attach(AttachState::Attached), Ordering::Release);
                self.resume_critical_sections();
                Ok(())
            }
        }
    }

    /// Suspend held critical sections, step down from `fast_current`, and
    /// release the GEL. Suspension completes before release so the next
    /// attacher observes a consistent stack.
    pub fn detach(self: &Arc<Self>) {
        self.suspend_critical_sections();
        self.clear_status_bit(status_bits::ACTIVE);
        crate::runtime::fast_current_clear();
        self.attach_state
            .store(encode_attach(AttachState::Detached), Ordering::Release);
        self.interp.gel.release(self.id);
    }

    fn suspend_critical_sections(&self) {
        let mut held = self.held_sections.lock().unwrap();
        let order: Vec<_> = held.drain(..).rev().collect(); // innermost first
        drop(held);
        for cs in &order {
            cs.release();
        }
        *self.suspended_sections.lock().unwrap() = order;
    }

    fn resume_critical_sections(&self) {
        let order = std::mem::take(&mut *self.suspended_sections.lock().unwrap());
        for cs in &order {
            cs.acquire();
        }
        *self.held_sections.lock().unwrap() = order.into_iter().rev().collect();
    }

    pub fn acquire_critical_section(&self, cs: Arc<CriticalSection>) {
        cs.acquire();
        self.held_sections.lock().unwrap().push(cs);
    }

    pub fn release_critical_section(&self) {
        if let Some(cs) = self.held_sections.lock().unwrap().pop() {
            cs.release();
        }
    }

    /// Release Python-visible references and fire `on_delete` if it hasn't
    /// already run. Does not unlink from the interpreter's thread list.
    pub fn clear(&self) {
        self.exc_chain.lock().unwrap().clear();
        self.dict.lock().unwrap().clear();
        self.set_status_bit(status_bits::CLEARED);
        self.fire_on_delete();
    }

    /// Precondition: cleared, not active, not attached. Unlinks from the
    /// interpreter's thread list and unbinds the gilstate slot if this
    /// state owned it.
    pub fn delete(self: &Arc<Self>) {
        assert!(
            self.status() & status_bits::CLEARED != 0,
            "delete: thread-state was never cleared"
        );
        assert!(!self.is_attached(), "delete: thread-state still attached");
        self.interp.unlink_thread_state(self.id);
        if self.status() & status_bits::BOUND_GILSTATE != 0 {
            gilstate::unbind();
        }
        self.set_status_bit(status_bits::FINALIZED);
    }

    /// Combined detach + delete, used by `Release`.
    pub fn delete_current(self: &Arc<Self>) {
        if self.is_attached() {
            self.detach();
        }
        self.delete();
    }

    pub fn set_running_main(self: &Arc<Self>) {
        self.interp.set_running_main(self.clone());
    }

    pub fn unset_running_main(self: &Arc<Self>) {
        let fired = self.interp.unset_running_main(self.id);
        if fired {
            self.fire_on_delete();
        }
    }

    fn fire_on_delete(&self) {
        if self
            .on_delete_fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if let Some(cb) = self.on_delete.lock().unwrap().take() {
                cb();
            }
        }
    }

    pub fn set_on_delete(&self, cb: impl FnOnce() + Send + 'static) {
        *self.on_delete.lock().unwrap() = Some(Box::new(cb));
    }

    pub fn set_async_exc(&self, exc_type: impl Into<String>) {
        self.exc_chain.lock().unwrap().push(ExcFrame {
            exc_type: Some(exc_type.into()),
            exc_value: None,
        });
        self.interp
            .gel
            .set_eval_breaker_bits(crate::gel::eval_breaker_bits::ASYNC_EXCEPTION);
    }

    pub fn push_exc_frame(&self, frame: ExcFrame) {
        self.exc_chain.lock().unwrap().push(frame);
    }

    pub fn pop_exc_frame(&self) -> Option<ExcFrame> {
        self.exc_chain.lock().unwrap().pop()
    }

    pub fn exc_depth(&self) -> usize {
        self.exc_chain.lock().unwrap().len()
    }

    pub fn get_dict(&self) -> HashMap<String, serde_json::Value> {
        self.dict.lock().unwrap().clone()
    }

    pub fn dict_insert(&self, key: impl Into<String>, value: serde_json::Value) {
        self.dict.lock().unwrap().insert(key.into(), value);
    }

    pub fn push_frame(&self, size: usize) -> framestack::FrameHandle {
        self.frame_stack.lock().unwrap().push_frame(size)
    }

    pub fn pop_frame(&self, handle: framestack::FrameHandle) {
        self.frame_stack.lock().unwrap().pop_frame(handle)
    }

    pub fn frame_chunk_count(&self) -> usize {
        self.frame_stack.lock().unwrap().chunk_count()
    }

    pub fn gilstate_counter(&self) -> i64 {
        self.gilstate_counter.load(Ordering::Acquire)
    }

    pub(crate) fn gilstate_counter_incr(&self) -> i64 {
        self.gilstate_counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn gilstate_counter_decr(&self) -> i64 {
        self.gilstate_counter.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub(crate) fn mark_auto_created(&self) {
        self.auto_created.store(true, Ordering::Release);
    }

    pub(crate) fn is_auto_created(&self) -> bool {
        self.auto_created.load(Ordering::Acquire)
    }

    pub fn recursion_remaining(&self) -> i32 {
        self.recursion_remaining.load(Ordering::Acquire)
    }

    pub fn c_recursion_remaining(&self) -> i32 {
        self.c_recursion_remaining.load(Ordering::Acquire)
    }
}

/// Swap `new` in as `fast_current`, detaching whatever was previously
/// attached on this OS thread. Returns the thread-state that was displaced,
/// if any.
pub fn swap(new: &Arc<ThreadState>) -> Option<Arc<ThreadState>> {
    let old = crate::runtime::fast_current_get();
    if let Some(old_ts) = &old {
        old_ts.detach();
    }
    new.attach().expect("swap: attach failed");
    old
}

pub fn get_current() -> Option<Arc<ThreadState>> {
    crate::runtime::fast_current_get()
}

/// Mirrors `PyThreadState_GetUnchecked`: assumes a thread-state is attached
/// and panics (a fatal error, by this crate's conventions) if not.
pub fn get_current_unchecked() -> Arc<ThreadState> {
    get_current().unwrap_or_else(|| crate::error::fatal("get_current_unchecked", "no attached thread-state"))
}

fn thread_id_as_u64() -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}

fn native_thread_id() -> u64 {
    unsafe { libc::pthread_self() as u64 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;

    #[test]
    fn new_thread_state_is_detached_and_initialized() {
        let rt = Runtime::new_for_test();
        let main = rt.main_interpreter();
        let ts = ThreadState::new(main);
        assert_eq!(ts.attach_state(), AttachState::Detached);
        assert_ne!(ts.status() & status_bits::INITIALIZED, 0);
    }

    #[test]
    fn attach_detach_round_trip() {
        let rt = Runtime::new_for_test();
        let main = rt.main_interpreter();
        let ts = ThreadState::new(main);
        ts.bind();
        ts.attach().unwrap();
        assert!(ts.is_attached());
        assert!(get_current().is_some());
        ts.detach();
        assert!(!ts.is_attached());
        assert!(get_current().is_none());
    }

    #[test]
    fn on_delete_fires_exactly_once() {
        let rt = Runtime::new_for_test();
        let main = rt.main_interpreter();
        let ts = ThreadState::new(main);
        let count = Arc::new(AtomicI64::new(0));
        let count2 = count.clone();
        ts.set_on_delete(move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        ts.clear();
        ts.unset_running_main(); // would also try to fire, must be deduped
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn critical_sections_resume_in_original_order() {
        let rt = Runtime::new_for_test();
        let main = rt.main_interpreter();
        let ts = ThreadState::new(main);
        ts.bind();
        ts.attach().unwrap();
        let cs1 = CriticalSection::new();
        let cs2 = CriticalSection::new();
        ts.acquire_critical_section(cs1);
        ts.acquire_critical_section(cs2);
        ts.detach();
        assert!(ts.suspended_sections.lock().unwrap().len() == 2);
        ts.attach().unwrap();
        assert!(ts.held_sections.lock().unwrap().len() == 2);
        ts.detach();
    }

    #[test]
    fn exception_frame_chain_pushes_and_pops() {
        let rt = Runtime::new_for_test();
        let main = rt.main_interpreter();
        let ts = ThreadState::new(main);
        assert_eq!(ts.exc_depth(), 0);
        ts.push_exc_frame(ExcFrame {
            exc_type: Some("ValueError".into()),
            exc_value: None,
        });
        assert_eq!(ts.exc_depth(), 1);
        let popped = ts.pop_exc_frame().unwrap();
        assert_eq!(popped.exc_type.as_deref(), Some("ValueError"));
        assert_eq!(ts.exc_depth(), 0);
    }
}
