//! Interpreter lifecycle
//!
//! Grounded in `Python/pystate.c`'s `PyInterpreterState` family: `Create`,
//! `Clear`, `Delete`, the running-main marker, and ID refcounting. A
//! subinterpreter's module registry (`modules`), globals (`dict`,
//! `sysdict`), and `builtins` are opaque `Arc<Mutex<HashMap<...>>>` slots —
//! this crate only manages their lifetime, since it carries no object model
//! or import machinery (out of scope).

pub mod config;

pub use config::Config;

use crate::gc::GcState;
use crate::gel::Gel;
use crate::thread::ThreadState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// One Python-style interpreter: its own GEL, GC generations, module
/// registry, and thread list.
pub struct Interpreter {
    pub id: i64,
    pub gel: Gel,
    pub gc: GcState,
    pub config: Config,
    threads: Mutex<Vec<Arc<ThreadState>>>,
    next_unique_id: AtomicU64,
    running_main: Mutex<Option<u64>>,
    id_refcount: AtomicI64,
    requires_idref: AtomicBool,
    dict: Mutex<HashMap<String, serde_json::Value>>,
    sysdict: Mutex<HashMap<String, serde_json::Value>>,
    builtins: Mutex<HashMap<String, serde_json::Value>>,
    modules: Mutex<HashMap<String, serde_json::Value>>,
    codec_registry: Mutex<HashMap<String, serde_json::Value>>,
}

impl Interpreter {
    pub(crate) fn new(id: i64, config: Config) -> Arc<Self> {
        Arc::new(Self {
            id,
            gel: Gel::new(),
            gc: GcState::new(),
            config,
            threads: Mutex::new(Vec::new()),
            next_unique_id: AtomicU64::new(1),
            running_main: Mutex::new(None),
            id_refcount: AtomicI64::new(0),
            requires_idref: AtomicBool::new(false),
            dict: Mutex::new(HashMap::new()),
            sysdict: Mutex::new(HashMap::new()),
            builtins: Mutex::new(HashMap::new()),
            modules: Mutex::new(HashMap::new()),
            codec_registry: Mutex::new(HashMap::new()),
        })
    }

    pub fn get_id(&self) -> i64 {
        self.id
    }

    pub(crate) fn allocate_thread_id(&self) -> u64 {
        self.next_unique_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn link_thread_state(&self, ts: Arc<ThreadState>) {
        self.threads.lock().unwrap().push(ts);
    }

    pub(crate) fn unlink_thread_state(&self, id: u64) {
        self.threads.lock().unwrap().retain(|t| t.id != id);
    }

    pub fn thread_count(&self) -> usize {
        self.threads.lock().unwrap().len()
    }

    pub fn threads_snapshot(&self) -> Vec<Arc<ThreadState>> {
        self.threads.lock().unwrap().clone()
    }

    pub fn get_dict(&self) -> HashMap<String, serde_json::Value> {
        self.dict.lock().unwrap().clone()
    }

    pub fn dict_insert(&self, key: impl Into<String>, value: serde_json::Value) {
        self.dict.lock().unwrap().insert(key.into(), value);
    }

    pub fn module_insert(&self, name: impl Into<String>, value: serde_json::Value) {
        self.modules.lock().unwrap().insert(name.into(), value);
    }

    /// Per-interpreter module registry lookup — the mechanism that makes
    /// subinterpreter isolation observable: a module defined in one
    /// interpreter's registry is simply absent from another's.
    pub fn module_get(&self, name: &str) -> Option<serde_json::Value> {
        self.modules.lock().unwrap().get(name).cloned()
    }

    /// `set_running_main`: asserts no other thread has claimed the role and
    /// records `ts` as `threads.main`.
    pub fn set_running_main(&self, ts: Arc<ThreadState>) {
        let mut slot = self.running_main.lock().unwrap();
        assert!(
            slot.is_none(),
            "set_running_main: another thread is already running main"
        );
        *slot = Some(ts.id);
    }

    /// Clears the running-main marker. Returns whether it was actually set
    /// (the caller uses this to decide whether to fire `on_delete`).
    pub fn unset_running_main(&self, ts_id: u64) -> bool {
        let mut slot = self.running_main.lock().unwrap();
        if *slot == Some(ts_id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn is_running_main(&self, ts_id: u64) -> bool {
        *self.running_main.lock().unwrap() == Some(ts_id)
    }

    pub fn fail_if_running_main(&self) -> Result<(), crate::error::RuntimeError> {
        if self.running_main.lock().unwrap().is_some() {
            Err(crate::error::RuntimeError::user(
                "interpreter is already running its program",
            ))
        } else {
            Ok(())
        }
    }

    pub fn set_requires_idref(&self, requires: bool) {
        self.requires_idref.store(requires, Ordering::Relaxed);
    }

    /// Increment the interpreter-ID external refcount. Used by embedders
    /// holding a weak handle to a subinterpreter across FFI boundaries.
    pub fn increment_id_refcount(&self) -> i64 {
        self.id_refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the refcount; if it reaches zero and `requires_idref` was
    /// set, the caller is responsible for invoking `end_interpreter`
    /// (Clear + Delete) — this method only reports whether that's now due,
    /// since the swap-in/swap-out dance needs a live thread-state the
    /// registry doesn't own.
    pub fn decrement_id_refcount(&self) -> bool {
        let remaining = self.id_refcount.fetch_sub(1, Ordering::AcqRel) - 1;
        remaining == 0 && self.requires_idref.load(Ordering::Acquire)
    }

    /// `Clear`: runs an audit hook, clears every thread-state's Python-visible
    /// resources, clears module/codec/builtin registries (sys/builtins
    /// last, since earlier teardown may still consult them), and performs a
    /// final non-failing cycle collection.
    pub fn clear(&self, audit: &crate::runtime::audit::AuditChain) {
        audit.fire("interp.clear", &self.id.to_string());
        for ts in self.threads_snapshot() {
            ts.clear();
        }
        self.modules.lock().unwrap().clear();
        self.codec_registry.lock().unwrap().clear();
        self.dict.lock().unwrap().clear();
        // sys/builtins last: earlier teardown may run code that still
        // consults them.
        self.sysdict.lock().unwrap().clear();
        self.builtins.lock().unwrap().clear();
        self.gc.collect(2);
        tracing::info!(interp_id = self.id, "interpreter cleared");
    }

    /// `Delete`: reaps already-cleared thread-states and drops this
    /// interpreter's storage. The caller (the registry in `runtime::mod`)
    /// is responsible for unlinking `self` from the sibling chain; this
    /// method only tears down interpreter-local state.
    pub fn delete(&self) {
        self.threads.lock().unwrap().clear();
        tracing::info!(interp_id = self.id, "interpreter deleted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::audit::AuditChain;
    use crate::runtime::Runtime;

    #[test]
    fn running_main_is_exclusive() {
        let rt = Runtime::new_for_test();
        let interp = rt.main_interpreter();
        let ts = ThreadState::new(interp.clone());
        ts.set_running_main();
        assert!(interp.is_running_main(ts.id));
        ts.unset_running_main();
        assert!(!interp.is_running_main(ts.id));
    }

    #[test]
    #[should_panic(expected = "already running main")]
    fn double_set_running_main_panics() {
        let rt = Runtime::new_for_test();
        let interp = rt.main_interpreter();
        let a = ThreadState::new(interp.clone());
        let b = ThreadState::new(interp.clone());
        a.set_running_main();
        b.set_running_main();
    }

    #[test]
    fn module_registry_is_per_interpreter() {
        let rt = Runtime::new_for_test();
        let main = rt.main_interpreter();
        let sub = Interpreter::new(1, Config::default());
        sub.module_insert("m", serde_json::json!({"k": 42}));
        assert!(sub.module_get("m").is_some());
        assert!(main.module_get("m").is_none());
    }

    #[test]
    fn id_refcount_reaches_zero() {
        let interp = Interpreter::new(7, Config::default());
        interp.set_requires_idref(true);
        interp.increment_id_refcount();
        interp.increment_id_refcount();
        assert!(!interp.decrement_id_refcount());
        assert!(interp.decrement_id_refcount());
    }

    #[test]
    fn clear_empties_registries_and_collects() {
        let rt = Runtime::new_for_test();
        let interp = rt.main_interpreter();
        interp.module_insert("m", serde_json::json!(1));
        let audit = AuditChain::new();
        interp.clear(&audit);
        assert!(interp.module_get("m").is_none());
    }
}
