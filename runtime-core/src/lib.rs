//! Runtime Core - process-wide interpreter runtime substrate
//!
//! Provides the pieces a language runtime embeds beneath its evaluator and
//! compiler: a process-wide [`runtime`] singleton, per-process
//! [`interp`]reters, per-interpreter [`thread`]-states, a cooperative
//! [`gel`] (Global Execution Lock), a generational [`gc`] cycle collector,
//! a 256-entry [`opcode`] metadata table, and the [`time`]/[`random`]/
//! [`preconfig`] utilities an embedder initializes before any of the above.
//!
//! # Performance-First Design Patterns
//! - Lock-free hot paths where possible (`fast_current`, the eval-breaker
//!   bitset, GC header state)
//! - A single GEL per interpreter, not a process-wide one — independent
//!   interpreters never contend with each other
//! - Reference-count differencing for cycle collection, avoiding a
//!   stop-the-world trace of the whole heap

pub mod error;
pub mod gc;
pub mod gel;
pub mod interp;
pub mod opcode;
pub mod preconfig;
pub mod random;
pub mod runtime;
pub mod thread;
pub mod time;

pub use error::RuntimeError;
pub use gc::{GcObject, GcState};
pub use gel::Gel;
pub use interp::{Config, Interpreter};
pub use preconfig::PreConfig;
pub use runtime::Runtime;
pub use thread::ThreadState;

use anyhow::{Context, Result};
use tracing::info;

/// Initialize logging, then the process-wide runtime, from the real process
/// environment. Analogous to `Py_InitializeFromConfig` preceded by a
/// `tracing_subscriber::fmt().init()` call.
pub fn init() -> Result<&'static Runtime> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    info!("initializing runtime-core v{}", env!("CARGO_PKG_VERSION"));
    let preconfig = PreConfig::from_env().context("reading pre-configuration from environment")?;
    let runtime = Runtime::initialize(preconfig).context("runtime initialization failed")?;
    info!(interpreters = runtime.interpreter_count(), "runtime ready");
    Ok(runtime)
}
