//! `runtime-core-embed` - a thin embedder around `runtime_core`
//!
//! Brings the process-wide runtime up, creates a thread-state for the
//! calling OS thread, marks it as the interpreter's running-main thread, and
//! tears everything down on exit. Real embedders (an evaluator, a compiler,
//! an import system) sit on top of this; none of that exists here.

use anyhow::Result;
use runtime_core::{init, thread::ThreadState};
use tracing::info;

fn main() -> Result<()> {
    let runtime = init()?;
    let main_interp = runtime.main_interpreter();

    let ts = ThreadState::new(main_interp.clone());
    ts.bind();
    ts.attach()?;
    ts.set_running_main();

    info!(
        interp_id = main_interp.get_id(),
        thread_id = ts.get_id(),
        "runtime-core-embed ready; no evaluator attached, nothing left to run"
    );

    ts.unset_running_main();
    ts.detach();
    ts.clear();
    ts.delete();
    runtime.finalize(&ts);

    Ok(())
}
