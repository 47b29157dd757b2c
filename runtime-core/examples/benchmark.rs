//! Runtime substrate micro-benchmarks
//!
//! Kept in the spirit of the teacher's own `examples/benchmark.rs`: timing
//! the hot paths this crate actually has, rather than container startup.
//! Run with `cargo run --release --example benchmark`.

use runtime_core::runtime::Runtime;
use runtime_core::thread::ThreadState;
use std::time::Instant;

fn main() -> anyhow::Result<()> {
    println!("runtime-core benchmark suite\n");

    bench_thread_state_lifecycle();
    bench_gel_uncontended_acquire();
    bench_cycle_collection();
    bench_ensure_release();

    Ok(())
}

fn bench_thread_state_lifecycle() {
    const ITERATIONS: usize = 10_000;
    let rt = Runtime::new_for_test();
    let main = rt.main_interpreter();

    let start = Instant::now();
    for _ in 0..ITERATIONS {
        let ts = ThreadState::new(main.clone());
        ts.bind();
        ts.attach().unwrap();
        ts.detach();
        ts.clear();
        ts.delete();
    }
    let elapsed = start.elapsed();

    println!(
        "thread-state create/bind/attach/detach/clear/delete: {:.3} us/iter ({} iters in {:.2?})",
        elapsed.as_micros() as f64 / ITERATIONS as f64,
        ITERATIONS,
        elapsed
    );
}

fn bench_gel_uncontended_acquire() {
    const ITERATIONS: usize = 100_000;
    let rt = Runtime::new_for_test();
    let main = rt.main_interpreter();

    let start = Instant::now();
    for i in 0..ITERATIONS {
        main.gel.acquire(i as u64, false, false);
        main.gel.release(i as u64);
    }
    let elapsed = start.elapsed();

    println!(
        "GEL uncontended acquire/release: {:.3} us/iter ({} iters in {:.2?})",
        elapsed.as_micros() as f64 / ITERATIONS as f64,
        ITERATIONS,
        elapsed
    );
}

fn bench_cycle_collection() {
    use runtime_core::gc::{GcHeader, GcObject};
    use std::sync::{Arc, Mutex};

    struct Node {
        header: GcHeader,
        link: Mutex<Option<Arc<dyn GcObject>>>,
    }

    impl GcObject for Node {
        fn header(&self) -> &GcHeader {
            &self.header
        }
        fn visit_children(&self, visitor: &mut dyn FnMut(&Arc<dyn GcObject>)) {
            if let Some(child) = self.link.lock().unwrap().as_ref() {
                visitor(child);
            }
        }
        fn clear(&self) {
            *self.link.lock().unwrap() = None;
        }
    }

    const CYCLES: usize = 2_000;
    let rt = Runtime::new_for_test();
    let interp = rt.main_interpreter();
    interp.gc.disable(); // measure collect() itself, not the auto-trigger

    for _ in 0..CYCLES {
        let a: Arc<Node> = Arc::new(Node {
            header: GcHeader::new(),
            link: Mutex::new(None),
        });
        let b: Arc<Node> = Arc::new(Node {
            header: GcHeader::new(),
            link: Mutex::new(None),
        });
        let a_dyn: Arc<dyn GcObject> = a.clone();
        let b_dyn: Arc<dyn GcObject> = b.clone();
        *a.link.lock().unwrap() = Some(b_dyn.clone());
        *b.link.lock().unwrap() = Some(a_dyn.clone());
        interp.gc.track(a_dyn);
        interp.gc.track(b_dyn);
    }

    let start = Instant::now();
    let reclaimed = interp.gc.collect(0);
    let elapsed = start.elapsed();

    println!(
        "cycle collection: reclaimed {} objects from {} cycles in {:.2?}",
        reclaimed,
        CYCLES,
        elapsed
    );
}

fn bench_ensure_release() {
    use runtime_core::thread::gilstate;

    const ITERATIONS: usize = 50_000;
    let rt = Runtime::new_for_test();
    let main = rt.main_interpreter();

    let start = Instant::now();
    for _ in 0..ITERATIONS {
        let token = gilstate::ensure(&main);
        gilstate::release(token);
    }
    let elapsed = start.elapsed();

    println!(
        "ensure/release round trip: {:.3} us/iter ({} iters in {:.2?})",
        elapsed.as_micros() as f64 / ITERATIONS as f64,
        ITERATIONS,
        elapsed
    );
}
