//! Global Execution Lock (GEL)
//!
//! A cooperative, per-interpreter binary lock plus an eval-breaker bitset,
//! grounded in `Python/pystate.c` / `Python/ceval_gil.c`'s GIL machinery:
//! uncontended fast-path acquire, a condition variable for contended waiters,
//! and a `switch_interval`-based forced yield so no single thread can starve
//! the others. Distinct interpreters own distinct `Gel` instances and never
//! block on one another.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Named bits of the eval-breaker word. The evaluator (out of scope) would
/// poll this between bytecodes; this crate only maintains the bitset and the
/// forced-yield mechanics that set/clear it.
pub mod eval_breaker_bits {
    pub const PENDING_SIGNALS: u32 = 1 << 0;
    pub const PENDING_CALLS: u32 = 1 << 1;
    pub const ASYNC_EXCEPTION: u32 = 1 << 2;
    pub const GC_REQUESTED: u32 = 1 << 3;
    pub const PROFILING_CHANGED: u32 = 1 << 4;
    pub const DROP_REQUESTED: u32 = 1 << 5;
}

/// Default switch interval, matching CPython's `sys.setswitchinterval()`
/// default of 5 ms.
pub const DEFAULT_SWITCH_INTERVAL: Duration = Duration::from_millis(5);

struct GelInner {
    /// `Some(holder id)` while a thread holds the lock.
    holder: Option<u64>,
    /// Count of threads currently parked waiting for the lock, used to
    /// decide whether a forced-yield timer is worth arming.
    waiters: u32,
}

/// One interpreter's execution lock.
pub struct Gel {
    inner: Mutex<GelInner>,
    condvar: Condvar,
    eval_breaker: AtomicU32,
    switch_interval: Mutex<Duration>,
    /// Monotonic nanosecond timestamp of the last time the lock changed
    /// hands, used to decide whether a waiter has been parked long enough
    /// to request the holder drop the lock.
    last_switch_ns: AtomicU64,
}

/// Outcome of a blocking `acquire` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Acquired uncontended or after waiting normally.
    Acquired,
    /// The runtime is finalizing and this thread is not the finalizing
    /// thread: the daemon-thread-exit contract applies. The caller must
    /// terminate the OS thread rather than proceed.
    MustExit,
}

impl Gel {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GelInner {
                holder: None,
                waiters: 0,
            }),
            condvar: Condvar::new(),
            eval_breaker: AtomicU32::new(0),
            switch_interval: Mutex::new(DEFAULT_SWITCH_INTERVAL),
            last_switch_ns: AtomicU64::new(0),
        }
    }

    pub fn set_switch_interval(&self, interval: Duration) {
        *self.switch_interval.lock().unwrap() = interval;
    }

    pub fn switch_interval(&self) -> Duration {
        *self.switch_interval.lock().unwrap()
    }

    /// Set one or more eval-breaker bits. Atomic OR, as the spec requires.
    pub fn set_eval_breaker_bits(&self, bits: u32) {
        self.eval_breaker.fetch_or(bits, Ordering::AcqRel);
    }

    /// Clear one or more eval-breaker bits.
    pub fn clear_eval_breaker_bits(&self, bits: u32) {
        self.eval_breaker.fetch_and(!bits, Ordering::AcqRel);
    }

    pub fn eval_breaker(&self) -> u32 {
        self.eval_breaker.load(Ordering::Acquire)
    }

    /// Attempt to acquire the lock for `holder_id`, blocking on contention.
    /// `is_finalizing_thread` and `runtime_finalizing` implement the
    /// daemon-thread-exit rule: a non-finalizing thread observing
    /// finalization never acquires again.
    pub fn acquire(&self, holder_id: u64, runtime_finalizing: bool, is_finalizing_thread: bool) -> AcquireOutcome {
        if runtime_finalizing && !is_finalizing_thread {
            return AcquireOutcome::MustExit;
        }
        let mut guard = self.inner.lock().unwrap();
        if guard.holder.is_none() {
            guard.holder = Some(holder_id);
            self.stamp_switch();
            return AcquireOutcome::Acquired;
        }
        guard.waiters += 1;
        loop {
            // Bounded wait rather than a bare `wait`: the only way this
            // waiter learns the switch interval has elapsed is by waking up
            // and checking, and a release that never comes (a long-running
            // holder that never hits a bytecode boundary on its own) would
            // otherwise never deliver that wakeup at all.
            let (g, _timeout_result) = self
                .condvar
                .wait_timeout(guard, self.switch_interval())
                .unwrap();
            guard = g;
            if runtime_finalizing && !is_finalizing_thread {
                guard.waiters -= 1;
                return AcquireOutcome::MustExit;
            }
            if guard.holder.is_none() {
                guard.holder = Some(holder_id);
                guard.waiters -= 1;
                self.stamp_switch();
                return AcquireOutcome::Acquired;
            }
            // Still contended: either a spurious/timeout wakeup, or the
            // lock was claimed by a third party first. If we've waited past
            // the switch interval, request the holder drop it at its next
            // bytecode boundary.
            if self.waited_past_switch_interval() {
                self.set_eval_breaker_bits(eval_breaker_bits::DROP_REQUESTED);
            }
        }
    }

    /// Release the lock. Non-blocking: clears the holder and wakes one
    /// waiter.
    pub fn release(&self, holder_id: u64) {
        let mut guard = self.inner.lock().unwrap();
        debug_assert_eq!(guard.holder, Some(holder_id), "release by non-holder");
        guard.holder = None;
        self.condvar.notify_one();
    }

    /// Forcibly clear the holder and waiter count without the
    /// release-by-holder assertion. Used only by `after_fork_child`: the
    /// parent's holder (if any) is a thread that does not exist in the
    /// child, so there is no legitimate "releaser" to name.
    pub fn force_reset(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.holder = None;
        guard.waiters = 0;
    }

    pub fn is_held(&self) -> bool {
        self.inner.lock().unwrap().holder.is_some()
    }

    pub fn waiter_count(&self) -> u32 {
        self.inner.lock().unwrap().waiters
    }

    fn stamp_switch(&self) {
        self.last_switch_ns
            .store(crate::time::monotonic_now() as u64, Ordering::Release);
    }

    fn waited_past_switch_interval(&self) -> bool {
        let last = self.last_switch_ns.load(Ordering::Acquire) as i64;
        let now = crate::time::monotonic_now();
        let elapsed = Duration::from_nanos((now - last).max(0) as u64);
        elapsed >= self.switch_interval()
    }
}

impl Default for Gel {
    fn default() -> Self {
        Self::new()
    }
}

/// Park the calling thread briefly and re-check the eval breaker — a
/// stand-in for the per-bytecode check an evaluator would perform. Tests
/// drive forced-yield scenarios by calling this in a tight loop.
pub fn poll_eval_breaker_once(gel: &Gel) -> bool {
    let bits = gel.eval_breaker();
    if bits & eval_breaker_bits::DROP_REQUESTED != 0 {
        gel.clear_eval_breaker_bits(eval_breaker_bits::DROP_REQUESTED);
        return true;
    }
    false
}

/// Busy-wait helper used only by tests: spins until `deadline` or until the
/// drop-requested bit appears.
pub fn spin_until(deadline: Instant, gel: &Gel) -> bool {
    while Instant::now() < deadline {
        if poll_eval_breaker_once(gel) {
            return true;
        }
        std::thread::yield_now();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncontended_acquire_and_release() {
        let gel = Gel::new();
        assert_eq!(gel.acquire(1, false, false), AcquireOutcome::Acquired);
        assert!(gel.is_held());
        gel.release(1);
        assert!(!gel.is_held());
    }

    #[test]
    fn finalizing_non_finalizing_thread_must_exit() {
        let gel = Gel::new();
        assert_eq!(gel.acquire(1, true, false), AcquireOutcome::MustExit);
    }

    #[test]
    fn finalizing_thread_itself_may_still_acquire() {
        let gel = Gel::new();
        assert_eq!(gel.acquire(1, true, true), AcquireOutcome::Acquired);
    }

    #[test]
    fn eval_breaker_bits_are_independent() {
        let gel = Gel::new();
        gel.set_eval_breaker_bits(eval_breaker_bits::PENDING_SIGNALS);
        gel.set_eval_breaker_bits(eval_breaker_bits::GC_REQUESTED);
        assert_eq!(
            gel.eval_breaker(),
            eval_breaker_bits::PENDING_SIGNALS | eval_breaker_bits::GC_REQUESTED
        );
        gel.clear_eval_breaker_bits(eval_breaker_bits::PENDING_SIGNALS);
        assert_eq!(gel.eval_breaker(), eval_breaker_bits::GC_REQUESTED);
    }

    #[test]
    fn contended_waiter_eventually_acquires() {
        use std::sync::Arc;
        let gel = Arc::new(Gel::new());
        assert_eq!(gel.acquire(1, false, false), AcquireOutcome::Acquired);

        let gel2 = gel.clone();
        let handle = std::thread::spawn(move || {
            assert_eq!(gel2.acquire(2, false, false), AcquireOutcome::Acquired);
            gel2.release(2);
        });

        std::thread::sleep(Duration::from_millis(10));
        gel.release(1);
        handle.join().unwrap();
    }
}
