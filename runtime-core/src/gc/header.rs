//! Per-object GC header and the `GcObject` capability trait
//!
//! Grounded in `Modules/gcmodule.c`'s `PyGC_Head` (`_gc_prev`/`_gc_next` plus
//! the refcount-differencing bits packed into the low bits of `_gc_prev`) and
//! the DESIGN NOTES guidance to model virtual traverse/clear/finalize
//! dispatch as an explicit capability trait rather than reach for dynamic
//! typing. `prev`/`next` are not reproduced as raw pointers: generation
//! membership is tracked by the owning `Vec` slot instead (see
//! `gc::Generation`), so `GcHeader` carries only the state this crate's
//! algorithm actually mutates — `gc_refs` and the tri-state tracking flag.

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;

/// Where an object sits relative to the collector's current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Not linked into any generation; refcount alone governs its lifetime.
    Untracked,
    /// Linked into a generation, not currently under suspicion.
    Reachable,
    /// Provisionally moved to the `unreachable` list during a collection
    /// pass; may still be pulled back into `Reachable` if a reachable
    /// object turns out to reference it.
    TentativelyUnreachable,
}

fn encode(state: TrackState) -> u8 {
    match state {
        TrackState::Untracked => 0,
        TrackState::Reachable => 1,
        TrackState::TentativelyUnreachable => 2,
    }
}

fn decode(bits: u8) -> TrackState {
    match bits {
        0 => TrackState::Untracked,
        1 => TrackState::Reachable,
        2 => TrackState::TentativelyUnreachable,
        other => unreachable!("invalid TrackState encoding {other}"),
    }
}

/// Three-word-equivalent GC header embedded in every tracked object.
///
/// `gc_refs` is scratch space: `UNTRACKED` objects carry a meaningless
/// value, and the field is otherwise only valid during a collection pass
/// (the collector writes it at `update_refs`, reads and rewrites it through
/// `subtract_refs`/`move_unreachable`, and leaves `Reachable` objects with no
/// promised value between collections).
pub struct GcHeader {
    gc_refs: AtomicI64,
    state: AtomicU8,
}

impl GcHeader {
    pub fn new() -> Self {
        Self {
            gc_refs: AtomicI64::new(0),
            state: AtomicU8::new(encode(TrackState::Untracked)),
        }
    }

    pub fn state(&self) -> TrackState {
        decode(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: TrackState) {
        self.state.store(encode(state), Ordering::Release);
    }

    pub fn gc_refs(&self) -> i64 {
        self.gc_refs.load(Ordering::Acquire)
    }

    pub fn set_gc_refs(&self, value: i64) {
        self.gc_refs.store(value, Ordering::Release);
    }

    /// Decrement `gc_refs` by one if it is currently positive; returns the
    /// new value. Mirrors `gc_decref`, which never drives the counter below
    /// zero even under a malformed traverse callback.
    pub fn dec_gc_refs(&self) -> i64 {
        let mut cur = self.gc_refs.load(Ordering::Acquire);
        loop {
            if cur <= 0 {
                return cur;
            }
            match self.gc_refs.compare_exchange_weak(
                cur,
                cur - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return cur - 1,
                Err(observed) => cur = observed,
            }
        }
    }
}

impl Default for GcHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability set the collector needs from a tracked container object.
/// Corresponds to a type's `tp_traverse`/`tp_clear`/`tp_finalize` slots,
/// generalized to the trait-object dispatch DESIGN NOTES calls for.
pub trait GcObject: Send + Sync {
    /// This object's GC header. Never changes identity across the object's
    /// lifetime (no header replacement).
    fn header(&self) -> &GcHeader;

    /// Call `visitor` once per child reference this object currently holds.
    /// Must enumerate every strong reference that could form part of a
    /// cycle; omitting one makes that cycle uncollectable, not merely slow.
    fn visit_children(&self, visitor: &mut dyn FnMut(&Arc<dyn GcObject>));

    /// Drop this object's internal references, breaking any cycle it
    /// participates in. Idempotent: called at most once per collection, but
    /// implementations should tolerate repeat calls defensively.
    fn clear(&self);

    /// Whether this object declares a finalizer, which exempts it (and
    /// everything reachable from it) from automatic reclamation.
    fn has_finalizer(&self) -> bool {
        false
    }
}
