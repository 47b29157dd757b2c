//! Chunked, downward-growing frame stack
//!
//! Grounded in `Python/pystate.c`'s `push_chunk`/`_PyThreadState_PushFrame`/
//! `_PyThreadState_PopFrame`: each thread-state owns a singly-linked list of
//! power-of-two-sized chunks, doubling until a requested frame fits. Per the
//! Open Question resolution in SPEC_FULL.md, the root chunk's "never freed"
//! property is implemented with an explicit `is_root` flag rather than the
//! index-0-skip pointer-arithmetic hack the original uses — the observable
//! contract (root survives until the thread-state itself is deleted) is
//! identical.

/// Default chunk size, matching CPython's `DATA_STACK_CHUNK_SIZE` (16 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

struct Chunk {
    capacity: usize,
    top: usize,
    is_root: bool,
}

impl Chunk {
    fn new(capacity: usize, is_root: bool) -> Self {
        Self {
            capacity,
            top: 0,
            is_root,
        }
    }
}

/// A handle returned by [`FrameStack::push_frame`]; must be passed back to
/// [`FrameStack::pop_frame`] in strict LIFO order.
#[derive(Debug, Clone, Copy)]
pub struct FrameHandle {
    chunk_index: usize,
    offset: usize,
}

/// Per-thread-state chunked frame allocator.
pub struct FrameStack {
    chunks: Vec<Chunk>,
    next_capacity: usize,
}

impl FrameStack {
    pub fn new() -> Self {
        Self {
            chunks: vec![Chunk::new(DEFAULT_CHUNK_SIZE, true)],
            next_capacity: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Reserve `size` bytes for a new frame, growing the chunk chain if the
    /// current chunk has no room. Doubles the next chunk's capacity each
    /// time growth is needed, matching `push_chunk`'s sizing policy, and
    /// never allocates a chunk smaller than `size`.
    pub fn push_frame(&mut self, size: usize) -> FrameHandle {
        let idx = self.chunks.len() - 1;
        if self.chunks[idx].top + size <= self.chunks[idx].capacity {
            let offset = self.chunks[idx].top;
            self.chunks[idx].top += size;
            return FrameHandle {
                chunk_index: idx,
                offset,
            };
        }
        let capacity = self.next_capacity.max(size);
        self.next_capacity = capacity.saturating_mul(2);
        let mut chunk = Chunk::new(capacity, false);
        chunk.top = size;
        self.chunks.push(chunk);
        FrameHandle {
            chunk_index: self.chunks.len() - 1,
            offset: 0,
        }
    }

    /// Release the most recently pushed frame. If it was the first frame in
    /// a non-root chunk, the chunk is freed and the previous chunk's
    /// high-water mark is restored; otherwise the current chunk's top simply
    /// moves back.
    pub fn pop_frame(&mut self, handle: FrameHandle) {
        let last = self.chunks.len() - 1;
        assert_eq!(
            handle.chunk_index, last,
            "pop_frame called out of LIFO order"
        );
        let chunk = &self.chunks[last];
        if handle.offset == 0 && !chunk.is_root && self.chunks.len() > 1 {
            self.chunks.pop();
        } else {
            self.chunks[last].top = handle.offset;
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn root_chunk_alive(&self) -> bool {
        self.chunks.first().is_some_and(|c| c.is_root)
    }
}

impl Default for FrameStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_push_pop_stays_in_one_chunk() {
        let mut fs = FrameStack::new();
        let h1 = fs.push_frame(64);
        let h2 = fs.push_frame(64);
        assert_eq!(fs.chunk_count(), 1);
        fs.pop_frame(h2);
        fs.pop_frame(h1);
        assert_eq!(fs.chunk_count(), 1);
    }

    #[test]
    fn overflow_allocates_new_chunk_and_pop_frees_it() {
        let mut fs = FrameStack::new();
        let h1 = fs.push_frame(DEFAULT_CHUNK_SIZE - 16);
        let h2 = fs.push_frame(256); // doesn't fit, new chunk
        assert_eq!(fs.chunk_count(), 2);
        fs.pop_frame(h2);
        assert_eq!(fs.chunk_count(), 1);
        fs.pop_frame(h1);
        assert_eq!(fs.chunk_count(), 1);
    }

    #[test]
    fn root_chunk_is_never_freed() {
        let mut fs = FrameStack::new();
        // Drain the root chunk completely, one byte-sized frame at a time.
        let mut handles = Vec::new();
        loop {
            let before = fs.chunk_count();
            let h = fs.push_frame(1);
            if fs.chunk_count() > before {
                // just spilled into a second chunk; stop here
                fs.pop_frame(h);
                break;
            }
            handles.push(h);
        }
        while let Some(h) = handles.pop() {
            fs.pop_frame(h);
        }
        assert!(fs.root_chunk_alive());
        assert_eq!(fs.chunk_count(), 1);
    }

    #[test]
    fn chunk_sizes_double_on_successive_growth() {
        let mut fs = FrameStack::new();
        // Force the root chunk to fill, then request two more frames each
        // larger than the last: every request beyond the first spill must
        // land in a freshly grown chunk.
        let filler = fs.push_frame(DEFAULT_CHUNK_SIZE);
        let h2 = fs.push_frame(DEFAULT_CHUNK_SIZE * 2);
        assert_eq!(fs.chunk_count(), 2);
        let h3 = fs.push_frame(DEFAULT_CHUNK_SIZE * 4);
        assert_eq!(fs.chunk_count(), 3);
        fs.pop_frame(h3);
        fs.pop_frame(h2);
        fs.pop_frame(filler);
    }
}
