//! Fixed-capacity staging window for not-yet-decoded compressed input.
//!
//! The window never grows and never blocks: `append` first drops the
//! already-consumed prefix, then copies as much of the new data as still
//! fits and reports how much it took. The shortfall is the backpressure
//! signal to the feeder.

pub struct StagingBuffer {
    storage: Vec<u8>,
    len: usize,
    pos: usize,
}

impl StagingBuffer {
    /// Allocate a window of `capacity` bytes. Done once per decoder session.
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity],
            len: 0,
            pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes staged and not yet consumed.
    pub fn available(&self) -> usize {
        self.len - self.pos
    }

    /// The staged, not-yet-consumed window.
    pub fn window(&self) -> &[u8] {
        &self.storage[self.pos..self.len]
    }

    /// Shift out the consumed prefix so the whole capacity is usable again.
    fn compact(&mut self) {
        if self.pos == 0 {
            return;
        }
        let remaining = self.len - self.pos;
        if remaining > 0 {
            self.storage.copy_within(self.pos..self.len, 0);
        }
        self.len = remaining;
        self.pos = 0;
    }

    /// Append as much of `data` as fits, returning the number of bytes
    /// copied. Excess input is dropped, not queued.
    pub fn append(&mut self, data: &[u8]) -> usize {
        self.compact();
        let space = self.storage.len() - self.len;
        let to_copy = data.len().min(space);
        if to_copy > 0 {
            self.storage[self.len..self.len + to_copy].copy_from_slice(&data[..to_copy]);
            self.len += to_copy;
        }
        to_copy
    }

    /// Mark `n` staged bytes as consumed. `n` must not exceed `available()`.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.available());
        self.pos += n.min(self.available());
    }

    /// Scan the staged window from relative offset `from` for a two-byte
    /// marker satisfying `predicate`. Returns the offset relative to the
    /// current read position.
    pub fn find_sync<F>(&self, from: usize, predicate: F) -> Option<usize>
    where
        F: Fn(u8, u8) -> bool,
    {
        let window = self.window();
        if window.len() < 2 {
            return None;
        }
        (from..window.len() - 1).find(|&i| predicate(window[i], window[i + 1]))
    }

    /// Drop all staged data without deallocating.
    pub fn clear(&mut self) {
        self.len = 0;
        self.pos = 0;
    }
}
