//! Per-call bump allocator ("region"), used for intra-execution scratch by
//! SQL statements and by the merger's key extractor.
//!
//! Unlike the long-lived slab allocator backing tuple and format storage, a
//! region only ever grows until its owner is done with the current
//! execution step, at which point the watermark saved before the step is
//! restored. This mirrors `box_region_truncate`'s discipline, implemented
//! here over a plain `Vec<u8>` instead of a C allocator, since the region
//! no longer borrows from a live Tarantool process.

/// A byte range into a [`Region`]'s backing buffer.
pub type RegionSlice = std::ops::Range<usize>;

#[derive(Debug, Default)]
pub struct Region {
    buf: Vec<u8>,
}

impl Region {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Bytes currently in use.
    #[inline]
    pub fn used(&self) -> usize {
        self.buf.len()
    }

    /// Save a watermark to later [`truncate`](Region::truncate) back to.
    #[inline]
    pub fn watermark(&self) -> usize {
        self.buf.len()
    }

    /// Bump-allocate `len` zeroed bytes and return the range they occupy.
    pub fn alloc(&mut self, len: usize) -> RegionSlice {
        let start = self.buf.len();
        self.buf.resize(start + len, 0);
        start..start + len
    }

    /// Append `bytes` to the region and return the range they occupy.
    pub fn alloc_from(&mut self, bytes: &[u8]) -> RegionSlice {
        let start = self.buf.len();
        self.buf.extend_from_slice(bytes);
        start..self.buf.len()
    }

    #[inline]
    pub fn get(&self, slice: RegionSlice) -> &[u8] {
        &self.buf[slice]
    }

    #[inline]
    pub fn get_mut(&mut self, slice: RegionSlice) -> &mut [u8] {
        &mut self.buf[slice]
    }

    /// Roll back every allocation made since `mark` was taken. Used to undo
    /// a partial allocation on the failure path of a fallible operation:
    /// watermarks are saved before any operation that may fail mid-way and
    /// restored on failure.
    pub fn truncate(&mut self, mark: usize) {
        self.buf.truncate(mark);
    }

    /// Drop every allocation, as `reset` does for a statement's region.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
