//! Chunk planning for sequential stream reads

/// Default size of one streamed chunk (1 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 1_048_576;

/// Inclusive byte range `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Consecutive ranges covering `[0, total_len)` in increasing order
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    total_len: u64,
    chunk_size: u64,
    next_start: u64,
}

impl ChunkPlan {
    /// A zero `chunk_size` is treated as one byte per chunk.
    pub fn new(total_len: u64, chunk_size: u64) -> Self {
        Self {
            total_len,
            chunk_size: chunk_size.max(1),
            next_start: 0,
        }
    }

    pub fn chunk_count(&self) -> u64 {
        self.total_len.div_ceil(self.chunk_size)
    }
}

impl Iterator for ChunkPlan {
    type Item = ByteRange;

    fn next(&mut self) -> Option<ByteRange> {
        if self.next_start >= self.total_len {
            return None;
        }
        let start = self.next_start;
        let end = start.saturating_add(self.chunk_size).min(self.total_len) - 1;
        self.next_start = end + 1;
        Some(ByteRange { start, end })
    }
}
