use serde::{Deserialize, Serialize};

use super::Segment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A time-bounded slice of the source audio, recognized independently.
/// `index` is 1-based and ordering-significant: merge output is always the
/// index-order concatenation, regardless of completion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkState {
    pub index: u32,
    pub start_ms: u64,
    pub end_ms: u64,
    pub status: ChunkStatus,
    pub text: String,
    pub segments: Vec<Segment>,
}

impl ChunkState {
    pub fn pending(index: u32, start_ms: u64, end_ms: u64) -> Self {
        Self {
            index,
            start_ms,
            end_ms,
            status: ChunkStatus::Pending,
            text: String::new(),
            segments: Vec::new(),
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }
}

/// Split `total_ms` into contiguous chunks of `chunk_ms` (the last one may be
/// shorter). A duration at or below one chunk yields a single span covering
/// the whole file.
pub fn plan_chunks(total_ms: u64, chunk_ms: u64) -> Vec<ChunkState> {
    if total_ms <= chunk_ms || chunk_ms == 0 {
        return vec![ChunkState::pending(1, 0, total_ms)];
    }

    let mut chunks = Vec::new();
    let mut start = 0u64;
    let mut index = 1u32;
    while start < total_ms {
        let end = (start + chunk_ms).min(total_ms);
        chunks.push(ChunkState::pending(index, start, end));
        start = end;
        index += 1;
    }
    chunks
}
