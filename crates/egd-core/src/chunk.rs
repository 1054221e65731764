//! Fixed-capacity append-only chunks of entropy bytes.

use std::time::SystemTime;

/// One bounded buffer inside the pool.
///
/// The `id` is assigned by the pool, is unique within it and never changes.
/// Once the buffer reaches `capacity` the chunk accepts no further writes.
/// Callers only ever observe the bytes by copy.
#[derive(Debug, Clone)]
pub struct PoolChunk {
    id: i64,
    bytes: Vec<u8>,
    capacity: usize,
    created_at: SystemTime,
}

impl PoolChunk {
    /// Create an empty chunk. `capacity` must be positive; the pool
    /// validates this before construction.
    pub fn new(id: i64, capacity: usize) -> Self {
        Self {
            id,
            bytes: Vec::with_capacity(capacity.min(64 * 1024)),
            capacity,
            created_at: SystemTime::now(),
        }
    }

    /// Rebuild a chunk from a persisted record.
    pub(crate) fn from_parts(id: i64, bytes: Vec<u8>, capacity: usize) -> Self {
        debug_assert!(bytes.len() <= capacity);
        Self {
            id,
            bytes,
            capacity,
            created_at: SystemTime::now(),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn is_full(&self) -> bool {
        self.bytes.len() == self.capacity
    }

    /// Remaining writable bytes.
    pub fn remaining(&self) -> usize {
        self.capacity - self.bytes.len()
    }

    /// Append up to `remaining()` bytes from `data`, returning how many
    /// were actually taken.
    pub fn append(&mut self, data: &[u8]) -> usize {
        let take = data.len().min(self.remaining());
        self.bytes.extend_from_slice(&data[..take]);
        take
    }

    /// Defensive copy of the buffer.
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    /// Serialize as `id (i64 LE) | size (u32 LE) | bytes`.
    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.id.to_le_bytes());
        out.extend_from_slice(&(self.bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.bytes);
    }
}
