//! Owned packet buffers backed by a small lock-free pool
//!
//! Inbound packets are copied out of the codec's receive buffer on the
//! producer path, which must not block. Most of that traffic is 128 byte
//! ADPCM feed packets, at most 16 of which are ever in flight, so a pool of
//! 16 fixed-size slots covers the hot path without touching the allocator.

use crossbeam::queue::ArrayQueue;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::QueueError;

/// Fixed-capacity pool of reusable byte buffers
pub struct BufferPool {
    free: ArrayQueue<Vec<u8>>,
    slot_len: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl BufferPool {
    /// Create a pool of `slots` buffers, each `slot_len` bytes long
    pub fn new(slots: usize, slot_len: usize) -> Self {
        let free = ArrayQueue::new(slots.max(1));
        for _ in 0..slots {
            let _ = free.push(Vec::with_capacity(slot_len));
        }
        Self {
            free,
            slot_len,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Copy `data` into an owned buffer
    ///
    /// Falls back to the heap when the payload is larger than a slot or the
    /// pool is empty. Heap allocation failure is reported, never retried.
    pub fn acquire(self: &Arc<Self>, data: &[u8]) -> Result<PacketBuffer, QueueError> {
        if data.len() <= self.slot_len {
            if let Some(mut buf) = self.free.pop() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                buf.clear();
                buf.extend_from_slice(data);
                return Ok(PacketBuffer {
                    data: buf,
                    pool: Some(self.clone()),
                });
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let mut buf = Vec::new();
        buf.try_reserve_exact(data.len())
            .map_err(|_| QueueError::AllocationFailed)?;
        buf.extend_from_slice(data);
        Ok(PacketBuffer { data: buf, pool: None })
    }

    /// Number of free slots
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.free.capacity()
    }

    /// Slot length in bytes
    pub fn slot_len(&self) -> usize {
        self.slot_len
    }

    /// Get statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            available: self.available(),
            capacity: self.capacity(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn release(&self, buf: Vec<u8>) {
        // Full means the slot came from elsewhere; let it drop
        let _ = self.free.push(buf);
    }
}

/// Pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub available: usize,
    pub capacity: usize,
    pub hits: usize,
    pub misses: usize,
}

/// Thread-safe handle to a buffer pool
pub type SharedBufferPool = Arc<BufferPool>;

/// Create a new shared buffer pool
pub fn create_shared_pool(slots: usize, slot_len: usize) -> SharedBufferPool {
    Arc::new(BufferPool::new(slots, slot_len))
}

/// Owned payload bytes, returned to their pool on drop
pub struct PacketBuffer {
    data: Vec<u8>,
    pool: Option<SharedBufferPool>,
}

impl PacketBuffer {
    /// Wrap an already owned vector; it is not returned to any pool
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, pool: None }
    }

    /// Whether the bytes live in a pool slot
    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }
}

impl Deref for PacketBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl AsRef<[u8]> for PacketBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("len", &self.data.len())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl Drop for PacketBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release(std::mem::take(&mut self.data));
        }
    }
}
