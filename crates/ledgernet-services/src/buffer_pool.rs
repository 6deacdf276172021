//! Size-bucketed buffer pool.
//!
//! Buckets are keyed by a power of two. `get` rounds the requested size up to
//! the next power of two and hands out a buffer of exactly that length,
//! reusing a pooled one when the bucket has any. `put` files a buffer under
//! its exact length and silently drops it when no such bucket exists yet.
//!
//! `get_pooled` returns a guard that remembers its bucket, so a buffer that
//! was split or shrunk while in use still finds its way home. The memory
//! that goes home is the original allocation only if every `Bytes` split
//! off it has been dropped by then.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::BytesMut;
use dashmap::DashMap;

/// Buffers kept per bucket. Extras are dropped on return.
const MAX_PER_BUCKET: usize = 16;

/// Shared, internally synchronized pool. Cloning shares the buckets.
#[derive(Clone, Default)]
pub struct BufferPool {
    buckets: Arc<DashMap<usize, Vec<BytesMut>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bucket key for a requested size.
    pub fn bucket_for(size: usize) -> usize {
        size.max(1).next_power_of_two()
    }

    /// A buffer whose length is `bucket_for(size)`. Creates the bucket on
    /// first use.
    pub fn get(&self, size: usize) -> BytesMut {
        let key = Self::bucket_for(size);
        let mut bucket = self.buckets.entry(key).or_default();
        match bucket.pop() {
            Some(buf) => buf,
            None => BytesMut::zeroed(key),
        }
    }

    /// Return a buffer. Filed under its exact length; dropped when that
    /// bucket does not exist or is full.
    pub fn put(&self, buf: BytesMut) {
        if let Some(mut bucket) = self.buckets.get_mut(&buf.len()) {
            if bucket.len() < MAX_PER_BUCKET {
                bucket.push(buf);
            }
        }
    }

    /// Like `get`, but the buffer goes back to its bucket when the guard is
    /// dropped, whatever its length by then.
    pub fn get_pooled(&self, size: usize) -> PooledBuffer {
        let bucket = Self::bucket_for(size);
        PooledBuffer {
            buf: self.get(size),
            bucket,
            pool: self.clone(),
        }
    }

    /// Buffers currently idle in the bucket for `size`.
    pub fn idle(&self, size: usize) -> usize {
        self.buckets
            .get(&Self::bucket_for(size))
            .map(|b| b.len())
            .unwrap_or(0)
    }
}

/// A pool buffer that returns itself to its original bucket on drop.
pub struct PooledBuffer {
    buf: BytesMut,
    bucket: usize,
    pool: BufferPool,
}

impl PooledBuffer {
    pub fn bucket(&self) -> usize {
        self.bucket
    }
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        // `reserve` reclaims the original allocation only when no split-off
        // view is still alive; otherwise it allocates a fresh one.
        buf.clear();
        buf.reserve(self.bucket);
        buf.resize(self.bucket, 0);
        self.pool.put(buf);
    }
}
