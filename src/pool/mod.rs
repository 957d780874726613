//! Reusable byte-buffer pools.
//!
//! Every record read borrows a scratch buffer and every write job
//! accumulates its projection in a builder; at pipeline concurrency
//! that is a steady stream of large, short-lived allocations. The pool
//! damps it: buffers are parked between uses and handed back out with
//! their capacity intact.
//!
//! The pool is *leaky* — returns beyond the idle cap are dropped rather
//! than retained, so a burst of oversized inputs cannot pin memory
//! forever.
//!
//! [`BufferPool::get`] returns a [`PooledBuf`] guard that derefs to
//! `Vec<u8>` and returns the buffer on drop, which makes release
//! unconditional across every exit path, early `?` returns included.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Thread-safe leaky-bucket pool of `Vec<u8>`.
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
    outstanding: AtomicUsize,
}

impl BufferPool {
    /// Create a pool retaining at most `max_idle` parked buffers.
    pub fn new(max_idle: usize) -> Arc<Self> {
        Arc::new(Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
            outstanding: AtomicUsize::new(0),
        })
    }

    /// Acquire a buffer, reusing a parked one when available.
    pub fn get(self: &Arc<Self>) -> PooledBuf {
        let buf = {
            let mut idle = self.idle.lock().unwrap_or_else(|p| p.into_inner());
            idle.pop().unwrap_or_default()
        };
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        PooledBuf {
            buf,
            pool: Arc::clone(self),
        }
    }

    /// Buffers currently handed out and not yet returned.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Buffers currently parked.
    pub fn idle_count(&self) -> usize {
        self.idle
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    fn put(&self, mut buf: Vec<u8>) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        buf.clear();
        let mut idle = self.idle.lock().unwrap_or_else(|p| p.into_inner());
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
        // Over the cap the buffer just drops: the leak in leaky-bucket.
    }
}

/// RAII guard around a pooled `Vec<u8>`.
#[derive(Debug)]
pub struct PooledBuf {
    buf: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuf {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        self.pool.put(std::mem::take(&mut self.buf));
    }
}
