//! Reusable fixed-size byte buffers.
//!
//! Request and response bodies are shuttled through short-lived scratch buffers.
//! Allocating a fresh 16 KiB array for every chunk of every exchange puts a lot
//! of pressure on the allocator, so buffers are leased from an unbounded pool
//! instead: a miss allocates, a release pushes the buffer back onto the free
//! list.
//!
//! A lease is a [`PooledBuffer`]. It returns its buffer when dropped, so every
//! exit path (normal return, `?`, cancellation of the owning future, panic
//! unwinding) gives the buffer back exactly once. A lease can also be frozen
//! into [`Bytes`]; the buffer then goes back to the pool when the last clone of
//! those bytes is dropped.
//!
//! # Examples
//!
//! ```
//! use sockets_transport::pool::BufferPool;
//!
//! let pool = BufferPool::new();
//! {
//!     let mut buffer = pool.acquire();
//!     buffer[..5].copy_from_slice(b"hello");
//!     assert_eq!(pool.outstanding(), 1);
//! }
//! assert_eq!(pool.outstanding(), 0);
//! assert_eq!(pool.idle(), 1);
//! ```

use crate::constants::POOLED_BUFFER_SIZE;
use bytes::Bytes;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct PoolInner {
    free: Mutex<Vec<Box<[u8]>>>,
    buffer_size: usize,
    outstanding: AtomicUsize,
    allocated: AtomicUsize,
}

impl PoolInner {
    fn release(&self, buffer: Box<[u8]>) {
        debug_assert_eq!(
            buffer.len(),
            self.buffer_size,
            "buffer released into a pool it was not leased from"
        );
        let previous = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "buffer released more times than it was leased");
        self.free.lock().push(buffer);
    }
}

/// Thread-safe, unbounded pool of fixed-size byte buffers.
///
/// Cloning the pool yields another handle to the same free list.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool of [`POOLED_BUFFER_SIZE`] buffers.
    pub fn new() -> Self {
        Self::with_buffer_size(POOLED_BUFFER_SIZE)
    }

    /// Create a pool handing out buffers of `buffer_size` bytes.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        BufferPool {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                buffer_size: buffer_size.max(1),
                outstanding: AtomicUsize::new(0),
                allocated: AtomicUsize::new(0),
            }),
        }
    }

    /// Lease a buffer. Never blocks; allocates when the free list is empty.
    pub fn acquire(&self) -> PooledBuffer {
        let reused = self.inner.free.lock().pop();
        let buffer = reused.unwrap_or_else(|| {
            self.inner.allocated.fetch_add(1, Ordering::Relaxed);
            vec![0u8; self.inner.buffer_size].into_boxed_slice()
        });
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);

        PooledBuffer {
            buffer: Some(buffer),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Size of each buffer in bytes.
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Number of buffers currently leased out.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Number of buffers sitting on the free list.
    pub fn idle(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Number of buffers ever allocated by this pool.
    pub fn allocated(&self) -> usize {
        self.inner.allocated.load(Ordering::Relaxed)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.inner.buffer_size)
            .field("outstanding", &self.outstanding())
            .field("idle", &self.idle())
            .finish()
    }
}

/// Scoped lease on a pooled buffer.
pub struct PooledBuffer {
    buffer: Option<Box<[u8]>>,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    /// Turn the first `len` bytes of this buffer into [`Bytes`].
    ///
    /// No copy is made. The buffer stays leased until every clone of the
    /// returned `Bytes` has been dropped.
    pub fn freeze(self, len: usize) -> Bytes {
        let len = len.min(self.len());
        Bytes::from_owner(FilledBuffer { lease: self, len })
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}

struct FilledBuffer {
    lease: PooledBuffer,
    len: usize,
}

impl AsRef<[u8]> for FilledBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.lease[..self.len]
    }
}
