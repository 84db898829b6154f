//! Slab-style buffer and packet factories
//!
//! Process-wide factories created at peer open and threaded explicitly
//! through constructors. Acquire is O(1) from a free list; an empty free
//! list falls back to the process allocator; allocator failure surfaces
//! as `None` and the caller drops the packet.
//!
//! The packet factory feeds the ingress path: every datagram is copied
//! into a factory buffer, the filled prefix is frozen into the packet's
//! `Bytes`, and the remainder goes back to the pool. `reserve` on the
//! next acquire reclaims the block once the packet's references drop.
//! The sample factory hands out staging buffers the pipeline layers hold
//! for their lifetime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;

/// Reusable sample (or byte) buffers of one nominal length.
#[derive(Debug)]
pub struct BufferFactory<T> {
    buffer_len: usize,
    pool: Mutex<Vec<Vec<T>>>,
    outstanding: AtomicUsize,
}

impl<T> BufferFactory<T> {
    /// Create a factory of `slab_count` buffers of `buffer_len`
    /// elements.
    #[must_use]
    pub fn new(buffer_len: usize, slab_count: usize) -> Arc<Self> {
        let pool = (0..slab_count)
            .map(|_| Vec::with_capacity(buffer_len))
            .collect();
        Arc::new(Self {
            buffer_len,
            pool: Mutex::new(pool),
            outstanding: AtomicUsize::new(0),
        })
    }

    /// Nominal length of buffers produced by this factory.
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// Acquire an empty buffer with `buffer_len` capacity.
    ///
    /// Falls back to the process allocator when the slab is empty.
    pub fn acquire(&self) -> Option<Vec<T>> {
        let mut buf = self
            .pool
            .lock()
            .expect("buffer pool poisoned")
            .pop()
            .unwrap_or_default();
        buf.clear();
        buf.reserve(self.buffer_len);
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        Some(buf)
    }

    /// Return a buffer to the slab.
    pub fn release(&self, buf: Vec<T>) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        self.pool.lock().expect("buffer pool poisoned").push(buf);
    }

    /// Buffers currently acquired and not released. Long-lived pipeline
    /// staging buffers stay acquired for their layer's lifetime, so
    /// this is a leak check across peer close, not a per-frame balance.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }
}

/// Datagram size the packet factory provisions for.
pub const MAX_PACKET_SIZE: usize = 2048;

/// Factory for MTU-sized receive buffers that network threads copy
/// datagrams into before parsing.
#[derive(Debug)]
pub struct PacketFactory {
    pool: Mutex<Vec<BytesMut>>,
    outstanding: AtomicUsize,
}

impl PacketFactory {
    /// Create a factory with `slab_count` preallocated receive buffers.
    #[must_use]
    pub fn new(slab_count: usize) -> Arc<Self> {
        let pool = (0..slab_count)
            .map(|_| BytesMut::with_capacity(MAX_PACKET_SIZE))
            .collect();
        Arc::new(Self {
            pool: Mutex::new(pool),
            outstanding: AtomicUsize::new(0),
        })
    }

    /// Acquire an empty receive buffer with at least [`MAX_PACKET_SIZE`]
    /// capacity.
    ///
    /// `reserve` reclaims the underlying block when the packets carved
    /// from it have been released, and falls back to the process
    /// allocator otherwise.
    pub fn acquire(&self) -> Option<BytesMut> {
        let mut buf = self
            .pool
            .lock()
            .expect("packet pool poisoned")
            .pop()
            .unwrap_or_default();
        buf.clear();
        buf.reserve(MAX_PACKET_SIZE);
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        Some(buf)
    }

    /// Return a receive buffer after freezing its filled prefix.
    pub fn release(&self, buf: BytesMut) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        self.pool.lock().expect("packet pool poisoned").push(buf);
    }

    /// Receive buffers currently acquired and not released.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }
}

/// Shared factories threaded through pipeline constructors.
#[derive(Debug, Clone)]
pub struct Context {
    /// Receive-buffer factory, used per datagram on the ingress path.
    pub packets: Arc<PacketFactory>,
    /// Sample-buffer factory for pipeline staging buffers, used at
    /// chain assembly.
    pub samples: Arc<BufferFactory<f32>>,
}

impl Context {
    /// Create factories sized for `sessions` concurrent sessions.
    #[must_use]
    pub fn new(sessions: usize) -> Self {
        Self {
            packets: PacketFactory::new(sessions * 64),
            samples: BufferFactory::new(16 * 1024, sessions * 4),
        }
    }

    /// Acquire a sample staging buffer, falling back to an empty one if
    /// the allocator fails.
    #[must_use]
    pub fn sample_buffer(&self) -> Vec<f32> {
        self.samples.acquire().unwrap_or_default()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(8)
    }
}
