//! Bounded per-session ingress queue
//!
//! Net threads push parsed packets; the pipeline thread pops them. The
//! critical section is a few pointer moves and is never held across I/O
//! or pipeline calls. On overflow the queue sheds repair packets before
//! source packets, oldest first.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::{Packet, PacketFlags, PacketReader};

/// Drop counters for one queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    /// Repair packets shed on overflow.
    pub dropped_repair: u64,
    /// Source packets shed on overflow.
    pub dropped_source: u64,
}

/// Bounded multi-producer single-consumer packet queue.
#[derive(Debug)]
pub struct PacketQueue {
    inner: Mutex<VecDeque<Arc<Packet>>>,
    capacity: usize,
    dropped_repair: AtomicU64,
    dropped_source: AtomicU64,
}

impl PacketQueue {
    /// Create a queue holding at most `capacity` packets.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "packet queue capacity must be non-zero");
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped_repair: AtomicU64::new(0),
            dropped_source: AtomicU64::new(0),
        }
    }

    /// Push a packet, shedding on overflow.
    pub fn push(&self, packet: Arc<Packet>) {
        let mut queue = self.inner.lock().expect("queue poisoned");

        if queue.len() >= self.capacity {
            // Shed oldest repair first, then oldest source.
            let victim = queue
                .iter()
                .position(|p| p.flags.contains(PacketFlags::REPAIR))
                .unwrap_or(0);
            if let Some(p) = queue.remove(victim) {
                if p.flags.contains(PacketFlags::REPAIR) {
                    self.dropped_repair.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.dropped_source.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        queue.push_back(packet);
    }

    /// Pop the oldest packet.
    pub fn pop(&self) -> Option<Arc<Packet>> {
        self.inner.lock().expect("queue poisoned").pop_front()
    }

    /// Number of queued packets.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue poisoned").len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain and discard everything queued.
    pub fn clear(&self) {
        self.inner.lock().expect("queue poisoned").clear();
    }

    /// Snapshot of the drop counters.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            dropped_repair: self.dropped_repair.load(Ordering::Relaxed),
            dropped_source: self.dropped_source.load(Ordering::Relaxed),
        }
    }
}

/// Consumer-side adapter exposing a queue as a [`PacketReader`].
#[derive(Debug)]
pub struct QueueReader {
    queue: Arc<PacketQueue>,
}

impl QueueReader {
    /// Wrap a shared queue.
    #[must_use]
    pub fn new(queue: Arc<PacketQueue>) -> Self {
        Self { queue }
    }
}

impl PacketReader for QueueReader {
    fn read(&mut self) -> Option<Arc<Packet>> {
        self.queue.pop()
    }
}
