//! Playout delay
//!
//! Holds packets until their capture time plus the target delay has
//! elapsed, establishing the baseline latency the control loop works
//! against. Output is monotonic; a head packet whose delay has not
//! elapsed simply makes `read` return nothing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::packet::{Packet, PacketReader};

/// Clock source, injectable for tests.
pub type Clock = Box<dyn FnMut() -> Instant + Send>;

/// Delays packets by a fixed duration after capture.
pub struct DelayedReader {
    inner: Box<dyn PacketReader>,
    delay: Duration,
    head: Option<Arc<Packet>>,
    clock: Clock,
}

impl DelayedReader {
    /// Wrap `inner` with a playout delay against the wall clock.
    #[must_use]
    pub fn new(inner: Box<dyn PacketReader>, delay: Duration) -> Self {
        Self::with_clock(inner, delay, Box::new(Instant::now))
    }

    /// Wrap `inner` with an injected clock.
    #[must_use]
    pub fn with_clock(inner: Box<dyn PacketReader>, delay: Duration, clock: Clock) -> Self {
        Self {
            inner,
            delay,
            head: None,
            clock,
        }
    }
}

impl PacketReader for DelayedReader {
    fn read(&mut self) -> Option<Arc<Packet>> {
        if self.head.is_none() {
            self.head = self.inner.read();
        }

        let due = self
            .head
            .as_ref()
            .map(|p| p.capture_time + self.delay)?;

        if due <= (self.clock)() {
            self.head.take()
        } else {
            None
        }
    }
}
