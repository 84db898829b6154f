//! Stream liveness and jump detection
//!
//! A countdown of ticks is armed on every `update` call; observing a
//! packet between ticks rearms it. Reaching zero, or a sequence or
//! timestamp jump beyond the configured bound, kills the session. Death
//! is sticky.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::packet::units::{seqnum_diff, seqnum_lt, timestamp_diff, Seqnum, StreamTimestamp};
use crate::packet::{Packet, PacketReader};
use crate::session::Liveness;

/// Watchdog bounds.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogConfig {
    /// Ticks without packets before the session is declared dead.
    pub timeout_ticks: u32,
    /// Maximum tolerated seqnum distance between consecutive packets.
    pub max_sn_jump: u16,
    /// Maximum tolerated timestamp distance between consecutive packets.
    pub max_ts_jump: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout_ticks: 200,
            max_sn_jump: 100,
            max_ts_jump: 44_100,
        }
    }
}

/// Tick-side control handle, shared with the session driver.
#[derive(Debug)]
pub struct WatchdogCtl {
    timeout: u32,
    countdown: AtomicU32,
    has_packets: AtomicBool,
    liveness: Liveness,
}

impl WatchdogCtl {
    /// Advance one tick. Returns false once the session is dead.
    pub fn update(&self) -> bool {
        if !self.liveness.is_alive() {
            return false;
        }

        if self.has_packets.swap(false, Ordering::AcqRel) {
            self.countdown.store(self.timeout, Ordering::Release);
            return true;
        }

        let left = self.countdown.load(Ordering::Acquire).saturating_sub(1);
        self.countdown.store(left, Ordering::Release);
        if left == 0 {
            tracing::debug!(
                timeout_ticks = self.timeout,
                "watchdog timeout, no packets observed"
            );
            self.liveness.kill("watchdog timeout");
            return false;
        }

        true
    }
}

/// Packet-reader layer feeding the watchdog.
pub struct Watchdog {
    inner: Box<dyn PacketReader>,
    ctl: Arc<WatchdogCtl>,
    config: WatchdogConfig,
    liveness: Liveness,
    prev: Option<(Seqnum, StreamTimestamp)>,
}

impl Watchdog {
    /// Wrap `inner`; deaths are reported through `liveness`.
    #[must_use]
    pub fn new(inner: Box<dyn PacketReader>, config: WatchdogConfig, liveness: Liveness) -> Self {
        let ctl = Arc::new(WatchdogCtl {
            timeout: config.timeout_ticks,
            countdown: AtomicU32::new(config.timeout_ticks),
            has_packets: AtomicBool::new(false),
            liveness: liveness.clone(),
        });
        Self {
            inner,
            ctl,
            config,
            liveness,
            prev: None,
        }
    }

    /// Handle for the per-frame tick.
    #[must_use]
    pub fn ctl(&self) -> Arc<WatchdogCtl> {
        Arc::clone(&self.ctl)
    }

    fn detect_jump(&mut self, next: &Packet) -> bool {
        if let Some((prev_sn, prev_ts)) = self.prev {
            let sn_dist = seqnum_diff(next.seqnum, prev_sn).unsigned_abs();
            if sn_dist > self.config.max_sn_jump {
                tracing::debug!(prev = prev_sn, next = next.seqnum, dist = sn_dist,
                    "seqnum jump beyond bound");
                return true;
            }

            let ts_dist = timestamp_diff(next.timestamp, prev_ts).unsigned_abs();
            if ts_dist > self.config.max_ts_jump {
                tracing::debug!(prev = prev_ts, next = next.timestamp, dist = ts_dist,
                    "timestamp jump beyond bound");
                return true;
            }
        }

        match self.prev {
            Some((prev_sn, _)) if !seqnum_lt(prev_sn, next.seqnum) => {}
            _ => self.prev = Some((next.seqnum, next.timestamp)),
        }

        false
    }
}

impl PacketReader for Watchdog {
    fn read(&mut self) -> Option<Arc<Packet>> {
        if !self.liveness.is_alive() {
            return None;
        }

        let packet = self.inner.read()?;

        if self.detect_jump(&packet) {
            self.liveness.kill("timestamp or seqnum jump");
            return None;
        }

        self.ctl.has_packets.store(true, Ordering::Release);

        Some(packet)
    }
}
