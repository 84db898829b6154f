use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::packet::{Packet, PacketFlags, PacketReader};
use crate::reader::{DelayedReader, SortedReader, Watchdog, WatchdogConfig};
use crate::session::Liveness;

fn make_packet(seq: u16, ts: u32) -> Arc<Packet> {
    Arc::new(Packet {
        source_id: 1,
        seqnum: seq,
        timestamp: ts,
        marker: false,
        payload_type: 10,
        flags: PacketFlags::AUDIO,
        payload: Bytes::new(),
        raw: Bytes::new(),
        capture_time: Instant::now(),
        fec: None,
    })
}

/// Upstream stub: hands out queued packets, then nothing.
struct StubReader {
    packets: VecDeque<Arc<Packet>>,
}

impl StubReader {
    fn new(packets: impl IntoIterator<Item = Arc<Packet>>) -> Box<Self> {
        Box::new(Self {
            packets: packets.into_iter().collect(),
        })
    }
}

impl PacketReader for StubReader {
    fn read(&mut self) -> Option<Arc<Packet>> {
        self.packets.pop_front()
    }
}

/// Upstream stub that can be fed while the chain is running.
struct FeedReader {
    queue: Arc<std::sync::Mutex<VecDeque<Arc<Packet>>>>,
}

impl FeedReader {
    fn new() -> (Box<Self>, Arc<std::sync::Mutex<VecDeque<Arc<Packet>>>>) {
        let queue = Arc::new(std::sync::Mutex::new(VecDeque::new()));
        (
            Box::new(Self {
                queue: Arc::clone(&queue),
            }),
            queue,
        )
    }
}

impl PacketReader for FeedReader {
    fn read(&mut self) -> Option<Arc<Packet>> {
        self.queue.lock().unwrap().pop_front()
    }
}

mod sorted_tests {
    use super::*;

    fn seqs(reader: &mut SortedReader) -> Vec<u16> {
        let mut out = Vec::new();
        while let Some(p) = reader.read() {
            out.push(p.seqnum);
        }
        out
    }

    #[test]
    fn test_in_order_passthrough() {
        let stub = StubReader::new((0..5).map(|i| make_packet(i, u32::from(i) * 320)));
        let mut reader = SortedReader::new(stub, 4);

        assert_eq!(seqs(&mut reader), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_reorder_inside_window() {
        let order = [0u16, 2, 1, 3, 4];
        let stub = StubReader::new(order.iter().map(|&s| make_packet(s, u32::from(s) * 320)));
        let mut reader = SortedReader::new(stub, 4);

        assert_eq!(seqs(&mut reader), vec![0, 1, 2, 3, 4]);
        assert_eq!(reader.stats().dropped_duplicate, 0);
        assert_eq!(reader.stats().gaps_skipped, 0);
    }

    #[test]
    fn test_gap_waits_until_window_full() {
        // Missing seq 1; window of 4 holds 2,3,4,5 before skipping.
        let order = [0u16, 2, 3, 4];
        let stub = StubReader::new(order.iter().map(|&s| make_packet(s, 0)));
        let mut reader = SortedReader::new(stub, 4);

        // 0 emits (next expected), then the gap stalls emission.
        assert_eq!(reader.read().unwrap().seqnum, 0);
        assert!(reader.read().is_none());
        assert_eq!(reader.depth(), 3);
    }

    #[test]
    fn test_gap_declared_permanent_when_window_fills() {
        let order = [0u16, 2, 3, 4, 5];
        let stub = StubReader::new(order.iter().map(|&s| make_packet(s, 0)));
        let mut reader = SortedReader::new(stub, 4);

        assert_eq!(seqs(&mut reader), vec![0, 2, 3, 4, 5]);
        assert_eq!(reader.stats().gaps_skipped, 1);
    }

    #[test]
    fn test_duplicate_and_ancient_dropped() {
        let (stub, feed) = FeedReader::new();
        let mut reader = SortedReader::new(stub, 4);

        feed.lock()
            .unwrap()
            .extend((0..5).map(|s| make_packet(s, 0)));
        assert_eq!(seqs(&mut reader), vec![0, 1, 2, 3, 4]);

        // A late duplicate of an emitted seq and an impossibly old packet.
        feed.lock().unwrap().push_back(make_packet(0, 0));
        feed.lock().unwrap().push_back(make_packet(65531, 0));
        assert!(reader.read().is_none());
        assert_eq!(reader.stats().dropped_late, 2);
    }

    #[test]
    fn test_duplicate_in_window_first_arrival_wins() {
        let stub = StubReader::new(vec![
            make_packet(1, 111),
            make_packet(1, 222),
            make_packet(0, 0),
        ]);
        let mut reader = SortedReader::new(stub, 4);

        assert_eq!(reader.read().unwrap().seqnum, 0);
        let p = reader.read().unwrap();
        assert_eq!(p.seqnum, 1);
        assert_eq!(p.timestamp, 111);
        assert_eq!(reader.stats().dropped_duplicate, 1);
    }

    #[test]
    fn test_wraparound_order() {
        let order = [65534u16, 0, 65535, 1];
        let stub = StubReader::new(order.iter().map(|&s| make_packet(s, 0)));
        let mut reader = SortedReader::new(stub, 4);

        assert_eq!(seqs(&mut reader), vec![65534, 65535, 0, 1]);
    }
}

mod delayed_tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    #[test]
    fn test_holds_until_delay_elapsed() {
        let start = Instant::now();
        let fake_now = Arc::new(AtomicU64::new(0));
        let clock_time = Arc::clone(&fake_now);

        let stub = StubReader::new(vec![make_packet(0, 0)]);
        let mut reader = DelayedReader::with_clock(
            stub,
            Duration::from_millis(50),
            Box::new(move || start + Duration::from_millis(clock_time.load(Ordering::Relaxed))),
        );

        assert!(reader.read().is_none());

        fake_now.store(10, Ordering::Relaxed);
        assert!(reader.read().is_none());

        fake_now.store(60, Ordering::Relaxed);
        assert!(reader.read().is_some());
        assert!(reader.read().is_none());
    }

    #[test]
    fn test_zero_delay_passthrough() {
        let stub = StubReader::new(vec![make_packet(0, 0), make_packet(1, 320)]);
        let mut reader = DelayedReader::new(stub, Duration::ZERO);

        assert_eq!(reader.read().unwrap().seqnum, 0);
        assert_eq!(reader.read().unwrap().seqnum, 1);
        assert!(reader.read().is_none());
    }
}

mod watchdog_tests {
    use super::*;

    fn config(ticks: u32) -> WatchdogConfig {
        WatchdogConfig {
            timeout_ticks: ticks,
            max_sn_jump: 50,
            max_ts_jump: 50_000,
        }
    }

    #[test]
    fn test_timeout_after_exactly_t_ticks() {
        let liveness = Liveness::new();
        let mut wd = Watchdog::new(StubReader::new(vec![]), config(3), liveness.clone());
        let ctl = wd.ctl();

        assert!(ctl.update());
        assert!(ctl.update());
        assert!(!ctl.update());
        assert!(!liveness.is_alive());
        assert!(wd.read().is_none());
    }

    #[test]
    fn test_packet_rearms_countdown() {
        let liveness = Liveness::new();
        let mut wd = Watchdog::new(
            StubReader::new(vec![make_packet(0, 0)]),
            config(2),
            liveness.clone(),
        );
        let ctl = wd.ctl();

        assert!(ctl.update());
        assert!(wd.read().is_some());
        assert!(ctl.update()); // rearmed by the packet
        assert!(ctl.update());
        assert!(!ctl.update());
        assert!(!liveness.is_alive());
    }

    #[test]
    fn test_seqnum_jump_kills() {
        let liveness = Liveness::new();
        let mut wd = Watchdog::new(
            StubReader::new(vec![make_packet(0, 0), make_packet(1000, 320)]),
            config(10),
            liveness.clone(),
        );

        assert!(wd.read().is_some());
        assert!(wd.read().is_none());
        assert!(!liveness.is_alive());
    }

    #[test]
    fn test_timestamp_jump_kills() {
        let liveness = Liveness::new();
        let mut wd = Watchdog::new(
            StubReader::new(vec![make_packet(0, 0), make_packet(1, 1_000_000)]),
            config(10),
            liveness.clone(),
        );

        assert!(wd.read().is_some());
        assert!(wd.read().is_none());
        assert!(!liveness.is_alive());
    }

    #[test]
    fn test_death_is_sticky() {
        let liveness = Liveness::new();
        let mut wd = Watchdog::new(
            StubReader::new(vec![make_packet(0, 0), make_packet(1000, 0), make_packet(1, 320)]),
            config(10),
            liveness.clone(),
        );
        let ctl = wd.ctl();

        assert!(wd.read().is_some());
        assert!(wd.read().is_none()); // jump kills
        assert!(wd.read().is_none()); // still dead despite valid packet queued
        assert!(!ctl.update());
    }
}
