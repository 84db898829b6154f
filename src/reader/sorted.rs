//! Sequence-number reordering
//!
//! Buffers packets inside a fixed reorder window and emits them in
//! sequence order. A gap older than the window is declared permanent and
//! skipped; duplicates and packets behind the emission cursor are
//! dropped.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::packet::units::{seqnum_diff, Seqnum};
use crate::packet::{Packet, PacketReader};

/// Drop counters for one sorted reader.
#[derive(Debug, Clone, Copy, Default)]
pub struct SortedStats {
    /// Duplicates of a buffered or already emitted seqnum.
    pub dropped_duplicate: u64,
    /// Packets behind the emission cursor.
    pub dropped_late: u64,
    /// Gaps declared permanent and skipped.
    pub gaps_skipped: u64,
}

/// Reorders packets by sequence number within a window.
pub struct SortedReader {
    inner: Box<dyn PacketReader>,
    window: usize,
    /// Buffered packets keyed by extended (unwrapped) sequence number.
    pending: BTreeMap<u64, Arc<Packet>>,
    /// Extended seqnum the next emission must not precede.
    next_ext: Option<u64>,
    /// Unwrap anchor: most recently observed (seqnum, extended) pair.
    anchor: Option<(Seqnum, u64)>,
    stats: SortedStats,
}

impl SortedReader {
    /// Wrap `inner` with a reorder window of `window` packets.
    ///
    /// # Panics
    ///
    /// Panics if `window` is zero.
    #[must_use]
    pub fn new(inner: Box<dyn PacketReader>, window: usize) -> Self {
        assert!(window > 0, "reorder window must be non-zero");
        Self {
            inner,
            window,
            pending: BTreeMap::new(),
            next_ext: None,
            anchor: None,
            stats: SortedStats::default(),
        }
    }

    /// Snapshot of the drop counters.
    #[must_use]
    pub fn stats(&self) -> SortedStats {
        self.stats
    }

    /// Number of buffered packets.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.pending.len()
    }

    /// Map a wrapping seqnum onto the extended (monotonic) axis.
    fn extend(&mut self, seqnum: Seqnum) -> u64 {
        let ext = match self.anchor {
            // Headroom below the start so impossibly old packets still
            // map to a valid (small) extended value.
            None => (1u64 << 17) + u64::from(seqnum),
            Some((anchor_seq, anchor_ext)) => {
                let diff = i64::from(seqnum_diff(seqnum, anchor_seq));
                anchor_ext.saturating_add_signed(diff)
            }
        };
        if self.anchor.map_or(true, |(_, a)| ext > a) {
            self.anchor = Some((seqnum, ext));
        }
        ext
    }

    fn buffer(&mut self, packet: Arc<Packet>) {
        let ext = self.extend(packet.seqnum);

        if self.next_ext.is_some_and(|next| ext < next) {
            self.stats.dropped_late += 1;
            return;
        }

        // Identical seqnum: the earlier arrival wins.
        if self.pending.contains_key(&ext) {
            self.stats.dropped_duplicate += 1;
            return;
        }

        self.pending.insert(ext, packet);
    }
}

impl PacketReader for SortedReader {
    fn read(&mut self) -> Option<Arc<Packet>> {
        while let Some(packet) = self.inner.read() {
            self.buffer(packet);
        }

        let (&head, _) = self.pending.first_key_value()?;

        let ready = match self.next_ext {
            None => true,
            Some(next) => head == next || self.pending.len() >= self.window,
        };
        if !ready {
            return None;
        }

        let packet = self.pending.remove(&head).expect("head present");

        if let Some(next) = self.next_ext {
            if head > next {
                self.stats.gaps_skipped += 1;
                tracing::debug!(
                    missing = head - next,
                    seqnum = packet.seqnum,
                    "reorder window exhausted, declaring gap permanent"
                );
            }
        }
        self.next_ext = Some(head + 1);

        Some(packet)
    }
}
