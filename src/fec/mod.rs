//! FEC block reader and decoders
//!
//! Source and repair packets accumulate in block-aligned windows; once a
//! block is complete, aged out, or evicted it is decoded if possible and
//! its source packets are emitted in sequence order. Blocks always emit
//! in block-number order.

pub mod ldpc;
pub mod rs8m;


use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::packet::fec::FecScheme;
use crate::packet::units::{block_diff, BlockNumber};
use crate::packet::{rtp, Packet, PacketFlags, PacketReader};
use crate::reader::delayed::Clock;
use crate::session::Liveness;

pub use ldpc::LdpcCodec;
pub use rs8m::Rs8mCodec;

/// FEC-layer errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FecError {
    /// Too few symbols survived to rebuild the block. Not fatal; the
    /// missing packets become gaps.
    #[error("block reconstruction failed: insufficient symbols")]
    ReconstructionFailed,

    /// Source and repair endpoints disagree about the scheme or block
    /// geometry. Session-fatal.
    #[error("FEC scheme mismatch between endpoints")]
    SchemeMismatch,
}

/// Erasure codec for one scheme.
///
/// `symbols` holds `k` source slots followed by `m` repair slots, all
/// symbols the same length; `decode` fills the missing source slots.
pub trait BlockCodec: Send {
    /// Produce `m` repair symbols for the block.
    fn encode(&mut self, sources: &[Vec<u8>], m: usize, seed: u16) -> Vec<Vec<u8>>;

    /// Reconstruct missing source symbols in place.
    ///
    /// # Errors
    ///
    /// Returns [`FecError::ReconstructionFailed`] when the surviving
    /// symbols are insufficient.
    fn decode(
        &mut self,
        symbols: &mut [Option<Vec<u8>>],
        k: usize,
        m: usize,
        seed: u16,
    ) -> Result<(), FecError>;
}

/// Instantiate the codec for a scheme, if it has one.
#[must_use]
pub fn new_codec(scheme: FecScheme) -> Option<Box<dyn BlockCodec>> {
    match scheme {
        FecScheme::None => None,
        FecScheme::Rs8m => Some(Box::new(Rs8mCodec::new())),
        FecScheme::LdpcStaircase => Some(Box::new(LdpcCodec::new())),
    }
}

/// FEC reader tuning.
#[derive(Debug, Clone, Copy)]
pub struct FecConfig {
    /// Scheme both endpoints agreed on.
    pub scheme: FecScheme,
    /// Source symbols per block (`K`).
    pub source_block_size: usize,
    /// Repair symbols per block (`M`).
    pub repair_block_size: usize,
    /// Age at which an incomplete block is force-closed; typically twice
    /// the block duration.
    pub max_block_age: Duration,
    /// Open-block window; the eldest block is evicted beyond this.
    pub max_blocks: usize,
}

impl Default for FecConfig {
    fn default() -> Self {
        Self {
            scheme: FecScheme::Rs8m,
            source_block_size: 10,
            repair_block_size: 5,
            max_block_age: Duration::from_millis(140),
            max_blocks: 32,
        }
    }
}

/// Counters for one FEC reader.
#[derive(Debug, Clone, Copy, Default)]
pub struct FecStats {
    /// Source packets rebuilt from repairs.
    pub recovered_packets: u64,
    /// Blocks closed with missing sources.
    pub failed_blocks: u64,
    /// Packets for already-closed blocks.
    pub dropped_late: u64,
    /// Malformed or out-of-range symbols.
    pub dropped_invalid: u64,
}

struct Block {
    number: BlockNumber,
    sources: Vec<Option<Arc<Packet>>>,
    repairs: Vec<Option<Arc<Packet>>>,
    eldest: Instant,
}

impl Block {
    fn new(number: BlockNumber, k: usize, m: usize, now: Instant) -> Self {
        Self {
            number,
            sources: vec![None; k],
            repairs: vec![None; m],
            eldest: now,
        }
    }

    fn n_sources(&self) -> usize {
        self.sources.iter().filter(|s| s.is_some()).count()
    }

    fn n_repairs(&self) -> usize {
        self.repairs.iter().filter(|s| s.is_some()).count()
    }

    fn is_complete(&self) -> bool {
        self.sources.iter().all(Option::is_some)
    }
}

/// Buffers source and repair packets and emits repaired source streams.
pub struct FecReader {
    inner: Box<dyn PacketReader>,
    config: FecConfig,
    codec: Box<dyn BlockCodec>,
    liveness: Liveness,
    clock: Clock,
    /// Open blocks keyed by extended (unwrapped) block number.
    blocks: BTreeMap<u64, Block>,
    /// Extended number the next closed block must not precede.
    next_block: Option<u64>,
    anchor: Option<(BlockNumber, u64)>,
    ready: VecDeque<Arc<Packet>>,
    stats: FecStats,
}

impl FecReader {
    /// Wrap `inner`. Scheme-mismatch conditions kill through `liveness`.
    ///
    /// # Panics
    ///
    /// Panics if the scheme is [`FecScheme::None`] or the block geometry
    /// is degenerate; assembling an FEC reader without FEC is a
    /// programming error.
    #[must_use]
    pub fn new(inner: Box<dyn PacketReader>, config: FecConfig, liveness: Liveness) -> Self {
        Self::with_clock(inner, config, liveness, Box::new(Instant::now))
    }

    /// Same as [`FecReader::new`] with an injected clock.
    ///
    /// # Panics
    ///
    /// See [`FecReader::new`].
    #[must_use]
    pub fn with_clock(
        inner: Box<dyn PacketReader>,
        config: FecConfig,
        liveness: Liveness,
        clock: Clock,
    ) -> Self {
        let codec = new_codec(config.scheme).expect("FEC reader requires a scheme");
        assert!(
            config.source_block_size > 0 && config.repair_block_size > 0,
            "degenerate FEC block geometry"
        );
        Self {
            inner,
            config,
            codec,
            liveness,
            clock,
            blocks: BTreeMap::new(),
            next_block: None,
            anchor: None,
            ready: VecDeque::new(),
            stats: FecStats::default(),
        }
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> FecStats {
        self.stats
    }

    fn extend(&mut self, number: BlockNumber) -> u64 {
        let ext = match self.anchor {
            None => (1u64 << 33) + u64::from(number),
            Some((anchor_num, anchor_ext)) => {
                let diff = i64::from(block_diff(number, anchor_num));
                anchor_ext.saturating_add_signed(diff)
            }
        };
        if self.anchor.map_or(true, |(_, a)| ext > a) {
            self.anchor = Some((number, ext));
        }
        ext
    }

    fn buffer(&mut self, packet: Arc<Packet>, now: Instant) {
        let Some(meta) = packet.fec else {
            // A packet without FEC metadata on an FEC session means the
            // endpoints are configured inconsistently.
            self.liveness.kill("packet without FEC metadata");
            return;
        };

        let is_repair = packet.flags.contains(PacketFlags::FEC_REPAIR);
        let (k, m) = (self.config.source_block_size, self.config.repair_block_size);

        if is_repair && (meta.source_block_size != k || meta.repair_block_size != m) {
            tracing::warn!(
                wire_k = meta.source_block_size,
                wire_m = meta.repair_block_size,
                k,
                m,
                "repair block geometry disagrees with session config"
            );
            self.liveness.kill("FEC scheme mismatch");
            return;
        }

        let ext = self.extend(meta.block_number);
        if self.next_block.is_some_and(|next| ext < next) {
            self.stats.dropped_late += 1;
            return;
        }

        let block = self
            .blocks
            .entry(ext)
            .or_insert_with(|| Block::new(meta.block_number, k, m, now));

        let slot = if is_repair {
            let esi = meta.encoding_symbol_id;
            if esi < k || esi >= k + m {
                self.stats.dropped_invalid += 1;
                return;
            }
            &mut block.repairs[esi - k]
        } else {
            let esi = meta.encoding_symbol_id;
            if esi >= k {
                self.stats.dropped_invalid += 1;
                return;
            }
            &mut block.sources[esi]
        };

        // First arrival wins.
        if slot.is_none() {
            *slot = Some(packet);
        }
    }

    /// Close the head block: decode what can be decoded, queue the
    /// sources for emission, free the slot.
    fn close_block(&mut self, ext: u64, now: Instant) {
        let mut block = self.blocks.remove(&ext).expect("block present");
        let (k, m) = (self.config.source_block_size, self.config.repair_block_size);

        if !block.is_complete() && block.n_repairs() > 0 {
            match self.reconstruct(&mut block, now) {
                Ok(recovered) => {
                    self.stats.recovered_packets += recovered;
                }
                Err(FecError::ReconstructionFailed) => {
                    tracing::debug!(
                        block = block.number,
                        sources = block.n_sources(),
                        repairs = block.n_repairs(),
                        k,
                        m,
                        "block reconstruction failed, emitting survivors"
                    );
                }
                Err(FecError::SchemeMismatch) => {
                    self.liveness.kill("FEC scheme mismatch");
                    return;
                }
            }
        }

        if !block.is_complete() {
            self.stats.failed_blocks += 1;
        }

        self.ready.extend(block.sources.into_iter().flatten());
        self.next_block = Some(ext + 1);
    }

    /// Rebuild missing sources from whole-datagram symbols. Returns the
    /// number of packets recovered.
    fn reconstruct(&mut self, block: &mut Block, now: Instant) -> Result<u64, FecError> {
        let (k, m) = (self.config.source_block_size, self.config.repair_block_size);

        let symbol_size = block
            .sources
            .iter()
            .flatten()
            .map(|p| p.raw.len())
            .chain(block.repairs.iter().flatten().map(|p| p.payload.len()))
            .next()
            .ok_or(FecError::ReconstructionFailed)?;

        let uniform = block
            .sources
            .iter()
            .flatten()
            .all(|p| p.raw.len() == symbol_size)
            && block
                .repairs
                .iter()
                .flatten()
                .all(|p| p.payload.len() == symbol_size);
        if !uniform {
            tracing::debug!(block = block.number, "uneven symbol sizes, cannot decode");
            return Err(FecError::ReconstructionFailed);
        }

        let mut symbols: Vec<Option<Vec<u8>>> = block
            .sources
            .iter()
            .map(|s| s.as_ref().map(|p| p.raw.to_vec()))
            .chain(block.repairs.iter().map(|r| r.as_ref().map(|p| p.payload.to_vec())))
            .collect();

        let seed = crate::packet::fec::ldpc_seed(block.number);
        self.codec.decode(&mut symbols, k, m, seed)?;

        let mut recovered = 0;
        for (esi, slot) in block.sources.iter_mut().enumerate() {
            if slot.is_some() {
                continue;
            }
            let Some(bytes) = symbols[esi].take() else {
                continue;
            };
            match rtp::parse_source(bytes.into(), self.config.scheme, now) {
                Ok(mut packet) => {
                    packet.flags |= PacketFlags::RESTORED;
                    *slot = Some(Arc::new(packet));
                    recovered += 1;
                }
                Err(err) => {
                    tracing::debug!(block = block.number, esi, %err,
                        "recovered symbol does not parse");
                    self.stats.dropped_invalid += 1;
                }
            }
        }

        Ok(recovered)
    }

    /// Close every head block that is complete, aged out, or evicted by
    /// the open-block cap.
    fn advance(&mut self, now: Instant) {
        loop {
            let Some((&ext, block)) = self.blocks.first_key_value() else {
                break;
            };

            let in_order = self.next_block.map_or(true, |next| ext <= next);
            let aged = now.duration_since(block.eldest) >= self.config.max_block_age;
            let evict = self.blocks.len() > self.config.max_blocks;

            if (block.is_complete() && in_order) || aged || evict {
                self.close_block(ext, now);
            } else {
                break;
            }
        }
    }
}

impl PacketReader for FecReader {
    fn read(&mut self) -> Option<Arc<Packet>> {
        if !self.liveness.is_alive() {
            return None;
        }

        let now = (self.clock)();

        while let Some(packet) = self.inner.read() {
            self.buffer(packet, now);
            if !self.liveness.is_alive() {
                return None;
            }
        }

        self.advance(now);

        self.ready.pop_front()
    }
}
