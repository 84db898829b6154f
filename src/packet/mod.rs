//! Packet model, wire codecs and ingress plumbing

pub mod factory;
pub mod fec;
pub mod queue;
pub mod rtp;
pub mod units;


use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use thiserror::Error;

pub use factory::{BufferFactory, PacketFactory};
pub use queue::PacketQueue;
pub use units::{
    generate_source_id, BlockNumber, Seqnum, SourceId, StreamTimestamp,
};

/// Errors produced while parsing wire packets.
#[derive(Debug, Error)]
pub enum PacketError {
    /// Header fields are inconsistent with the buffer contents.
    #[error("malformed packet: {0}")]
    BadFormat(&'static str),

    /// Buffer is shorter than the header requires.
    #[error("truncated packet: need {needed} bytes, have {have}")]
    Truncated {
        /// Bytes the header requires.
        needed: usize,
        /// Bytes actually present.
        have: usize,
    },

    /// Payload type has no registered decoder.
    #[error("unknown payload type: {0}")]
    UnknownPayloadType(u8),
}

/// Bit set describing what a packet carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(u8);

impl PacketFlags {
    /// Packet carries decodable audio samples.
    pub const AUDIO: Self = Self(0x01);
    /// Packet belongs to the repair stream.
    pub const REPAIR: Self = Self(0x02);
    /// Packet is an FEC source symbol.
    pub const FEC_SOURCE: Self = Self(0x04);
    /// Packet is an FEC repair symbol.
    pub const FEC_REPAIR: Self = Self(0x08);
    /// Packet was reconstructed by the FEC decoder, not received.
    pub const RESTORED: Self = Self(0x10);

    /// Empty flag set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Check whether all bits of `other` are set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two flag sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for PacketFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl std::ops::BitOrAssign for PacketFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// FEC block metadata attached to packets that participate in a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecMeta {
    /// Block this symbol belongs to.
    pub block_number: BlockNumber,
    /// Number of source symbols in the block (`K`). Zero on source
    /// packets, which do not carry block sizes on the wire.
    pub source_block_size: usize,
    /// Number of repair symbols in the block (`M`). Zero on source
    /// packets.
    pub repair_block_size: usize,
    /// Position of this symbol inside the block.
    pub encoding_symbol_id: usize,
}

/// An immutable, parsed network packet.
///
/// Produced by the parser on ingress, shared between pipeline queues as
/// `Arc<Packet>`, and released when the last reference drops.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Stream the packet belongs to (RTP SSRC).
    pub source_id: SourceId,
    /// Sequence number, wraparound arithmetic.
    pub seqnum: Seqnum,
    /// Stream timestamp of the first sample, wraparound arithmetic.
    pub timestamp: StreamTimestamp,
    /// RTP marker bit.
    pub marker: bool,
    /// RTP payload type.
    pub payload_type: u8,
    /// What the packet carries.
    pub flags: PacketFlags,
    /// Decodable payload bytes (sample data for audio packets).
    pub payload: Bytes,
    /// Entire wire image of the packet; FEC symbols are built from this.
    pub raw: Bytes,
    /// Wall-clock instant the packet was received (or reconstructed).
    pub capture_time: Instant,
    /// FEC block metadata, present on `FEC_SOURCE` / `FEC_REPAIR` packets.
    pub fec: Option<FecMeta>,
}

impl Packet {
    /// Number of samples per channel carried by the payload.
    #[must_use]
    pub fn sample_count(&self, channels: usize, bytes_per_sample: usize) -> u32 {
        debug_assert!(channels > 0 && bytes_per_sample > 0);
        u32::try_from(self.payload.len() / bytes_per_sample / channels).unwrap_or(0)
    }

    /// Stream timestamp one past the packet's last sample.
    #[must_use]
    pub fn end_timestamp(&self, channels: usize, bytes_per_sample: usize) -> StreamTimestamp {
        self.timestamp
            .wrapping_add(self.sample_count(channels, bytes_per_sample))
    }
}

/// Pull interface for the packet half of the pipeline.
///
/// Returning `None` means "nothing available right now"; it is not an
/// error and not necessarily the end of the stream.
pub trait PacketReader: Send {
    /// Pull the next packet, if one is ready.
    fn read(&mut self) -> Option<Arc<Packet>>;
}
