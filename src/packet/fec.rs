//! FEC payload-id codecs
//!
//! Source packets carry a 6-byte payload id (block number + symbol id)
//! prepended to the RTP payload, per the FEC framework. Repair packets
//! carry a scheme-specific header describing the whole block.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};

use super::units::BlockNumber;
use super::{FecMeta, PacketError};

/// FEC scheme in effect for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FecScheme {
    /// No FEC; source packets are plain RTP.
    #[default]
    None,
    /// Reed-Solomon over GF(2^8).
    Rs8m,
    /// LDPC-Staircase.
    LdpcStaircase,
}

impl FecScheme {
    /// Wire size of this scheme's repair header.
    #[must_use]
    pub fn repair_header_size(self) -> usize {
        match self {
            FecScheme::None => 0,
            FecScheme::Rs8m => RS8M_HEADER_SIZE,
            FecScheme::LdpcStaircase => LDPC_HEADER_SIZE,
        }
    }
}

/// Size of the source payload id.
pub const SOURCE_ID_SIZE: usize = 6;

/// Reed-Solomon repair header: block (4), esi (2), k (2), m (2).
pub const RS8M_HEADER_SIZE: usize = 10;

/// LDPC-Staircase repair header: block (4), esi (2), k (2), m (2), seed (2).
pub const LDPC_HEADER_SIZE: usize = 12;

/// Encode the source payload id.
pub fn encode_source_id(buf: &mut BytesMut, block_number: BlockNumber, esi: u16) {
    buf.put_u32(block_number);
    buf.put_u16(esi);
}

/// Decode the source payload id from the front of `buf`.
///
/// # Errors
///
/// Returns [`PacketError::Truncated`] if fewer than six bytes remain.
pub fn decode_source_id(buf: &[u8]) -> Result<(BlockNumber, u16), PacketError> {
    if buf.len() < SOURCE_ID_SIZE {
        return Err(PacketError::Truncated {
            needed: SOURCE_ID_SIZE,
            have: buf.len(),
        });
    }
    Ok((BigEndian::read_u32(&buf[0..4]), BigEndian::read_u16(&buf[4..6])))
}

/// Encode a repair header for `scheme`.
///
/// # Panics
///
/// Panics if `scheme` is [`FecScheme::None`] or if block sizes exceed the
/// wire fields; repair packets for a disabled scheme are a programming
/// error.
pub fn encode_repair_header(buf: &mut BytesMut, scheme: FecScheme, meta: &FecMeta) {
    let k = u16::try_from(meta.source_block_size).expect("source block size fits u16");
    let m = u16::try_from(meta.repair_block_size).expect("repair block size fits u16");
    let esi = u16::try_from(meta.encoding_symbol_id).expect("symbol id fits u16");

    match scheme {
        FecScheme::None => panic!("repair header for disabled FEC"),
        FecScheme::Rs8m => {
            buf.put_u32(meta.block_number);
            buf.put_u16(esi);
            buf.put_u16(k);
            buf.put_u16(m);
        }
        FecScheme::LdpcStaircase => {
            buf.put_u32(meta.block_number);
            buf.put_u16(esi);
            buf.put_u16(k);
            buf.put_u16(m);
            buf.put_u16(ldpc_seed(meta.block_number));
        }
    }
}

/// Decode a repair header for `scheme` from the front of `buf`.
///
/// Returns the parsed metadata and the header size consumed.
///
/// # Errors
///
/// Returns [`PacketError`] if the buffer is too short or the fields are
/// inconsistent (zero block sizes, symbol id outside the block).
pub fn decode_repair_header(
    buf: &[u8],
    scheme: FecScheme,
) -> Result<(FecMeta, usize), PacketError> {
    let size = scheme.repair_header_size();
    if buf.len() < size {
        return Err(PacketError::Truncated {
            needed: size,
            have: buf.len(),
        });
    }

    let meta = match scheme {
        FecScheme::None => {
            return Err(PacketError::BadFormat("repair header for disabled FEC"))
        }
        FecScheme::Rs8m | FecScheme::LdpcStaircase => FecMeta {
            block_number: BigEndian::read_u32(&buf[0..4]),
            encoding_symbol_id: usize::from(BigEndian::read_u16(&buf[4..6])),
            source_block_size: usize::from(BigEndian::read_u16(&buf[6..8])),
            repair_block_size: usize::from(BigEndian::read_u16(&buf[8..10])),
        },
    };

    if scheme == FecScheme::LdpcStaircase {
        let seed = BigEndian::read_u16(&buf[10..12]);
        if seed != ldpc_seed(meta.block_number) {
            return Err(PacketError::BadFormat("LDPC seed mismatch"));
        }
    }

    if meta.source_block_size == 0 || meta.repair_block_size == 0 {
        return Err(PacketError::BadFormat("zero FEC block size"));
    }
    if meta.encoding_symbol_id >= meta.source_block_size + meta.repair_block_size {
        return Err(PacketError::BadFormat("symbol id outside block"));
    }

    Ok((meta, size))
}

/// PRNG seed for a block's LDPC parity equations.
///
/// Both endpoints derive it from the block number so source packets need
/// not carry it; the repair header echoes it as a consistency check.
#[must_use]
#[allow(clippy::cast_possible_truncation, reason = "intentional fold to 16 bits")]
pub fn ldpc_seed(block_number: BlockNumber) -> u16 {
    (block_number ^ (block_number >> 16)) as u16 | 1
}
