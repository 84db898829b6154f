//! RTP header codec (RFC 3550)
//!
//! The parser is the receiver's ingress edge; the composer exists because
//! the sender reuses the exact field layout and the tests synthesize
//! streams with it.

use std::time::Instant;

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

use super::fec::{self, FecScheme};
use super::units::{Seqnum, SourceId, StreamTimestamp};
use super::{FecMeta, Packet, PacketError, PacketFlags};

/// Fixed RTP header, 12 bytes on the wire plus optional CSRC list and
/// extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Version, always 2.
    pub version: u8,
    /// Padding flag.
    pub padding: bool,
    /// Extension flag.
    pub extension: bool,
    /// Number of CSRC entries following the fixed header.
    pub csrc_count: u8,
    /// Marker bit.
    pub marker: bool,
    /// Payload type, 7 bits.
    pub payload_type: u8,
    /// Sequence number.
    pub seqnum: Seqnum,
    /// Stream timestamp.
    pub timestamp: StreamTimestamp,
    /// Synchronization source id.
    pub ssrc: SourceId,
}

impl RtpHeader {
    /// Size of the fixed header.
    pub const SIZE: usize = 12;

    /// Decode the fixed header from the front of `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`PacketError::Truncated`] if the buffer is too short and
    /// [`PacketError::BadFormat`] if the version field is not 2.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < Self::SIZE {
            return Err(PacketError::Truncated {
                needed: Self::SIZE,
                have: buf.len(),
            });
        }

        let version = buf[0] >> 6;
        if version != 2 {
            return Err(PacketError::BadFormat("RTP version must be 2"));
        }

        Ok(Self {
            version,
            padding: buf[0] & 0x20 != 0,
            extension: buf[0] & 0x10 != 0,
            csrc_count: buf[0] & 0x0F,
            marker: buf[1] & 0x80 != 0,
            payload_type: buf[1] & 0x7F,
            seqnum: BigEndian::read_u16(&buf[2..4]),
            timestamp: BigEndian::read_u32(&buf[4..8]),
            ssrc: BigEndian::read_u32(&buf[8..12]),
        })
    }

    /// Byte offset of the payload: fixed header, CSRC list, extension.
    ///
    /// # Errors
    ///
    /// Returns [`PacketError::Truncated`] if the CSRC list or extension
    /// header runs past the end of the buffer.
    pub fn payload_offset(&self, buf: &[u8]) -> Result<usize, PacketError> {
        let mut offset = Self::SIZE + usize::from(self.csrc_count) * 4;

        if self.extension {
            if buf.len() < offset + 4 {
                return Err(PacketError::Truncated {
                    needed: offset + 4,
                    have: buf.len(),
                });
            }
            let ext_words = usize::from(BigEndian::read_u16(&buf[offset + 2..offset + 4]));
            offset += 4 + ext_words * 4;
        }

        if buf.len() < offset {
            return Err(PacketError::Truncated {
                needed: offset,
                have: buf.len(),
            });
        }

        Ok(offset)
    }

    /// Number of payload bytes, accounting for the padding trailer.
    ///
    /// # Errors
    ///
    /// Returns [`PacketError::BadFormat`] if the padding length is
    /// inconsistent with the payload size.
    pub fn payload_len(&self, buf: &[u8], offset: usize) -> Result<usize, PacketError> {
        let mut len = buf.len() - offset;

        if self.padding {
            if len == 0 {
                return Err(PacketError::BadFormat("padding flag on empty payload"));
            }
            let pad = usize::from(buf[buf.len() - 1]);
            if pad == 0 || pad > len {
                return Err(PacketError::BadFormat("padding length out of range"));
            }
            len -= pad;
        }

        Ok(len)
    }

    /// Encode the fixed header into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(
            (self.version << 6)
                | (u8::from(self.padding) << 5)
                | (u8::from(self.extension) << 4)
                | (self.csrc_count & 0x0F),
        );
        buf.put_u8((u8::from(self.marker) << 7) | (self.payload_type & 0x7F));
        buf.put_u16(self.seqnum);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
    }
}

/// Fields a composer needs to build one packet.
#[derive(Debug, Clone, Copy)]
pub struct ComposeParams {
    /// Stream id.
    pub source_id: SourceId,
    /// Sequence number.
    pub seqnum: Seqnum,
    /// Stream timestamp.
    pub timestamp: StreamTimestamp,
    /// Payload type.
    pub payload_type: u8,
    /// Marker bit.
    pub marker: bool,
}

fn simple_header(p: &ComposeParams) -> RtpHeader {
    RtpHeader {
        version: 2,
        padding: false,
        extension: false,
        csrc_count: 0,
        marker: p.marker,
        payload_type: p.payload_type,
        seqnum: p.seqnum,
        timestamp: p.timestamp,
        ssrc: p.source_id,
    }
}

/// Compose a plain audio packet.
#[must_use]
pub fn compose_audio(params: &ComposeParams, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(RtpHeader::SIZE + payload.len());
    simple_header(params).encode(&mut buf);
    buf.put_slice(payload);
    buf.freeze()
}

/// Compose an FEC source packet: RTP header, source payload id, payload.
#[must_use]
pub fn compose_source(
    params: &ComposeParams,
    block_number: u32,
    encoding_symbol_id: u16,
    payload: &[u8],
) -> Bytes {
    let mut buf =
        BytesMut::with_capacity(RtpHeader::SIZE + fec::SOURCE_ID_SIZE + payload.len());
    simple_header(params).encode(&mut buf);
    fec::encode_source_id(&mut buf, block_number, encoding_symbol_id);
    buf.put_slice(payload);
    buf.freeze()
}

/// Compose an FEC repair packet: RTP header, scheme repair header, symbol.
#[must_use]
pub fn compose_repair(
    params: &ComposeParams,
    scheme: FecScheme,
    meta: &FecMeta,
    symbol: &[u8],
) -> Bytes {
    let mut buf = BytesMut::with_capacity(RtpHeader::SIZE + 16 + symbol.len());
    simple_header(params).encode(&mut buf);
    fec::encode_repair_header(&mut buf, scheme, meta);
    buf.put_slice(symbol);
    buf.freeze()
}

/// Parse a packet from a source endpoint.
///
/// With [`FecScheme::None`] the payload is the RTP payload verbatim; with
/// an FEC scheme the source payload id is stripped into [`FecMeta`] and
/// the packet is flagged as an FEC source symbol.
///
/// # Errors
///
/// Returns [`PacketError`] on malformed or truncated input.
pub fn parse_source(
    raw: Bytes,
    scheme: FecScheme,
    capture_time: Instant,
) -> Result<Packet, PacketError> {
    let header = RtpHeader::decode(&raw)?;
    let offset = header.payload_offset(&raw)?;
    let len = header.payload_len(&raw, offset)?;

    let mut flags = PacketFlags::AUDIO;
    let mut fec_meta = None;
    let mut payload = raw.slice(offset..offset + len);

    if scheme != FecScheme::None {
        let (block_number, esi) = fec::decode_source_id(&payload)?;
        payload = payload.slice(fec::SOURCE_ID_SIZE..);
        flags |= PacketFlags::FEC_SOURCE;
        fec_meta = Some(FecMeta {
            block_number,
            source_block_size: 0,
            repair_block_size: 0,
            encoding_symbol_id: usize::from(esi),
        });
    }

    Ok(Packet {
        source_id: header.ssrc,
        seqnum: header.seqnum,
        timestamp: header.timestamp,
        marker: header.marker,
        payload_type: header.payload_type,
        flags,
        payload,
        raw,
        capture_time,
        fec: fec_meta,
    })
}

/// Parse a packet from a repair endpoint.
///
/// # Errors
///
/// Returns [`PacketError`] on malformed or truncated input, including a
/// repair header that does not match `scheme`.
pub fn parse_repair(
    raw: Bytes,
    scheme: FecScheme,
    capture_time: Instant,
) -> Result<Packet, PacketError> {
    if scheme == FecScheme::None {
        return Err(PacketError::BadFormat("repair packet without FEC scheme"));
    }

    let header = RtpHeader::decode(&raw)?;
    let offset = header.payload_offset(&raw)?;
    let len = header.payload_len(&raw, offset)?;
    let body = raw.slice(offset..offset + len);

    let (meta, header_size) = fec::decode_repair_header(&body, scheme)?;
    let payload = body.slice(header_size..);

    Ok(Packet {
        source_id: header.ssrc,
        seqnum: header.seqnum,
        timestamp: header.timestamp,
        marker: header.marker,
        payload_type: header.payload_type,
        flags: PacketFlags::REPAIR | PacketFlags::FEC_REPAIR,
        payload,
        raw,
        capture_time,
        fec: Some(meta),
    })
}
