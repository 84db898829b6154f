//! RTCP sender/receiver report codec (RFC 3550)
//!
//! Interface-level support for the control endpoints: SR and RR packets
//! with their report blocks parse and compose bit-exactly. Report
//! scheduling and metric propagation live outside the receiver core;
//! session metrics provide the data a control endpoint would fill
//! blocks from.


use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::packet::units::SourceId;

/// RTCP parse failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RtcpError {
    /// Buffer shorter than the header demands.
    #[error("truncated RTCP packet")]
    Truncated,

    /// Version field is not 2 or the length is inconsistent.
    #[error("malformed RTCP packet: {0}")]
    BadFormat(&'static str),

    /// Packet type is not a supported report.
    #[error("unsupported RTCP packet type: {0}")]
    UnsupportedType(u8),
}

/// Packet type of a sender report.
pub const PT_SENDER_REPORT: u8 = 200;
/// Packet type of a receiver report.
pub const PT_RECEIVER_REPORT: u8 = 201;

/// One reception report block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportBlock {
    /// Stream the block reports on.
    pub ssrc: SourceId,
    /// Fraction of packets lost since the previous report, in 1/256
    /// units.
    pub fraction_lost: u8,
    /// Cumulative packets lost, 24-bit signed.
    pub cumulative_lost: i32,
    /// Extended highest sequence number received.
    pub ext_highest_seq: u32,
    /// Interarrival jitter, in timestamp units.
    pub jitter: u32,
    /// Middle 32 bits of the last SR's NTP timestamp.
    pub last_sr: u32,
    /// Delay since that SR, in 1/65536 seconds.
    pub delay_since_last_sr: u32,
}

impl ReportBlock {
    /// Wire size of one block.
    pub const SIZE: usize = 24;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.ssrc);
        let lost = self.cumulative_lost.clamp(-(1 << 23), (1 << 23) - 1);
        #[allow(clippy::cast_sign_loss, reason = "24-bit two's complement on the wire")]
        let lost24 = (lost as u32) & 0x00FF_FFFF;
        buf.put_u32((u32::from(self.fraction_lost) << 24) | lost24);
        buf.put_u32(self.ext_highest_seq);
        buf.put_u32(self.jitter);
        buf.put_u32(self.last_sr);
        buf.put_u32(self.delay_since_last_sr);
    }

    fn decode(buf: &[u8]) -> Self {
        let word1 = BigEndian::read_u32(&buf[4..8]);
        let mut lost = word1 & 0x00FF_FFFF;
        // Sign-extend 24 bits.
        if lost & 0x0080_0000 != 0 {
            lost |= 0xFF00_0000;
        }
        #[allow(clippy::cast_possible_wrap, reason = "sign extension above")]
        let cumulative_lost = lost as i32;
        #[allow(clippy::cast_possible_truncation, reason = "top byte")]
        let fraction_lost = (word1 >> 24) as u8;
        Self {
            ssrc: BigEndian::read_u32(&buf[0..4]),
            fraction_lost,
            cumulative_lost,
            ext_highest_seq: BigEndian::read_u32(&buf[8..12]),
            jitter: BigEndian::read_u32(&buf[12..16]),
            last_sr: BigEndian::read_u32(&buf[16..20]),
            delay_since_last_sr: BigEndian::read_u32(&buf[20..24]),
        }
    }
}

/// Sender report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderReport {
    /// Reporting sender.
    pub ssrc: SourceId,
    /// NTP timestamp, seconds part.
    pub ntp_seconds: u32,
    /// NTP timestamp, fraction part.
    pub ntp_fraction: u32,
    /// RTP timestamp corresponding to the NTP instant.
    pub rtp_timestamp: u32,
    /// Packets sent so far.
    pub packet_count: u32,
    /// Payload octets sent so far.
    pub octet_count: u32,
    /// Reception reports piggybacked on the SR.
    pub reports: Vec<ReportBlock>,
}

/// Receiver report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverReport {
    /// Reporting receiver.
    pub ssrc: SourceId,
    /// Reception reports.
    pub reports: Vec<ReportBlock>,
}

/// Either report kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    /// SR (packet type 200).
    SenderReport(SenderReport),
    /// RR (packet type 201).
    ReceiverReport(ReceiverReport),
}

fn encode_header(buf: &mut BytesMut, pt: u8, count: usize, length_words: usize) {
    #[allow(clippy::cast_possible_truncation, reason = "count capped at 31")]
    let count5 = (count as u8) & 0x1F;
    buf.put_u8(0x80 | count5);
    buf.put_u8(pt);
    #[allow(clippy::cast_possible_truncation, reason = "length validated by caller")]
    buf.put_u16(length_words as u16);
}

impl SenderReport {
    /// Encode to wire bytes.
    ///
    /// # Panics
    ///
    /// Panics with more than 31 report blocks; RFC 3550 caps the count
    /// field at five bits.
    #[must_use]
    pub fn compose(&self) -> Bytes {
        assert!(self.reports.len() <= 31, "too many report blocks");
        let length_words = 6 + self.reports.len() * 6;
        let mut buf = BytesMut::with_capacity(4 + length_words * 4);
        encode_header(&mut buf, PT_SENDER_REPORT, self.reports.len(), length_words);
        buf.put_u32(self.ssrc);
        buf.put_u32(self.ntp_seconds);
        buf.put_u32(self.ntp_fraction);
        buf.put_u32(self.rtp_timestamp);
        buf.put_u32(self.packet_count);
        buf.put_u32(self.octet_count);
        for report in &self.reports {
            report.encode(&mut buf);
        }
        buf.freeze()
    }
}

impl ReceiverReport {
    /// Encode to wire bytes.
    ///
    /// # Panics
    ///
    /// Panics with more than 31 report blocks.
    #[must_use]
    pub fn compose(&self) -> Bytes {
        assert!(self.reports.len() <= 31, "too many report blocks");
        let length_words = 1 + self.reports.len() * 6;
        let mut buf = BytesMut::with_capacity(4 + length_words * 4);
        encode_header(
            &mut buf,
            PT_RECEIVER_REPORT,
            self.reports.len(),
            length_words,
        );
        buf.put_u32(self.ssrc);
        for report in &self.reports {
            report.encode(&mut buf);
        }
        buf.freeze()
    }
}

/// Parse one RTCP packet.
///
/// # Errors
///
/// Returns [`RtcpError`] on truncation, a bad version, a length field
/// inconsistent with the report count, or an unsupported packet type.
pub fn parse(buf: &[u8]) -> Result<RtcpPacket, RtcpError> {
    if buf.len() < 8 {
        return Err(RtcpError::Truncated);
    }

    if buf[0] >> 6 != 2 {
        return Err(RtcpError::BadFormat("RTCP version must be 2"));
    }
    let count = usize::from(buf[0] & 0x1F);
    let pt = buf[1];
    let length_words = usize::from(BigEndian::read_u16(&buf[2..4]));
    let total = 4 + length_words * 4;
    if buf.len() < total {
        return Err(RtcpError::Truncated);
    }

    match pt {
        PT_SENDER_REPORT => {
            let needed = 4 + 24 + count * ReportBlock::SIZE;
            if total < needed {
                return Err(RtcpError::BadFormat("SR length inconsistent with count"));
            }
            let reports = (0..count)
                .map(|i| ReportBlock::decode(&buf[28 + i * ReportBlock::SIZE..]))
                .collect();
            Ok(RtcpPacket::SenderReport(SenderReport {
                ssrc: BigEndian::read_u32(&buf[4..8]),
                ntp_seconds: BigEndian::read_u32(&buf[8..12]),
                ntp_fraction: BigEndian::read_u32(&buf[12..16]),
                rtp_timestamp: BigEndian::read_u32(&buf[16..20]),
                packet_count: BigEndian::read_u32(&buf[20..24]),
                octet_count: BigEndian::read_u32(&buf[24..28]),
                reports,
            }))
        }
        PT_RECEIVER_REPORT => {
            let needed = 4 + 4 + count * ReportBlock::SIZE;
            if total < needed {
                return Err(RtcpError::BadFormat("RR length inconsistent with count"));
            }
            let reports = (0..count)
                .map(|i| ReportBlock::decode(&buf[8 + i * ReportBlock::SIZE..]))
                .collect();
            Ok(RtcpPacket::ReceiverReport(ReceiverReport {
                ssrc: BigEndian::read_u32(&buf[4..8]),
                reports,
            }))
        }
        other => Err(RtcpError::UnsupportedType(other)),
    }
}
