//! Stream units and wraparound-safe comparison helpers
//!
//! Sequence numbers and stream timestamps wrap; ordering anywhere in the
//! pipeline must go through the signed-distance helpers here, never raw
//! comparison operators.

/// 16-bit RTP sequence number.
pub type Seqnum = u16;

/// 32-bit per-sample stream timestamp in the stream's nominal rate.
pub type StreamTimestamp = u32;

/// 32-bit opaque stream identifier (RTP SSRC).
pub type SourceId = u32;

/// 32-bit FEC block number.
pub type BlockNumber = u32;

/// Signed distance from `b` to `a` in sequence-number space.
///
/// Negative when `a` is before `b`, taking wraparound into account.
#[must_use]
#[allow(clippy::cast_possible_wrap, reason = "wrap is the point")]
pub fn seqnum_diff(a: Seqnum, b: Seqnum) -> i16 {
    a.wrapping_sub(b) as i16
}

/// Check whether seqnum `a` is before `b`.
#[must_use]
pub fn seqnum_lt(a: Seqnum, b: Seqnum) -> bool {
    seqnum_diff(a, b) < 0
}

/// Check whether seqnum `a` is before or equal to `b`.
#[must_use]
pub fn seqnum_le(a: Seqnum, b: Seqnum) -> bool {
    seqnum_diff(a, b) <= 0
}

/// Signed distance from `b` to `a` in timestamp space.
#[must_use]
#[allow(clippy::cast_possible_wrap, reason = "wrap is the point")]
pub fn timestamp_diff(a: StreamTimestamp, b: StreamTimestamp) -> i32 {
    a.wrapping_sub(b) as i32
}

/// Check whether timestamp `a` is before `b`.
#[must_use]
pub fn timestamp_lt(a: StreamTimestamp, b: StreamTimestamp) -> bool {
    timestamp_diff(a, b) < 0
}

/// Check whether timestamp `a` is before or equal to `b`.
#[must_use]
pub fn timestamp_le(a: StreamTimestamp, b: StreamTimestamp) -> bool {
    timestamp_diff(a, b) <= 0
}

/// Signed distance from `b` to `a` in block-number space.
#[must_use]
#[allow(clippy::cast_possible_wrap, reason = "wrap is the point")]
pub fn block_diff(a: BlockNumber, b: BlockNumber) -> i32 {
    a.wrapping_sub(b) as i32
}

/// Generate a random non-zero source id for a new sending session.
#[must_use]
pub fn generate_source_id() -> SourceId {
    loop {
        let id = rand::random::<u32>();
        if id != 0 {
            return id;
        }
    }
}
