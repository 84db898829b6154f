//! Linear PCM payload codec
//!
//! The only supported encoding is 16-bit linear PCM in network byte
//! order, mono or stereo, at any rate. Static RTP payload types 10 and
//! 11 are registered out of the box; dynamic types are added per
//! session.

use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder};

use super::frame::ChannelMask;

/// PCM stream format selected by a payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    /// Nominal sample rate in Hz.
    pub sample_rate: u32,
    /// Channel layout.
    pub channels: ChannelMask,
}

impl PcmFormat {
    /// Bytes per single 16-bit sample.
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Bytes per interleaved sample frame.
    #[must_use]
    pub fn bytes_per_frame(&self) -> usize {
        Self::BYTES_PER_SAMPLE * self.channels.num_channels()
    }

    /// Sample frames carried by a payload of `len` bytes.
    #[must_use]
    pub fn frames_in(&self, len: usize) -> usize {
        len / self.bytes_per_frame()
    }
}

/// Payload-type registry for one peer.
#[derive(Debug, Clone)]
pub struct FormatMap {
    map: HashMap<u8, PcmFormat>,
}

impl FormatMap {
    /// Static L16 stereo payload type (RFC 3551).
    pub const L16_STEREO: u8 = 10;
    /// Static L16 mono payload type (RFC 3551).
    pub const L16_MONO: u8 = 11;

    /// Registry with the static L16 types.
    #[must_use]
    pub fn new() -> Self {
        let mut map = HashMap::new();
        map.insert(
            Self::L16_STEREO,
            PcmFormat {
                sample_rate: 44_100,
                channels: ChannelMask::STEREO,
            },
        );
        map.insert(
            Self::L16_MONO,
            PcmFormat {
                sample_rate: 44_100,
                channels: ChannelMask::MONO,
            },
        );
        Self { map }
    }

    /// Register a dynamic payload type.
    pub fn insert(&mut self, payload_type: u8, format: PcmFormat) {
        self.map.insert(payload_type, format);
    }

    /// Look up a payload type.
    #[must_use]
    pub fn get(&self, payload_type: u8) -> Option<PcmFormat> {
        self.map.get(&payload_type).copied()
    }
}

impl Default for FormatMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode big-endian 16-bit samples into floats in `[-1, 1]`.
///
/// # Panics
///
/// Panics if `out` is shorter than the payload requires; sizing the
/// destination is the caller's invariant.
pub fn decode_samples(payload: &[u8], out: &mut [f32]) {
    let n = payload.len() / PcmFormat::BYTES_PER_SAMPLE;
    assert!(out.len() >= n, "decode destination too small");
    for (i, sample) in out.iter_mut().take(n).enumerate() {
        let raw = BigEndian::read_i16(&payload[i * 2..i * 2 + 2]);
        *sample = f32::from(raw) / f32::from(i16::MAX);
    }
}

/// Encode floats into big-endian 16-bit samples, clamping to `[-1, 1]`.
pub fn encode_samples(samples: &[f32], out: &mut Vec<u8>) {
    out.reserve(samples.len() * PcmFormat::BYTES_PER_SAMPLE);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation, reason = "clamped before cast")]
        let raw = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        out.extend_from_slice(&raw.to_be_bytes());
    }
}
