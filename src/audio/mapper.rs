//! Channel mapping
//!
//! Converts between channel masks with fixed mixing matrices. Known
//! pairs get proper up/down-mix weights; unknown pairs fall back to
//! copying shared channel positions and zero-filling the rest. Matching
//! masks pass frames through untouched.

use super::frame::{ChannelMask, Frame, FrameFlags};
use super::FrameReader;

/// Downmix weight for center and surround channels.
const SURROUND_WEIGHT: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Stateless converter between two channel layouts.
#[derive(Debug, Clone, Copy)]
pub struct ChannelMapper {
    in_mask: ChannelMask,
    out_mask: ChannelMask,
}

impl ChannelMapper {
    /// Create a mapper from `in_mask` to `out_mask`.
    #[must_use]
    pub fn new(in_mask: ChannelMask, out_mask: ChannelMask) -> Self {
        Self { in_mask, out_mask }
    }

    /// Whether mapping is a no-op.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.in_mask == self.out_mask
    }

    /// Map interleaved `input` into interleaved `output`.
    ///
    /// # Panics
    ///
    /// Panics if the buffers do not describe the same number of sample
    /// frames; mismatched staging buffers are a programming error.
    pub fn map(&self, input: &[f32], output: &mut [f32]) {
        let in_ch = self.in_mask.num_channels();
        let out_ch = self.out_mask.num_channels();
        assert_eq!(
            input.len() / in_ch,
            output.len() / out_ch,
            "frame count mismatch"
        );

        for (src, dst) in input
            .chunks_exact(in_ch)
            .zip(output.chunks_exact_mut(out_ch))
        {
            self.map_frame(src, dst);
        }
    }

    fn map_frame(&self, src: &[f32], dst: &mut [f32]) {
        match (self.in_mask, self.out_mask) {
            (ChannelMask::MONO, ChannelMask::STEREO) => {
                dst[0] = src[0];
                dst[1] = src[0];
            }
            (ChannelMask::STEREO, ChannelMask::MONO) => {
                dst[0] = (src[0] + src[1]) * 0.5;
            }
            (ChannelMask::STEREO, ChannelMask::SURROUND_5_1) => {
                dst.fill(0.0);
                dst[0] = src[0];
                dst[1] = src[1];
            }
            (ChannelMask::SURROUND_5_1, ChannelMask::STEREO) => {
                // FL FR FC LFE BL BR
                let l = src[0] + SURROUND_WEIGHT * (src[2] + src[4]);
                let r = src[1] + SURROUND_WEIGHT * (src[2] + src[5]);
                dst[0] = l.clamp(-1.0, 1.0);
                dst[1] = r.clamp(-1.0, 1.0);
            }
            (ChannelMask::MONO, ChannelMask::SURROUND_5_1) => {
                dst.fill(0.0);
                dst[0] = src[0];
                dst[1] = src[0];
            }
            (ChannelMask::SURROUND_5_1, ChannelMask::MONO) => {
                let l = src[0] + SURROUND_WEIGHT * (src[2] + src[4]);
                let r = src[1] + SURROUND_WEIGHT * (src[2] + src[5]);
                dst[0] = ((l + r) * 0.5).clamp(-1.0, 1.0);
            }
            _ => {
                // Identity on shared positions, zero-fill the rest,
                // drop extras.
                let shared = src.len().min(dst.len());
                dst[..shared].copy_from_slice(&src[..shared]);
                dst[shared..].fill(0.0);
            }
        }
    }
}

/// Frame-reader layer applying a channel mapper.
pub struct ChannelMapperReader {
    inner: Box<dyn FrameReader>,
    mapper: ChannelMapper,
    staging: Frame,
}

impl ChannelMapperReader {
    /// Wrap `inner`, converting from `in_mask` to `out_mask`.
    ///
    /// `staging_buf` backs the intermediate frame; the session leases it
    /// from the sample-buffer factory for the reader's lifetime.
    #[must_use]
    pub fn new(
        inner: Box<dyn FrameReader>,
        sample_rate: u32,
        in_mask: ChannelMask,
        out_mask: ChannelMask,
        chunk_frames: usize,
        staging_buf: Vec<f32>,
    ) -> Self {
        Self {
            inner,
            mapper: ChannelMapper::new(in_mask, out_mask),
            staging: Frame::with_buffer(staging_buf, sample_rate, in_mask, chunk_frames.max(1)),
        }
    }
}

impl FrameReader for ChannelMapperReader {
    fn read(&mut self, frame: &mut Frame) -> bool {
        if self.mapper.is_identity() {
            return self.inner.read(frame);
        }

        frame.reset();

        let total = frame.num_frames();
        if self.staging.num_frames() != total {
            self.staging = Frame::new(
                self.staging.sample_rate(),
                self.staging.channels(),
                total,
            );
        }

        if !self.inner.read(&mut self.staging) {
            return false;
        }

        self.mapper
            .map(self.staging.samples(), frame.samples_mut());

        frame.add_flags(self.staging.flags());
        if let Some(at) = self.staging.capture_timestamp() {
            frame.set_capture_timestamp(at);
        }

        true
    }
}
