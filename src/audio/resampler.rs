//! Polyphase windowed-sinc resampler
//!
//! Arbitrary-ratio conversion between the stream's nominal rate and the
//! playback rate. The kernel is a Blackman-windowed sinc sampled at a
//! fixed number of phases; each output sample interpolates the input at
//! a fractional position that advances by the nominal ratio times the
//! scale factor published by the latency monitor.

use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::frame::{Frame, FrameFlags};
use super::FrameReader;

/// Resampler quality profile; higher profiles use longer kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResamplerProfile {
    /// 8-tap kernel.
    Low,
    /// 16-tap kernel.
    #[default]
    Medium,
    /// 32-tap kernel.
    High,
}

impl ResamplerProfile {
    /// Kernel length in taps (even).
    #[must_use]
    pub fn taps(self) -> usize {
        match self {
            ResamplerProfile::Low => 8,
            ResamplerProfile::Medium => 16,
            ResamplerProfile::High => 32,
        }
    }
}

/// Number of precomputed kernel phases.
const PHASES: usize = 128;

/// Shared scale factor cell, written by the latency monitor and read by
/// the resampler.
#[derive(Debug, Clone)]
pub struct ScaleHandle {
    bits: Arc<AtomicU64>,
}

impl ScaleHandle {
    /// Create a handle at scale 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(1.0f64.to_bits())),
        }
    }

    /// Publish a new scale.
    pub fn set(&self, scale: f64) {
        self.bits.store(scale.to_bits(), Ordering::Relaxed);
    }

    /// Read the current scale.
    #[must_use]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

impl Default for ScaleHandle {
    fn default() -> Self {
        Self::new()
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-9 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

fn blackman(x: f64) -> f64 {
    // x in [-1, 1] across the kernel span.
    let t = (x + 1.0) / 2.0;
    0.42 - 0.5 * (2.0 * PI * t).cos() + 0.08 * (4.0 * PI * t).cos()
}

/// Precompute `PHASES + 1` normalized kernel rows of `taps` points.
fn build_table(taps: usize, cutoff: f64) -> Vec<f32> {
    let half = taps as f64 / 2.0;
    let mut table = vec![0.0f32; (PHASES + 1) * taps];

    for phase in 0..=PHASES {
        let frac = phase as f64 / PHASES as f64;
        let row = &mut table[phase * taps..(phase + 1) * taps];
        let mut sum = 0.0f64;
        for (t, cell) in row.iter_mut().enumerate() {
            // Input position t - (half - 1) relative to the output
            // point at fractional offset `frac`.
            let x = (t as f64 - (half - 1.0)) - frac;
            let value = cutoff * sinc(cutoff * x) * blackman(x / half);
            sum += value;
            #[allow(clippy::cast_possible_truncation, reason = "kernel values are small")]
            {
                *cell = value as f32;
            }
        }
        // Normalize for unity DC gain.
        if sum.abs() > 1e-12 {
            #[allow(clippy::cast_possible_truncation, reason = "normalization factor")]
            let norm = (1.0 / sum) as f32;
            for cell in row.iter_mut() {
                *cell *= norm;
            }
        }
    }

    table
}

/// Rate-converting frame reader.
pub struct SincResampler {
    inner: Box<dyn FrameReader>,
    channels: usize,
    /// Nominal input frames consumed per output frame.
    base_step: f64,
    scale: ScaleHandle,
    taps: usize,
    table: Vec<f32>,

    /// Interleaved input FIFO.
    fifo: VecDeque<f32>,
    /// Fractional read position within the FIFO, in frames.
    pos: f64,
    /// Staging buffer for pulls from the inner reader.
    staging: Frame,
    /// Flags accumulated from consumed input frames.
    pending_flags: FrameFlags,
    /// Capture timestamp of the most recent staged input frame.
    pending_capture: Option<Instant>,
    /// Input frames retired from the FIFO so far.
    frames_consumed: u64,
}

impl SincResampler {
    /// Create a resampler converting `source_rate` to `target_rate`.
    ///
    /// `chunk_frames` sizes the internal staging pulls and `staging_buf`
    /// backs them (leased from the sample-buffer factory); `scale` is
    /// the latency-monitor output applied on top of the nominal ratio.
    ///
    /// # Panics
    ///
    /// Panics if either rate is zero.
    #[must_use]
    pub fn new(
        inner: Box<dyn FrameReader>,
        source_rate: u32,
        target_rate: u32,
        channels: usize,
        chunk_frames: usize,
        profile: ResamplerProfile,
        scale: ScaleHandle,
        staging_buf: Vec<f32>,
    ) -> Self {
        assert!(source_rate > 0 && target_rate > 0, "zero sample rate");

        let base_step = f64::from(source_rate) / f64::from(target_rate);
        let taps = profile.taps();
        // Low-pass below the narrower Nyquist, with a little margin for
        // the control loop's scale excursions.
        let cutoff = (1.0 / base_step).min(1.0) * 0.92;

        tracing::debug!(
            source_rate,
            target_rate,
            base_step,
            taps,
            "initializing sinc resampler"
        );

        Self {
            inner,
            channels,
            base_step,
            scale,
            taps,
            table: build_table(taps, cutoff),
            fifo: VecDeque::new(),
            pos: 0.0,
            staging: Frame::with_buffer(
                staging_buf,
                source_rate,
                super::frame::ChannelMask::from_bits((1 << channels) - 1),
                chunk_frames.max(1),
            ),
            pending_flags: FrameFlags::empty(),
            pending_capture: None,
            frames_consumed: 0,
        }
    }

    /// Total input frames consumed so far.
    #[must_use]
    pub fn frames_consumed(&self) -> u64 {
        self.frames_consumed
    }

    fn fifo_frames(&self) -> usize {
        self.fifo.len() / self.channels
    }

    /// Pull one staging chunk from the inner reader into the FIFO.
    fn pull(&mut self) -> bool {
        if !self.inner.read(&mut self.staging) {
            return false;
        }
        self.pending_flags |= self.staging.flags();
        if let Some(at) = self.staging.capture_timestamp() {
            self.pending_capture = Some(at);
        }
        self.fifo.extend(self.staging.samples().iter().copied());
        true
    }

    /// Interpolate one output frame at the current position.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "pos is non-negative and bounded by the FIFO length"
    )]
    fn interpolate(&self, out: &mut [f32]) {
        let base = self.pos.floor() as usize;
        let frac = self.pos - self.pos.floor();
        let phase = (frac * PHASES as f64).round() as usize;
        let row = &self.table[phase * self.taps..(phase + 1) * self.taps];

        out.fill(0.0);
        for (t, &coeff) in row.iter().enumerate() {
            let frame_idx = base + t;
            let sample_base = frame_idx * self.channels;
            for (ch, value) in out.iter_mut().enumerate() {
                *value += coeff * self.fifo[sample_base + ch];
            }
        }
    }
}

impl FrameReader for SincResampler {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "pos is non-negative"
    )]
    fn read(&mut self, frame: &mut Frame) -> bool {
        frame.reset();

        let step = self.base_step * self.scale.get();
        let total = frame.num_frames();
        let mut produced = 0usize;

        while produced < total {
            // The kernel needs `taps` frames starting at floor(pos).
            let needed = self.pos.floor() as usize + self.taps;
            while self.fifo_frames() < needed {
                if !self.pull() {
                    return false;
                }
            }

            let start = produced * self.channels;
            let end = start + self.channels;
            self.interpolate(&mut frame.samples_mut()[start..end]);

            self.pos += step;
            produced += 1;
        }

        // Drop input frames the kernel can no longer reach.
        let retire = self.pos.floor() as usize;
        if retire > 0 {
            self.fifo.drain(..retire * self.channels);
            self.pos -= retire as f64;
            self.frames_consumed += retire as u64;
        }

        frame.add_flags(self.pending_flags);
        self.pending_flags = FrameFlags::empty();
        if let Some(at) = self.pending_capture {
            frame.set_capture_timestamp(at);
        }

        true
    }
}
