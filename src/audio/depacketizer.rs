//! Depacketizer
//!
//! Reads packets, decodes PCM, and produces a continuous sample stream.
//! Owns the next-timestamp cursor: samples the packets do not cover are
//! rendered as silence (or a beep when configured), stale packets are
//! dropped, and the frame flags record what happened.

use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::packet::units::{timestamp_diff, timestamp_le, StreamTimestamp};
use crate::packet::{Packet, PacketFlags, PacketReader};

use super::frame::{Frame, FrameFlags};
use super::pcm::{self, PcmFormat};
use super::FrameReader;

/// Beep tone rendered into gaps when enabled, Hz.
const BEEP_FREQ: f32 = 880.0;

/// Reads logged between stat reports.
const REPORT_INTERVAL: u64 = 1000;

/// Cumulative depacketizer counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepacketizerStats {
    /// Samples decoded from packets (per channel).
    pub decoded_samples: u64,
    /// Samples rendered as silence inside gaps.
    pub missing_samples: u64,
    /// Samples rendered before the first packet arrived.
    pub idle_samples: u64,
    /// Stale packets discarded.
    pub late_packets: u64,
}

/// Packet reader to frame reader adapter.
pub struct Depacketizer {
    reader: Box<dyn PacketReader>,
    format: PcmFormat,
    beep: bool,

    packet: Option<Arc<Packet>>,
    /// Next stream timestamp to render. Valid once `started`.
    cursor: StreamTimestamp,
    started: bool,
    /// Wall-clock anchor for the cursor: capture time and stream
    /// timestamp of the most recent packet.
    capture_anchor: Option<(Instant, StreamTimestamp)>,

    beep_phase: f32,
    reads: u64,
    stats: DepacketizerStats,
}

impl Depacketizer {
    /// Create a depacketizer decoding `format` from `reader`.
    #[must_use]
    pub fn new(reader: Box<dyn PacketReader>, format: PcmFormat, beep: bool) -> Self {
        Self {
            reader,
            format,
            beep,
            packet: None,
            cursor: 0,
            started: false,
            capture_anchor: None,
            beep_phase: 0.0,
            reads: 0,
            stats: DepacketizerStats::default(),
        }
    }

    /// Whether the first packet has been decoded.
    #[must_use]
    pub fn started(&self) -> bool {
        self.started
    }

    /// Next stream timestamp to be rendered.
    ///
    /// # Panics
    ///
    /// Panics unless [`started`](Self::started) is true; asking before
    /// the stream begins is a programming error.
    #[must_use]
    pub fn next_timestamp(&self) -> StreamTimestamp {
        assert!(self.started, "depacketizer cursor read before start");
        self.cursor
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> DepacketizerStats {
        self.stats
    }

    /// Fetch the next usable packet, dropping stale ones.
    fn fetch(&mut self) -> u64 {
        let mut dropped = 0;
        while self.packet.is_none() {
            let Some(packet) = self.reader.read() else {
                break;
            };

            if !packet.flags.contains(PacketFlags::AUDIO) {
                dropped += 1;
                continue;
            }

            let channels = self.format.channels.num_channels();
            let end = packet.end_timestamp(channels, PcmFormat::BYTES_PER_SAMPLE);
            if self.started && timestamp_le(end, self.cursor) {
                dropped += 1;
                continue;
            }

            self.capture_anchor = Some((packet.capture_time, packet.timestamp));
            self.packet = Some(packet);
        }
        self.stats.late_packets += dropped;
        dropped
    }

    /// Render `n` frames of gap fill at `out`.
    fn fill_gap(&mut self, out: &mut [f32]) {
        if self.beep {
            let step = TAU * BEEP_FREQ / self.format.sample_rate as f32;
            let channels = self.format.channels.num_channels();
            for frame in out.chunks_mut(channels) {
                let value = self.beep_phase.sin() * 0.5;
                frame.fill(value);
                self.beep_phase = (self.beep_phase + step) % TAU;
            }
        } else {
            out.fill(0.0);
        }
    }

    /// Capture instant corresponding to stream timestamp `ts`.
    fn capture_at(&self, ts: StreamTimestamp) -> Option<Instant> {
        let (anchor_time, anchor_ts) = self.capture_anchor?;
        let diff = timestamp_diff(ts, anchor_ts);
        let offset = Duration::from_secs_f64(
            f64::from(diff.unsigned_abs()) / f64::from(self.format.sample_rate),
        );
        Some(if diff >= 0 {
            anchor_time + offset
        } else {
            anchor_time.checked_sub(offset).unwrap_or(anchor_time)
        })
    }

    fn report(&mut self) {
        self.reads += 1;
        if self.reads % REPORT_INTERVAL == 0 {
            let s = self.stats;
            tracing::debug!(
                decoded = s.decoded_samples,
                missing = s.missing_samples,
                idle = s.idle_samples,
                late = s.late_packets,
                "depacketizer stats"
            );
        }
    }
}

impl FrameReader for Depacketizer {
    #[allow(clippy::cast_possible_truncation, reason = "counts bounded by frame size")]
    fn read(&mut self, frame: &mut Frame) -> bool {
        frame.reset();
        self.report();

        let channels = self.format.channels.num_channels();
        let total = frame.num_frames();
        let mut filled = 0usize;
        let mut decoded = 0usize;
        let mut missing = 0usize;
        let mut dropped = 0u64;

        let mut frame_start: Option<StreamTimestamp> = self.started.then_some(self.cursor);

        while filled < total {
            if self.packet.is_none() {
                dropped += self.fetch();
            }

            let Some(packet) = self.packet.clone() else {
                // Starved: the rest of the frame is silence. Before the
                // first packet this is idle output, not a gap.
                let out = &mut frame.samples_mut()[filled * channels..];
                let n = total - filled;
                if self.started {
                    self.fill_gap(out);
                    self.cursor = self.cursor.wrapping_add(n as u32);
                    self.stats.missing_samples += n as u64;
                    missing += n;
                } else {
                    out.fill(0.0);
                    self.stats.idle_samples += n as u64;
                }
                filled = total;
                break;
            };

            if !self.started {
                self.cursor = packet.timestamp;
                self.started = true;
            }
            if frame_start.is_none() {
                frame_start = Some(self.cursor);
            }

            let gap = timestamp_diff(packet.timestamp, self.cursor);
            if gap > 0 {
                // Missing samples up to the packet's start.
                let n = (gap as usize).min(total - filled);
                let out =
                    &mut frame.samples_mut()[filled * channels..(filled + n) * channels];
                self.fill_gap(out);
                self.cursor = self.cursor.wrapping_add(n as u32);
                self.stats.missing_samples += n as u64;
                missing += n;
                filled += n;
                continue;
            }

            // Cursor lies inside the packet.
            let offset = gap.unsigned_abs() as usize;
            let packet_frames =
                self.format.frames_in(packet.payload.len());
            debug_assert!(offset < packet_frames, "stale packet past fetch filter");

            let n = (packet_frames - offset).min(total - filled);
            let bytes = &packet.payload
                [offset * self.format.bytes_per_frame()..(offset + n) * self.format.bytes_per_frame()];
            let out = &mut frame.samples_mut()[filled * channels..(filled + n) * channels];
            pcm::decode_samples(bytes, out);

            self.cursor = self.cursor.wrapping_add(n as u32);
            self.stats.decoded_samples += n as u64;
            decoded += n;
            filled += n;

            if offset + n == packet_frames {
                self.packet = None;
            }
        }

        if !self.started {
            frame.add_flags(FrameFlags::EMPTY | FrameFlags::SILENT);
        }
        if missing > 0 {
            frame.add_flags(FrameFlags::INCOMPLETE);
        }
        if decoded == 0 && self.started && !self.beep {
            frame.add_flags(FrameFlags::SILENT);
        }
        if dropped > 0 {
            frame.add_flags(FrameFlags::DROPS);
        }

        if let Some(start) = frame_start {
            if let Some(at) = self.capture_at(start) {
                frame.set_capture_timestamp(at);
            }
        }

        true
    }
}
