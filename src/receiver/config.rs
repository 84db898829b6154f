//! Receiver configuration

use std::time::Duration;

use crate::audio::frame::ChannelMask;
use crate::audio::resampler::ResamplerProfile;
use crate::packet::fec::FecScheme;
use crate::session::SessionError;

/// Resampler implementation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResamplerBackend {
    /// The built-in polyphase sinc resampler.
    #[default]
    Builtin,
}

/// Everything the receiver core recognizes.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Control-loop setpoint for capture-to-playback delay.
    pub target_latency: Duration,
    /// Lower liveness bound on measured latency.
    pub min_latency: Duration,
    /// Upper liveness bound on measured latency.
    pub max_latency: Duration,
    /// Tolerated deviation from the target before the session is
    /// considered drifting.
    pub max_tolerance: Duration,
    /// Silence duration after which the watchdog declares a session
    /// dead.
    pub no_play_timeout: Duration,
    /// How long latency may stay out of tolerance before the session is
    /// declared dead.
    pub broken_playback_timeout: Duration,
    /// FEC scheme expected from senders.
    pub fec_encoding: FecScheme,
    /// Source symbols per FEC block.
    pub fec_source_block: usize,
    /// Repair symbols per FEC block.
    pub fec_repair_block: usize,
    /// Resampler implementation.
    pub resampler_backend: ResamplerBackend,
    /// Resampler quality profile.
    pub resampler_profile: ResamplerProfile,
    /// Sender packetization unit.
    pub packet_length: Duration,
    /// Pipeline buffer length.
    pub internal_frame_length: Duration,
    /// Output sample rate.
    pub sample_rate: u32,
    /// Output channel layout.
    pub channel_mask: ChannelMask,
    /// Reorder window, in packets.
    pub reorder_window: usize,
    /// Maximum tolerated seqnum jump.
    pub max_sn_jump: u16,
    /// Maximum tolerated timestamp jump.
    pub max_ts_jump: Duration,
    /// Drive playback rate from the latency control loop. When off and
    /// the stream rate matches the output rate, samples pass through
    /// bit-exactly.
    pub rate_adaptation: bool,
    /// Render a beep instead of silence into gaps.
    pub beep_on_gap: bool,
    /// Per-session ingress queue capacity, in packets.
    pub ingress_queue: usize,
    /// Sessions with no traffic for this long are reaped.
    pub session_idle_timeout: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            target_latency: Duration::from_millis(200),
            min_latency: Duration::from_millis(20),
            max_latency: Duration::from_secs(1),
            max_tolerance: Duration::from_millis(300),
            no_play_timeout: Duration::from_secs(2),
            broken_playback_timeout: Duration::from_secs(2),
            fec_encoding: FecScheme::None,
            fec_source_block: 10,
            fec_repair_block: 5,
            resampler_backend: ResamplerBackend::Builtin,
            resampler_profile: ResamplerProfile::Medium,
            packet_length: Duration::from_micros(7256), // 320 samples at 44.1 kHz
            internal_frame_length: Duration::from_millis(10),
            sample_rate: 44_100,
            channel_mask: ChannelMask::STEREO,
            reorder_window: 100,
            max_sn_jump: 100,
            max_ts_jump: Duration::from_secs(1),
            rate_adaptation: true,
            beep_on_gap: false,
            ingress_queue: 256,
            session_idle_timeout: Duration::from_secs(10),
        }
    }
}

impl ReceiverConfig {
    /// Check the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::BadConfig`] naming the first violated
    /// constraint.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.sample_rate == 0 {
            return Err(SessionError::BadConfig("sample rate must be non-zero"));
        }
        if self.channel_mask.num_channels() == 0 {
            return Err(SessionError::BadConfig("channel mask must be non-empty"));
        }
        if self.min_latency > self.target_latency || self.target_latency > self.max_latency {
            return Err(SessionError::BadConfig(
                "latency bounds must satisfy min <= target <= max",
            ));
        }
        if self.internal_frame_length.is_zero() || self.packet_length.is_zero() {
            return Err(SessionError::BadConfig("frame lengths must be non-zero"));
        }
        if self.reorder_window == 0 || self.ingress_queue == 0 {
            return Err(SessionError::BadConfig("windows must be non-zero"));
        }
        if self.fec_encoding != FecScheme::None
            && (self.fec_source_block == 0
                || self.fec_repair_block == 0
                || self.fec_source_block + self.fec_repair_block > crate::fec::rs8m::MAX_BLOCK)
        {
            return Err(SessionError::BadConfig("FEC block geometry out of range"));
        }
        Ok(())
    }

    /// Duration expressed in sample frames at `rate`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss,
        reason = "durations here are small and non-negative")]
    pub fn duration_to_frames(duration: Duration, rate: u32) -> usize {
        (duration.as_secs_f64() * f64::from(rate)).round() as usize
    }

    /// Watchdog countdown length: pipeline reads per `no_play_timeout`.
    #[must_use]
    pub fn no_play_ticks(&self) -> u32 {
        let frame = self.internal_frame_length.as_secs_f64();
        let ticks = (self.no_play_timeout.as_secs_f64() / frame).ceil();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss,
            reason = "bounded by validated config")]
        let ticks = ticks as u32;
        ticks.max(1)
    }
}
