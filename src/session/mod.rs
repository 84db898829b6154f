//! Per-source receive session
//!
//! A session owns the full layer chain for one sender: ingress queue,
//! optional FEC reader, playout delay, reorder window, watchdog,
//! depacketizer, latency monitor, resampler and channel mapper. The
//! chain is assembled once at creation and lives until the session is
//! reaped.

pub mod liveness;
pub mod router;


use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::audio::depacketizer::Depacketizer;
use crate::audio::frame::Frame;
use crate::audio::latency::{FreqEstimatorConfig, LatencyConfig, LatencyMonitor, LatencyReport};
use crate::audio::mapper::ChannelMapperReader;
use crate::audio::pcm::PcmFormat;
use crate::audio::resampler::{ScaleHandle, SincResampler};
use crate::audio::FrameReader;
use crate::fec::{FecConfig, FecReader};
use crate::packet::factory::Context;
use crate::packet::fec::FecScheme;
use crate::packet::queue::QueueReader;
use crate::packet::units::SourceId;
use crate::packet::{PacketQueue, PacketReader};
use crate::reader::watchdog::WatchdogCtl;
use crate::reader::{DelayedReader, SortedReader, Watchdog, WatchdogConfig};
use crate::receiver::config::ReceiverConfig;

pub use liveness::Liveness;
pub use router::SessionRouter;

/// Session construction failures. These are process-level errors: the
/// peer keeps serving other sessions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Payload type has no registered format.
    #[error("unknown payload type: {0}")]
    UnknownPayloadType(u8),

    /// Configuration is internally inconsistent.
    #[error("configuration inconsistent: {0}")]
    BadConfig(&'static str),
}

/// Counters and state snapshot for one session.
#[derive(Debug, Clone)]
pub struct SessionMetrics {
    /// Stream the session belongs to.
    pub source_id: SourceId,
    /// Whether the session is still alive.
    pub alive: bool,
    /// Ingress packets waiting for the pipeline.
    pub queue_depth: usize,
    /// Repair packets shed on ingress overflow.
    pub dropped_repair: u64,
    /// Source packets shed on ingress overflow.
    pub dropped_source: u64,
    /// Most recent capture-to-playback latency.
    pub latency: Option<Duration>,
}

/// One sender's receive chain.
pub struct Session {
    source_id: SourceId,
    queue: Arc<PacketQueue>,
    liveness: Liveness,
    watchdog_ctl: Arc<WatchdogCtl>,
    latency: LatencyReport,
    chain: Box<dyn FrameReader>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("source_id", &self.source_id)
            .field("queue", &self.queue)
            .field("liveness", &self.liveness)
            .field("watchdog_ctl", &self.watchdog_ctl)
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Assemble the chain for a source streaming `format`. Staging
    /// buffers are leased from `context` for the session's lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::BadConfig`] when the configuration fails
    /// validation.
    pub fn new(
        source_id: SourceId,
        format: PcmFormat,
        config: &ReceiverConfig,
        context: &Context,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let queue = Arc::new(PacketQueue::new(config.ingress_queue));
        let liveness = Liveness::new();

        let mut reader: Box<dyn PacketReader> =
            Box::new(QueueReader::new(Arc::clone(&queue)));

        if config.fec_encoding != FecScheme::None {
            let block_duration = config.packet_length * u32::try_from(config.fec_source_block)
                .unwrap_or(u32::MAX);
            reader = Box::new(FecReader::new(
                reader,
                FecConfig {
                    scheme: config.fec_encoding,
                    source_block_size: config.fec_source_block,
                    repair_block_size: config.fec_repair_block,
                    max_block_age: block_duration * 2,
                    max_blocks: 32,
                },
                liveness.clone(),
            ));
        }

        reader = Box::new(DelayedReader::new(reader, config.target_latency));
        reader = Box::new(SortedReader::new(reader, config.reorder_window));

        let watchdog = Watchdog::new(
            reader,
            WatchdogConfig {
                timeout_ticks: config.no_play_ticks(),
                max_sn_jump: config.max_sn_jump,
                max_ts_jump: u32::try_from(ReceiverConfig::duration_to_frames(
                    config.max_ts_jump,
                    format.sample_rate,
                ))
                .unwrap_or(u32::MAX),
            },
            liveness.clone(),
        );
        let watchdog_ctl = watchdog.ctl();

        let depacketizer = Depacketizer::new(Box::new(watchdog), format, config.beep_on_gap);

        let scale = ScaleHandle::new();
        let monitor = LatencyMonitor::new(
            Box::new(depacketizer),
            LatencyConfig {
                target_latency: config.target_latency,
                min_latency: config.min_latency,
                max_latency: config.max_latency,
                max_tolerance: config.max_tolerance,
                hold: config.broken_playback_timeout,
            },
            FreqEstimatorConfig::default(),
            format.sample_rate,
            scale.clone(),
            liveness.clone(),
        );
        let latency = monitor.report_handle();

        let chunk_frames =
            ReceiverConfig::duration_to_frames(config.internal_frame_length, format.sample_rate)
                .max(1);

        let frame_reader: Box<dyn FrameReader> =
            if config.rate_adaptation || format.sample_rate != config.sample_rate {
                Box::new(SincResampler::new(
                    Box::new(monitor),
                    format.sample_rate,
                    config.sample_rate,
                    format.channels.num_channels(),
                    chunk_frames,
                    config.resampler_profile,
                    scale,
                    context.sample_buffer(),
                ))
            } else {
                Box::new(monitor)
            };

        let chain: Box<dyn FrameReader> = Box::new(ChannelMapperReader::new(
            frame_reader,
            config.sample_rate,
            format.channels,
            config.channel_mask,
            chunk_frames,
            context.sample_buffer(),
        ));

        tracing::debug!(source_id, ?format, "session chain assembled");

        Ok(Self {
            source_id,
            queue,
            liveness,
            watchdog_ctl,
            latency,
            chain,
        })
    }

    /// Stream this session belongs to.
    #[must_use]
    pub fn source_id(&self) -> SourceId {
        self.source_id
    }

    /// Ingress queue shared with the network threads.
    #[must_use]
    pub fn queue(&self) -> Arc<PacketQueue> {
        Arc::clone(&self.queue)
    }

    /// Liveness handle.
    #[must_use]
    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    /// Whether the session is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    /// Snapshot of the session counters.
    #[must_use]
    pub fn metrics(&self) -> SessionMetrics {
        let queue_stats = self.queue.stats();
        SessionMetrics {
            source_id: self.source_id,
            alive: self.is_alive(),
            queue_depth: self.queue.len(),
            dropped_repair: queue_stats.dropped_repair,
            dropped_source: queue_stats.dropped_source,
            latency: self.latency.get(),
        }
    }

    /// Drain and drop anything still queued. Called when the session is
    /// reaped.
    pub fn shutdown(&self) {
        self.queue.clear();
    }
}

impl FrameReader for Session {
    fn read(&mut self, frame: &mut Frame) -> bool {
        if !self.liveness.is_alive() {
            return false;
        }

        // One watchdog tick per pipeline read.
        if !self.watchdog_ctl.update() {
            return false;
        }

        self.chain.read(frame)
    }
}
