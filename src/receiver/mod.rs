//! Receiver facade
//!
//! Ties the pieces together: an ingress handle the network threads feed
//! raw datagrams into, and the pipeline-side frame pump that drives all
//! session chains and mixes them onto the output frame.

pub mod config;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Instant;

use crate::audio::frame::Frame;
use crate::audio::mixer::Mixer;
use crate::audio::pcm::FormatMap;
use crate::audio::FrameReader;
use crate::error::Error;
use crate::packet::factory::Context;
use crate::packet::rtp;
use crate::session::{Session, SessionError, SessionMetrics, SessionRouter};

pub use config::{ReceiverConfig, ResamplerBackend};

/// Which endpoint a datagram arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// The audio source endpoint.
    AudioSource,
    /// The repair endpoint.
    AudioRepair,
}

/// Cloneable handle for network threads: parse and route.
#[derive(Clone)]
pub struct ReceiverIngress {
    router: Arc<SessionRouter>,
    config: ReceiverConfig,
    context: Context,
}

impl ReceiverIngress {
    /// Parse one datagram and route it to its session.
    ///
    /// The datagram is copied into a factory receive buffer; the filled
    /// prefix becomes the packet's wire image and the remainder returns
    /// to the slab. If the allocator fails, the datagram is dropped and
    /// the peer keeps serving.
    ///
    /// # Errors
    ///
    /// Returns [`Error`] on malformed datagrams or failed session
    /// creation; either way the datagram is dropped and other sessions
    /// are unaffected.
    pub fn receive(&self, datagram: &[u8], kind: EndpointKind) -> Result<(), Error> {
        let Some(mut buf) = self.context.packets.acquire() else {
            tracing::warn!("receive buffer allocation failed, dropping datagram");
            return Ok(());
        };
        buf.extend_from_slice(datagram);
        let raw = buf.split().freeze();
        self.context.packets.release(buf);

        let capture = Instant::now();

        let packet = match kind {
            EndpointKind::AudioSource => {
                rtp::parse_source(raw, self.config.fec_encoding, capture)?
            }
            EndpointKind::AudioRepair => {
                rtp::parse_repair(raw, self.config.fec_encoding, capture)?
            }
        };

        self.router.route(Arc::new(packet))?;
        Ok(())
    }
}

/// The receiver core.
///
/// Owned by the pipeline thread; network threads interact through the
/// [`ReceiverIngress`] handle.
pub struct Receiver {
    config: ReceiverConfig,
    context: Context,
    router: Arc<SessionRouter>,
    sessions: Vec<Session>,
    mixer: Mixer,
}

impl Receiver {
    /// Create a receiver.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::BadConfig`] when the configuration fails
    /// validation.
    pub fn new(config: ReceiverConfig, context: Context) -> Result<Self, SessionError> {
        config.validate()?;

        let frame_len = ReceiverConfig::duration_to_frames(
            config.internal_frame_length,
            config.sample_rate,
        )
        .max(1);
        let template = Frame::with_buffer(
            context.sample_buffer(),
            config.sample_rate,
            config.channel_mask,
            frame_len,
        );

        Ok(Self {
            router: Arc::new(SessionRouter::new(
                config.clone(),
                FormatMap::new(),
                context.clone(),
            )),
            mixer: Mixer::new(template),
            sessions: Vec::new(),
            config,
            context,
        })
    }

    /// Ingress handle for the network threads.
    #[must_use]
    pub fn ingress(&self) -> ReceiverIngress {
        ReceiverIngress {
            router: Arc::clone(&self.router),
            config: self.config.clone(),
            context: self.context.clone(),
        }
    }

    /// Shared factories.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Pull one mixed frame from all live sessions. Returns the number
    /// of sessions that contributed audio.
    pub fn read_frame(&mut self, frame: &mut Frame) -> usize {
        self.sessions.extend(self.router.adopt());
        self.router.reap_idle(Instant::now());

        let mut inputs: Vec<&mut dyn FrameReader> = self
            .sessions
            .iter_mut()
            .map(|s| s as &mut dyn FrameReader)
            .collect();
        let contributors = self.mixer.mix(&mut inputs, frame);

        let router = Arc::clone(&self.router);
        self.sessions.retain(|session| {
            if session.is_alive() {
                return true;
            }
            tracing::debug!(source_id = session.source_id(), "freeing dead session");
            session.shutdown();
            router.remove(session.source_id());
            false
        });

        contributors
    }

    /// Sessions currently driven by the pipeline.
    #[must_use]
    pub fn num_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Metrics snapshot for every pipeline session.
    #[must_use]
    pub fn metrics(&self) -> Vec<SessionMetrics> {
        self.sessions.iter().map(Session::metrics).collect()
    }
}
