//! Session routing table
//!
//! Maps `source_id` to per-session ingress state. Network threads take
//! the read lock to look up and push; session creation and removal take
//! the write lock. Freshly created sessions sit on a pending list until
//! the pipeline thread adopts them, so the pipeline stays the exclusive
//! owner of every chain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use crate::audio::pcm::FormatMap;
use crate::packet::factory::Context;
use crate::packet::units::SourceId;
use crate::packet::{Packet, PacketQueue};
use crate::receiver::config::ReceiverConfig;

use super::liveness::Liveness;
use super::{Session, SessionError};

struct RouterEntry {
    queue: Arc<PacketQueue>,
    liveness: Liveness,
    last_activity: Mutex<Instant>,
}

/// Routes packets to sessions by source id, creating sessions on first
/// contact.
pub struct SessionRouter {
    config: ReceiverConfig,
    formats: FormatMap,
    context: Context,
    entries: RwLock<HashMap<SourceId, RouterEntry>>,
    pending: Mutex<Vec<Session>>,
    unroutable: Mutex<u64>,
}

impl SessionRouter {
    /// Create a router for `config`; sessions lease their buffers from
    /// `context`.
    #[must_use]
    pub fn new(config: ReceiverConfig, formats: FormatMap, context: Context) -> Self {
        Self {
            config,
            formats,
            context,
            entries: RwLock::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
            unroutable: Mutex::new(0),
        }
    }

    /// Route a parsed packet to its session, creating one if this is a
    /// new audio source.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when a session would be needed but
    /// cannot be created; the packet is dropped and the peer keeps
    /// serving other sessions.
    pub fn route(&self, packet: Arc<Packet>) -> Result<(), SessionError> {
        {
            let entries = self.entries.read().expect("session table poisoned");
            if let Some(entry) = entries.get(&packet.source_id) {
                if entry.liveness.is_alive() {
                    *entry.last_activity.lock().expect("activity poisoned") = Instant::now();
                    entry.queue.push(packet);
                } else {
                    *self.unroutable.lock().expect("counter poisoned") += 1;
                }
                return Ok(());
            }
        }

        // New source. Only audio packets can establish a session: repair
        // packets do not identify the stream format.
        let Some(format) = self.formats.get(packet.payload_type) else {
            *self.unroutable.lock().expect("counter poisoned") += 1;
            return Err(SessionError::UnknownPayloadType(packet.payload_type));
        };

        let session = Session::new(packet.source_id, format, &self.config, &self.context)?;
        let entry = RouterEntry {
            queue: session.queue(),
            liveness: session.liveness(),
            last_activity: Mutex::new(Instant::now()),
        };
        entry.queue.push(packet);

        let mut entries = self.entries.write().expect("session table poisoned");
        // Another net thread may have raced the creation; the first
        // insertion wins and the duplicate session is discarded.
        if let Some(existing) = entries.get(&session.source_id()) {
            existing.queue.push(entry.queue.pop().expect("packet just pushed"));
        } else {
            tracing::debug!(source_id = session.source_id(), "session created");
            entries.insert(session.source_id(), entry);
            self.pending.lock().expect("pending poisoned").push(session);
        }

        Ok(())
    }

    /// Hand freshly created sessions to the pipeline thread.
    #[must_use]
    pub fn adopt(&self) -> Vec<Session> {
        std::mem::take(&mut *self.pending.lock().expect("pending poisoned"))
    }

    /// Kill sessions that have seen no traffic for the idle timeout.
    pub fn reap_idle(&self, now: Instant) {
        let entries = self.entries.read().expect("session table poisoned");
        for (source_id, entry) in entries.iter() {
            let last = *entry.last_activity.lock().expect("activity poisoned");
            if now.duration_since(last) >= self.config.session_idle_timeout
                && entry.liveness.is_alive()
            {
                tracing::debug!(source_id, "session idle, reaping");
                entry.liveness.kill("idle timeout");
            }
        }
    }

    /// Remove a session's routing entry. Pipeline side, after reaping.
    pub fn remove(&self, source_id: SourceId) {
        self.entries
            .write()
            .expect("session table poisoned")
            .remove(&source_id);
    }

    /// Number of routed sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().expect("session table poisoned").len()
    }

    /// Whether any session is routed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Packets that could not be routed to a live session.
    #[must_use]
    pub fn unroutable(&self) -> u64 {
        *self.unroutable.lock().expect("counter poisoned")
    }
}
