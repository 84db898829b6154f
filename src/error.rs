//! Crate-level error aggregation

use thiserror::Error;

use crate::endpoint::EndpointError;
use crate::fec::FecError;
use crate::packet::PacketError;
use crate::rtcp::RtcpError;
use crate::session::SessionError;

/// Any error the receiver core can surface to its embedder.
///
/// Transient per-packet conditions never reach the frame-read API; they
/// show up here only on the ingress path, where the embedder may want
/// to count them.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or unroutable packet.
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    /// FEC block failure.
    #[error("FEC error: {0}")]
    Fec(#[from] FecError),

    /// Session creation or configuration failure.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Endpoint URI failure.
    #[error("endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    /// RTCP codec failure.
    #[error("RTCP error: {0}")]
    Rtcp(#[from] RtcpError),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err: Error = PacketError::UnknownPayloadType(42).into();
        assert_eq!(err.to_string(), "packet error: unknown payload type: 42");
    }

    #[test]
    fn test_error_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
