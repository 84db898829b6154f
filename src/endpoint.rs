//! Endpoint URI grammar
//!
//! `protocol://host[:port][/path][?query]`. The protocol token selects
//! the transport role and FEC scheme; hosts are DNS names or bracketed
//! IPv6 literals.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::packet::fec::FecScheme;

/// URI parse failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    /// No `://` separator.
    #[error("missing protocol separator")]
    MissingProtocol,

    /// Protocol token is not recognized.
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    /// Host part is empty or malformed.
    #[error("invalid host")]
    InvalidHost,

    /// Port is present but not a number.
    #[error("invalid port")]
    InvalidPort,
}

/// Recognized protocol tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Plain RTP source endpoint.
    Rtp,
    /// RTP source endpoint of a Reed-Solomon protected stream.
    RtpRs8m,
    /// Reed-Solomon repair endpoint.
    Rs8m,
    /// RTP source endpoint of an LDPC protected stream.
    RtpLdpc,
    /// LDPC repair endpoint.
    Ldpc,
    /// RTCP control endpoint.
    Rtcp,
    /// RTSP session control.
    Rtsp,
}

impl Protocol {
    /// FEC scheme implied by the token.
    #[must_use]
    pub fn fec_scheme(self) -> FecScheme {
        match self {
            Protocol::Rtp | Protocol::Rtcp | Protocol::Rtsp => FecScheme::None,
            Protocol::RtpRs8m | Protocol::Rs8m => FecScheme::Rs8m,
            Protocol::RtpLdpc | Protocol::Ldpc => FecScheme::LdpcStaircase,
        }
    }

    /// Whether this names a repair endpoint.
    #[must_use]
    pub fn is_repair(self) -> bool {
        matches!(self, Protocol::Rs8m | Protocol::Ldpc)
    }

    /// Default port, for protocols that define one.
    #[must_use]
    pub fn default_port(self) -> Option<u16> {
        match self {
            Protocol::Rtsp => Some(554),
            _ => None,
        }
    }

    fn token(self) -> &'static str {
        match self {
            Protocol::Rtp => "rtp",
            Protocol::RtpRs8m => "rtp+rs8m",
            Protocol::Rs8m => "rs8m",
            Protocol::RtpLdpc => "rtp+ldpc",
            Protocol::Ldpc => "ldpc",
            Protocol::Rtcp => "rtcp",
            Protocol::Rtsp => "rtsp",
        }
    }
}

impl FromStr for Protocol {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rtp" => Ok(Protocol::Rtp),
            "rtp+rs8m" => Ok(Protocol::RtpRs8m),
            "rs8m" => Ok(Protocol::Rs8m),
            "rtp+ldpc" => Ok(Protocol::RtpLdpc),
            "ldpc" => Ok(Protocol::Ldpc),
            "rtcp" => Ok(Protocol::Rtcp),
            "rtsp" => Ok(Protocol::Rtsp),
            other => Err(EndpointError::UnknownProtocol(other.to_string())),
        }
    }
}

/// One half of a transport association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUri {
    /// Transport protocol.
    pub protocol: Protocol,
    /// DNS name, IPv4 literal, or IPv6 literal (without brackets).
    pub host: String,
    /// Port, explicit or defaulted.
    pub port: Option<u16>,
    /// Path component, if any.
    pub path: Option<String>,
    /// Query component, if any.
    pub query: Option<String>,
}

impl EndpointUri {
    /// Parse an endpoint URI.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError`] describing the first malformed part.
    pub fn parse(input: &str) -> Result<Self, EndpointError> {
        let (proto, rest) = input
            .split_once("://")
            .ok_or(EndpointError::MissingProtocol)?;
        let protocol: Protocol = proto.parse()?;

        let (authority, path, query) = split_rest(rest);

        let (host, port_str) = if let Some(v6) = authority.strip_prefix('[') {
            let (host, after) = v6.split_once(']').ok_or(EndpointError::InvalidHost)?;
            let port = after.strip_prefix(':');
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(EndpointError::InvalidHost);
        }

        let port = match port_str {
            Some(p) => Some(p.parse::<u16>().map_err(|_| EndpointError::InvalidPort)?),
            None => protocol.default_port(),
        };

        Ok(Self {
            protocol,
            host: host.to_string(),
            port,
            path,
            query,
        })
    }
}

fn split_rest(rest: &str) -> (&str, Option<String>, Option<String>) {
    let (before_query, query) = match rest.split_once('?') {
        Some((b, q)) => (b, Some(q.to_string())),
        None => (rest, None),
    };
    match before_query.split_once('/') {
        Some((authority, path)) => (authority, Some(format!("/{path}")), query),
        None => (before_query, None, query),
    }
}

impl fmt::Display for EndpointUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.protocol.token())?;
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            write!(f, "{}", self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        if let Some(ref path) = self.path {
            write!(f, "{path}")?;
        }
        if let Some(ref query) = self.query {
            write!(f, "?{query}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_rtp() {
        let uri = EndpointUri::parse("rtp://192.168.0.10:10001").unwrap();
        assert_eq!(uri.protocol, Protocol::Rtp);
        assert_eq!(uri.host, "192.168.0.10");
        assert_eq!(uri.port, Some(10001));
        assert_eq!(uri.protocol.fec_scheme(), FecScheme::None);
    }

    #[test]
    fn test_parse_fec_tokens() {
        assert_eq!(
            EndpointUri::parse("rtp+rs8m://host:1")
                .unwrap()
                .protocol
                .fec_scheme(),
            FecScheme::Rs8m
        );
        assert!(EndpointUri::parse("rs8m://host:2").unwrap().protocol.is_repair());
        assert_eq!(
            EndpointUri::parse("rtp+ldpc://host:3")
                .unwrap()
                .protocol
                .fec_scheme(),
            FecScheme::LdpcStaircase
        );
        assert!(EndpointUri::parse("ldpc://host:4").unwrap().protocol.is_repair());
    }

    #[test]
    fn test_parse_ipv6_literal() {
        let uri = EndpointUri::parse("rtp://[2001:db8::1]:5000").unwrap();
        assert_eq!(uri.host, "2001:db8::1");
        assert_eq!(uri.port, Some(5000));
        assert_eq!(uri.to_string(), "rtp://[2001:db8::1]:5000");
    }

    #[test]
    fn test_default_port() {
        let uri = EndpointUri::parse("rtsp://media.example.com").unwrap();
        assert_eq!(uri.port, Some(554));

        let uri = EndpointUri::parse("rtp://media.example.com").unwrap();
        assert_eq!(uri.port, None);
    }

    #[test]
    fn test_path_and_query() {
        let uri = EndpointUri::parse("rtsp://host:8554/stream/main?codec=pcm").unwrap();
        assert_eq!(uri.path.as_deref(), Some("/stream/main"));
        assert_eq!(uri.query.as_deref(), Some("codec=pcm"));
        assert_eq!(uri.to_string(), "rtsp://host:8554/stream/main?codec=pcm");
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(
            EndpointUri::parse("nonsense"),
            Err(EndpointError::MissingProtocol)
        );
        assert!(matches!(
            EndpointUri::parse("ftp://host"),
            Err(EndpointError::UnknownProtocol(_))
        ));
        assert_eq!(
            EndpointUri::parse("rtp://:100"),
            Err(EndpointError::InvalidHost)
        );
        assert_eq!(
            EndpointUri::parse("rtp://host:notaport"),
            Err(EndpointError::InvalidPort)
        );
    }

    #[test]
    fn test_display_roundtrip() {
        for input in [
            "rtp://host:1000",
            "rtp+rs8m://host:1000",
            "ldpc://10.0.0.1:2000",
            "rtcp://host:1001",
        ] {
            let uri = EndpointUri::parse(input).unwrap();
            assert_eq!(uri.to_string(), input);
            assert_eq!(EndpointUri::parse(&uri.to_string()).unwrap(), uri);
        }
    }
}
