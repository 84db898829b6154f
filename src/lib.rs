//! # audiopipe
//!
//! Real-time PCM audio streaming over lossy UDP networks, centered on
//! the receiver pipeline: per-session chains that turn an out-of-order,
//! lossy RTP stream into a continuous, monotonically-clocked PCM stream
//! whose playback rate tracks the sender.
//!
//! The chain, bottom to top: ingress queue, FEC block reader
//! (Reed-Solomon or LDPC-Staircase), playout delay, reorder window,
//! watchdog, depacketizer, latency-tracking resampler, channel mapper.
//! A mixer sums concurrent sessions onto the playback frame.
//!
//! ## Example
//!
//! ```rust,no_run
//! use audiopipe::audio::{ChannelMask, Frame};
//! use audiopipe::packet::factory::Context;
//! use audiopipe::receiver::{EndpointKind, Receiver, ReceiverConfig};
//!
//! # fn example(datagram: &[u8]) -> Result<(), audiopipe::Error> {
//! let mut receiver = Receiver::new(ReceiverConfig::default(), Context::default())?;
//!
//! // Network thread:
//! let ingress = receiver.ingress();
//! ingress.receive(datagram, EndpointKind::AudioSource)?;
//!
//! // Pipeline (audio callback) thread:
//! let mut frame = Frame::new(44_100, ChannelMask::STEREO, 441);
//! receiver.read_frame(&mut frame);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod audio;
pub mod endpoint;
pub mod error;
pub mod fec;
pub mod packet;
pub mod reader;
pub mod receiver;
pub mod rtcp;
pub mod session;
pub mod sink;

pub use audio::{Frame, FrameFlags, FrameReader};
pub use error::{Error, Result};
pub use packet::{Packet, PacketFlags, PacketReader};
pub use receiver::{Receiver, ReceiverConfig};
pub use session::{Session, SessionMetrics};
