//! Audio frame pipeline
//!
//! Everything downstream of the packet layers: PCM decoding, gap
//! concealment, rate adaptation, channel mapping and mixing.

pub mod depacketizer;
pub mod frame;
pub mod latency;
pub mod mapper;
pub mod mixer;
pub mod pcm;
pub mod resampler;

#[cfg(test)]
mod tests;

pub use depacketizer::Depacketizer;
pub use frame::{ChannelMask, Frame, FrameFlags};
pub use latency::{FreqEstimator, LatencyConfig, LatencyMonitor, LatencyReport};
pub use mapper::ChannelMapperReader;
pub use mixer::Mixer;
pub use pcm::{FormatMap, PcmFormat};
pub use resampler::{ResamplerProfile, ScaleHandle, SincResampler};

/// Pull interface for the frame half of the pipeline.
///
/// `read` fills the whole frame; the return value is false only when the
/// layer is permanently unable to produce audio (dead session). Gaps and
/// starvation surface as frame flags, never as errors.
pub trait FrameReader: Send {
    /// Fill `frame` with the next samples.
    fn read(&mut self, frame: &mut Frame) -> bool;
}
