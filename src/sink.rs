//! Device-side contracts
//!
//! Platform-agnostic traits the audio device layer implements; ALSA,
//! PulseAudio or WAV backends live outside this crate. The pipeline
//! thread is the only caller.

use std::time::Duration;

use thiserror::Error;

use crate::audio::frame::Frame;

/// Errors from a device backend.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device rejected the frame format.
    #[error("format not supported by device")]
    FormatNotSupported,

    /// The device stream failed.
    #[error("device stream error: {0}")]
    StreamError(String),

    /// The device was closed.
    #[error("device closed")]
    Closed,
}

/// Playback-side device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Producing or consuming audio.
    Active,
    /// Open but currently silent.
    Idle,
    /// Paused by the user.
    Paused,
    /// Failed; only `restart` can recover it.
    Broken,
}

/// Where mixed frames go: the playback device.
pub trait AudioSink: Send {
    /// Write one frame to the device.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] when the device cannot accept the frame.
    fn write(&mut self, frame: &Frame) -> Result<(), DeviceError>;

    /// Current device buffer latency.
    fn latency(&self) -> Duration;
}

/// Where capture frames come from: the recording device.
pub trait AudioSource: Send {
    /// Fill one frame from the device.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] when the device cannot produce samples.
    fn read(&mut self, frame: &mut Frame) -> Result<(), DeviceError>;

    /// Current device state.
    fn state(&self) -> DeviceState;

    /// Pause capture.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] if the device refuses.
    fn pause(&mut self) -> Result<(), DeviceError>;

    /// Resume a paused device.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] if the device refuses.
    fn resume(&mut self) -> Result<(), DeviceError>;

    /// Recover a broken device.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] if recovery fails.
    fn restart(&mut self) -> Result<(), DeviceError>;
}
