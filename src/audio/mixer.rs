//! Session mixer
//!
//! Sums the frame streams of all live sessions sample-wise onto one
//! output frame, saturating at full scale. Sessions whose frame came
//! back empty contribute nothing; the output capture timestamp is the
//! median of the contributors'.

use std::time::Instant;

use super::frame::{Frame, FrameFlags};
use super::FrameReader;

/// Sums concurrent session outputs.
pub struct Mixer {
    scratch: Frame,
    captures: Vec<Instant>,
}

impl Mixer {
    /// Create a mixer producing frames like `template`; the template
    /// becomes the per-frame staging buffer.
    #[must_use]
    pub fn new(template: Frame) -> Self {
        Self {
            scratch: template,
            captures: Vec::new(),
        }
    }

    /// Mix every reader in `inputs` into `out`. Returns the number of
    /// contributing sessions.
    ///
    /// Readers that return false (dead sessions) and frames flagged
    /// empty contribute zero.
    pub fn mix(&mut self, inputs: &mut [&mut dyn FrameReader], out: &mut Frame) -> usize {
        out.reset();
        out.samples_mut().fill(0.0);
        self.captures.clear();

        if self.scratch.num_frames() != out.num_frames()
            || self.scratch.channels() != out.channels()
        {
            self.scratch = out.clone();
        }

        let mut contributors = 0usize;
        let mut flags = FrameFlags::empty();

        for reader in inputs.iter_mut() {
            if !reader.read(&mut self.scratch) {
                continue;
            }
            if self.scratch.flags().contains(FrameFlags::EMPTY) {
                continue;
            }

            contributors += 1;
            flags |= self.scratch.flags();
            if let Some(at) = self.scratch.capture_timestamp() {
                self.captures.push(at);
            }

            for (acc, &sample) in out.samples_mut().iter_mut().zip(self.scratch.samples()) {
                *acc = (*acc + sample).clamp(-1.0, 1.0);
            }
        }

        if contributors == 0 {
            out.add_flags(FrameFlags::EMPTY | FrameFlags::SILENT);
        } else {
            out.add_flags(flags);
        }

        if !self.captures.is_empty() {
            self.captures.sort_unstable();
            out.set_capture_timestamp(self.captures[self.captures.len() / 2]);
        }

        contributors
    }
}
