//! Latency tracking and playback-rate control
//!
//! The frequency estimator low-passes the measured capture-to-playback
//! latency through two decimating averaging stages and feeds the error
//! against the target into a PI controller. The controller's output is
//! the bounded scale factor the resampler applies on top of the nominal
//! rate ratio. Sustained latency outside the tolerance band kills the
//! session through the shared liveness flag.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::reader::delayed::Clock;
use crate::session::Liveness;

use super::frame::Frame;
use super::resampler::ScaleHandle;
use super::FrameReader;

/// Frequency estimator tuning.
#[derive(Debug, Clone, Copy)]
pub struct FreqEstimatorConfig {
    /// Proportional gain, per sample of latency error.
    pub p: f64,
    /// Integral gain.
    pub i: f64,
    /// First decimation stage length, in frames.
    pub decimation1: usize,
    /// Second decimation stage length, in frames. Zero disables the
    /// stage.
    pub decimation2: usize,
    /// Bound on `|scale - 1|`.
    pub max_scale_delta: f64,
}

impl Default for FreqEstimatorConfig {
    fn default() -> Self {
        Self {
            p: 1e-6,
            i: 5e-9,
            decimation1: 5,
            decimation2: 4,
            max_scale_delta: 0.005,
        }
    }
}

/// PI controller over the filtered latency signal.
#[derive(Debug)]
pub struct FreqEstimator {
    config: FreqEstimatorConfig,
    /// Setpoint, in samples.
    target: f64,
    acc1: f64,
    cnt1: usize,
    acc2: f64,
    cnt2: usize,
    integral: f64,
    coeff: f64,
}

impl FreqEstimator {
    /// Create an estimator around a target latency in samples.
    ///
    /// # Panics
    ///
    /// Panics if the first decimation stage is zero.
    #[must_use]
    pub fn new(config: FreqEstimatorConfig, target_samples: f64) -> Self {
        assert!(config.decimation1 > 0, "decimation stage 1 must be non-zero");
        Self {
            config,
            target: target_samples,
            acc1: 0.0,
            cnt1: 0,
            acc2: 0.0,
            cnt2: 0,
            integral: 0.0,
            coeff: 1.0,
        }
    }

    /// Current scale factor.
    #[must_use]
    pub fn freq_coeff(&self) -> f64 {
        self.coeff
    }

    /// Feed one latency measurement, in samples.
    pub fn update(&mut self, current_samples: f64) {
        self.acc1 += current_samples;
        self.cnt1 += 1;
        if self.cnt1 < self.config.decimation1 {
            return;
        }

        #[allow(clippy::cast_precision_loss, reason = "small decimation factors")]
        let stage1 = self.acc1 / self.config.decimation1 as f64;
        self.acc1 = 0.0;
        self.cnt1 = 0;

        let filtered = if self.config.decimation2 == 0 {
            stage1
        } else {
            self.acc2 += stage1;
            self.cnt2 += 1;
            if self.cnt2 < self.config.decimation2 {
                return;
            }
            #[allow(clippy::cast_precision_loss, reason = "small decimation factors")]
            let stage2 = self.acc2 / self.config.decimation2 as f64;
            self.acc2 = 0.0;
            self.cnt2 = 0;
            stage2
        };

        self.run_controller(filtered);
    }

    fn run_controller(&mut self, filtered: f64) {
        let error = filtered - self.target;
        self.integral += error;

        let raw = 1.0 + self.config.p * error + self.config.i * self.integral;
        self.coeff = raw.clamp(
            1.0 - self.config.max_scale_delta,
            1.0 + self.config.max_scale_delta,
        );
    }
}

/// Latency monitor thresholds.
#[derive(Debug, Clone, Copy)]
pub struct LatencyConfig {
    /// Control-loop setpoint.
    pub target_latency: Duration,
    /// Lower liveness bound.
    pub min_latency: Duration,
    /// Upper liveness bound.
    pub max_latency: Duration,
    /// Tolerated deviation from the target.
    pub max_tolerance: Duration,
    /// How long the latency may stay out of band before the session is
    /// declared dead.
    pub hold: Duration,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            target_latency: Duration::from_millis(200),
            min_latency: Duration::from_millis(20),
            max_latency: Duration::from_millis(1000),
            max_tolerance: Duration::from_millis(300),
            hold: Duration::from_millis(500),
        }
    }
}

/// Shared cell exposing the most recent latency measurement outside the
/// boxed chain.
#[derive(Debug, Clone)]
pub struct LatencyReport {
    nanos: Arc<AtomicU64>,
}

impl LatencyReport {
    fn new() -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(0)),
        }
    }

    fn set(&self, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX).max(1);
        self.nanos.store(nanos, Ordering::Relaxed);
    }

    /// Most recent measurement, if any was taken.
    #[must_use]
    pub fn get(&self) -> Option<Duration> {
        match self.nanos.load(Ordering::Relaxed) {
            0 => None,
            n => Some(Duration::from_nanos(n)),
        }
    }
}

/// Frame-reader layer that measures latency and drives the resampler
/// scale.
pub struct LatencyMonitor {
    inner: Box<dyn FrameReader>,
    estimator: FreqEstimator,
    scale: ScaleHandle,
    liveness: Liveness,
    clock: Clock,
    config: LatencyConfig,
    sample_rate: u32,
    out_of_band_since: Option<Instant>,
    report: LatencyReport,
}

impl LatencyMonitor {
    /// Wrap `inner`, publishing the scale through `scale`.
    #[must_use]
    pub fn new(
        inner: Box<dyn FrameReader>,
        config: LatencyConfig,
        estimator_config: FreqEstimatorConfig,
        sample_rate: u32,
        scale: ScaleHandle,
        liveness: Liveness,
    ) -> Self {
        Self::with_clock(
            inner,
            config,
            estimator_config,
            sample_rate,
            scale,
            liveness,
            Box::new(Instant::now),
        )
    }

    /// Same as [`LatencyMonitor::new`] with an injected clock.
    #[must_use]
    pub fn with_clock(
        inner: Box<dyn FrameReader>,
        config: LatencyConfig,
        estimator_config: FreqEstimatorConfig,
        sample_rate: u32,
        scale: ScaleHandle,
        liveness: Liveness,
        clock: Clock,
    ) -> Self {
        let target_samples =
            config.target_latency.as_secs_f64() * f64::from(sample_rate);
        Self {
            inner,
            estimator: FreqEstimator::new(estimator_config, target_samples),
            scale,
            liveness,
            clock,
            config,
            sample_rate,
            out_of_band_since: None,
            report: LatencyReport::new(),
        }
    }

    /// Most recent latency measurement.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.report.get()
    }

    /// Shareable handle to the latency measurement.
    #[must_use]
    pub fn report_handle(&self) -> LatencyReport {
        self.report.clone()
    }

    fn observe(&mut self, capture: Instant, now: Instant) {
        let latency = now.saturating_duration_since(capture);
        self.report.set(latency);

        self.estimator
            .update(latency.as_secs_f64() * f64::from(self.sample_rate));
        self.scale.set(self.estimator.freq_coeff());

        let deviation = if latency > self.config.target_latency {
            latency - self.config.target_latency
        } else {
            self.config.target_latency - latency
        };
        let out_of_band = latency < self.config.min_latency
            || latency > self.config.max_latency
            || deviation > self.config.max_tolerance;

        if !out_of_band {
            self.out_of_band_since = None;
            return;
        }

        let since = *self.out_of_band_since.get_or_insert(now);
        if now.duration_since(since) >= self.config.hold {
            tracing::debug!(?latency, "latency out of tolerance for too long");
            self.liveness.kill("latency drift beyond tolerance");
        }
    }
}

impl FrameReader for LatencyMonitor {
    fn read(&mut self, frame: &mut Frame) -> bool {
        if !self.inner.read(frame) {
            return false;
        }

        if let Some(capture) = frame.capture_timestamp() {
            let now = (self.clock)();
            self.observe(capture, now);
        }

        true
    }
}
