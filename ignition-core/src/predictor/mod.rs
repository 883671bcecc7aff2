//! Rotation period predictor.
//!
//! Keeps the last [`WINDOW`] measured rotation periods in a ring buffer and
//! extrapolates the period of the rotation that is about to start with a
//! local quadratic fit. The forecast compensates for the latency between the
//! physical crank edge and the moment the ignition events are scheduled.
//!
//! Every sample carries a time offset (µs) relative to the forecast instant.
//! Offsets are re-based on each insertion, so offset zero always sits one
//! period after the newest edge and the newest sample lives at `-period`.

#![allow(clippy::cast_precision_loss)]

use core::fmt;

use crate::tick::{Ticks, us_to_ticks};

/// Number of samples retained for the fit.
pub const WINDOW: usize = 5;

/// Forecast returned while the window is still filling. Large enough that
/// every downstream range check rejects it.
pub const INSUFFICIENT_DATA_PERIOD_US: u32 = 0x7FFF_0000;

/// Consecutive outliers that force a hard reset.
pub const DEFAULT_RESET_THRESHOLD: u8 = 10;

/// Maximum ratio between a new sample and the newest stored period.
pub const DEFAULT_OUTLIER_RATIO: f32 = 1.5;

/// Longest plausible rotation period, shared with the timing validator (500 rpm).
pub const MAX_PLAUSIBLE_PERIOD_US: u32 = 120_000;

/// Silence after which the engine is presumed stopped.
pub const DEFAULT_STALE_AFTER_TICKS: Ticks = us_to_ticks(MAX_PLAUSIBLE_PERIOD_US as u64);

/// One measured rotation.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PeriodSample {
    /// Tick at which the sample was logged.
    pub timestamp: Ticks,
    /// Position of the sample relative to the forecast instant (µs, negative).
    pub time_offset_us: i32,
    /// Measured rotation period (µs).
    pub period_us: i32,
}

impl PeriodSample {
    /// Zero-valued sample stamped with `timestamp`.
    #[must_use]
    pub const fn zero(timestamp: Ticks) -> Self {
        Self {
            timestamp,
            time_offset_us: 0,
            period_us: 0,
        }
    }
}

/// Tunables for the outlier gate and the staleness check.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PredictorConfig {
    pub outlier_ratio: f32,
    pub reset_threshold: u8,
    pub stale_after_ticks: Ticks,
}

impl PredictorConfig {
    pub const fn new(outlier_ratio: f32, reset_threshold: u8, stale_after_ticks: Ticks) -> Self {
        Self {
            outlier_ratio,
            reset_threshold,
            stale_after_ticks,
        }
    }
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_OUTLIER_RATIO,
            DEFAULT_RESET_THRESHOLD,
            DEFAULT_STALE_AFTER_TICKS,
        )
    }
}

/// What happened to a period handed to [`PeriodPredictor::log_new_period`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SampleVerdict {
    /// Stored in the window.
    Accepted,
    /// Discarded as an outlier; carries the updated streak.
    Rejected { streak: u8 },
    /// Discarded, and the outlier streak forced a hard reset.
    Reset,
    /// Zero-length period; discarded without touching the streak.
    Ignored,
}

impl fmt::Display for SampleVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleVerdict::Accepted => f.write_str("accepted"),
            SampleVerdict::Rejected { streak } => write!(f, "outlier streak={streak}"),
            SampleVerdict::Reset => f.write_str("outlier-reset"),
            SampleVerdict::Ignored => f.write_str("ignored"),
        }
    }
}

/// Ring buffer of recent rotation periods plus the quadratic extrapolator.
#[derive(Clone, Debug)]
pub struct PeriodPredictor {
    samples: [PeriodSample; WINDOW],
    head: usize,
    count: usize,
    invalid_streak: u8,
    config: PredictorConfig,
}

impl PeriodPredictor {
    /// Creates an empty predictor with the default configuration.
    #[must_use]
    pub fn new(now: Ticks) -> Self {
        Self::with_config(PredictorConfig::default(), now)
    }

    /// Creates an empty predictor with explicit tunables.
    #[must_use]
    pub fn with_config(config: PredictorConfig, now: Ticks) -> Self {
        let mut predictor = Self {
            samples: [PeriodSample::default(); WINDOW],
            head: 0,
            count: 0,
            invalid_streak: 0,
            config,
        };
        predictor.reset(now);
        predictor
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Number of samples currently stored.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Returns `true` when no samples have been logged since the last reset.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns `true` once the window holds enough samples to forecast.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.count >= WINDOW
    }

    /// Current consecutive-outlier streak.
    #[must_use]
    pub const fn invalid_streak(&self) -> u8 {
        self.invalid_streak
    }

    /// Drops every sample and clears the streak.
    ///
    /// The slot that becomes "newest" is stamped with `now` so the staleness
    /// check measures silence from the reset rather than from old data.
    pub fn reset(&mut self, now: Ticks) {
        self.count = 0;
        self.invalid_streak = 0;
        self.head = 0;
        self.samples[WINDOW - 1].timestamp = now;
    }

    /// Feeds a measured rotation period into the window.
    pub fn log_new_period(&mut self, period_us: u32, now: Ticks) -> SampleVerdict {
        if period_us == 0 {
            return SampleVerdict::Ignored;
        }

        if self.is_full() && self.is_outlier(period_us, now) {
            self.invalid_streak = self.invalid_streak.saturating_add(1);
            if self.invalid_streak >= self.config.reset_threshold {
                self.reset(now);
                return SampleVerdict::Reset;
            }
            return SampleVerdict::Rejected {
                streak: self.invalid_streak,
            };
        }

        self.invalid_streak = self.invalid_streak.saturating_sub(1);
        self.insert(period_us, now);
        SampleVerdict::Accepted
    }

    fn is_outlier(&self, period_us: u32, now: Ticks) -> bool {
        let newest = self.sample(1, now).period_us as f32;
        let candidate = period_us as f32;
        candidate > newest * self.config.outlier_ratio
            || candidate < newest / self.config.outlier_ratio
    }

    fn insert(&mut self, period_us: u32, now: Ticks) {
        let period = i32::try_from(period_us).unwrap_or(i32::MAX);

        self.samples[self.head] = PeriodSample {
            timestamp: now,
            time_offset_us: 0,
            period_us: period,
        };

        for sample in &mut self.samples {
            sample.time_offset_us = sample.time_offset_us.saturating_sub(period);
        }

        self.head = (self.head + 1) % WINDOW;
        if self.count < WINDOW {
            self.count += 1;
        }
    }

    /// Returns the `index`-th most recent sample (1 = newest).
    ///
    /// Indices outside `1..=WINDOW` yield a zero sample stamped with `now`.
    #[must_use]
    pub fn sample(&self, index: usize, now: Ticks) -> PeriodSample {
        if index == 0 || index > WINDOW {
            return PeriodSample::zero(now);
        }
        let slot = (self.head + 2 * WINDOW - index) % WINDOW;
        self.samples[slot]
    }

    /// Forecasts the period of the rotation that starts at the newest edge.
    #[must_use]
    pub fn predict_next_period(&self) -> u32 {
        if !self.is_full() {
            return INSUFFICIENT_DATA_PERIOD_US;
        }

        let p1 = self.samples[(self.head + WINDOW - 1) % WINDOW];
        let p2 = self.samples[(self.head + WINDOW - 2) % WINDOW];
        let p3 = self.samples[(self.head + WINDOW - 3) % WINDOW];
        let p4 = self.samples[(self.head + WINDOW - 4) % WINDOW];

        let (Some(d1), Some(d2), Some(d3)) = (slope(p2, p1), slope(p3, p2), slope(p4, p3)) else {
            return INSUFFICIENT_DATA_PERIOD_US;
        };
        let d = (d1 + d2 + d3) / 3.0;

        let dt_12 = (p1.time_offset_us - p2.time_offset_us) as f32;
        let dt_23 = (p2.time_offset_us - p3.time_offset_us) as f32;
        let accel = ((d1 - d2) / dt_12 + (d2 - d3) / dt_23) / 2.0;

        let offset = p1.time_offset_us as f32;
        let predicted = p1.period_us as f32 + d * (-offset) + 0.5 * accel * offset * offset;

        // Negative and NaN forecasts saturate to zero, which no validator accepts.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let period = predicted as u32;
        period
    }

    /// Hard-resets the window when no sample arrived for too long.
    ///
    /// Returns `true` when a reset happened.
    pub fn periodic_staleness_check(&mut self, now: Ticks) -> bool {
        let newest = self.sample(1, now).timestamp;
        if now.saturating_sub(newest) > self.config.stale_after_ticks {
            self.reset(now);
            return true;
        }
        false
    }
}

/// First derivative of period over time between two samples, `older` → `newer`.
fn slope(older: PeriodSample, newer: PeriodSample) -> Option<f32> {
    let dt = newer.time_offset_us - older.time_offset_us;
    if dt == 0 {
        return None;
    }
    Some((newer.period_us - older.period_us) as f32 / dt as f32)
}
