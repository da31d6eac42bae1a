//! One-euro filter: a low-pass filter whose cutoff follows signal speed.
//!
//! Slow signals get a low cutoff (jitter removed), fast signals a high
//! cutoff (lag removed). The speed estimate is itself smoothed by a second
//! low-pass running at a fixed derivative cutoff.
//!
//! ```text
//! dx      = (x - x̂[n-1]) × rate
//! dx̂      = lowpass(dx, α(d_cutoff))
//! cutoff  = min_cutoff + beta × |dx̂|
//! x̂       = lowpass(x, α(cutoff))
//!
//! α(fc)   = 1 / (1 + τ/Tₑ),  τ = 1/(2π·fc),  Tₑ = 1/rate
//! ```
//!
//! Reference: Casiez, Roussel, Vogel, "1€ Filter: A Simple Speed-based
//! Low-pass Filter for Noisy Input in Interactive Systems" (CHI 2012).

use super::low_pass::LowPassFilter;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Configuration for [`OneEuroFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Expected sample rate in Hz, used until timestamps say otherwise.
    pub frequency_hz: f64,

    /// Cutoff at rest in Hz. Lower values remove more jitter.
    pub min_cutoff_hz: f64,

    /// Speed coefficient. Higher values reduce lag during fast motion.
    /// 0.0 turns the filter into a fixed-cutoff low-pass.
    pub beta: f64,

    /// Cutoff in Hz for smoothing the derivative estimate.
    pub derivative_cutoff_hz: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 60.0,
            min_cutoff_hz: 1.0,
            beta: 0.0,
            derivative_cutoff_hz: 1.0,
        }
    }
}

impl FilterConfig {
    /// Config for the given sample rate with default cutoffs.
    pub fn with_frequency(frequency_hz: f64) -> Self {
        Self {
            frequency_hz,
            ..Default::default()
        }
    }

    /// Check that every frequency is positive and finite and `beta` is non-negative.
    pub fn validate(&self) -> Result<()> {
        check_positive("frequency_hz", self.frequency_hz)?;
        check_positive("min_cutoff_hz", self.min_cutoff_hz)?;
        check_positive("derivative_cutoff_hz", self.derivative_cutoff_hz)?;
        if !(self.beta >= 0.0 && self.beta.is_finite()) {
            return Err(Error::InvalidParameter(format!(
                "beta must be >= 0, got {}",
                self.beta
            )));
        }
        Ok(())
    }
}

fn check_positive(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "{} must be > 0, got {}",
            name, value
        )))
    }
}

/// Smoothing coefficient for a single-pole low-pass at `cutoff_hz`,
/// sampled at `rate_hz`.
#[inline]
pub fn smoothing_alpha(rate_hz: f64, cutoff_hz: f64) -> f64 {
    let te = 1.0 / rate_hz;
    let tau = 1.0 / (2.0 * PI * cutoff_hz);
    1.0 / (1.0 + tau / te)
}

/// Adaptive one-euro filter for a scalar signal.
///
/// # Example
///
/// ```
/// use sxm_link::filter::{FilterConfig, OneEuroFilter};
///
/// let mut filter = OneEuroFilter::new(FilterConfig {
///     frequency_hz: 60.0,
///     min_cutoff_hz: 1.0,
///     beta: 0.01,
///     derivative_cutoff_hz: 1.0,
/// })?;
///
/// assert_eq!(filter.filter(3.0, Some(0.0)), 3.0);
/// let smoothed = filter.filter(3.4, Some(1.0 / 60.0));
/// assert!(smoothed > 3.0 && smoothed < 3.4);
/// # Ok::<(), sxm_link::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct OneEuroFilter {
    config: FilterConfig,
    /// Current sample rate estimate (Hz)
    rate_hz: f64,
    value: LowPassFilter,
    derivative: LowPassFilter,
    last_timestamp: Option<f64>,
    /// Cutoff applied to the most recent sample (Hz)
    last_cutoff_hz: f64,
}

impl OneEuroFilter {
    /// Create a filter, failing fast on a non-positive frequency.
    pub fn new(config: FilterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            rate_hz: config.frequency_hz,
            value: LowPassFilter::new(smoothing_alpha(
                config.frequency_hz,
                config.min_cutoff_hz,
            ))?,
            derivative: LowPassFilter::new(smoothing_alpha(
                config.frequency_hz,
                config.derivative_cutoff_hz,
            ))?,
            last_timestamp: None,
            last_cutoff_hz: config.min_cutoff_hz,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Sample rate currently assumed between consecutive samples.
    pub fn sample_rate_hz(&self) -> f64 {
        self.rate_hz
    }

    /// Cutoff frequency used for the most recent sample.
    pub fn last_cutoff_hz(&self) -> f64 {
        self.last_cutoff_hz
    }

    /// Filter one sample.
    ///
    /// `timestamp` is in seconds. When both this and the previous sample
    /// carry a timestamp, the sample rate is re-estimated from their spacing.
    /// A non-positive spacing is ignored and the current rate is kept.
    /// NaN or infinite samples leave the state untouched and return the last
    /// filtered value.
    pub fn filter(&mut self, value: f64, timestamp: Option<f64>) -> f64 {
        if !value.is_finite() {
            log::trace!("Skipping non-finite sample {}", value);
            return self.value.last_filtered_value();
        }

        if let (Some(previous), Some(now)) = (self.last_timestamp, timestamp) {
            let dt = now - previous;
            if dt > 0.0 && dt.is_finite() {
                self.rate_hz = 1.0 / dt;
            } else {
                log::trace!("Ignoring non-increasing timestamp (dt = {})", dt);
            }
        }
        self.last_timestamp = timestamp;

        let raw_derivative = if self.value.has_last_raw_value() {
            (value - self.value.last_filtered_value()) * self.rate_hz
        } else {
            0.0
        };
        let derivative = self.derivative.filter_with_alpha(
            raw_derivative,
            smoothing_alpha(self.rate_hz, self.config.derivative_cutoff_hz),
        );

        let cutoff = self.config.min_cutoff_hz + self.config.beta * derivative.abs();
        self.last_cutoff_hz = cutoff;

        self.value
            .filter_with_alpha(value, smoothing_alpha(self.rate_hz, cutoff))
    }

    /// Clear filter history and the last timestamp.
    ///
    /// Configured parameters are untouched; the sample-rate estimate returns
    /// to the configured frequency.
    pub fn reset(&mut self) {
        self.value.reset();
        self.derivative.reset();
        self.last_timestamp = None;
        self.rate_hz = self.config.frequency_hz;
        self.last_cutoff_hz = self.config.min_cutoff_hz;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn responsive_config() -> FilterConfig {
        FilterConfig {
            frequency_hz: 60.0,
            min_cutoff_hz: 1.0,
            beta: 0.5,
            derivative_cutoff_hz: 1.0,
        }
    }

    #[test]
    fn test_smoothing_alpha_matches_rc_form() {
        // α = r / (r + 1) with r = 2π·fc·Tₑ is the same coefficient
        for &(rate, cutoff) in &[(60.0, 1.0), (100.0, 5.0), (10.0, 0.3)] {
            let r = 2.0 * PI * cutoff / rate;
            assert_relative_eq!(smoothing_alpha(rate, cutoff), r / (r + 1.0), epsilon = 1e-12);
        }
        assert_relative_eq!(smoothing_alpha(60.0, 1.0), 0.094_793, epsilon = 1e-5);
    }

    #[test]
    fn test_first_output_equals_input() {
        let mut f = OneEuroFilter::new(responsive_config()).unwrap();
        assert_eq!(f.filter(-7.25, Some(12.0)), -7.25);

        let mut g = OneEuroFilter::new(responsive_config()).unwrap();
        assert_eq!(g.filter(3.5, None), 3.5);
    }

    #[test]
    fn test_constant_signal_is_unchanged() {
        let mut f = OneEuroFilter::new(responsive_config()).unwrap();
        for i in 0..50 {
            let out = f.filter(2.0, Some(i as f64 / 60.0));
            assert_relative_eq!(out, 2.0, epsilon = 1e-12);
        }
        assert_relative_eq!(f.last_cutoff_hz(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_step_tracks_faster_than_ramp() {
        let mut step = OneEuroFilter::new(responsive_config()).unwrap();
        let mut ramp = OneEuroFilter::new(responsive_config()).unwrap();

        step.filter(0.0, Some(0.0));
        ramp.filter(0.0, Some(0.0));

        let step_out = step.filter(10.0, Some(1.0 / 60.0));
        let ramp_out = ramp.filter(0.1, Some(1.0 / 60.0));

        // Larger change → larger derivative → higher cutoff
        assert!(step.last_cutoff_hz() > ramp.last_cutoff_hz());

        // And a larger fraction of the change is passed through (less lag)
        assert!(step_out / 10.0 > ramp_out / 0.1);
    }

    #[test]
    fn test_zero_beta_keeps_min_cutoff() {
        let mut f = OneEuroFilter::new(FilterConfig::with_frequency(60.0)).unwrap();
        f.filter(0.0, None);
        f.filter(100.0, None);
        assert_relative_eq!(f.last_cutoff_hz(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_timestamps_update_sample_rate() {
        let mut f = OneEuroFilter::new(responsive_config()).unwrap();
        f.filter(0.0, Some(1.0));
        f.filter(0.0, Some(1.01));
        assert_relative_eq!(f.sample_rate_hz(), 100.0, epsilon = 1e-6);

        // Without timestamps the last estimate is kept
        f.filter(0.0, None);
        assert_relative_eq!(f.sample_rate_hz(), 100.0, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_timestamp_delta_is_ignored() {
        let mut f = OneEuroFilter::new(responsive_config()).unwrap();
        f.filter(1.0, Some(5.0));
        let out = f.filter(2.0, Some(5.0));
        assert!(out.is_finite());
        assert_relative_eq!(f.sample_rate_hz(), 60.0, epsilon = 1e-12);

        // Backwards timestamps are ignored the same way
        let out = f.filter(3.0, Some(4.0));
        assert!(out.is_finite());
        assert_relative_eq!(f.sample_rate_hz(), 60.0, epsilon = 1e-12);
    }

    #[test]
    fn test_non_finite_samples_are_skipped() {
        let mut f = OneEuroFilter::new(FilterConfig::default()).unwrap();
        assert_eq!(f.filter(0.0, None), 0.0);
        assert_eq!(f.filter(f64::INFINITY, None), 0.0);
        assert_eq!(f.filter(f64::NAN, None), 0.0);

        let next = f.filter(1.0, None);
        assert!(next.is_finite());
        assert!(next > 0.0 && next < 1.0);
        assert!(f.last_cutoff_hz().is_finite());
    }

    #[test]
    fn test_reset_reproduces_first_sample() {
        let mut f = OneEuroFilter::new(responsive_config()).unwrap();
        let first = f.filter(4.0, Some(0.0));
        f.filter(9.0, Some(0.005));
        f.filter(1.0, Some(0.01));

        f.reset();
        assert_eq!(f.filter(4.0, Some(0.0)), first);
        assert_relative_eq!(f.sample_rate_hz(), 60.0, epsilon = 1e-12);
        assert_eq!(f.config(), &responsive_config());
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let bad = [
            FilterConfig {
                frequency_hz: 0.0,
                ..Default::default()
            },
            FilterConfig {
                min_cutoff_hz: -1.0,
                ..Default::default()
            },
            FilterConfig {
                derivative_cutoff_hz: f64::NAN,
                ..Default::default()
            },
            FilterConfig {
                beta: -0.1,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(
                matches!(OneEuroFilter::new(config), Err(Error::InvalidParameter(_))),
                "accepted {:?}",
                config
            );
        }
    }
}
