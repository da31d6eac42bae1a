//! Single-pole exponential smoothing.
//!
//! ```text
//! s[n] = α × x[n] + (1 - α) × s[n-1]
//! ```
//!
//! The first sample passes through unchanged and seeds the state.

use crate::error::{Error, Result};

/// Exponential low-pass filter with a mutable smoothing coefficient.
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    /// Smoothing coefficient in (0, 1]. 1.0 disables smoothing.
    alpha: f64,
    /// Last raw input.
    raw: f64,
    /// Last filtered output.
    smoothed: f64,
    initialized: bool,
}

impl LowPassFilter {
    /// Create a filter with the given smoothing coefficient.
    ///
    /// Fails with [`Error::InvalidParameter`] unless `alpha` is in (0, 1].
    pub fn new(alpha: f64) -> Result<Self> {
        validate_alpha(alpha)?;
        Ok(Self {
            alpha,
            raw: 0.0,
            smoothed: 0.0,
            initialized: false,
        })
    }

    /// Current smoothing coefficient.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Replace the smoothing coefficient used by subsequent samples.
    pub fn set_alpha(&mut self, alpha: f64) -> Result<()> {
        validate_alpha(alpha)?;
        self.alpha = alpha;
        Ok(())
    }

    /// Filter one sample with the current coefficient.
    pub fn filter(&mut self, value: f64) -> f64 {
        let result = if self.initialized {
            self.alpha * value + (1.0 - self.alpha) * self.smoothed
        } else {
            self.initialized = true;
            value
        };
        self.raw = value;
        self.smoothed = result;
        result
    }

    /// Filter one sample after switching to `alpha`.
    ///
    /// Callers derive `alpha` from a positive cutoff, which keeps it in (0, 1).
    pub(crate) fn filter_with_alpha(&mut self, value: f64, alpha: f64) -> f64 {
        debug_assert!(alpha > 0.0 && alpha <= 1.0, "alpha out of range: {alpha}");
        self.alpha = alpha;
        self.filter(value)
    }

    /// True once at least one sample has been filtered.
    pub fn has_last_raw_value(&self) -> bool {
        self.initialized
    }

    /// Last raw input (0.0 before the first sample).
    pub fn last_raw_value(&self) -> f64 {
        self.raw
    }

    /// Last filtered output (0.0 before the first sample).
    pub fn last_filtered_value(&self) -> f64 {
        self.smoothed
    }

    /// Forget all history. The coefficient is kept.
    pub fn reset(&mut self) {
        self.raw = 0.0;
        self.smoothed = 0.0;
        self.initialized = false;
    }
}

fn validate_alpha(alpha: f64) -> Result<()> {
    if alpha > 0.0 && alpha <= 1.0 {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "low-pass alpha must be in (0, 1], got {}",
            alpha
        )))
    }
}
