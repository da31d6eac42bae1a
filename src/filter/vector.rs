//! Componentwise one-euro filtering of 3-axis signals.

use super::one_euro::{FilterConfig, OneEuroFilter};
use crate::error::Result;

/// Three independent [`OneEuroFilter`]s, one per axis.
///
/// Axes share the configuration but no state.
#[derive(Debug, Clone)]
pub struct VectorFilter {
    axes: [OneEuroFilter; 3],
}

impl VectorFilter {
    /// Create a vector filter with the same configuration on every axis.
    pub fn new(config: FilterConfig) -> Result<Self> {
        Ok(Self {
            axes: [
                OneEuroFilter::new(config)?,
                OneEuroFilter::new(config)?,
                OneEuroFilter::new(config)?,
            ],
        })
    }

    /// Filter one 3-axis sample. `timestamp` is in seconds.
    pub fn filter(&mut self, value: [f64; 3], timestamp: Option<f64>) -> [f64; 3] {
        [
            self.axes[0].filter(value[0], timestamp),
            self.axes[1].filter(value[1], timestamp),
            self.axes[2].filter(value[2], timestamp),
        ]
    }

    /// Reset every axis.
    pub fn reset(&mut self) {
        for axis in &mut self.axes {
            axis.reset();
        }
    }

    /// Per-axis filters (x, y, z).
    pub fn axes(&self) -> &[OneEuroFilter; 3] {
        &self.axes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_first_vector_passes_through() {
        let mut f = VectorFilter::new(FilterConfig::default()).unwrap();
        assert_eq!(f.filter([1.0, -2.0, 3.0], Some(0.0)), [1.0, -2.0, 3.0]);
    }

    #[test]
    fn test_axes_are_independent() {
        let config = FilterConfig {
            beta: 0.5,
            ..Default::default()
        };
        let mut vector = VectorFilter::new(config).unwrap();
        let mut scalar = OneEuroFilter::new(config).unwrap();

        let samples = [[0.0, 5.0, 0.0], [10.0, 5.0, 0.0], [10.0, 5.0, -4.0]];
        let outputs: Vec<[f64; 3]> = samples
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let t = Some(i as f64 / 60.0);
                let out = vector.filter(*s, t);
                assert_relative_eq!(out[0], scalar.filter(s[0], t), epsilon = 1e-12);
                out
            })
            .collect();
        let last = outputs[outputs.len() - 1];

        // Y never moved, so it is untouched by motion on X and Z
        assert_relative_eq!(last[1], 5.0, epsilon = 1e-12);
        assert!(vector.axes()[0].last_cutoff_hz() > vector.axes()[1].last_cutoff_hz());
    }

    #[test]
    fn test_reset_all_axes() {
        let mut f = VectorFilter::new(FilterConfig::default()).unwrap();
        f.filter([0.0, 0.0, 0.0], None);
        f.filter([9.0, 9.0, 9.0], None);
        f.reset();
        assert_eq!(f.filter([9.0, 9.0, 9.0], None), [9.0, 9.0, 9.0]);
    }
}
