//! Signal smoothing for noisy sensor streams.
//!
//! - [`LowPassFilter`]: exponential smoothing primitive
//! - [`OneEuroFilter`]: speed-adaptive cutoff built from two low-pass filters
//! - [`VectorFilter`]: one-euro filtering per axis of a 3-axis signal

pub mod low_pass;
pub mod one_euro;
pub mod vector;

pub use low_pass::LowPassFilter;
pub use one_euro::{FilterConfig, OneEuroFilter, smoothing_alpha};
pub use vector::VectorFilter;
