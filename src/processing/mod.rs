//! # Image Processing
//!
//! Grayscale histogram correlation used by comparator workers.

pub mod histogram;

pub use histogram::{Comparison, HistogramComparator};
