//! # Histogram Correlation Matching
//!
//! Decides whether a candidate image shows the same picture as a reference image by
//! comparing grayscale intensity histograms.
//!
//! ## Algorithm
//!
//! 1. Decode the reference and convert it to 8-bit grayscale
//! 2. For each candidate, in order:
//!    - Decode and convert to grayscale
//!    - Resize to the reference dimensions (bilinear)
//!    - Build 256-bin histograms for both images
//!    - Min-max normalise each histogram to `[0, 1]`
//!    - Compute the Pearson correlation of the two histograms
//! 3. The first candidate whose correlation is strictly above the threshold matches
//!
//! A colour reference and its black-and-white version produce the same grayscale
//! histogram, so they correlate at 1.0.
//!
//! Candidates that cannot be decoded are skipped and reported; they never fail the
//! whole comparison.

use image::imageops::{self, FilterType};
use image::GrayImage;
use log::{debug, warn};

use crate::common::error::DecodeError;

/// Number of intensity bins for 8-bit grayscale.
pub const BINS: usize = 256;

/// Result of comparing one reference against an ordered candidate list.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    /// Lowest candidate index whose score exceeded the threshold
    pub matching_index: Option<usize>,
    /// Indices of candidates that failed to decode
    pub skipped: Vec<usize>,
}

/// Stateless comparator configured with a match threshold.
#[derive(Debug, Clone, Copy)]
pub struct HistogramComparator {
    threshold: f64,
}

impl HistogramComparator {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Compare `reference` against `candidates` and return the first match.
    ///
    /// # Errors
    /// Returns [`DecodeError`] only when the reference cannot be decoded; undecodable
    /// candidates end up in [`Comparison::skipped`].
    pub fn find_match<B: AsRef<[u8]>>(
        &self,
        reference: &[u8],
        candidates: &[B],
    ) -> Result<Comparison, DecodeError> {
        let reference = decode_gray(reference)?;
        let (width, height) = reference.dimensions();
        let reference_hist = normalized_histogram(&reference);

        let mut skipped = Vec::new();
        for (index, candidate) in candidates.iter().enumerate() {
            let candidate = match decode_gray(candidate.as_ref()) {
                Ok(img) => img,
                Err(e) => {
                    warn!("⚠️  Skipping candidate {}: {}", index, e);
                    skipped.push(index);
                    continue;
                }
            };

            let resized = if candidate.dimensions() == (width, height) {
                candidate
            } else {
                imageops::resize(&candidate, width, height, FilterType::Triangle)
            };

            let score = correlation(&reference_hist, &normalized_histogram(&resized));
            if score > self.threshold {
                debug!("Candidate {} matches with score {:.4}", index, score);
                return Ok(Comparison {
                    matching_index: Some(index),
                    skipped,
                });
            }
            debug!("Candidate {} rejected with score {:.4}", index, score);
        }

        Ok(Comparison {
            matching_index: None,
            skipped,
        })
    }
}

/// Decode any format the `image` crate understands into 8-bit grayscale.
///
/// Colour is converted with the BT.601 weights, the same conversion other imaging
/// tools use when producing a black-and-white copy.
pub fn decode_gray(bytes: &[u8]) -> Result<GrayImage, DecodeError> {
    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    let mut gray = GrayImage::new(rgb.width(), rgb.height());
    for (out, pixel) in gray.pixels_mut().zip(rgb.pixels()) {
        let [r, g, b] = pixel.0;
        out.0[0] = bt601_luma(r, g, b);
    }
    Ok(gray)
}

fn bt601_luma(r: u8, g: u8, b: u8) -> u8 {
    let luma = 0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
    luma.round().clamp(0.0, 255.0) as u8
}

/// 256-bin intensity histogram, min-max normalised to `[0, 1]`.
///
/// A flat histogram (every bin equal) normalises to all zeros.
pub fn normalized_histogram(img: &GrayImage) -> [f64; BINS] {
    let mut hist = [0f64; BINS];
    for pixel in img.pixels() {
        hist[pixel.0[0] as usize] += 1.0;
    }

    let min = hist.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = hist.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    for bin in hist.iter_mut() {
        *bin = if range > 0.0 { (*bin - min) / range } else { 0.0 };
    }
    hist
}

/// Pearson correlation of two histograms.
///
/// Returns 1.0 when either side has no variance, like OpenCV's `HISTCMP_CORREL`.
pub fn correlation(a: &[f64; BINS], b: &[f64; BINS]) -> f64 {
    let n = BINS as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cross = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cross += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let scale = var_a * var_b;
    if scale.abs() > f64::EPSILON {
        cross / scale.sqrt()
    } else {
        1.0
    }
}
