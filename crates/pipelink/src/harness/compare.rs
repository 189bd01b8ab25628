//! Image comparison utilities for verification
//!
//! Rendered colour and quantised depth images are compared exactly against the
//! reference images computed from the scenario.

use image::{ImageBuffer, Pixel};
use serde::Serialize;
use std::ops::Deref;

/// Result of comparing two images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompareResult {
    /// Images match exactly
    Match,
    /// Images have different dimensions
    DimensionMismatch {
        /// Dimensions of the reference image
        reference_dimensions: (u32, u32),
        /// Dimensions of the rendered image
        result_dimensions: (u32, u32),
    },
    /// Images have matching dimensions but different pixel values
    PixelMismatch {
        /// Number of pixels that differ in at least one channel
        mismatched_pixels: u32,
        /// Coordinates of the first differing pixel in row-major order
        first_mismatch: (u32, u32),
        /// Whether each channel matched across all pixels; unused channels stay `true`
        channels_matched: [bool; 4],
    },
}

impl CompareResult {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }
}

/// Compares two images pixel by pixel
///
/// # Arguments
/// * `reference` - Expected image
/// * `result` - Rendered image
///
/// # Returns
/// A `CompareResult` indicating whether the images match and details about any differences
pub fn compare_images<P, C>(reference: &ImageBuffer<P, C>, result: &ImageBuffer<P, C>) -> CompareResult
where
    P: Pixel,
    C: Deref<Target = [P::Subpixel]>,
{
    // Dimension mismatches fail immediately
    if reference.dimensions() != result.dimensions() {
        return CompareResult::DimensionMismatch {
            reference_dimensions: reference.dimensions(),
            result_dimensions: result.dimensions(),
        };
    }

    let mut channels_matched = [true; 4];
    let mut mismatched_pixels = 0;
    let mut first_mismatch = None;

    for ((x, y, expected), actual) in reference.enumerate_pixels().zip(result.pixels()) {
        let mut pixel_matched = true;

        for (channel, (expected, actual)) in expected.channels().iter().zip(actual.channels()).enumerate().take(4) {
            if expected != actual {
                channels_matched[channel] = false;
                pixel_matched = false;
            }
        }

        if !pixel_matched {
            mismatched_pixels += 1;
            first_mismatch.get_or_insert((x, y));
        }
    }

    match first_mismatch {
        None => CompareResult::Match,
        Some(first_mismatch) => CompareResult::PixelMismatch { mismatched_pixels, first_mismatch, channels_matched },
    }
}
