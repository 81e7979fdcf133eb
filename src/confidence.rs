//! Confidence binning
//!
//! BirdNET scores (0.0-1.0) are squeezed into 3 bits for the detection payload.
//! Bin 0 covers the closed interval [0.00, 0.50]; bin k covers (T[k-1], T[k]].
//! Scores are rounded to basis points before comparison, so a score always lands
//! in the same bin regardless of float noise in the last digits.

use crate::error::RangeError;

/// Upper bound of each bin, in basis points (inclusive)
const UPPER_BOUNDS_BP: [u32; 8] = [5000, 6500, 7400, 8000, 8500, 9000, 9500, 10000];

pub const MAX_BIN: u8 = 7;

/// Map a raw confidence score to a bin in `0..=7`
pub fn bin_confidence(score: f64) -> Result<u8, RangeError> {
    if !(0.0..=1.0).contains(&score) {
        return Err(RangeError {
            what: "confidence",
            value: score,
        });
    }

    let bp = (score * 10_000.0).round() as u32;
    let bin = UPPER_BOUNDS_BP
        .iter()
        .position(|&upper| bp <= upper)
        .unwrap_or(MAX_BIN as usize);
    Ok(bin as u8)
}

/// Lowest and highest score (inclusive) that map to `bin`
pub fn bin_bounds(bin: u8) -> Option<(f64, f64)> {
    let idx = bin as usize;
    let upper = *UPPER_BOUNDS_BP.get(idx)?;
    let lower = if idx == 0 { 0 } else { UPPER_BOUNDS_BP[idx - 1] + 1 };
    Some((lower as f64 / 10_000.0, upper as f64 / 10_000.0))
}
