//! Window functions

use std::f32::consts::PI;

/// Periodic Hann window
///
/// Periodic (not symmetric) so that overlapping copies at `size / 4` hop
/// sum to a constant.
pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}
