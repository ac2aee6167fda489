//! Bandwidth limiting for estimator inputs

use sf_core::{SfError, SfResult};

/// Centre frequency of every one-sided bin, evenly spaced over `[0, rate / 2]`
pub fn bin_frequencies(sample_rate: u32, n_fft: usize) -> Vec<f64> {
    let n_bins = n_fft / 2 + 1;
    let nyquist = sample_rate as f64 / 2.0;
    if n_bins < 2 {
        return vec![0.0];
    }

    let step = nyquist / (n_bins - 1) as f64;
    (0..n_bins)
        .map(|i| if i == n_bins - 1 { nyquist } else { i as f64 * step })
        .collect()
}

/// Number of bins up to and including the highest one at or below
/// `bandwidth_hz`
///
/// A bandwidth at or above Nyquist clamps to the full bin count.
pub fn bandwidth_to_max_bin(sample_rate: u32, n_fft: usize, bandwidth_hz: f64) -> SfResult<usize> {
    if sample_rate == 0 {
        return Err(SfError::InvalidParam("sample rate must be positive".into()));
    }
    if n_fft < 2 {
        return Err(SfError::InvalidParam(format!("n_fft must be at least 2, got {}", n_fft)));
    }
    if bandwidth_hz.is_nan() || bandwidth_hz < 0.0 {
        return Err(SfError::InvalidParam(format!(
            "bandwidth must be non-negative, got {}",
            bandwidth_hz
        )));
    }

    let freqs = bin_frequencies(sample_rate, n_fft);
    let nyquist = sample_rate as f64 / 2.0;
    if bandwidth_hz >= nyquist {
        log::debug!(
            "bandwidth {} Hz at or above Nyquist {} Hz, using all {} bins",
            bandwidth_hz,
            nyquist,
            freqs.len()
        );
        return Ok(freqs.len());
    }

    freqs
        .iter()
        .rposition(|&f| f <= bandwidth_hz)
        .map(|idx| idx + 1)
        .ok_or_else(|| SfError::InvalidParam(format!("no bin below {} Hz", bandwidth_hz)))
}
