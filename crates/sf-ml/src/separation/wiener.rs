//! Multichannel Wiener filter refinement
//!
//! Turns per-source magnitude estimates plus the complex mixture into
//! complex per-source spectrograms that sum to (approximately) the
//! mixture. Each frequency bin is solved independently:
//!
//! - `v_j(t)`: source power, averaged over channels
//! - `R_j`: spatial covariance, `Σ_t y_j(t) y_j(t)ᴴ / Σ_t v_j(t)`
//! - `Cxx(t) = √eps·I + Σ_j v_j(t) R_j`
//! - `y_j(t) = v_j(t) R_j Cxx(t)⁻¹ x(t)`
//!
//! The initial estimate is either the magnitude with the mixture phase or
//! a power-ratio softmask. With `iterations = 0` that estimate (plus the
//! residual) is the output; each iteration is one EM pass that re-estimates
//! `v` and `R` from the previous outputs.

use std::ops::Range;

use nalgebra::DMatrix;
use ndarray::{arr2, s, Array2, Array3, Array4, ArrayView2, ArrayView3, ArrayView4, Axis, Zip};
use num_complex::Complex32;
use sf_core::shape_string;

use super::config::WienerConfig;
use crate::error::{MlError, MlResult};

/// Refine one chunk of one sample
///
/// * `estimates` - `(target, channel|1, bin, frame)` non-negative magnitudes
/// * `mix` - `(channel, bin, frame)` complex mixture
///
/// Returns `(source, channel, bin, frame)`; with `config.residual` the last
/// source is the residual.
pub fn wiener(
    estimates: ArrayView4<f32>,
    mix: ArrayView3<Complex32>,
    config: &WienerConfig,
) -> MlResult<Array4<Complex32>> {
    let (nb_targets, est_channels, est_bins, est_frames) = estimates.dim();
    let (nb_channels, nb_bins, nb_frames) = mix.dim();

    if nb_channels == 0 {
        return Err(MlError::ShapeMismatch {
            expected: "mixture with at least one channel".into(),
            got: shape_string(mix.shape()),
        });
    }
    if (est_bins, est_frames) != (nb_bins, nb_frames)
        || (est_channels != 1 && est_channels != nb_channels)
    {
        return Err(MlError::ShapeMismatch {
            expected: format!("[_, 1|{}, {}, {}]", nb_channels, nb_bins, nb_frames),
            got: shape_string(estimates.shape()),
        });
    }
    config.validate(nb_targets)?;

    let mut y = initial_estimate(estimates, mix, config)?;

    let passes = config.passes();
    if passes == 0 {
        return Ok(y);
    }

    // Keep magnitudes in a range where f32 covariances stay well conditioned
    let peak = mix.iter().map(|c| c.norm()).fold(0.0f32, f32::max);
    let max_abs = (peak / config.scale_factor).max(1.0);
    let x = mix.mapv(|c| c / max_abs);
    y.mapv_inplace(|c| c / max_abs);

    let eps = config.eps;
    Zip::from(y.axis_iter_mut(Axis(2)))
        .and(x.axis_iter(Axis(1)))
        .par_for_each(|mut y_bin, x_bin| {
            let refined = (0..passes).fold(y_bin.to_owned(), |acc, _| em_step(acc, x_bin, eps));
            y_bin.assign(&refined);
        });

    y.mapv_inplace(|c| c * max_abs);
    Ok(y)
}

/// Consecutive frame ranges of at most `window` frames
///
/// `None` yields a single range covering every frame.
pub fn frame_chunks(nb_frames: usize, window: Option<usize>) -> Vec<Range<usize>> {
    let window = window.unwrap_or(nb_frames).max(1);
    (0..nb_frames)
        .step_by(window)
        .map(|start| start..(start + window).min(nb_frames))
        .collect()
}

/// Initial complex estimate per source, before any covariance pass
fn initial_estimate(
    estimates: ArrayView4<f32>,
    mix: ArrayView3<Complex32>,
    config: &WienerConfig,
) -> MlResult<Array4<Complex32>> {
    let nb_targets = estimates.dim().0;
    let (nb_channels, nb_bins, nb_frames) = mix.dim();
    let nb_sources = config.nb_sources(nb_targets);

    // Mono estimates apply to every mixture channel
    let estimates = estimates
        .broadcast((nb_targets, nb_channels, nb_bins, nb_frames))
        .ok_or_else(|| MlError::ShapeMismatch {
            expected: format!("[{}, {}, {}, {}]", nb_targets, nb_channels, nb_bins, nb_frames),
            got: shape_string(estimates.shape()),
        })?;

    let mut y = Array4::<Complex32>::zeros((nb_sources, nb_channels, nb_bins, nb_frames));

    if config.softmask {
        let powered = estimates.mapv(|e| e.powf(config.mask_power));
        let total = powered.sum_axis(Axis(0));

        for (j, target) in powered.outer_iter().enumerate() {
            Zip::from(y.index_axis_mut(Axis(0), j))
                .and(&target)
                .and(&total)
                .and(&mix)
                .for_each(|out, &e, &sum, &x| *out = x * (e / (config.eps + sum)));
        }
    } else {
        for (j, target) in estimates.outer_iter().enumerate() {
            Zip::from(y.index_axis_mut(Axis(0), j))
                .and(&target)
                .and(&mix)
                .for_each(|out, &e, &x| {
                    let modulus = x.norm();
                    // Silent bins have phase 0
                    *out = if modulus > 0.0 {
                        x * (e / modulus)
                    } else {
                        Complex32::new(e, 0.0)
                    };
                });
        }
    }

    if config.residual {
        let modelled = y.slice(s![..nb_targets, .., .., ..]).sum_axis(Axis(0));
        y.index_axis_mut(Axis(0), nb_targets).assign(&(&mix - &modelled));
    }

    Ok(y)
}

/// One covariance pass for a single bin
///
/// `y` is `(source, channel, frame)`, `x` is `(channel, frame)`.
fn em_step(y: Array3<Complex32>, x: ArrayView2<Complex32>, eps: f32) -> Array3<Complex32> {
    let (nb_sources, nb_channels, nb_frames) = y.dim();

    // Power spectral density per source and frame
    let psd = y
        .mapv(|c| c.norm_sqr())
        .mean_axis(Axis(1))
        .unwrap_or_else(|| Array2::zeros((nb_sources, nb_frames)));

    let covariances: Vec<Array2<Complex32>> = y
        .outer_iter()
        .zip(psd.outer_iter())
        .map(|(source, power)| spatial_covariance(source, power.sum(), eps))
        .collect();

    let regularization = Array2::<Complex32>::eye(nb_channels) * Complex32::new(eps.sqrt(), 0.0);
    let mut out = Array3::<Complex32>::zeros((nb_sources, nb_channels, nb_frames));

    for t in 0..nb_frames {
        let mut mix_covariance = regularization.clone();
        for (j, cov) in covariances.iter().enumerate() {
            mix_covariance.scaled_add(Complex32::new(psd[[j, t]], 0.0), cov);
        }

        // v_j R_j Cxx⁻¹ x, with Cxx⁻¹ x shared by all sources
        let whitened = invert(&mix_covariance, eps).dot(&x.column(t));
        for (j, cov) in covariances.iter().enumerate() {
            let filtered = cov.dot(&whitened) * Complex32::new(psd[[j, t]], 0.0);
            out.slice_mut(s![j, .., t]).assign(&filtered);
        }
    }

    out
}

/// `Σ_t y(t) y(t)ᴴ / (eps + weight)` for a `(channel, frame)` source
fn spatial_covariance(source: ArrayView2<Complex32>, weight: f32, eps: f32) -> Array2<Complex32> {
    let conj_t = source.t().mapv(|c| c.conj());
    source.dot(&conj_t) / Complex32::new(eps + weight, 0.0)
}

/// Inverse of a small Hermitian matrix
///
/// 1×1 and 2×2 are solved in closed form, larger sizes through nalgebra.
/// A singular or non-finite result falls back to a scaled identity.
fn invert(matrix: &Array2<Complex32>, eps: f32) -> Array2<Complex32> {
    let n = matrix.nrows();
    let inverse = match n {
        1 => {
            let det = matrix[[0, 0]];
            is_invertible(det).then(|| Array2::from_elem((1, 1), det.inv()))
        }
        2 => {
            let (a, b, c, d) = (matrix[[0, 0]], matrix[[0, 1]], matrix[[1, 0]], matrix[[1, 1]]);
            let det = a * d - b * c;
            is_invertible(det).then(|| {
                let inv_det = det.inv();
                arr2(&[[d * inv_det, -b * inv_det], [-c * inv_det, a * inv_det]])
            })
        }
        _ => DMatrix::from_fn(n, n, |i, k| matrix[[i, k]])
            .try_inverse()
            .map(|inv| Array2::from_shape_fn((n, n), |(i, k)| inv[(i, k)])),
    };

    match inverse.filter(|inv| inv.iter().all(|c| c.re.is_finite() && c.im.is_finite())) {
        Some(inv) => inv,
        None => {
            let trace: f32 = matrix.diag().iter().map(|c| c.re).sum::<f32>() / n as f32;
            log::debug!("singular mixture covariance (trace {}), using scaled identity", trace);
            Array2::<Complex32>::eye(n) * Complex32::new(1.0 / trace.max(eps), 0.0)
        }
    }
}

fn is_invertible(det: Complex32) -> bool {
    det.re.is_finite() && det.im.is_finite() && det.norm_sqr() > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config(softmask: bool, residual: bool, iterations: usize) -> WienerConfig {
        WienerConfig {
            softmask,
            residual,
            iterations,
            ..Default::default()
        }
    }

    fn stereo_mix(bins: usize, frames: usize) -> Array3<Complex32> {
        Array3::from_shape_fn((2, bins, frames), |(ch, bin, t)| {
            let phase = 0.3 * (bin * 7 + t * 3 + ch) as f32;
            let amp = 1.0 + ((bin + 2 * t + ch) % 5) as f32;
            Complex32::from_polar(amp, phase)
        })
    }

    #[test]
    fn test_frame_chunks() {
        assert_eq!(frame_chunks(10, Some(4)), vec![0..4, 4..8, 8..10]);
        assert_eq!(frame_chunks(10, None), vec![0..10]);
        assert_eq!(frame_chunks(3, Some(300)), vec![0..3]);
        assert!(frame_chunks(0, Some(4)).is_empty());
    }

    #[test]
    fn test_invert_closed_form() {
        let m = Array2::from_shape_vec(
            (2, 2),
            vec![
                Complex32::new(2.0, 0.0),
                Complex32::new(0.5, 0.5),
                Complex32::new(0.5, -0.5),
                Complex32::new(3.0, 0.0),
            ],
        )
        .unwrap();

        let product = m.dot(&invert(&m, 1e-10));
        for i in 0..2 {
            for k in 0..2 {
                let expected = if i == k { 1.0 } else { 0.0 };
                assert_relative_eq!(product[[i, k]].re, expected, epsilon = 1e-5);
                assert_relative_eq!(product[[i, k]].im, 0.0, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_invert_general() {
        let m = Array2::from_shape_fn((3, 3), |(i, k)| {
            if i == k {
                Complex32::new(4.0 + i as f32, 0.0)
            } else {
                Complex32::new(0.5, 0.1 * (i as f32 - k as f32))
            }
        });

        let product = m.dot(&invert(&m, 1e-10));
        for i in 0..3 {
            for k in 0..3 {
                let expected = if i == k { 1.0 } else { 0.0 };
                assert_relative_eq!(product[[i, k]].re, expected, epsilon = 1e-4);
                assert_relative_eq!(product[[i, k]].im, 0.0, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_invert_singular_falls_back() {
        let m = Array2::from_elem((2, 2), Complex32::new(1.0, 0.0));
        let inv = invert(&m, 1e-10);
        assert_relative_eq!(inv[[0, 0]].re, 1.0);
        assert_eq!(inv[[0, 1]], Complex32::new(0.0, 0.0));

        let zero = Array2::<Complex32>::zeros((3, 3));
        assert!(invert(&zero, 1e-10).iter().all(|c| c.re.is_finite()));
    }

    #[test]
    fn test_magnitude_with_mixture_phase() {
        let mix = stereo_mix(4, 3);
        let estimates = Array4::from_elem((1, 2, 4, 3), 0.5f32);

        let y = initial_estimate(estimates.view(), mix.view(), &config(false, false, 0)).unwrap();
        assert_eq!(y.dim(), (1, 2, 4, 3));

        let (m, e) = (mix[[1, 2, 1]], y[[0, 1, 2, 1]]);
        assert_relative_eq!(e.norm(), 0.5, epsilon = 1e-6);
        assert_relative_eq!(e.arg(), m.arg(), epsilon = 1e-5);
    }

    #[test]
    fn test_softmask_ratio() {
        let mix = stereo_mix(3, 2);
        let mut estimates = Array4::zeros((2, 1, 3, 2));
        estimates.index_axis_mut(Axis(0), 0).fill(1.0f32);
        estimates.index_axis_mut(Axis(0), 1).fill(3.0f32);

        let y = wiener(estimates.view(), mix.view(), &config(true, false, 0)).unwrap();

        let x = mix[[0, 1, 1]];
        assert_relative_eq!(y[[0, 0, 1, 1]].re, x.re * 0.25, epsilon = 1e-5);
        assert_relative_eq!(y[[1, 0, 1, 1]].im, x.im * 0.75, epsilon = 1e-5);
    }

    #[test]
    fn test_residual_completes_mixture() {
        let mix = stereo_mix(5, 4);
        let estimates = Array4::from_elem((2, 1, 5, 4), 0.8f32);

        let y = initial_estimate(estimates.view(), mix.view(), &config(false, true, 0)).unwrap();
        assert_eq!(y.dim().0, 3);

        let total = y.sum_axis(Axis(0));
        for (a, b) in total.iter().zip(mix.iter()) {
            assert_relative_eq!(a.re, b.re, epsilon = 1e-5);
            assert_relative_eq!(a.im, b.im, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_wiener_pass_conserves_mixture() {
        let mix = stereo_mix(6, 8);
        let estimates = Array4::from_shape_fn((2, 2, 6, 8), |(j, ch, bin, t)| {
            0.2 + ((j + ch + bin * t) % 4) as f32
        });

        for iterations in [1, 2] {
            let y = wiener(estimates.view(), mix.view(), &config(false, true, iterations)).unwrap();
            let total = y.sum_axis(Axis(0));
            for (a, b) in total.iter().zip(mix.iter()) {
                assert!((a - b).norm() < 1e-2 * (1.0 + b.norm()));
            }
        }
    }

    #[test]
    fn test_zero_iterations_keep_estimate() {
        let mix = stereo_mix(4, 6);
        let estimates = mix.mapv(|c| 0.5 * c.norm()).insert_axis(Axis(0));

        let y = wiener(estimates.view(), mix.view(), &config(false, false, 0)).unwrap();
        assert_eq!(y.dim(), (1, 2, 4, 6));

        let out_energy: f32 = y.iter().map(|c| c.norm_sqr()).sum();
        let mix_energy: f32 = mix.iter().map(|c| c.norm_sqr()).sum();
        assert_relative_eq!(out_energy / mix_energy, 0.25, epsilon = 1e-4);
    }

    #[test]
    fn test_em_single_source_rejected() {
        let mix = stereo_mix(2, 2);
        let estimates = Array4::from_elem((1, 1, 2, 2), 1.0f32);
        let result = wiener(estimates.view(), mix.view(), &config(false, false, 1));
        assert!(matches!(result, Err(MlError::Config(_))));
    }

    #[test]
    fn test_shape_mismatch() {
        let mix = stereo_mix(4, 4);
        let wrong_bins = Array4::from_elem((1, 1, 3, 4), 1.0f32);
        let wrong_channels = Array4::from_elem((1, 3, 4, 4), 1.0f32);

        assert!(matches!(
            wiener(wrong_bins.view(), mix.view(), &WienerConfig::default()),
            Err(MlError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            wiener(wrong_channels.view(), mix.view(), &WienerConfig::default()),
            Err(MlError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_silent_input_stays_finite() {
        let mix = Array3::<Complex32>::zeros((2, 3, 5));
        let estimates = Array4::<f32>::zeros((2, 1, 3, 5));

        for softmask in [false, true] {
            let y = wiener(estimates.view(), mix.view(), &config(softmask, true, 2)).unwrap();
            assert!(y.iter().all(|c| c.re.is_finite() && c.im.is_finite()));
            assert!(y.iter().all(|c| c.norm() < 1e-6));
        }
    }
}
