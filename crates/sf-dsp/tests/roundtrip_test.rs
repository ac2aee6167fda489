//! STFT Round-Trip Tests
//!
//! Verifies that inverse(forward(x)) reconstructs x:
//! - Sine and noise input
//! - Zero and reflect padding
//! - Mono and stereo, multiple batch items
//! - Magnitude extraction on real spectra

use approx::assert_abs_diff_eq;
use ndarray::Array3;
use sf_dsp::{magnitude, PadMode, Stft, StftConfig};

const SAMPLE_RATE: f32 = 44100.0;

/// Generate test sine wave
fn generate_sine(samples: usize, freq: f32) -> Vec<f32> {
    (0..samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE;
            (2.0 * std::f32::consts::PI * freq * t).sin() * 0.5
        })
        .collect()
}

/// Generate white noise
fn generate_noise(samples: usize, seed: u64) -> Vec<f32> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    (0..samples)
        .map(|i| {
            let mut hasher = DefaultHasher::new();
            (seed, i).hash(&mut hasher);
            let h = hasher.finish();
            (h as f64 / u64::MAX as f64 * 2.0 - 1.0) as f32
        })
        .collect()
}

fn roundtrip(stft: &Stft, waveform: &Array3<f32>) -> Array3<f32> {
    let spec = stft.forward(waveform.view()).unwrap();
    stft.inverse(spec.view(), waveform.dim().2).unwrap()
}

fn max_error(a: &Array3<f32>, b: &Array3<f32>) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUND TRIP
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_sine_roundtrip_centered() {
    let stft = Stft::new(StftConfig {
        n_fft: 512,
        hop_length: 128,
        center: true,
        pad_mode: PadMode::Zero,
    })
    .unwrap();

    let signal = generate_sine(5000, 440.0);
    let waveform = Array3::from_shape_vec((1, 1, signal.len()), signal).unwrap();

    let output = roundtrip(&stft, &waveform);
    assert_eq!(output.dim(), waveform.dim());
    assert!(max_error(&output, &waveform) < 1e-4);
}

#[test]
fn test_noise_roundtrip_reflect_stereo_batch() {
    let stft = Stft::new(StftConfig {
        n_fft: 256,
        hop_length: 64,
        center: true,
        pad_mode: PadMode::Reflect,
    })
    .unwrap();

    let length = 3001;
    let channels: Vec<Vec<f32>> = (0..4).map(|seed| generate_noise(length, seed)).collect();
    let waveform = Array3::from_shape_fn((2, 2, length), |(b, ch, t)| channels[b * 2 + ch][t]);

    let output = roundtrip(&stft, &waveform);
    assert!(max_error(&output, &waveform) < 1e-4);
}

#[test]
fn test_roundtrip_short_window() {
    let stft = Stft::new(StftConfig {
        n_fft: 128,
        hop_length: 32,
        center: true,
        pad_mode: PadMode::Zero,
    })
    .unwrap();

    let signal = generate_noise(1000, 7);
    let waveform = Array3::from_shape_vec((1, 1, signal.len()), signal).unwrap();

    let output = roundtrip(&stft, &waveform);
    for (a, b) in output.iter().zip(waveform.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-4);
    }
}

#[test]
fn test_roundtrip_half_overlap() {
    let stft = Stft::new(StftConfig {
        n_fft: 64,
        hop_length: 32,
        ..Default::default()
    })
    .unwrap();

    // Offset keeps every sample away from zero, so a dropped sample shows
    let signal: Vec<f32> = generate_sine(512, 700.0).iter().map(|s| s * 0.1 + 0.5).collect();
    let waveform = Array3::from_shape_vec((1, 1, 512), signal).unwrap();

    let output = roundtrip(&stft, &waveform);
    for (a, b) in output.iter().zip(waveform.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-4);
    }
}

#[test]
fn test_non_overlapping_hop_rejected() {
    let result = Stft::new(StftConfig {
        n_fft: 64,
        hop_length: 64,
        ..Default::default()
    });
    assert!(result.is_err());
}

#[test]
fn test_inverse_zero_extends_to_requested_length() {
    let stft = Stft::new(StftConfig {
        n_fft: 64,
        hop_length: 16,
        ..Default::default()
    })
    .unwrap();

    let signal = generate_sine(300, 1000.0);
    let waveform = Array3::from_shape_vec((1, 1, 300), signal).unwrap();
    let spec = stft.forward(waveform.view()).unwrap();

    let longer = stft.inverse(spec.view(), 400).unwrap();
    assert_eq!(longer.dim(), (1, 1, 400));
    for t in 0..300 {
        assert_abs_diff_eq!(longer[[0, 0, t]], waveform[[0, 0, t]], epsilon = 1e-4);
    }

    let shorter = stft.inverse(spec.view(), 100).unwrap();
    assert_eq!(shorter.dim(), (1, 1, 100));
}

// ═══════════════════════════════════════════════════════════════════════════════
// SPECTRUM CONTENT
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_sine_peak_bin() {
    let n_fft = 1024;
    let stft = Stft::new(StftConfig {
        n_fft,
        hop_length: 256,
        ..Default::default()
    })
    .unwrap();

    // Exactly on bin 20
    let freq = 20.0 * SAMPLE_RATE / n_fft as f32;
    let signal = generate_sine(8192, freq);
    let waveform = Array3::from_shape_vec((1, 1, signal.len()), signal).unwrap();

    let spec = stft.forward(waveform.view()).unwrap();
    let mag = magnitude(spec.view(), false);
    let frame = mag.dim().3 / 2;

    let peak = (0..mag.dim().2)
        .max_by(|&a, &b| mag[[0, 0, a, frame]].total_cmp(&mag[[0, 0, b, frame]]))
        .unwrap();
    assert_eq!(peak, 20);
}
