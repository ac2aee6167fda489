//! Refinement and separation benchmarks

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use ndarray::{Array3, Array4};
use num_complex::Complex32;
use sf_dsp::StftConfig;
use sf_ml::separation::{BandEstimator, SeparationConfig, Separator, SourceEstimator, WienerConfig, wiener};

fn stereo_mix(bins: usize, frames: usize) -> Array3<Complex32> {
    Array3::from_shape_fn((2, bins, frames), |(ch, bin, t)| {
        let phase = 0.37 * (bin * 5 + t * 11 + ch * 3) as f32;
        let amp = 0.5 + ((bin * 3 + t + ch) % 7) as f32;
        Complex32::from_polar(amp, phase)
    })
}

fn estimates_for(mix: &Array3<Complex32>, nb_targets: usize) -> Array4<f32> {
    let (channels, bins, frames) = mix.dim();
    Array4::from_shape_fn((nb_targets, channels, bins, frames), |(j, ch, bin, t)| {
        mix[[ch, bin, t]].norm() * (j + 1) as f32 / (nb_targets * 2) as f32
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// WIENER
// ═══════════════════════════════════════════════════════════════════════════════

fn bench_wiener_passes(c: &mut Criterion) {
    let mix = stereo_mix(513, 128);
    let estimates = estimates_for(&mix, 2);

    let mut group = c.benchmark_group("wiener_513x128");
    for iterations in [0usize, 1, 3] {
        let config = WienerConfig {
            iterations,
            ..Default::default()
        };

        group.bench_with_input(BenchmarkId::from_parameter(iterations), &config, |b, config| {
            b.iter(|| wiener(black_box(estimates.view()), black_box(mix.view()), config).unwrap());
        });
    }
    group.finish();
}

fn bench_softmask(c: &mut Criterion) {
    let mix = stereo_mix(513, 128);
    let estimates = estimates_for(&mix, 2);
    let config = WienerConfig {
        softmask: true,
        ..Default::default()
    };

    c.bench_function("softmask_513x128", |b| {
        b.iter(|| wiener(black_box(estimates.view()), black_box(mix.view()), &config).unwrap());
    });
}

// ═══════════════════════════════════════════════════════════════════════════════
// FULL PIPELINE
// ═══════════════════════════════════════════════════════════════════════════════

fn bench_separate_one_second(c: &mut Criterion) {
    let config = SeparationConfig {
        stft: StftConfig {
            n_fft: 2048,
            hop_length: 512,
            ..Default::default()
        },
        ..SeparationConfig::high_quality()
    };
    let estimators: Vec<Box<dyn SourceEstimator>> = vec![
        Box::new(BandEstimator::new("low", 0..200, 1.0)),
        Box::new(BandEstimator::new("high", 200..1025, 1.0)),
    ];
    let separator = Separator::new(config, estimators).unwrap();

    let mix = Array3::from_shape_fn((1, 2, 44100), |(_, ch, t)| {
        let phase = t as f32 / 44100.0 * std::f32::consts::TAU;
        (phase * 220.0).sin() * 0.4 + (phase * (3000.0 + ch as f32 * 10.0)).sin() * 0.2
    });

    c.bench_function("separate_1s_stereo", |b| {
        b.iter(|| separator.forward(black_box(mix.view())).unwrap());
    });
}

criterion_group!(benches, bench_wiener_passes, bench_softmask, bench_separate_one_second);
criterion_main!(benches);
