use std::time::Duration;

use tileconv::conv::{Algorithm, ConvolutionEngine, KernelTransformStrategy, Mode};
use tileconv::metrics::{
    benchmark_convolution, median_duration, median_profile, BenchmarkConfig, CacheFlush, Profile,
    Report, Workload,
};
use tileconv::tensor::Size;

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn config(mode: Mode, algorithm: Algorithm) -> BenchmarkConfig {
    BenchmarkConfig {
        mode,
        algorithm,
        input_channels: 2,
        output_channels: 3,
        input_size: Size::square(12),
        kernel_size: Size::square(3),
        padding: 1,
        threads: Some(0),
        ..Default::default()
    }
}

#[test]
fn test_median_examples() {
    assert_eq!(median_duration(&mut [ms(5), ms(1), ms(3)]), Some(ms(3)));
    assert_eq!(median_duration(&mut [ms(4), ms(1), ms(3), ms(2)]), Some(Duration::from_micros(2500)));
    assert_eq!(median_duration(&mut []), None);
}

#[test]
fn test_median_profile_keeps_total_above_phases() {
    let profiles = [
        Profile { input_transform: ms(4), block_multiplication: ms(1), total: ms(6), ..Default::default() },
        Profile { input_transform: ms(1), block_multiplication: ms(5), total: ms(7), ..Default::default() },
        Profile { input_transform: ms(5), block_multiplication: ms(4), total: ms(6), ..Default::default() },
    ];
    let median = median_profile(&profiles);
    assert_eq!(median.input_transform, ms(4));
    assert_eq!(median.block_multiplication, ms(4));
    assert_eq!(median.total, ms(8));
    assert_eq!(median.overhead(), Duration::ZERO);
}

#[test]
fn test_every_mode_runs() {
    let flush = CacheFlush::new(1 << 16).unwrap();
    let mut engine = ConvolutionEngine::with_threads(Some(0)).unwrap();
    for (mode, algorithm) in [
        (Mode::Output, Algorithm::Wt8x8),
        (Mode::InputGradient, Algorithm::Ft8x8),
        (Mode::KernelGradient, Algorithm::Auto),
        (Mode::Inference, Algorithm::Ft16x16),
    ] {
        let config = config(mode, algorithm);
        config.validate().unwrap();
        let mut workload = Workload::new(config.shape(), config.padding()).unwrap();
        let profile = benchmark_convolution(&mut engine, &mut workload, &config, &flush).unwrap();
        assert!(profile.total >= profile.phases(), "{} {}", mode, algorithm);
    }
}

#[test]
fn test_inference_strategies_benchmark() {
    let flush = CacheFlush::new(4096).unwrap();
    let mut engine = ConvolutionEngine::with_threads(Some(2)).unwrap();
    for strategy in [
        KernelTransformStrategy::Recompute,
        KernelTransformStrategy::Reuse,
        KernelTransformStrategy::Precomputed,
    ] {
        let config = BenchmarkConfig { strategy, iterations: 4, ..config(Mode::Inference, Algorithm::Wt8x8) };
        let mut workload = Workload::new(config.shape(), config.padding()).unwrap();
        benchmark_convolution(&mut engine, &mut workload, &config, &flush).unwrap();
        // All-zero workload: output is exactly the zero bias.
        assert!(workload.output().iter().all(|&v| v == 0.0));
    }
    assert!(engine.cache().hits() >= 3);
}

#[test]
fn test_zero_iterations_rejected() {
    let flush = CacheFlush::new(64).unwrap();
    let mut engine = ConvolutionEngine::with_threads(Some(0)).unwrap();
    let config = BenchmarkConfig { iterations: 0, ..config(Mode::Output, Algorithm::Auto) };
    assert!(config.validate().is_err());
    let mut workload = Workload::new(config.shape(), config.padding()).unwrap();
    assert!(benchmark_convolution(&mut engine, &mut workload, &config, &flush).is_err());
}

#[test]
fn test_report_percentages() {
    let profile = Profile {
        input_transform: ms(2),
        kernel_transform: ms(1),
        block_multiplication: ms(3),
        output_transform: ms(2),
        total: ms(10),
    };
    let report = Report { config: config(Mode::Output, Algorithm::Ft8x8), threads: None, profile };
    let text = report.to_string();
    assert!(text.contains("Input: 12x12 with implicit padding 1"));
    assert!(!text.contains("Threads:"));
    assert!(text.contains("Time: 10.000 ms"));
    assert!(text.contains("Input transform: 2.000 ms (20.0%)"));
    assert!(text.contains("GFLOPS]"));
    assert!(text.ends_with("Overhead: 2.000 ms (20.0%)"));

    let phases = ["Input transform", "Kernel transform", "Block multiplication", "Output transform"];
    let percent_sum: f64 = text
        .lines()
        .filter(|line| phases.iter().any(|p| line.starts_with(p)))
        .map(|line| {
            let open = line.find('(').unwrap();
            let close = line.find('%').unwrap();
            line[open + 1..close].parse::<f64>().unwrap()
        })
        .sum();
    assert!(percent_sum <= 100.0);
}
