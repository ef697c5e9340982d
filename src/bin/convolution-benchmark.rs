//! Cold-cache convolution benchmark.
//!
//! Prints the configuration, the median per-phase profile and, with
//! `--hardware-events`, one `name: value` line per hardware counter. The exit
//! code is the number of counters that could not be measured.

use std::ffi::OsString;
use std::process;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use tracing::warn;

use tileconv::conv::{Algorithm, ConvolutionEngine, KernelTransformStrategy, Mode};
use tileconv::metrics::benchmark::CACHE_FLUSH_BYTES;
use tileconv::metrics::counters::open_counters;
use tileconv::metrics::{
    benchmark_convolution, measure, print_report, BenchmarkConfig, CacheFlush, CounterReading,
    Report, Workload,
};
use tileconv::tensor::Size;
use tileconv::threadpool::ThreadPool;
use tileconv::Result;

#[derive(Parser, Debug)]
#[command(name = "convolution-benchmark")]
#[command(about = "Benchmark tiled FFT and Winograd convolution")]
#[command(version)]
struct Args {
    /// The convolution mode (output, input-gradient, kernel-gradient, inference)
    #[arg(short, long, default_value = "output")]
    mode: Mode,

    /// The algorithm (auto, ft8x8, ft16x16 or wt8x8)
    #[arg(short, long, default_value = "auto")]
    algorithm: Algorithm,

    /// The kernel transform strategy in inference mode (recompute, reuse, precompute) [short: -kt]
    #[arg(long, default_value = "recompute")]
    kernel_transform: KernelTransformStrategy,

    /// The size of a minibatch
    #[arg(short, long, default_value_t = 1)]
    batch: usize,

    /// The number of input channels [short: -ic]
    #[arg(long, value_name = "N")]
    input_channels: Option<usize>,

    /// The number of output channels [short: -oc]
    #[arg(long, value_name = "N")]
    output_channels: Option<usize>,

    /// Input height and width [short: -is]
    #[arg(long, num_args = 2, value_names = ["H", "W"])]
    input_size: Option<Vec<usize>>,

    /// Kernel height and width [short: -ks]
    #[arg(long, num_args = 2, value_names = ["H", "W"])]
    kernel_size: Option<Vec<usize>>,

    /// Implicit input padding on every side [short: -ip]
    #[arg(short = 'p', long, visible_alias = "padding", default_value_t = 0)]
    input_padding: usize,

    /// The number of threads (default: all; 0 to disable the thread pool)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Iterations per measurement
    #[arg(short, long, default_value_t = 3)]
    iterations: usize,

    /// Collect hardware events for the output convolution
    #[arg(short = 'e', long)]
    hardware_events: bool,
}

impl Args {
    fn size(dims: &Option<Vec<usize>>) -> Size {
        match dims.as_deref() {
            Some(&[height, width]) => Size::new(height, width),
            _ => Size::square(0),
        }
    }

    fn into_config(self) -> BenchmarkConfig {
        BenchmarkConfig {
            mode: self.mode,
            algorithm: self.algorithm,
            strategy: self.kernel_transform,
            batch: self.batch,
            input_channels: self.input_channels.unwrap_or(0),
            output_channels: self.output_channels.unwrap_or(0),
            input_size: Self::size(&self.input_size),
            kernel_size: Self::size(&self.kernel_size),
            padding: self.input_padding,
            threads: self.threads,
            iterations: self.iterations,
            hardware_events: self.hardware_events,
        }
    }
}

/// Map the two-letter short flags onto their long forms.
fn normalize_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .map(|arg| {
            let long = match arg.to_str() {
                Some("-ic") => "--input-channels",
                Some("-oc") => "--output-channels",
                Some("-is") => "--input-size",
                Some("-ks") => "--kernel-size",
                Some("-ip") => "--input-padding",
                Some("-kt") => "--kernel-transform",
                _ => return arg,
            };
            OsString::from(long)
        })
        .collect()
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Measure every hardware counter around single-threaded output convolutions.
/// Returns the number of counters that failed.
fn measure_counters(config: &BenchmarkConfig, workload: &mut Workload) -> usize {
    let mut engine = ConvolutionEngine::new(ThreadPool::sequential());
    let mut failures = 0;
    for (event, counter) in open_counters() {
        let counter = match counter {
            Ok(counter) => counter,
            Err(err) => {
                warn!(counter = event.name(), %err, "failed to open counter");
                failures += 1;
                continue;
            }
        };
        let name = counter.event().name();
        let enabled = match counter.enable() {
            Ok(enabled) => enabled,
            Err(err) => {
                warn!(counter = name, %err, "failed to enable counter");
                failures += 1;
                continue;
            }
        };
        let reading = measure(enabled.counter(), config.iterations, || {
            workload.run(&mut engine, Mode::Output, config.algorithm, config.strategy).map(drop)
        });
        let count = match reading {
            Ok(CounterReading::Count(count)) => count,
            Ok(CounterReading::Unavailable) => {
                failures += 1;
                continue;
            }
            Err(err) => {
                warn!(counter = name, %err, "convolution failed under counter");
                failures += 1;
                continue;
            }
        };
        if let Err(err) = enabled.disable() {
            warn!(counter = name, %err, "failed to disable counter");
            failures += 1;
            continue;
        }
        println!("{}: {}", name, count);
    }
    failures
}

fn run(config: &BenchmarkConfig) -> Result<usize> {
    let flush = CacheFlush::new(CACHE_FLUSH_BYTES)?;
    let mut workload = Workload::new(config.shape(), config.padding())?;
    let mut engine = ConvolutionEngine::with_threads(config.threads)?;
    let threads = (!engine.pool().is_sequential()).then(|| engine.pool().threads());

    let profile = benchmark_convolution(&mut engine, &mut workload, config, &flush)?;
    print_report(&Report { config: config.clone(), threads, profile });

    if !config.hardware_events {
        return Ok(0);
    }
    Ok(measure_counters(config, &mut workload))
}

fn main() {
    setup_logging();

    let args = match Args::try_parse_from(normalize_args(std::env::args_os())) {
        Ok(args) => args,
        // Value errors carry no usage line of their own.
        Err(err) if matches!(err.kind(), ErrorKind::InvalidValue | ErrorKind::ValueValidation) => {
            let _ = err.print();
            eprintln!("{}", Args::command().render_usage());
            process::exit(err.exit_code());
        }
        Err(err) => err.exit(),
    };
    let config = args.into_config();
    if let Err(err) = config.validate() {
        eprintln!("Error: {}", err);
        eprintln!("{}", Args::command().render_usage());
        process::exit(1);
    }

    match run(&config) {
        Ok(failures) => process::exit(failures as i32),
        Err(err) => {
            eprintln!("Error: {}", err);
            process::exit(1);
        }
    }
}
