use std::fmt;
use std::time::Duration;

use tracing::{debug, info};

use super::profile::{median_profile, Profile};
use crate::conv::{
    resolve, select, tile_count, Algorithm, ConvolutionEngine, KernelTransform,
    KernelTransformStrategy, Mode,
};
use crate::error::{try_alloc, ConvError, Result};
use crate::tensor::{ConvShape, Padding, Size};

/// Size of the buffer read between iterations to evict the data caches.
pub const CACHE_FLUSH_BYTES: usize = 128 * 1024 * 1024;

const CACHE_LINE: usize = 64;

/// Every option of a benchmark run.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkConfig {
    pub mode: Mode,
    pub algorithm: Algorithm,
    pub strategy: KernelTransformStrategy,
    pub batch: usize,
    pub input_channels: usize,
    pub output_channels: usize,
    pub input_size: Size,
    pub kernel_size: Size,
    /// Implicit padding on every side of the input.
    pub padding: usize,
    /// `None` uses every hardware thread, `Some(0)` disables the pool.
    pub threads: Option<usize>,
    pub iterations: usize,
    pub hardware_events: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        BenchmarkConfig {
            mode: Mode::Output,
            algorithm: Algorithm::Auto,
            strategy: KernelTransformStrategy::Recompute,
            batch: 1,
            input_channels: 0,
            output_channels: 0,
            input_size: Size::square(0),
            kernel_size: Size::square(0),
            padding: 0,
            threads: None,
            iterations: 3,
            hardware_events: false,
        }
    }
}

impl BenchmarkConfig {
    pub fn shape(&self) -> ConvShape {
        ConvShape::new(
            self.batch,
            self.input_channels,
            self.output_channels,
            self.input_size,
            self.kernel_size,
        )
    }

    pub fn padding(&self) -> Padding {
        Padding::uniform(self.padding)
    }

    /// Reject configurations the engine would refuse, before any buffer is allocated.
    pub fn validate(&self) -> Result<()> {
        if self.mode == Mode::Inference && self.batch != 1 {
            return Err(ConvError::invalid("inference requires unit batch size"));
        }
        if self.input_channels == 0 {
            return Err(ConvError::invalid("the number of input channels is not specified"));
        }
        if self.output_channels == 0 {
            return Err(ConvError::invalid("the number of output channels is not specified"));
        }
        if self.input_size.area() == 0 {
            return Err(ConvError::invalid("the input size is not specified"));
        }
        if self.kernel_size.area() == 0 {
            return Err(ConvError::invalid("the kernel size is not specified"));
        }
        if self.iterations == 0 {
            return Err(ConvError::invalid("the number of iterations must be positive"));
        }
        let shape = self.shape();
        shape.validate()?;
        shape.output(self.padding())?;
        resolve(self.algorithm, self.mode, self.kernel_size)?;
        if self.mode == Mode::InputGradient {
            self.padding().transposed(self.kernel_size)?;
        }
        Ok(())
    }
}

/// Buffer read before every iteration so each one starts with cold caches.
pub struct CacheFlush {
    memory: Vec<u8>,
}

impl CacheFlush {
    pub fn new(bytes: usize) -> Result<Self> {
        Ok(CacheFlush { memory: try_alloc(bytes)? })
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Touch one byte per cache line.
    pub fn flush(&self) {
        let mut sum = 0u8;
        for line in self.memory.chunks(CACHE_LINE) {
            sum = sum.wrapping_add(std::hint::black_box(line[0]));
        }
        std::hint::black_box(sum);
    }
}

impl fmt::Debug for CacheFlush {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheFlush").field("bytes", &self.memory.len()).finish()
    }
}

/// Zero-filled tensors for one benchmark configuration.
///
/// Gradient modes reuse the forward buffers in their gradient roles: input
/// gradients are written into `input`, kernel gradients into `kernel`.
#[derive(Debug)]
pub struct Workload {
    shape: ConvShape,
    padding: Padding,
    input: Vec<f32>,
    kernel: Vec<f32>,
    bias: Vec<f32>,
    output: Vec<f32>,
    precomputed: Option<KernelTransform>,
}

impl Workload {
    pub fn new(shape: ConvShape, padding: Padding) -> Result<Self> {
        shape.validate()?;
        Ok(Workload {
            input: try_alloc(shape.input_len())?,
            kernel: try_alloc(shape.kernel_len())?,
            bias: try_alloc(shape.output_channels)?,
            output: try_alloc(shape.output_len(padding)?)?,
            shape,
            padding,
            precomputed: None,
        })
    }

    pub fn shape(&self) -> &ConvShape {
        &self.shape
    }

    pub fn output(&self) -> &[f32] {
        &self.output
    }

    /// Transform the kernel up front for the precomputed strategy.
    pub fn precompute(&mut self, engine: &ConvolutionEngine, algorithm: Algorithm) -> Result<()> {
        self.precomputed = Some(engine.precompute_kernel_transform(algorithm, &self.shape, &self.kernel)?);
        Ok(())
    }

    /// One convolution call of `mode`.
    pub fn run(
        &mut self,
        engine: &mut ConvolutionEngine,
        mode: Mode,
        algorithm: Algorithm,
        strategy: KernelTransformStrategy,
    ) -> Result<Profile> {
        let Workload { shape, padding, input, kernel, bias, output, precomputed } = self;
        match mode {
            Mode::Output => engine.output(algorithm, shape, *padding, input, kernel, bias, output),
            Mode::InputGradient => engine.input_gradient(algorithm, shape, *padding, output, kernel, input),
            Mode::KernelGradient => engine.kernel_gradient(algorithm, shape, *padding, input, output, kernel),
            Mode::Inference => engine.inference(
                algorithm,
                strategy,
                shape,
                *padding,
                input,
                kernel,
                precomputed.as_ref(),
                bias,
                output,
            ),
        }
    }
}

/// Run `iterations` cold-cache convolutions and reduce them to the median profile.
pub fn benchmark_convolution(
    engine: &mut ConvolutionEngine,
    workload: &mut Workload,
    config: &BenchmarkConfig,
    flush: &CacheFlush,
) -> Result<Profile> {
    if config.iterations == 0 {
        return Err(ConvError::invalid("the number of iterations must be positive"));
    }
    if config.mode == Mode::Inference && config.strategy == KernelTransformStrategy::Precomputed {
        workload.precompute(engine, config.algorithm)?;
    }

    let mut profiles = Vec::with_capacity(config.iterations);
    for iteration in 0..config.iterations {
        flush.flush();
        let profile = workload.run(engine, config.mode, config.algorithm, config.strategy)?;
        debug!(iteration, total = ?profile.total, "benchmark iteration");
        profiles.push(profile);
    }
    let median = median_profile(&profiles);
    info!(mode = %config.mode, algorithm = %config.algorithm, total = ?median.total, "benchmark finished");
    Ok(median)
}

/// Benchmark results with the configuration they were measured under.
#[derive(Debug, Clone)]
pub struct Report {
    pub config: BenchmarkConfig,
    /// Worker count, `None` when the pool is disabled.
    pub threads: Option<usize>,
    pub profile: Profile,
}

impl Report {
    fn tile_geometry(&self) -> (Size, usize, Option<f64>) {
        let choice = select(self.config.algorithm, self.config.kernel_size);
        let output = self.config.shape().output(self.config.padding()).unwrap_or(Size::square(0));
        let kernel = self.config.kernel_size;
        let step = Size::new(
            (choice.tile.height + 1).saturating_sub(kernel.height).max(1),
            (choice.tile.width + 1).saturating_sub(kernel.width).max(1),
        );
        let tiles = tile_count(output.height, step.height) * tile_count(output.width, step.width);
        (choice.tile, tiles, choice.flops_per_element)
    }

    /// Bytes touched by the input, kernel and output transforms.
    pub fn footprints(&self) -> [f64; 3] {
        let c = &self.config;
        let (tile, tiles, _) = self.tile_geometry();
        let output = c.shape().output(c.padding()).unwrap_or(Size::square(0));
        let f = std::mem::size_of::<f32>() as f64;
        let tile_elements = (tiles * tile.area()) as f64;
        [
            f * (c.batch * c.input_channels) as f64 * (c.input_size.area() as f64 + tile_elements),
            f * (c.output_channels * c.input_channels) as f64
                * (c.kernel_size.area() + tile.area()) as f64,
            f * (c.batch * c.output_channels) as f64 * (output.area() as f64 + tile_elements),
        ]
    }

    /// Block multiplication rate; `None` for `Auto`, whose tile is unknown.
    pub fn gflops(&self) -> Option<f64> {
        let c = &self.config;
        let (tile, tiles, flops_per_element) = self.tile_geometry();
        let flops = flops_per_element?
            * (tile.area() * tiles * c.batch * c.output_channels * c.input_channels) as f64;
        Some(flops * 1.0e-9 / self.profile.block_multiplication.as_secs_f64())
    }
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1.0e3
}

fn percent(part: Duration, total: Duration) -> f64 {
    part.as_secs_f64() / total.as_secs_f64() * 100.0
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.config;
        let p = &self.profile;
        writeln!(f, "Batch size: {}", c.batch)?;
        writeln!(f, "Input channels: {}", c.input_channels)?;
        writeln!(f, "Output channels: {}", c.output_channels)?;
        writeln!(f, "Input: {} with implicit padding {}", c.input_size, c.padding)?;
        writeln!(f, "Kernel: {}", c.kernel_size)?;
        writeln!(f, "Algorithm: {}", c.algorithm)?;
        if let Some(threads) = self.threads {
            writeln!(f, "Threads: {}", threads)?;
        }
        writeln!(f, "Iterations: {}", c.iterations)?;

        let total = p.total;
        let [input_bytes, kernel_bytes, output_bytes] = self.footprints();
        writeln!(f, "Time: {:5.3} ms", ms(total))?;
        for (name, time, bytes) in [
            ("Input transform", p.input_transform, input_bytes),
            ("Kernel transform", p.kernel_transform, kernel_bytes),
            ("Output transform", p.output_transform, output_bytes),
        ] {
            writeln!(
                f,
                "{}: {:5.3} ms ({:.1}%) [{:.1} GB/s]",
                name,
                ms(time),
                percent(time, total),
                bytes * 1.0e-9 / time.as_secs_f64()
            )?;
        }
        if !p.block_multiplication.is_zero() {
            write!(
                f,
                "Block multiplication: {:5.3} ms ({:.1}%)",
                ms(p.block_multiplication),
                percent(p.block_multiplication, total)
            )?;
            match self.gflops() {
                Some(gflops) => writeln!(f, " [{:.1} GFLOPS]", gflops)?,
                None => writeln!(f)?,
            }
        }
        let overhead = p.overhead();
        write!(f, "Overhead: {:5.3} ms ({:.1}%)", ms(overhead), percent(overhead, total))
    }
}

/// Print `report` to standard output.
pub fn print_report(report: &Report) {
    println!("{}", report);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BenchmarkConfig {
        BenchmarkConfig {
            input_channels: 3,
            output_channels: 16,
            input_size: Size::square(32),
            kernel_size: Size::square(3),
            ..Default::default()
        }
    }

    #[test]
    fn validation_messages() {
        let err = BenchmarkConfig { mode: Mode::Inference, batch: 2, ..config() }.validate().unwrap_err();
        assert!(err.to_string().contains("unit batch size"));
        let err = BenchmarkConfig { input_channels: 0, ..config() }.validate().unwrap_err();
        assert!(err.to_string().contains("input channels"));
        let err = BenchmarkConfig { algorithm: Algorithm::Wt8x8, kernel_size: Size::square(5), ..config() }
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("3x3"));
        assert!(config().validate().is_ok());
    }

    #[test]
    fn footprints_follow_tile_counts() {
        // FT8x8 on a 32x32 input with a 3x3 kernel: 30x30 output, 6x6 output tiles, 25 tiles.
        let report = Report {
            config: BenchmarkConfig { algorithm: Algorithm::Ft8x8, ..config() },
            threads: None,
            profile: Profile::default(),
        };
        let [input, kernel, output] = report.footprints();
        assert_eq!(input, 4.0 * 3.0 * (1024.0 + 25.0 * 64.0));
        assert_eq!(kernel, 4.0 * 48.0 * (9.0 + 64.0));
        assert_eq!(output, 4.0 * 16.0 * (900.0 + 25.0 * 64.0));
    }

    #[test]
    fn auto_report_omits_gflops() {
        let profile = Profile {
            block_multiplication: Duration::from_millis(1),
            total: Duration::from_millis(4),
            ..Default::default()
        };
        let report = Report { config: config(), threads: Some(2), profile };
        let text = report.to_string();
        assert!(text.contains("Algorithm: auto"));
        assert!(text.contains("Threads: 2"));
        assert!(text.contains("Block multiplication: 1.000 ms (25.0%)\n"));
        assert!(text.ends_with("Overhead: 3.000 ms (75.0%)"));
    }
}
