//! Transform-domain convolution.
//!
//! Provides tiled FFT (8x8, 16x16) and Winograd F(6x6, 3x3) convolution for
//! forward output, input gradient, kernel gradient and batch-1 inference.
//! All tensors are flat `f32` slices in NCHW layout; kernels are
//! `output_channels x input_channels x height x width`.

mod cache;
mod fft;
mod naive;
mod pipeline;
mod select;
mod simd;
mod tiling;
mod transform;
mod winograd;

use std::fmt;
use std::str::FromStr;

use tracing::debug;

pub use cache::{CacheState, KernelKey, KernelTransformCache};
pub use fft::{Fourier, Ft16x16, Ft8x8};
pub use naive::{conv2d_input_gradient_naive, conv2d_kernel_gradient_naive, conv2d_naive};
pub use select::{resolve, select, TileChoice};
pub use tiling::{tile_count, TileDescriptor, TileGeometry, Tiles};
pub use transform::{KernelTransform, TileTransform, TransformBlocks};
pub use winograd::Wt8x8;

use crate::error::{ConvError, Result};
use crate::metrics::profile::Profile;
use crate::tensor::{check_len, ConvShape, Padding, Size};
use crate::threadpool::ThreadPool;
use pipeline::{ForwardPass, KernelGradientPass, KernelLayout, KernelSource, KernelView};

/// Selects which transform algorithm to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Chosen from the kernel size at call time.
    Auto,
    /// FFT over 8x8 tiles.
    Ft8x8,
    /// FFT over 16x16 tiles.
    Ft16x16,
    /// Winograd F(6x6, 3x3) over 8x8 tiles. 3x3 kernels only.
    Wt8x8,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Algorithm::Auto => "auto",
            Algorithm::Ft8x8 => "FT8x8",
            Algorithm::Ft16x16 => "FT16x16",
            Algorithm::Wt8x8 => "WT8x8",
        };
        f.write_str(name)
    }
}

impl FromStr for Algorithm {
    type Err = ConvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Algorithm::Auto),
            "ft8x8" => Ok(Algorithm::Ft8x8),
            "ft16x16" => Ok(Algorithm::Ft16x16),
            "wt8x8" => Ok(Algorithm::Wt8x8),
            _ => Err(ConvError::invalid(format!("unknown algorithm \"{}\"", s))),
        }
    }
}

/// What a convolution call computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Forward output over a batch.
    Output,
    /// Gradient with respect to the input.
    InputGradient,
    /// Gradient with respect to the kernel.
    KernelGradient,
    /// Forward output for a single image.
    Inference,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Output => "output",
            Mode::InputGradient => "input-gradient",
            Mode::KernelGradient => "kernel-gradient",
            Mode::Inference => "inference",
        };
        f.write_str(name)
    }
}

impl FromStr for Mode {
    type Err = ConvError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "output" => Ok(Mode::Output),
            "input-gradient" => Ok(Mode::InputGradient),
            "kernel-gradient" => Ok(Mode::KernelGradient),
            "inference" => Ok(Mode::Inference),
            _ => Err(ConvError::invalid(format!("unknown mode \"{}\"", s))),
        }
    }
}

/// How inference obtains the transform-domain kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KernelTransformStrategy {
    /// Transform the kernel on every call.
    #[default]
    Recompute,
    /// Keep the last transform in the engine cache and reuse it while the kernel is unchanged.
    Reuse,
    /// Use a transform the caller produced with [`ConvolutionEngine::precompute_kernel_transform`].
    Precomputed,
}

impl fmt::Display for KernelTransformStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KernelTransformStrategy::Recompute => "recompute",
            KernelTransformStrategy::Reuse => "reuse",
            KernelTransformStrategy::Precomputed => "precomputed",
        };
        f.write_str(name)
    }
}

impl FromStr for KernelTransformStrategy {
    type Err = ConvError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "recompute" => Ok(KernelTransformStrategy::Recompute),
            "reuse" => Ok(KernelTransformStrategy::Reuse),
            "precomputed" | "precompute" => Ok(KernelTransformStrategy::Precomputed),
            _ => Err(ConvError::invalid(format!("unknown kernel transform strategy \"{}\"", s))),
        }
    }
}

// Monomorphize `$body` over the tile transform of a resolved algorithm.
macro_rules! dispatch {
    ($algorithm:expr, $transform:ident => $body:expr) => {
        match $algorithm {
            Algorithm::Ft8x8 => {
                type $transform = Ft8x8;
                $body
            }
            Algorithm::Ft16x16 => {
                type $transform = Ft16x16;
                $body
            }
            Algorithm::Wt8x8 => {
                type $transform = Wt8x8;
                $body
            }
            Algorithm::Auto => Err(ConvError::invalid("algorithm must be resolved before dispatch")),
        }
    };
}

fn geometry(algorithm: Algorithm, kernel: Size, output: Size) -> Result<TileGeometry> {
    let side = algorithm
        .tile_side()
        .ok_or_else(|| ConvError::invalid("algorithm must be resolved before tiling"))?;
    TileGeometry::new(Size::square(side), kernel, output)
}

/// Convolution entry points sharing one thread pool and one kernel-transform cache.
///
/// Every call validates its shapes before touching the pool and reports a
/// per-phase [`Profile`]. Output buffers are overwritten, never accumulated into.
#[derive(Debug)]
pub struct ConvolutionEngine {
    pool: ThreadPool,
    cache: KernelTransformCache,
}

impl ConvolutionEngine {
    pub fn new(pool: ThreadPool) -> Self {
        ConvolutionEngine { pool, cache: KernelTransformCache::new() }
    }

    /// `None` uses every hardware thread, `Some(0)` runs on the calling thread.
    pub fn with_threads(threads: Option<usize>) -> Result<Self> {
        Ok(Self::new(ThreadPool::new(threads)?))
    }

    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    pub fn cache(&self) -> &KernelTransformCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut KernelTransformCache {
        &mut self.cache
    }

    /// Forward convolution over a batch.
    ///
    /// `input` is `batch x input_channels x input`, `bias` has one entry per
    /// output channel and `output` is `batch x output_channels x output`.
    pub fn output(
        &mut self,
        algorithm: Algorithm,
        shape: &ConvShape,
        padding: Padding,
        input: &[f32],
        kernel: &[f32],
        bias: &[f32],
        output: &mut [f32],
    ) -> Result<Profile> {
        shape.validate()?;
        let output_size = shape.output(padding)?;
        check_len("input", input.len(), shape.input_len())?;
        check_len("kernel", kernel.len(), shape.kernel_len())?;
        check_len("bias", bias.len(), shape.output_channels)?;
        check_len("output", output.len(), shape.output_len(padding)?)?;

        let algorithm = resolve(algorithm, Mode::Output, shape.kernel)?;
        debug!(%algorithm, %shape, %padding, "output convolution");
        let pass = ForwardPass {
            batch: shape.batch,
            in_channels: shape.input_channels,
            out_channels: shape.output_channels,
            input,
            input_size: shape.input,
            padding,
            kernel: KernelView {
                data: kernel,
                extent: shape.kernel,
                stored_in: shape.input_channels,
                layout: KernelLayout::Direct,
            },
            bias: Some(bias),
            geometry: geometry(algorithm, shape.kernel, output_size)?,
        };
        dispatch!(algorithm, T => pipeline::forward::<T>(&self.pool, &pass, KernelSource::Recompute, output))
    }

    /// Gradient of the loss with respect to the input.
    ///
    /// `grad_output` has the forward output shape, `grad_input` the input shape.
    /// Runs as a forward correlation of the padded output gradient with the
    /// channel-transposed, 180-degree rotated kernel.
    pub fn input_gradient(
        &mut self,
        algorithm: Algorithm,
        shape: &ConvShape,
        padding: Padding,
        grad_output: &[f32],
        kernel: &[f32],
        grad_input: &mut [f32],
    ) -> Result<Profile> {
        shape.validate()?;
        let output_size = shape.output(padding)?;
        check_len("output gradient", grad_output.len(), shape.output_len(padding)?)?;
        check_len("kernel", kernel.len(), shape.kernel_len())?;
        check_len("input gradient", grad_input.len(), shape.input_len())?;

        let algorithm = resolve(algorithm, Mode::InputGradient, shape.kernel)?;
        debug!(%algorithm, %shape, %padding, "input gradient convolution");
        let pass = ForwardPass {
            batch: shape.batch,
            in_channels: shape.output_channels,
            out_channels: shape.input_channels,
            input: grad_output,
            input_size: output_size,
            padding: padding.transposed(shape.kernel)?,
            kernel: KernelView {
                data: kernel,
                extent: shape.kernel,
                stored_in: shape.input_channels,
                layout: KernelLayout::Transposed,
            },
            bias: None,
            geometry: geometry(algorithm, shape.kernel, shape.input)?,
        };
        dispatch!(algorithm, T => pipeline::forward::<T>(&self.pool, &pass, KernelSource::Recompute, grad_input))
    }

    /// Gradient of the loss with respect to the kernel, summed over the batch.
    ///
    /// `grad_kernel` has the kernel shape. Fourier algorithms only.
    pub fn kernel_gradient(
        &mut self,
        algorithm: Algorithm,
        shape: &ConvShape,
        padding: Padding,
        input: &[f32],
        grad_output: &[f32],
        grad_kernel: &mut [f32],
    ) -> Result<Profile> {
        shape.validate()?;
        let output_size = shape.output(padding)?;
        check_len("input", input.len(), shape.input_len())?;
        check_len("output gradient", grad_output.len(), shape.output_len(padding)?)?;
        check_len("kernel gradient", grad_kernel.len(), shape.kernel_len())?;

        let algorithm = resolve(algorithm, Mode::KernelGradient, shape.kernel)?;
        debug!(%algorithm, %shape, %padding, "kernel gradient convolution");
        let pass = KernelGradientPass {
            batch: shape.batch,
            in_channels: shape.input_channels,
            out_channels: shape.output_channels,
            input,
            input_size: shape.input,
            padding,
            grad_output,
            geometry: geometry(algorithm, shape.kernel, output_size)?,
        };
        dispatch!(algorithm, T => pipeline::kernel_gradient::<T>(&self.pool, &pass, grad_kernel))
    }

    /// Forward convolution of a single image.
    ///
    /// With [`KernelTransformStrategy::Precomputed`], `precomputed` must hold a
    /// transform matching `shape` and the resolved algorithm, and `kernel` is
    /// not read. The other strategies ignore `precomputed`.
    pub fn inference(
        &mut self,
        algorithm: Algorithm,
        strategy: KernelTransformStrategy,
        shape: &ConvShape,
        padding: Padding,
        input: &[f32],
        kernel: &[f32],
        precomputed: Option<&KernelTransform>,
        bias: &[f32],
        output: &mut [f32],
    ) -> Result<Profile> {
        shape.validate()?;
        if shape.batch != 1 {
            return Err(ConvError::invalid(format!(
                "inference requires batch size 1, got {}",
                shape.batch
            )));
        }
        let output_size = shape.output(padding)?;
        check_len("input", input.len(), shape.input_len())?;
        if strategy != KernelTransformStrategy::Precomputed {
            check_len("kernel", kernel.len(), shape.kernel_len())?;
        }
        check_len("bias", bias.len(), shape.output_channels)?;
        check_len("output", output.len(), shape.output_len(padding)?)?;

        let algorithm = resolve(algorithm, Mode::Inference, shape.kernel)?;
        debug!(%algorithm, %strategy, %shape, %padding, "inference convolution");
        let source = match strategy {
            KernelTransformStrategy::Recompute => KernelSource::Recompute,
            KernelTransformStrategy::Reuse => KernelSource::Reuse {
                cache: &mut self.cache,
                key: KernelKey::new(algorithm, shape, kernel),
            },
            KernelTransformStrategy::Precomputed => {
                let transform = precomputed.ok_or_else(|| {
                    ConvError::invalid("precomputed strategy requires a kernel transform")
                })?;
                transform.check(algorithm, shape)?;
                KernelSource::Precomputed(transform)
            }
        };
        let pass = ForwardPass {
            batch: 1,
            in_channels: shape.input_channels,
            out_channels: shape.output_channels,
            input,
            input_size: shape.input,
            padding,
            kernel: KernelView {
                data: kernel,
                extent: shape.kernel,
                stored_in: shape.input_channels,
                layout: KernelLayout::Direct,
            },
            bias: Some(bias),
            geometry: geometry(algorithm, shape.kernel, output_size)?,
        };
        dispatch!(algorithm, T => pipeline::forward::<T>(&self.pool, &pass, source, output))
    }

    /// Transform `kernel` once for the precomputed inference strategy.
    ///
    /// `Auto` resolves as it would for inference, so the result matches a
    /// later `inference` call with the same `algorithm` and `shape`.
    pub fn precompute_kernel_transform(
        &self,
        algorithm: Algorithm,
        shape: &ConvShape,
        kernel: &[f32],
    ) -> Result<KernelTransform> {
        shape.validate()?;
        check_len("kernel", kernel.len(), shape.kernel_len())?;
        let algorithm = resolve(algorithm, Mode::Inference, shape.kernel)?;
        let view = KernelView {
            data: kernel,
            extent: shape.kernel,
            stored_in: shape.input_channels,
            layout: KernelLayout::Direct,
        };
        dispatch!(algorithm, T => {
            pipeline::precompute::<T>(&self.pool, &view, shape.output_channels, shape.input_channels)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for algorithm in [Algorithm::Auto, Algorithm::Ft8x8, Algorithm::Ft16x16, Algorithm::Wt8x8] {
            assert_eq!(algorithm.to_string().parse::<Algorithm>().unwrap(), algorithm);
        }
        for mode in [Mode::Output, Mode::InputGradient, Mode::KernelGradient, Mode::Inference] {
            assert_eq!(mode.to_string().parse::<Mode>().unwrap(), mode);
        }
        assert_eq!(
            "precompute".parse::<KernelTransformStrategy>().unwrap(),
            KernelTransformStrategy::Precomputed
        );
        assert!("ft32x32".parse::<Algorithm>().is_err());
    }

    #[test]
    fn inference_rejects_batches() {
        let mut engine = ConvolutionEngine::new(ThreadPool::sequential());
        let shape = ConvShape::new(2, 1, 1, Size::square(4), Size::square(3));
        let input = vec![0.0; shape.input_len()];
        let kernel = vec![0.0; shape.kernel_len()];
        let mut output = vec![0.0; shape.output_len(Padding::default()).unwrap()];
        let err = engine
            .inference(
                Algorithm::Wt8x8,
                KernelTransformStrategy::Recompute,
                &shape,
                Padding::default(),
                &input,
                &kernel,
                None,
                &[0.0],
                &mut output,
            )
            .unwrap_err();
        assert!(matches!(err, ConvError::InvalidArgument(_)));
    }
}
