//! Contract between the pipeline and the tile transform micro-kernels, plus
//! the transform-domain kernel buffer that callers can precompute and reuse.

use std::fmt;

use num_complex::Complex32;

use super::Algorithm;
use crate::error::{ConvError, Result};
use crate::tensor::{ConvShape, Size};

/// A square tile transform and its transform-domain multiply-accumulate.
///
/// Implementations are zero-sized markers; the pipeline is monomorphized per
/// algorithm so none of these calls go through a vtable.
pub trait TileTransform {
    /// Transform-domain coefficient.
    type Coeff: Copy + Default + Send + Sync + 'static;

    const ALGORITHM: Algorithm;
    /// Tile side in spatial elements.
    const SIDE: usize;

    /// Forward transform of a `SIDE x SIDE` spatial tile.
    fn forward_data(tile: &[f32], block: &mut [Self::Coeff]);

    /// Forward transform of a correlation operand of `extent`, anchored at
    /// the top-left corner of an otherwise zero tile.
    fn forward_kernel(kernel: &[f32], extent: Size, block: &mut [Self::Coeff]);

    /// Inverse transform into a `SIDE x SIDE` spatial tile. Only the leading
    /// `SIDE - k + 1` rows and columns are meaningful for a `k` wide operand.
    fn inverse(block: &[Self::Coeff], scratch: &mut [Self::Coeff], tile: &mut [f32]);

    /// `acc[i] += data[i] * kernel[i]` over one block.
    fn multiply_accumulate(acc: &mut [Self::Coeff], data: &[Self::Coeff], kernel: &[Self::Coeff]);

    fn wrap(blocks: Vec<Self::Coeff>) -> TransformBlocks;

    fn blocks(blocks: &TransformBlocks) -> Option<&[Self::Coeff]>;

    fn block_len() -> usize {
        Self::SIDE * Self::SIDE
    }
}

/// Transform-domain coefficients of one or more blocks.
#[derive(Clone, PartialEq)]
pub enum TransformBlocks {
    /// Complex spectra of the Fourier algorithms.
    Spectral(Vec<Complex32>),
    /// Real Winograd-domain coefficients.
    Winograd(Vec<f32>),
}

impl TransformBlocks {
    pub fn len(&self) -> usize {
        match self {
            TransformBlocks::Spectral(v) => v.len(),
            TransformBlocks::Winograd(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> &'static str {
        match self {
            TransformBlocks::Spectral(_) => "spectral",
            TransformBlocks::Winograd(_) => "winograd",
        }
    }
}

impl fmt::Debug for TransformBlocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransformBlocks::{}({} coefficients)", self.kind(), self.len())
    }
}

/// Kernel tensor in the transform domain: `output_channels x input_channels`
/// blocks of `tile x tile` coefficients each.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelTransform {
    algorithm: Algorithm,
    input_channels: usize,
    output_channels: usize,
    kernel: Size,
    blocks: TransformBlocks,
}

impl KernelTransform {
    pub(crate) fn new(
        algorithm: Algorithm,
        input_channels: usize,
        output_channels: usize,
        kernel: Size,
        blocks: TransformBlocks,
    ) -> Self {
        KernelTransform { algorithm, input_channels, output_channels, kernel, blocks }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    pub fn kernel_size(&self) -> Size {
        self.kernel
    }

    pub fn blocks(&self) -> &TransformBlocks {
        &self.blocks
    }

    /// Coefficients a kernel transform for `shape` under `algorithm` must hold.
    pub fn expected_len(algorithm: Algorithm, shape: &ConvShape) -> usize {
        let side = algorithm.tile_side().unwrap_or(0);
        shape.output_channels * shape.input_channels * side * side
    }

    fn describe(algorithm: Algorithm, oc: usize, ic: usize, kernel: Size, len: usize) -> String {
        format!("{} {}x{} kernel {} ({} coefficients)", algorithm, oc, ic, kernel, len)
    }

    /// Verify this buffer can stand in for the kernel of `shape` under `algorithm`.
    pub fn check(&self, algorithm: Algorithm, shape: &ConvShape) -> Result<()> {
        let expected_len = Self::expected_len(algorithm, shape);
        let matches = self.algorithm == algorithm
            && self.input_channels == shape.input_channels
            && self.output_channels == shape.output_channels
            && self.kernel == shape.kernel
            && self.blocks.len() == expected_len;
        if !matches {
            return Err(ConvError::ShapeMismatch {
                expected: Self::describe(
                    algorithm,
                    shape.output_channels,
                    shape.input_channels,
                    shape.kernel,
                    expected_len,
                ),
                actual: Self::describe(
                    self.algorithm,
                    self.output_channels,
                    self.input_channels,
                    self.kernel,
                    self.blocks.len(),
                ),
            });
        }
        Ok(())
    }
}
