//! Winograd F(6x6, 3x3) tile transform (WT8x8).
//!
//! An 8x8 input tile and a 3x3 kernel are mapped into an 8x8 Winograd
//! domain; their pointwise product maps back to a 6x6 output tile. Only
//! 3x3 kernels are supported.

use super::simd;
use super::transform::{TileTransform, TransformBlocks};
use super::Algorithm;
use crate::tensor::Size;

/// Winograd transform over 8x8 tiles with interpolation points
/// 0, +-1, +-2, +-1/2 and infinity.
#[derive(Debug, Clone, Copy, Default)]
pub struct Wt8x8;

const TILE: usize = 8;
const KERNEL: usize = 3;
const OUTPUT: usize = TILE - KERNEL + 1;

// B^T, 8x8 input transform.
const BT: [[f32; TILE]; TILE] = [
    [1.0, 0.0, -5.25, 0.0, 5.25, 0.0, -1.0, 0.0],
    [0.0, 1.0, 1.0, -4.25, -4.25, 1.0, 1.0, 0.0],
    [0.0, -1.0, 1.0, 4.25, -4.25, -1.0, 1.0, 0.0],
    [0.0, 0.5, 0.25, -2.5, -1.25, 2.0, 1.0, 0.0],
    [0.0, -0.5, 0.25, 2.5, -1.25, -2.0, 1.0, 0.0],
    [0.0, 2.0, 4.0, -2.5, -5.0, 0.5, 1.0, 0.0],
    [0.0, -2.0, 4.0, 2.5, -5.0, -0.5, 1.0, 0.0],
    [0.0, -1.0, 0.0, 5.25, 0.0, -5.25, 0.0, 1.0],
];

// G, 8x3 kernel transform.
const G: [[f32; KERNEL]; TILE] = [
    [1.0, 0.0, 0.0],
    [-2.0 / 9.0, -2.0 / 9.0, -2.0 / 9.0],
    [-2.0 / 9.0, 2.0 / 9.0, -2.0 / 9.0],
    [1.0 / 90.0, 1.0 / 45.0, 2.0 / 45.0],
    [1.0 / 90.0, -1.0 / 45.0, 2.0 / 45.0],
    [32.0 / 45.0, 16.0 / 45.0, 8.0 / 45.0],
    [32.0 / 45.0, -16.0 / 45.0, 8.0 / 45.0],
    [0.0, 0.0, 1.0],
];

// A^T, 6x8 output transform.
const AT: [[f32; TILE]; OUTPUT] = [
    [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0],
    [0.0, 1.0, -1.0, 2.0, -2.0, 0.5, -0.5, 0.0],
    [0.0, 1.0, 1.0, 4.0, 4.0, 0.25, 0.25, 0.0],
    [0.0, 1.0, -1.0, 8.0, -8.0, 0.125, -0.125, 0.0],
    [0.0, 1.0, 1.0, 16.0, 16.0, 0.0625, 0.0625, 0.0],
    [0.0, 1.0, -1.0, 32.0, -32.0, 0.03125, -0.03125, 1.0],
];

/// `out = M * x * M^T`, where `M` is `R x C` and `x` is `C x C` with row stride
/// `x_stride`. The `R x R` result is written with row stride `out_stride`.
#[inline]
fn sandwich<const R: usize, const C: usize>(
    m: &[[f32; C]; R],
    x: &[f32],
    x_stride: usize,
    out: &mut [f32],
    out_stride: usize,
) {
    // M * x (R x C intermediate)
    let mut tmp = [[0.0f32; C]; R];
    for i in 0..R {
        for k in 0..C {
            let coeff = m[i][k];
            if coeff == 0.0 {
                continue;
            }
            let row = &x[k * x_stride..k * x_stride + C];
            for j in 0..C {
                tmp[i][j] += coeff * row[j];
            }
        }
    }
    // (M * x) * M^T (R x R)
    for i in 0..R {
        for j in 0..R {
            let mut sum = 0.0f32;
            for k in 0..C {
                sum += tmp[i][k] * m[j][k];
            }
            out[i * out_stride + j] = sum;
        }
    }
}

impl TileTransform for Wt8x8 {
    type Coeff = f32;

    const ALGORITHM: Algorithm = Algorithm::Wt8x8;
    const SIDE: usize = TILE;

    fn forward_data(tile: &[f32], block: &mut [f32]) {
        sandwich(&BT, tile, TILE, block, TILE);
    }

    fn forward_kernel(kernel: &[f32], extent: Size, block: &mut [f32]) {
        debug_assert_eq!(extent, Size::square(KERNEL));
        sandwich(&G, kernel, KERNEL, block, TILE);
    }

    fn inverse(block: &[f32], _scratch: &mut [f32], tile: &mut [f32]) {
        sandwich(&AT, block, TILE, tile, TILE);
    }

    fn multiply_accumulate(acc: &mut [f32], data: &[f32], kernel: &[f32]) {
        simd::fma_f32(acc, data, kernel);
    }

    fn wrap(blocks: Vec<f32>) -> TransformBlocks {
        TransformBlocks::Winograd(blocks)
    }

    fn blocks(blocks: &TransformBlocks) -> Option<&[f32]> {
        match blocks {
            TransformBlocks::Winograd(v) => Some(v),
            TransformBlocks::Spectral(_) => None,
        }
    }
}
