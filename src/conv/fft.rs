//! Fourier tile transforms (FT8x8, FT16x16).
//!
//! Uses an in-place radix-2 Cooley-Tukey FFT over square tiles. Kernels are
//! stored conjugated so that a plain complex product in the transform domain
//! yields cross-correlation after the inverse transform.

use std::f32::consts::PI;

use num_complex::Complex32;

use super::simd;
use super::transform::{TileTransform, TransformBlocks};
use super::Algorithm;
use crate::tensor::Size;

/// Fourier transform over `N x N` tiles.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fourier<const N: usize>;

pub type Ft8x8 = Fourier<8>;
pub type Ft16x16 = Fourier<16>;

/// Bit-reversal permutation for in-place FFT.
fn bit_reverse(data: &mut [Complex32]) {
    let n = data.len();
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j ^= bit;
        if i < j {
            data.swap(i, j);
        }
    }
}

/// In-place radix-2 FFT. The inverse is unscaled; callers apply `1/N`.
fn fft_1d(data: &mut [Complex32], inverse: bool) {
    let n = data.len();
    debug_assert!(n.is_power_of_two());

    bit_reverse(data);

    let mut len = 2;
    while len <= n {
        let half = len / 2;
        let angle = if inverse { 2.0 * PI / len as f32 } else { -2.0 * PI / len as f32 };
        let wn = Complex32::from_polar(1.0, angle);

        for start in (0..n).step_by(len) {
            let mut w = Complex32::new(1.0, 0.0);
            for j in 0..half {
                let u = data[start + j];
                let v = w * data[start + j + half];
                data[start + j] = u + v;
                data[start + j + half] = u - v;
                w *= wn;
            }
        }
        len <<= 1;
    }
}

/// 2D FFT of an `n x n` block: rows, then columns.
fn fft_2d(data: &mut [Complex32], n: usize, inverse: bool) {
    for row in data.chunks_exact_mut(n) {
        fft_1d(row, inverse);
    }

    let mut column = [Complex32::new(0.0, 0.0); 16];
    let column = &mut column[..n];
    for c in 0..n {
        for r in 0..n {
            column[r] = data[r * n + c];
        }
        fft_1d(column, inverse);
        for r in 0..n {
            data[r * n + c] = column[r];
        }
    }
}

impl<const N: usize> TileTransform for Fourier<N> {
    type Coeff = Complex32;

    const ALGORITHM: Algorithm = if N == 16 { Algorithm::Ft16x16 } else { Algorithm::Ft8x8 };
    const SIDE: usize = N;

    fn forward_data(tile: &[f32], block: &mut [Complex32]) {
        for (dst, &src) in block.iter_mut().zip(tile) {
            *dst = Complex32::new(src, 0.0);
        }
        fft_2d(block, N, false);
    }

    fn forward_kernel(kernel: &[f32], extent: Size, block: &mut [Complex32]) {
        block.fill(Complex32::new(0.0, 0.0));
        for r in 0..extent.height {
            for c in 0..extent.width {
                block[r * N + c] = Complex32::new(kernel[r * extent.width + c], 0.0);
            }
        }
        fft_2d(block, N, false);
        for v in block.iter_mut() {
            *v = v.conj();
        }
    }

    fn inverse(block: &[Complex32], scratch: &mut [Complex32], tile: &mut [f32]) {
        scratch.copy_from_slice(block);
        fft_2d(scratch, N, true);
        let scale = 1.0 / (N * N) as f32;
        for (dst, src) in tile.iter_mut().zip(scratch.iter()) {
            *dst = src.re * scale;
        }
    }

    fn multiply_accumulate(acc: &mut [Complex32], data: &[Complex32], kernel: &[Complex32]) {
        simd::cmac(acc, data, kernel);
    }

    fn wrap(blocks: Vec<Complex32>) -> TransformBlocks {
        TransformBlocks::Spectral(blocks)
    }

    fn blocks(blocks: &TransformBlocks) -> Option<&[Complex32]> {
        match blocks {
            TransformBlocks::Spectral(v) => Some(v),
            TransformBlocks::Winograd(_) => None,
        }
    }
}
