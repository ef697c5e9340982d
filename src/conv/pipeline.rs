//! Four-phase transform pipeline.
//!
//! Every call runs input transform, kernel transform, block multiplication
//! and output transform in that order. Each phase is a `for_each_chunk` over
//! the thread pool, which returns only after every task of the phase has
//! finished, so a phase always sees fully materialized results of the
//! previous one. Tasks within a phase write disjoint chunks.

use std::time::Instant;

use tracing::trace;

use super::cache::{KernelKey, KernelTransformCache};
use super::tiling::{TileDescriptor, TileGeometry};
use super::transform::{KernelTransform, TileTransform};
use crate::error::{try_alloc, ConvError, Result};
use crate::metrics::profile::{timed, Profile};
use crate::tensor::{Padding, Size};
use crate::threadpool::ThreadPool;

/// How a pass reads kernel slices out of an `[out][in][h][w]` kernel tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KernelLayout {
    /// Pass channels match the stored channels.
    Direct,
    /// Pass output channels are the stored input channels and every slice is
    /// rotated by 180 degrees (input-gradient correlation).
    Transposed,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct KernelView<'a> {
    pub data: &'a [f32],
    pub extent: Size,
    /// Input channels of the stored tensor.
    pub stored_in: usize,
    pub layout: KernelLayout,
}

impl KernelView<'_> {
    /// Copy the slice correlating pass input channel `i` into pass output channel `o`.
    fn gather(&self, o: usize, i: usize, dst: &mut [f32]) {
        let area = self.extent.area();
        match self.layout {
            KernelLayout::Direct => {
                let base = (o * self.stored_in + i) * area;
                dst.copy_from_slice(&self.data[base..base + area]);
            }
            KernelLayout::Transposed => {
                let base = (i * self.stored_in + o) * area;
                for (d, s) in dst.iter_mut().zip(self.data[base..base + area].iter().rev()) {
                    *d = *s;
                }
            }
        }
    }
}

/// A forward-shaped pass: `out[b][o] = sum_i corr(pad(in[b][i]), kernel[o][i]) + bias[o]`.
///
/// Output and inference calls run it directly; input-gradient calls run it
/// with the gradient tensor as input and a transposed kernel.
#[derive(Debug)]
pub(crate) struct ForwardPass<'a> {
    pub batch: usize,
    pub in_channels: usize,
    pub out_channels: usize,
    pub input: &'a [f32],
    pub input_size: Size,
    pub padding: Padding,
    pub kernel: KernelView<'a>,
    pub bias: Option<&'a [f32]>,
    pub geometry: TileGeometry,
}

/// Where the kernel-transform phase gets its blocks from.
pub(crate) enum KernelSource<'a> {
    /// Transform now, discard after the call.
    Recompute,
    /// Use the cached blocks when `key` still matches, otherwise transform and cache.
    Reuse { cache: &'a mut KernelTransformCache, key: KernelKey },
    /// Caller-owned blocks, already validated against the pass.
    Precomputed(&'a KernelTransform),
}

/// Kernel-gradient pass: `grad_kernel[o][i] = sum_b corr(pad(in[b][i]), grad_out[b][o])`.
///
/// The output-gradient tiles take the kernel role; the geometry is that of
/// the forward output.
#[derive(Debug)]
pub(crate) struct KernelGradientPass<'a> {
    pub batch: usize,
    pub in_channels: usize,
    pub out_channels: usize,
    pub input: &'a [f32],
    pub input_size: Size,
    pub padding: Padding,
    pub grad_output: &'a [f32],
    pub geometry: TileGeometry,
}

/// Copy the padded-input patch under `tile` into a zeroed tile buffer.
/// Rows and columns outside the real input stay zero.
fn gather_patch(
    plane: &[f32],
    size: Size,
    padding: Padding,
    geometry: &TileGeometry,
    tile: &TileDescriptor,
    patch: &mut [f32],
) {
    patch.fill(0.0);
    let (top, left) = tile.origin(geometry);
    let side = geometry.tile;

    let x_start = padding.left.saturating_sub(left).min(side.width);
    let x_end = (padding.left + size.width).saturating_sub(left).min(side.width);
    if x_start >= x_end {
        return;
    }
    let ix = left + x_start - padding.left;
    let run = x_end - x_start;

    for y in 0..side.height {
        let py = top + y;
        if py < padding.top || py - padding.top >= size.height {
            continue;
        }
        let iy = py - padding.top;
        let src = &plane[iy * size.width + ix..iy * size.width + ix + run];
        patch[y * side.width + x_start..y * side.width + x_end].copy_from_slice(src);
    }
}

/// Write the valid region of an inverse-transformed tile into its output plane.
fn scatter_tile(
    tile: &[f32],
    geometry: &TileGeometry,
    descriptor: &TileDescriptor,
    bias: f32,
    plane: &mut [f32],
) {
    let (top, left) = descriptor.origin(geometry);
    let width = geometry.output.width;
    let stride = geometry.tile.width;
    for y in 0..descriptor.valid_height {
        let dst = &mut plane[(top + y) * width + left..][..descriptor.valid_width];
        let src = &tile[y * stride..][..descriptor.valid_width];
        for (d, s) in dst.iter_mut().zip(src) {
            *d = s + bias;
        }
    }
}

/// Phase 1: `[batch][channel][tile]` transform-domain blocks of the input.
fn transform_input<T: TileTransform>(
    pool: &ThreadPool,
    geometry: &TileGeometry,
    batch: usize,
    channels: usize,
    input: &[f32],
    input_size: Size,
    padding: Padding,
) -> Result<Vec<T::Coeff>> {
    let block = T::block_len();
    let tiles = geometry.tile_count();
    let plane_len = input_size.area();
    let mut blocks = try_alloc::<T::Coeff>(batch * channels * tiles * block)?;

    pool.for_each_chunk(&mut blocks, block, || vec![0.0f32; block], |patch, index, out| {
        let plane = index / tiles;
        let tile = geometry.descriptor(plane / channels, index % tiles);
        let source = &input[plane * plane_len..(plane + 1) * plane_len];
        gather_patch(source, input_size, padding, geometry, &tile, patch);
        T::forward_data(patch, out);
    });
    Ok(blocks)
}

/// Phase 2: `[out][in]` transform-domain blocks of the kernel.
fn transform_kernel<T: TileTransform>(
    pool: &ThreadPool,
    kernel: &KernelView<'_>,
    out_channels: usize,
    in_channels: usize,
) -> Result<Vec<T::Coeff>> {
    let block = T::block_len();
    let mut blocks = try_alloc::<T::Coeff>(out_channels * in_channels * block)?;

    pool.for_each_chunk(&mut blocks, block, || vec![0.0f32; kernel.extent.area()], |slice, index, out| {
        kernel.gather(index / in_channels, index % in_channels, slice);
        T::forward_kernel(slice, kernel.extent, out);
    });
    Ok(blocks)
}

/// Phase 3: `[batch][out][tile]` result blocks, accumulated over input channels.
fn multiply_blocks<T: TileTransform>(
    pool: &ThreadPool,
    pass: &ForwardPass<'_>,
    input_blocks: &[T::Coeff],
    kernel_blocks: &[T::Coeff],
) -> Result<Vec<T::Coeff>> {
    let block = T::block_len();
    let plane = pass.geometry.tile_count() * block;
    let (in_channels, out_channels) = (pass.in_channels, pass.out_channels);
    let mut results = try_alloc::<T::Coeff>(pass.batch * out_channels * plane)?;

    pool.for_each_chunk(&mut results, plane, || (), |_, index, acc| {
        let (b, o) = (index / out_channels, index % out_channels);
        for i in 0..in_channels {
            let k = &kernel_blocks[(o * in_channels + i) * block..][..block];
            let x = &input_blocks[(b * in_channels + i) * plane..][..plane];
            for (acc_tile, x_tile) in acc.chunks_exact_mut(block).zip(x.chunks_exact(block)) {
                T::multiply_accumulate(acc_tile, x_tile, k);
            }
        }
    });
    Ok(results)
}

/// Phase 4: inverse-transform every result block into its output plane, clipped
/// to the tile's valid region, with bias added.
fn transform_output<T: TileTransform>(
    pool: &ThreadPool,
    pass: &ForwardPass<'_>,
    results: &[T::Coeff],
    output: &mut [f32],
) {
    let block = T::block_len();
    let geometry = &pass.geometry;
    let tiles = geometry.tile_count();
    let init = || (vec![T::Coeff::default(); block], vec![0.0f32; block]);

    pool.for_each_chunk(output, geometry.output.area(), init, |(scratch, tile), index, plane| {
        let bias = pass.bias.map_or(0.0, |bias| bias[index % pass.out_channels]);
        let blocks = &results[index * tiles * block..][..tiles * block];
        for (t, result) in blocks.chunks_exact(block).enumerate() {
            let descriptor = geometry.descriptor(index / pass.out_channels, t);
            T::inverse(result, scratch, tile);
            scatter_tile(tile, geometry, &descriptor, bias, plane);
        }
    });
}

/// Run a forward-shaped pass, writing `batch x out_channels x output` into `output`.
pub(crate) fn forward<T: TileTransform>(
    pool: &ThreadPool,
    pass: &ForwardPass<'_>,
    kernel: KernelSource<'_>,
    output: &mut [f32],
) -> Result<Profile> {
    let start = Instant::now();
    let mut profile = Profile::default();

    let input_blocks = timed(&mut profile.input_transform, || {
        transform_input::<T>(
            pool,
            &pass.geometry,
            pass.batch,
            pass.in_channels,
            pass.input,
            pass.input_size,
            pass.padding,
        )
    })?;

    let fresh;
    let kernel_blocks: &[T::Coeff] = match kernel {
        KernelSource::Recompute => {
            fresh = timed(&mut profile.kernel_transform, || {
                transform_kernel::<T>(pool, &pass.kernel, pass.out_channels, pass.in_channels)
            })?;
            &fresh
        }
        KernelSource::Reuse { cache, key } => {
            if cache.lookup(&key).is_none() {
                let blocks = timed(&mut profile.kernel_transform, || {
                    transform_kernel::<T>(pool, &pass.kernel, pass.out_channels, pass.in_channels)
                })?;
                let transform = KernelTransform::new(
                    T::ALGORITHM,
                    pass.in_channels,
                    pass.out_channels,
                    pass.kernel.extent,
                    T::wrap(blocks),
                );
                cache.store(key, transform);
            }
            cache
                .transform()
                .and_then(|transform| T::blocks(transform.blocks()))
                .ok_or_else(|| ConvError::invalid("cached kernel transform has the wrong coefficient type"))?
        }
        KernelSource::Precomputed(transform) => {
            T::blocks(transform.blocks()).ok_or_else(|| ConvError::ShapeMismatch {
                expected: format!("{} coefficients", T::ALGORITHM),
                actual: format!("{:?}", transform.blocks()),
            })?
        }
    };

    let results = timed(&mut profile.block_multiplication, || {
        multiply_blocks::<T>(pool, pass, &input_blocks, kernel_blocks)
    })?;

    timed(&mut profile.output_transform, || transform_output::<T>(pool, pass, &results, output));

    profile.total = start.elapsed();
    trace!(algorithm = %T::ALGORITHM, ?profile, "forward pass");
    Ok(profile)
}

/// Transform a kernel tensor once, for later use with the precomputed strategy.
pub(crate) fn precompute<T: TileTransform>(
    pool: &ThreadPool,
    kernel: &KernelView<'_>,
    out_channels: usize,
    in_channels: usize,
) -> Result<KernelTransform> {
    let blocks = transform_kernel::<T>(pool, kernel, out_channels, in_channels)?;
    Ok(KernelTransform::new(T::ALGORITHM, in_channels, out_channels, kernel.extent, T::wrap(blocks)))
}

/// Run a kernel-gradient pass, writing `out_channels x in_channels x kernel` into `grad_kernel`.
pub(crate) fn kernel_gradient<T: TileTransform>(
    pool: &ThreadPool,
    pass: &KernelGradientPass<'_>,
    grad_kernel: &mut [f32],
) -> Result<Profile> {
    let start = Instant::now();
    let mut profile = Profile::default();
    let geometry = &pass.geometry;
    let block = T::block_len();
    let tiles = geometry.tile_count();
    let (in_channels, out_channels) = (pass.in_channels, pass.out_channels);

    let input_blocks = timed(&mut profile.input_transform, || {
        transform_input::<T>(pool, geometry, pass.batch, in_channels, pass.input, pass.input_size, pass.padding)
    })?;

    // Output-gradient tiles in the kernel role: [batch][out][tile].
    let gradient_blocks = timed(&mut profile.kernel_transform, || -> Result<Vec<T::Coeff>> {
        let plane_len = geometry.output.area();
        let extent = geometry.output_tile;
        let mut blocks = try_alloc::<T::Coeff>(pass.batch * out_channels * tiles * block)?;
        pool.for_each_chunk(&mut blocks, block, || vec![0.0f32; extent.area()], |patch, index, out| {
            let plane = index / tiles;
            let descriptor = geometry.descriptor(plane / out_channels, index % tiles);
            let (top, left) = descriptor.origin(geometry);
            let source = &pass.grad_output[plane * plane_len..(plane + 1) * plane_len];
            patch.fill(0.0);
            for y in 0..descriptor.valid_height {
                let row = &source[(top + y) * geometry.output.width + left..][..descriptor.valid_width];
                patch[y * extent.width..][..descriptor.valid_width].copy_from_slice(row);
            }
            T::forward_kernel(patch, extent, out);
        });
        Ok(blocks)
    })?;

    // Accumulate over batch and tiles: [out][in].
    let results = timed(&mut profile.block_multiplication, || -> Result<Vec<T::Coeff>> {
        let plane = tiles * block;
        let mut results = try_alloc::<T::Coeff>(out_channels * in_channels * block)?;
        pool.for_each_chunk(&mut results, block, || (), |_, index, acc| {
            let (o, i) = (index / in_channels, index % in_channels);
            for b in 0..pass.batch {
                let x = &input_blocks[(b * in_channels + i) * plane..][..plane];
                let g = &gradient_blocks[(b * out_channels + o) * plane..][..plane];
                for (x_tile, g_tile) in x.chunks_exact(block).zip(g.chunks_exact(block)) {
                    T::multiply_accumulate(acc, x_tile, g_tile);
                }
            }
        });
        Ok(results)
    })?;

    timed(&mut profile.output_transform, || {
        let kernel = geometry.kernel;
        let init = || (vec![T::Coeff::default(); block], vec![0.0f32; block]);
        pool.for_each_chunk(grad_kernel, kernel.area(), init, |(scratch, tile), index, slice| {
            T::inverse(&results[index * block..][..block], scratch, tile);
            for y in 0..kernel.height {
                slice[y * kernel.width..][..kernel.width]
                    .copy_from_slice(&tile[y * geometry.tile.width..][..kernel.width]);
            }
        });
    });

    profile.total = start.elapsed();
    trace!(algorithm = %T::ALGORITHM, ?profile, "kernel gradient pass");
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_patch_zero_fills_padding_and_overhang() {
        // 3x3 input, padding 1 on every side, 4x4 tiles with a 2x2 kernel.
        let plane: Vec<f32> = (1..=9).map(|v| v as f32).collect();
        let size = Size::square(3);
        let padding = Padding::uniform(1);
        let geometry = TileGeometry::new(Size::square(4), Size::square(2), Size::square(4)).unwrap();
        let mut patch = vec![-1.0f32; 16];

        gather_patch(&plane, size, padding, &geometry, &geometry.descriptor(0, 0), &mut patch);
        #[rustfmt::skip]
        let expected = [
            0.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 2.0, 3.0,
            0.0, 4.0, 5.0, 6.0,
            0.0, 7.0, 8.0, 9.0,
        ];
        assert_eq!(patch, expected);

        // Second tile column starts at padded column 3: only input column 2 remains.
        gather_patch(&plane, size, padding, &geometry, &geometry.descriptor(0, 1), &mut patch);
        #[rustfmt::skip]
        let expected = [
            0.0, 0.0, 0.0, 0.0,
            3.0, 0.0, 0.0, 0.0,
            6.0, 0.0, 0.0, 0.0,
            9.0, 0.0, 0.0, 0.0,
        ];
        assert_eq!(patch, expected);
    }

    #[test]
    fn transposed_view_rotates_and_swaps_channels() {
        // Stored kernel: 2 out x 1 in x 1x2.
        let data = [1.0f32, 2.0, 3.0, 4.0];
        let view = KernelView {
            data: &data,
            extent: Size::new(1, 2),
            stored_in: 1,
            layout: KernelLayout::Transposed,
        };
        let mut slice = [0.0f32; 2];
        view.gather(0, 1, &mut slice);
        assert_eq!(slice, [4.0, 3.0]);
    }
}
