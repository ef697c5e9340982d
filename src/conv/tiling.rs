//! Tile grid geometry.
//!
//! The output plane is covered by a grid of `output_tile` sized blocks; each
//! block is computed from a `tile` sized patch of the padded input. The last
//! row and column of the grid may be partial, in which case only the valid
//! sub-region is written back.

use crate::error::{ConvError, Result};
use crate::tensor::Size;

/// Geometry of the tile grid for one convolution call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileGeometry {
    /// Transform tile (input patch) extent.
    pub tile: Size,
    /// Extent of the correlation operand applied to each tile.
    pub kernel: Size,
    /// Extent of the plane the grid covers.
    pub output: Size,
    /// Output produced per tile: `tile - kernel + 1` per axis.
    pub output_tile: Size,
    /// Number of tiles per axis.
    pub tiles: Size,
}

/// Ceiling division as the grid computes it: quotient plus one if there is a remainder.
pub fn tile_count(extent: usize, step: usize) -> usize {
    extent / step + usize::from(extent % step != 0)
}

impl TileGeometry {
    pub fn new(tile: Size, kernel: Size, output: Size) -> Result<Self> {
        if !kernel.fits_in(tile) {
            return Err(ConvError::invalid(format!(
                "kernel {} does not fit in tile {}",
                kernel, tile
            )));
        }
        if output.area() == 0 {
            return Err(ConvError::invalid(format!("empty output plane {}", output)));
        }
        let output_tile = Size::new(tile.height - kernel.height + 1, tile.width - kernel.width + 1);
        let tiles = Size::new(
            tile_count(output.height, output_tile.height),
            tile_count(output.width, output_tile.width),
        );
        Ok(TileGeometry { tile, kernel, output, output_tile, tiles })
    }

    /// Tiles per batch image.
    pub fn tile_count(&self) -> usize {
        self.tiles.area()
    }

    /// Coefficients in one transform-domain block.
    pub fn block_len(&self) -> usize {
        self.tile.area()
    }

    /// Descriptor of the `index`-th tile (row-major) of image `batch`.
    pub fn descriptor(&self, batch: usize, index: usize) -> TileDescriptor {
        let row = index / self.tiles.width;
        let col = index % self.tiles.width;
        let top = row * self.output_tile.height;
        let left = col * self.output_tile.width;
        TileDescriptor {
            batch,
            row,
            col,
            valid_height: self.output_tile.height.min(self.output.height - top),
            valid_width: self.output_tile.width.min(self.output.width - left),
        }
    }

    /// Lazily enumerate every tile across `batch` images.
    pub fn descriptors(&self, batch: usize) -> Tiles {
        Tiles { geometry: *self, next: 0, end: batch * self.tile_count() }
    }
}

/// One tile of the output grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileDescriptor {
    pub batch: usize,
    pub row: usize,
    pub col: usize,
    pub valid_height: usize,
    pub valid_width: usize,
}

impl TileDescriptor {
    /// Top-left output coordinate of the tile.
    pub fn origin(&self, geometry: &TileGeometry) -> (usize, usize) {
        (self.row * geometry.output_tile.height, self.col * geometry.output_tile.width)
    }

    pub fn is_partial(&self, geometry: &TileGeometry) -> bool {
        self.valid_height < geometry.output_tile.height || self.valid_width < geometry.output_tile.width
    }
}

/// Iterator over batch x tile-rows x tile-cols.
#[derive(Debug, Clone)]
pub struct Tiles {
    geometry: TileGeometry,
    next: usize,
    end: usize,
}

impl Iterator for Tiles {
    type Item = TileDescriptor;

    fn next(&mut self) -> Option<TileDescriptor> {
        if self.next >= self.end {
            return None;
        }
        let per_image = self.geometry.tile_count();
        let descriptor = self.geometry.descriptor(self.next / per_image, self.next % per_image);
        self.next += 1;
        Some(descriptor)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Tiles {}
