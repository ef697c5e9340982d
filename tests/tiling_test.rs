use proptest::prelude::*;

use tileconv::conv::{tile_count, TileGeometry};
use tileconv::tensor::{output_size, Padding, Size};

#[test]
fn test_exact_and_partial_grids() {
    // 13x13 input, 3x3 kernel, 8x8 tiles: 11x11 output, 6x6 output tiles.
    let geometry = TileGeometry::new(Size::square(8), Size::square(3), Size::square(11)).unwrap();
    assert_eq!(geometry.output_tile, Size::square(6));
    assert_eq!(geometry.tiles, Size::square(2));
    assert_eq!(geometry.tile_count(), 4);

    let last = geometry.descriptor(0, 3);
    assert_eq!((last.row, last.col), (1, 1));
    assert_eq!((last.valid_height, last.valid_width), (5, 5));
    assert!(last.is_partial(&geometry));
    assert!(!geometry.descriptor(0, 0).is_partial(&geometry));
}

#[test]
fn test_partial_tile_smaller_than_output_tile() {
    // 13 output columns in steps of 5 leave a last tile with 3 valid columns.
    let geometry = TileGeometry::new(Size::square(8), Size::square(4), Size::square(13)).unwrap();
    assert_eq!(geometry.output_tile, Size::square(5));
    assert_eq!(geometry.tile_count(), 9);
    let last = geometry.descriptor(2, 8);
    assert_eq!(last.batch, 2);
    assert_eq!((last.valid_height, last.valid_width), (3, 3));
    assert_eq!(last.origin(&geometry), (10, 10));
}

#[test]
fn test_kernel_as_large_as_tile() {
    // 8x8 input, 8x8 kernel, 8x8 tiles: a single 1x1 output tile.
    let output = output_size(Size::square(8), Padding::default(), Size::square(8)).unwrap();
    assert_eq!(output, Size::square(1));
    let geometry = TileGeometry::new(Size::square(8), Size::square(8), output).unwrap();
    assert_eq!(geometry.output_tile, Size::square(1));
    assert_eq!(geometry.tiles, Size::square(1));
    let only = geometry.descriptor(0, 0);
    assert_eq!((only.valid_height, only.valid_width), (1, 1));
    assert!(!only.is_partial(&geometry));
}

#[test]
fn test_full_tiles_need_no_clipping() {
    // 13x13 input, 4x4 kernel: 10x10 output in 5x5 steps.
    let output = output_size(Size::square(13), Padding::default(), Size::square(4)).unwrap();
    assert_eq!(output, Size::square(10));
    let geometry = TileGeometry::new(Size::square(8), Size::square(4), output).unwrap();
    assert_eq!(geometry.output_tile, Size::square(5));
    assert_eq!(geometry.tiles, Size::square(2));
    assert_eq!(geometry.tile_count(), 4);
    for tile in geometry.descriptors(1) {
        assert!(!tile.is_partial(&geometry));
        assert_eq!((tile.valid_height, tile.valid_width), (5, 5));
    }
}

#[test]
fn test_descriptors_span_batch() {
    let geometry = TileGeometry::new(Size::square(16), Size::square(5), Size::new(30, 7)).unwrap();
    let tiles = geometry.descriptors(3);
    assert_eq!(tiles.len(), 3 * geometry.tile_count());
    let batches: Vec<usize> = tiles.map(|t| t.batch).collect();
    assert_eq!(batches.first(), Some(&0));
    assert_eq!(batches.last(), Some(&2));
}

#[test]
fn test_kernel_must_fit_tile() {
    assert!(TileGeometry::new(Size::square(8), Size::new(3, 9), Size::square(4)).is_err());
    assert_eq!(tile_count(12, 6), 2);
    assert_eq!(tile_count(13, 6), 3);
}

proptest! {
    #[test]
    fn grid_covers_output_exactly(
        height in 1usize..40,
        width in 1usize..40,
        kernel_h in 1usize..8,
        kernel_w in 1usize..8,
        side in prop::sample::select(vec![8usize, 16]),
        pad in 0usize..3,
    ) {
        let input = Size::new(height + kernel_h, width + kernel_w);
        let kernel = Size::new(kernel_h, kernel_w);
        let padding = Padding::uniform(pad.min(kernel_h - 1).min(kernel_w - 1));
        let output = output_size(input, padding, kernel).unwrap();
        prop_assert!(output.height >= 1 && output.width >= 1);

        let geometry = TileGeometry::new(Size::square(side), kernel, output).unwrap();
        prop_assert!(geometry.tiles.height * geometry.output_tile.height >= output.height);
        prop_assert!(geometry.tiles.width * geometry.output_tile.width >= output.width);

        // Valid regions tile the output without overlap.
        let covered: usize = geometry
            .descriptors(1)
            .map(|t| t.valid_height * t.valid_width)
            .sum();
        prop_assert_eq!(covered, output.area());
        for t in geometry.descriptors(1) {
            let (top, left) = t.origin(&geometry);
            prop_assert!(t.valid_height >= 1 && t.valid_width >= 1);
            prop_assert!(top + t.valid_height <= output.height);
            prop_assert!(left + t.valid_width <= output.width);
        }
    }
}
