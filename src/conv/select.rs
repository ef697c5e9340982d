//! Algorithm selection: maps a requested algorithm onto a tile size and a
//! per-element cost factor.

use tracing::debug;

use super::{Algorithm, Mode};
use crate::error::{ConvError, Result};
use crate::tensor::Size;

/// Tile size and block-multiplication cost reported for an algorithm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileChoice {
    pub tile: Size,
    /// Floating-point operations per transform-domain element and channel pair.
    /// `None` when the algorithm is chosen at run time.
    pub flops_per_element: Option<f64>,
}

impl Algorithm {
    /// Side of the square transform tile. `None` for `Auto`.
    pub const fn tile_side(self) -> Option<usize> {
        match self {
            Algorithm::Auto => None,
            Algorithm::Ft8x8 | Algorithm::Wt8x8 => Some(8),
            Algorithm::Ft16x16 => Some(16),
        }
    }

    /// FFT blocks cost a complex multiply-add (4 flops), Winograd blocks a real one (2 flops).
    pub const fn flops_per_element(self) -> Option<f64> {
        match self {
            Algorithm::Auto => None,
            Algorithm::Ft8x8 | Algorithm::Ft16x16 => Some(4.0),
            Algorithm::Wt8x8 => Some(2.0),
        }
    }
}

/// Tile size and cost factor for reporting.
///
/// `Auto` has no fixed tile, so the kernel size stands in for it; this keeps
/// tile counts and footprints well-defined without claiming a FLOP rate.
pub fn select(algorithm: Algorithm, kernel: Size) -> TileChoice {
    match algorithm.tile_side() {
        Some(side) => TileChoice {
            tile: Size::square(side),
            flops_per_element: algorithm.flops_per_element(),
        },
        None => TileChoice { tile: kernel, flops_per_element: None },
    }
}

/// Resolve a requested algorithm to the concrete one that will execute.
///
/// `Auto` prefers Winograd for 3x3 kernels, then the smallest Fourier tile
/// that holds the kernel. Kernel gradients have no Winograd path.
pub fn resolve(algorithm: Algorithm, mode: Mode, kernel: Size) -> Result<Algorithm> {
    let concrete = match algorithm {
        Algorithm::Auto => {
            if kernel == Size::square(3) && mode != Mode::KernelGradient {
                Algorithm::Wt8x8
            } else if kernel.fits_in(Size::square(8)) {
                Algorithm::Ft8x8
            } else if kernel.fits_in(Size::square(16)) {
                Algorithm::Ft16x16
            } else {
                return Err(ConvError::invalid(format!(
                    "no transform algorithm supports a {} kernel",
                    kernel
                )));
            }
        }
        other => other,
    };

    match concrete {
        Algorithm::Wt8x8 if kernel != Size::square(3) => {
            return Err(ConvError::invalid(format!(
                "WT8x8 requires a 3x3 kernel, got {}",
                kernel
            )));
        }
        Algorithm::Wt8x8 if mode == Mode::KernelGradient => {
            return Err(ConvError::invalid("WT8x8 does not support kernel gradients"));
        }
        _ => {}
    }

    let side = concrete.tile_side().unwrap_or(kernel.height.max(kernel.width));
    if !kernel.fits_in(Size::square(side)) {
        return Err(ConvError::invalid(format!(
            "kernel {} exceeds the {}x{} tile of {}",
            kernel, side, side, concrete
        )));
    }

    if algorithm == Algorithm::Auto {
        debug!(kernel = %kernel, selected = %concrete, "resolved auto algorithm");
    }
    Ok(concrete)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_reports_kernel_as_tile() {
        let choice = select(Algorithm::Auto, Size::new(3, 5));
        assert_eq!(choice.tile, Size::new(3, 5));
        assert_eq!(choice.flops_per_element, None);
    }

    #[test]
    fn concrete_algorithms_report_fixed_tiles() {
        assert_eq!(select(Algorithm::Ft8x8, Size::square(3)).tile, Size::square(8));
        assert_eq!(select(Algorithm::Ft16x16, Size::square(3)).tile, Size::square(16));
        assert_eq!(select(Algorithm::Wt8x8, Size::square(3)).flops_per_element, Some(2.0));
        assert_eq!(select(Algorithm::Ft16x16, Size::square(3)).flops_per_element, Some(4.0));
    }

    #[test]
    fn auto_resolution_rule() {
        let k3 = Size::square(3);
        assert_eq!(resolve(Algorithm::Auto, Mode::Output, k3).unwrap(), Algorithm::Wt8x8);
        assert_eq!(resolve(Algorithm::Auto, Mode::KernelGradient, k3).unwrap(), Algorithm::Ft8x8);
        assert_eq!(resolve(Algorithm::Auto, Mode::Output, Size::square(5)).unwrap(), Algorithm::Ft8x8);
        assert_eq!(resolve(Algorithm::Auto, Mode::Output, Size::new(9, 2)).unwrap(), Algorithm::Ft16x16);
        assert!(resolve(Algorithm::Auto, Mode::Output, Size::square(17)).is_err());
    }

    #[test]
    fn rejects_unsupported_combinations() {
        assert!(resolve(Algorithm::Wt8x8, Mode::Output, Size::square(5)).is_err());
        assert!(resolve(Algorithm::Wt8x8, Mode::KernelGradient, Size::square(3)).is_err());
        assert!(resolve(Algorithm::Ft8x8, Mode::Output, Size::new(9, 3)).is_err());
    }
}
