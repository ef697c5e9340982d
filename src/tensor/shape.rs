use std::fmt;

use crate::error::{ConvError, Result};

/// Spatial extent of a 2D plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    pub height: usize,
    pub width: usize,
}

impl Size {
    pub const fn new(height: usize, width: usize) -> Self {
        Size { height, width }
    }

    pub const fn square(side: usize) -> Self {
        Size { height: side, width: side }
    }

    pub const fn area(&self) -> usize {
        self.height * self.width
    }

    /// True when `self` fits inside `other` along both axes.
    pub const fn fits_in(&self, other: Size) -> bool {
        self.height <= other.height && self.width <= other.width
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

/// Implicit zero padding around the input plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Padding {
    pub top: usize,
    pub right: usize,
    pub bottom: usize,
    pub left: usize,
}

impl Padding {
    pub const fn new(top: usize, right: usize, bottom: usize, left: usize) -> Self {
        Padding { top, right, bottom, left }
    }

    pub const fn uniform(pad: usize) -> Self {
        Padding { top: pad, right: pad, bottom: pad, left: pad }
    }

    pub const fn vertical(&self) -> usize {
        self.top + self.bottom
    }

    pub const fn horizontal(&self) -> usize {
        self.left + self.right
    }

    /// Padding of the full correlation that maps an output gradient back onto
    /// the input plane: `kernel - 1 - pad` on every side.
    pub fn transposed(&self, kernel: Size) -> Result<Padding> {
        let flip = |pad: usize, extent: usize, side: &str| {
            (extent - 1).checked_sub(pad).ok_or_else(|| {
                ConvError::invalid(format!(
                    "{} padding {} exceeds kernel extent {} minus one",
                    side, pad, extent
                ))
            })
        };
        Ok(Padding {
            top: flip(self.top, kernel.height, "top")?,
            right: flip(self.right, kernel.width, "right")?,
            bottom: flip(self.bottom, kernel.height, "bottom")?,
            left: flip(self.left, kernel.width, "left")?,
        })
    }
}

impl fmt::Display for Padding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.top, self.right, self.bottom, self.left)
    }
}

/// Output extent of a stride-1 correlation: `input + padding - kernel + 1` per axis.
pub fn output_size(input: Size, padding: Padding, kernel: Size) -> Result<Size> {
    let axis = |extent: usize, pad: usize, k: usize, name: &str| {
        (extent + pad + 1).checked_sub(k).filter(|&out| out >= 1).ok_or_else(|| {
            ConvError::invalid(format!(
                "kernel {} {} exceeds padded input {} {}",
                name,
                k,
                name,
                extent + pad
            ))
        })
    };
    Ok(Size {
        height: axis(input.height, padding.vertical(), kernel.height, "height")?,
        width: axis(input.width, padding.horizontal(), kernel.width, "width")?,
    })
}

/// Dimensions of a convolution layer in NCHW layout.
///
/// Input is `batch x input_channels x input`, kernel is
/// `output_channels x input_channels x kernel`, output is
/// `batch x output_channels x output_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConvShape {
    pub batch: usize,
    pub input_channels: usize,
    pub output_channels: usize,
    pub input: Size,
    pub kernel: Size,
}

impl ConvShape {
    pub fn new(
        batch: usize,
        input_channels: usize,
        output_channels: usize,
        input: Size,
        kernel: Size,
    ) -> Self {
        ConvShape { batch, input_channels, output_channels, input, kernel }
    }

    /// Reject zero extents anywhere in the shape.
    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("batch size", self.batch),
            ("input channels", self.input_channels),
            ("output channels", self.output_channels),
            ("input height", self.input.height),
            ("input width", self.input.width),
            ("kernel height", self.kernel.height),
            ("kernel width", self.kernel.width),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(ConvError::invalid(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    pub fn output(&self, padding: Padding) -> Result<Size> {
        output_size(self.input, padding, self.kernel)
    }

    pub fn input_len(&self) -> usize {
        self.batch * self.input_channels * self.input.area()
    }

    pub fn kernel_len(&self) -> usize {
        self.output_channels * self.input_channels * self.kernel.area()
    }

    pub fn output_len(&self, padding: Padding) -> Result<usize> {
        Ok(self.batch * self.output_channels * self.output(padding)?.area())
    }
}

impl fmt::Display for ConvShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{} -> {} channels, kernel {}",
            self.batch, self.input_channels, self.input, self.output_channels, self.kernel
        )
    }
}

/// Check a flat tensor slice against its expected element count.
pub(crate) fn check_len(name: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(ConvError::invalid(format!(
            "{} has {} elements, expected {}",
            name, actual, expected
        )));
    }
    Ok(())
}
