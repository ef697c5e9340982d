mod shape;

pub use shape::{output_size, ConvShape, Padding, Size};
pub(crate) use shape::check_len;
