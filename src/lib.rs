//! Tiled transform-domain convolution in Rust.
//!
//! This crate computes 2D convolutions of NCHW `f32` tensors by cutting the
//! padded input into overlapping tiles, transforming tiles and kernels into
//! the FFT or Winograd domain, multiplying there, and transforming back.
//! It includes a cold-cache benchmark harness with optional hardware event
//! counters, driven by the `convolution-benchmark` binary.
//!
//! # Example
//!
//! ```no_run
//! use tileconv::conv::{Algorithm, ConvolutionEngine};
//! use tileconv::tensor::{ConvShape, Padding, Size};
//!
//! let shape = ConvShape::new(1, 3, 16, Size::square(32), Size::square(3));
//! let padding = Padding::uniform(1);
//! let input = vec![0.0; shape.input_len()];
//! let kernel = vec![0.0; shape.kernel_len()];
//! let bias = vec![0.0; 16];
//! let mut output = vec![0.0; shape.output_len(padding).unwrap()];
//!
//! let mut engine = ConvolutionEngine::with_threads(None).unwrap();
//! let profile = engine
//!     .output(Algorithm::Auto, &shape, padding, &input, &kernel, &bias, &mut output)
//!     .unwrap();
//! println!("{:?}", profile.total);
//! ```

/// Error type shared by the engine and the benchmark harness.
pub mod error;
/// Tensor geometry: sizes, padding, layer shapes.
pub mod tensor;
/// FFT and Winograd convolution engine.
pub mod conv;
/// Fork-join thread pool.
pub mod threadpool;
/// Profiles, benchmarking and hardware counters.
pub mod metrics;

pub use error::{ConvError, Result};
