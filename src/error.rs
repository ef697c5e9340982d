use thiserror::Error;

/// Errors raised by the convolution engine and its measurement harness.
#[derive(Debug, Error)]
pub enum ConvError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("kernel transform shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
    #[error("failed to allocate {bytes} bytes")]
    Allocation { bytes: usize },
    #[error("performance counter {name} unavailable: {reason}")]
    CounterUnavailable { name: String, reason: String },
    #[error("thread pool construction failed: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, ConvError>;

impl ConvError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ConvError::InvalidArgument(message.into())
    }
}

/// Allocate a zero-initialized buffer, reporting allocation failure as an error.
pub(crate) fn try_alloc<T: Clone + Default>(len: usize) -> Result<Vec<T>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| ConvError::Allocation { bytes: len.saturating_mul(std::mem::size_of::<T>()) })?;
    buffer.resize(len, T::default());
    Ok(buffer)
}
