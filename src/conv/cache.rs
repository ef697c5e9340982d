//! Kernel-transform cache for the `Reuse` inference strategy.
//!
//! The cache owns one transformed kernel. A lookup hits only when the kernel
//! tensor (address, length and contents) and the tile geometry it was built
//! for are unchanged; any other lookup marks the entry stale so the caller
//! recomputes and stores a fresh one.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tracing::debug;

use super::transform::KernelTransform;
use super::Algorithm;
use crate::tensor::ConvShape;

/// Lifecycle of the cached kernel transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing has been materialized yet.
    Empty,
    /// The held transform matches the last kernel it was looked up with.
    Valid,
    /// The held transform no longer matches and must be recomputed.
    Stale,
}

/// Identity of a kernel tensor together with the geometry it is transformed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelKey {
    address: usize,
    len: usize,
    fingerprint: u64,
    algorithm: Algorithm,
    shape: (usize, usize, usize, usize),
}

impl KernelKey {
    pub fn new(algorithm: Algorithm, shape: &ConvShape, kernel: &[f32]) -> Self {
        let mut hasher = DefaultHasher::new();
        for v in kernel {
            v.to_bits().hash(&mut hasher);
        }
        KernelKey {
            address: kernel.as_ptr() as usize,
            len: kernel.len(),
            fingerprint: hasher.finish(),
            algorithm,
            shape: (
                shape.output_channels,
                shape.input_channels,
                shape.kernel.height,
                shape.kernel.width,
            ),
        }
    }
}

#[derive(Debug)]
pub struct KernelTransformCache {
    state: CacheState,
    entry: Option<(KernelKey, KernelTransform)>,
    hits: u64,
    misses: u64,
}

impl Default for KernelTransformCache {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelTransformCache {
    pub fn new() -> Self {
        KernelTransformCache { state: CacheState::Empty, entry: None, hits: 0, misses: 0 }
    }

    pub fn state(&self) -> CacheState {
        self.state
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// The held transform, whatever its state.
    pub fn transform(&self) -> Option<&KernelTransform> {
        self.entry.as_ref().map(|(_, transform)| transform)
    }

    /// Returns the cached transform if it is valid for `key`. On a mismatch a
    /// valid entry becomes stale and `None` is returned.
    pub fn lookup(&mut self, key: &KernelKey) -> Option<&KernelTransform> {
        let hit = matches!(&self.entry, Some((cached, _)) if cached == key)
            && self.state == CacheState::Valid;
        if hit {
            self.hits += 1;
            return self.transform();
        }
        self.misses += 1;
        if self.state == CacheState::Valid {
            debug!("kernel or geometry changed, kernel transform is stale");
            self.state = CacheState::Stale;
        }
        None
    }

    /// Retain `transform` as the valid entry for `key`.
    pub fn store(&mut self, key: KernelKey, transform: KernelTransform) -> &KernelTransform {
        debug!(from = ?self.state, algorithm = %transform.algorithm(), "kernel transform cached");
        self.state = CacheState::Valid;
        &self.entry.insert((key, transform)).1
    }

    /// Force the next lookup to miss, e.g. after mutating a kernel in place.
    pub fn invalidate(&mut self) {
        if self.state == CacheState::Valid {
            self.state = CacheState::Stale;
        }
    }

    /// Drop the held transform.
    pub fn clear(&mut self) {
        self.entry = None;
        self.state = CacheState::Empty;
    }
}
