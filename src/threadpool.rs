//! Fork-join thread pool used by the transform pipeline.
//!
//! Wraps [`rayon::ThreadPool`]. The only operation the pipeline needs is
//! "split a buffer into disjoint chunks and process them all before
//! returning"; a pool of size 0 does exactly that on the calling thread.

use rayon::prelude::*;
use tracing::debug;

use crate::error::Result;

/// Fixed-size worker pool, or sequential execution when built with zero threads.
pub struct ThreadPool {
    pool: Option<rayon::ThreadPool>,
}

impl ThreadPool {
    /// `None` uses every hardware thread, `Some(0)` disables the pool.
    pub fn new(threads: Option<usize>) -> Result<Self> {
        let threads = threads.unwrap_or_else(|| num_cpus::get().max(1));
        if threads == 0 {
            return Ok(Self::sequential());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|idx| format!("tileconv-{idx}"))
            .build()?;
        debug!(threads, "created thread pool");
        Ok(ThreadPool { pool: Some(pool) })
    }

    pub fn sequential() -> Self {
        ThreadPool { pool: None }
    }

    /// Worker count; 0 when tasks run on the calling thread.
    pub fn threads(&self) -> usize {
        self.pool.as_ref().map_or(0, |pool| pool.current_num_threads())
    }

    pub fn is_sequential(&self) -> bool {
        self.pool.is_none()
    }

    /// Run `task(scratch, index, chunk)` for every `chunk_len` sized chunk of
    /// `data`, blocking until all of them have completed.
    ///
    /// Chunks are disjoint, so tasks never observe each other's writes. `init`
    /// builds per-worker scratch state that is reused across that worker's tasks.
    pub fn for_each_chunk<T, S, I, F>(&self, data: &mut [T], chunk_len: usize, init: I, task: F)
    where
        T: Send,
        I: Fn() -> S + Send + Sync,
        F: Fn(&mut S, usize, &mut [T]) + Send + Sync,
    {
        let chunk_len = chunk_len.max(1);
        match &self.pool {
            Some(pool) => pool.install(|| {
                data.par_chunks_mut(chunk_len)
                    .enumerate()
                    .for_each_init(&init, |scratch, (index, chunk)| task(scratch, index, chunk));
            }),
            None => {
                let mut scratch = init();
                for (index, chunk) in data.chunks_mut(chunk_len).enumerate() {
                    task(&mut scratch, index, chunk);
                }
            }
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool").field("threads", &self.threads()).finish()
    }
}
