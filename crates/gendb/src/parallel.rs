//! Fixed-size worker pool used by the parallel queries.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::{Error, Result};

/// A fixed-size pool of worker threads.
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    /// Create a pool of `threads` workers. Zero selects the number of logical
    /// cores.
    pub fn new(threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("gendb-worker-{i}"))
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Returns the number of workers.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Split `items` in contiguous shards, one per worker at most, and apply
    /// `f` to every shard on the pool. The results are returned in shard
    /// order; the first error encountered is returned instead.
    pub fn map_shards<T, R, F>(&self, items: &[T], f: F) -> Result<Vec<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&[T]) -> Result<R> + Sync,
    {
        let shards = shard(items, self.threads());
        self.pool
            .install(|| shards.par_iter().map(|s| f(s)).collect())
    }
}

/// Split `items` in at most `count` contiguous, non-empty shards whose sizes
/// differ by at most one.
pub fn shard<T>(items: &[T], count: usize) -> Vec<&[T]> {
    let count = count.clamp(1, items.len().max(1));
    let base = items.len() / count;
    let extra = items.len() % count;
    let mut shards = Vec::with_capacity(count);
    let mut rest = items;
    for i in 0..count {
        let (head, tail) = rest.split_at(base + usize::from(i < extra));
        if !head.is_empty() {
            shards.push(head);
        }
        rest = tail;
    }
    shards
}
