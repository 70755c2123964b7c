//! Fixed-size worker pool with atomic work distribution

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam::channel;

use crate::error::{GraphError, Result};
use crate::parallel::partition::Partition;
use crate::parallel::progress::ProgressTracker;
use crate::parallel::termination::TerminationFlag;

/// Dedicated pool of `concurrency` OS threads.
///
/// Every `run*` call blocks until all of its workers have finished. A failing
/// or panicking worker does not stop the others; the first failure (by worker
/// index) is returned once everything has been joined.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    concurrency: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Result<Self> {
        if concurrency == 0 {
            return Err(GraphError::Configuration(
                "concurrency must be at least 1".to_string(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|index| format!("graph-worker-{}", index))
            .build()
            .map_err(|e| GraphError::Configuration(format!("cannot start worker pool: {}", e)))?;

        log::debug!("Started worker pool with {} threads", concurrency);
        Ok(Self { pool, concurrency })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `op` inside the pool so rayon parallel iterators use its threads
    pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        self.pool.install(op)
    }

    /// Run `task(worker)` for `workers` workers and collect their outputs in worker order
    pub fn run<T, F>(&self, workers: usize, task: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> Result<T> + Sync,
    {
        let (sender, receiver) = channel::unbounded();
        let task = &task;

        self.pool.scope(|scope| {
            for worker in 0..workers {
                let sender = sender.clone();
                scope.spawn(move |_| {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(worker)))
                        .unwrap_or_else(|payload| {
                            Err(GraphError::WorkerFailed(panic_message(payload)))
                        });
                    // The receiver outlives the scope, so sending cannot fail
                    let _ = sender.send((worker, outcome));
                });
            }
        });
        drop(sender);

        let mut outcomes: Vec<(usize, Result<T>)> = receiver.into_iter().collect();
        outcomes.sort_by_key(|(worker, _)| *worker);

        let mut values = Vec::with_capacity(outcomes.len());
        for (worker, outcome) in outcomes {
            match outcome {
                Ok(value) => values.push(value),
                Err(e) => {
                    log::error!("Worker {} failed: {}", worker, e);
                    return Err(e);
                }
            }
        }
        Ok(values)
    }

    /// Process partitions, pulled from a shared cursor, node by node in ascending order.
    ///
    /// Every worker owns a state built by `init`; the states are returned for merging.
    pub fn for_each_partition<S, I, F>(
        &self,
        partitions: &[Partition],
        termination: &TerminationFlag,
        progress: &ProgressTracker,
        init: I,
        task: F,
    ) -> Result<Vec<S>>
    where
        S: Send,
        I: Fn() -> S + Sync,
        F: Fn(&mut S, u64) -> Result<()> + Sync,
    {
        let next_partition = AtomicUsize::new(0);
        let workers = self.concurrency.min(partitions.len()).max(1);

        self.run(workers, |_| {
            let mut state = init();
            loop {
                let index = next_partition.fetch_add(1, Ordering::Relaxed);
                let Some(partition) = partitions.get(index) else {
                    break;
                };
                let mut processed = 0;
                for node in partition.nodes() {
                    if termination.is_terminated() {
                        progress.log_progress(processed);
                        return Ok(state);
                    }
                    task(&mut state, node)?;
                    processed += 1;
                }
                progress.log_progress(processed);
            }
            Ok(state)
        })
    }

    /// Process `0..node_count` by pulling batches of `batch_size` nodes from a
    /// single atomic counter, so faster workers take more batches.
    pub fn for_each_node_balanced<S, I, F>(
        &self,
        node_count: u64,
        batch_size: u64,
        termination: &TerminationFlag,
        progress: &ProgressTracker,
        init: I,
        task: F,
    ) -> Result<Vec<S>>
    where
        S: Send,
        I: Fn() -> S + Sync,
        F: Fn(&mut S, u64) -> Result<()> + Sync,
    {
        let batch_size = batch_size.max(1);
        let next_node = AtomicU64::new(0);

        self.run(self.concurrency, |_| {
            let mut state = init();
            loop {
                let start = next_node.fetch_add(batch_size, Ordering::Relaxed);
                if start >= node_count {
                    break;
                }
                let end = (start + batch_size).min(node_count);
                for node in start..end {
                    if termination.is_terminated() {
                        progress.log_progress(node - start);
                        return Ok(state);
                    }
                    task(&mut state, node)?;
                }
                progress.log_progress(end - start);
            }
            Ok(state)
        })
    }
}
