//! Fixed-size worker pools
//!
//! A pool runs N named threads, each executing its own copy of a stage's
//! work loop until the loop's input is exhausted. Workers are
//! interchangeable; one of them failing never stops the others.

use crate::error::WorkerError;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// A set of worker threads that can be joined as a unit
pub struct WorkerPool {
    /// Pool name, used for thread names and logs
    name: String,

    /// Thread handles, indexed by worker ID
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers. `make_worker` is called once per worker ID on
    /// the calling thread and returns the loop that worker runs; this lets
    /// each worker own its queue handles.
    pub fn start<F, W>(name: &str, count: usize, mut make_worker: F) -> Result<Self, WorkerError>
    where
        F: FnMut(usize) -> W,
        W: FnOnce() + Send + 'static,
    {
        let mut handles = Vec::with_capacity(count);

        for id in 0..count {
            let work = make_worker(id);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, id))
                .spawn(work)
                .map_err(|e| WorkerError::SpawnFailed {
                    pool: name.to_string(),
                    id,
                    reason: e.to_string(),
                })?;
            handles.push(handle);
        }

        debug!(pool = name, count = count, "Workers spawned");

        Ok(Self {
            name: name.to_string(),
            handles,
        })
    }

    /// Number of workers in the pool
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the pool has no workers
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Block until every worker has returned.
    ///
    /// Panicked workers are logged and returned; they never prevent the
    /// remaining workers from being joined.
    pub fn join(self) -> Vec<WorkerError> {
        let mut failures = Vec::new();

        for (id, handle) in self.handles.into_iter().enumerate() {
            if handle.join().is_err() {
                let err = WorkerError::Panicked {
                    pool: self.name.clone(),
                    id,
                };
                warn!(error = %err, "Worker failed to join cleanly");
                failures.push(err);
            }
        }

        debug!(pool = %self.name, "Workers joined");
        failures
    }
}
