//! Bounded worker pool used by pool-mode nodes.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::ChainError;

/// Jobs allowed to wait for a worker before submissions are rejected.
pub const DEFAULT_MAX_BLOCKING_TASKS: usize = 20;

/// Called with the panic message of a job that panicked.
pub type PanicHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Run `job`, catching any panic and handing its message to `handler`.
pub(crate) async fn contain<F>(job: F, handler: &PanicHandler)
where
    F: Future<Output = ()> + Send,
{
    if let Err(payload) = AssertUnwindSafe(job).catch_unwind().await {
        handler(panic_message(payload.as_ref()));
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A pool of at most `capacity` concurrently running jobs.
///
/// Up to `max_backlog` further jobs may wait for a free worker; anything past
/// that is rejected with [`ChainError::PoolSaturated`]. Panics inside jobs are
/// caught and passed to the panic handler, never propagated.
pub struct WorkerPool {
    workers: Arc<Semaphore>,
    capacity: usize,
    max_backlog: usize,
    in_flight: Arc<AtomicUsize>,
    panic_handler: PanicHandler,
}

/// Decrements the in-flight count when a job finishes or is dropped.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    /// Create a pool. Does not need a runtime; jobs are spawned on the
    /// ambient tokio runtime at submission time.
    pub fn new(capacity: usize, max_backlog: usize, panic_handler: PanicHandler) -> Self {
        Self {
            workers: Arc::new(Semaphore::new(capacity)),
            capacity,
            max_backlog,
            in_flight: Arc::new(AtomicUsize::new(0)),
            panic_handler,
        }
    }

    /// Submit a job. Fails immediately if the pool is saturated beyond its backlog.
    pub fn submit<F>(&self, job: F) -> Result<(), ChainError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let limit = self.capacity + self.max_backlog;
        let admitted = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            })
            .is_ok();
        if !admitted {
            return Err(ChainError::PoolSaturated {
                capacity: self.capacity,
                backlog: self.max_backlog,
            });
        }

        let guard = InFlight(self.in_flight.clone());
        let workers = self.workers.clone();
        let handler = self.panic_handler.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let Ok(_permit) = workers.acquire_owned().await else {
                return;
            };
            contain(job, &handler).await;
        });
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_backlog(&self) -> usize {
        self.max_backlog
    }

    /// Jobs currently running or waiting for a worker.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}
