//! Error taxonomy for chain execution.

use thiserror::Error;

/// Error delivered to a run's failure callback.
///
/// A step resolves to at most one of these. The first one short-circuits the
/// remaining nodes and is handed to the caller verbatim.
#[derive(Error, Debug)]
pub enum ChainError {
    /// A task function returned an error. Displayed and sourced transparently,
    /// so the caller sees exactly what the task produced.
    #[error(transparent)]
    Task(anyhow::Error),

    /// Every outcome was evaluated under an any-passed rule and none matched.
    #[error("no task result matched the any-passed predicate")]
    NoPassed,

    /// The run's deadline elapsed before a step completed.
    #[error("chain run timed out")]
    Timeout,

    /// A task cancelled the run before its deadline.
    #[error("chain run cancelled")]
    Cancelled,

    /// A job was rejected by a node's bounded worker pool.
    #[error("worker pool saturated (capacity {capacity}, backlog {backlog})")]
    PoolSaturated { capacity: usize, backlog: usize },

    /// A task function panicked and the node reports panics as failures.
    #[error("task function panicked: {0}")]
    Panicked(String),
}

impl ChainError {
    /// Wrap an arbitrary error as a task error.
    pub fn task(err: impl Into<anyhow::Error>) -> Self {
        Self::Task(err.into())
    }

    /// Returns true if the run ended because its deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Borrow the underlying task error, if this is one.
    pub fn as_task_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Task(err) => Some(err),
            _ => None,
        }
    }
}
