//! Recording interface for chain execution history.
//!
//! Recorder failures are logged by the run and never change its outcome.

use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

/// Unique identifier for a chain run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(pub i64);

/// Unique identifier for a step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepId(pub i64);

/// Status of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Every node completed or was skipped.
    Completed,
    /// A step failed; the remaining nodes never ran.
    Failed { error: String },
    /// The run continued in a forked sub-chain, recorded as its own run.
    Forked,
}

/// Status of a finished step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    /// Step completed with this many results.
    Completed { results: usize },
    /// Node was bypassed.
    Skipped,
    /// Step failed.
    Failed { error: String },
    /// Node handed the run to a sub-chain.
    Forked,
}

/// Records chain execution for observability.
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Record the start of a run.
    async fn start_run(&self, chain_name: &str) -> anyhow::Result<RunId>;

    /// Record the start of a step execution.
    async fn start_step(
        &self,
        run_id: RunId,
        node_name: &str,
        node_index: usize,
    ) -> anyhow::Result<StepId>;

    /// Record step completion.
    async fn complete_step(&self, step_id: StepId, status: StepStatus) -> anyhow::Result<()>;

    /// Record run completion.
    async fn complete_run(&self, run_id: RunId, status: RunStatus) -> anyhow::Result<()>;
}

/// A no-op recorder that discards all events.
///
/// The default for every chain.
#[derive(Debug, Clone, Default)]
pub struct NoopRecorder;

impl NoopRecorder {
    /// Create a new no-op recorder.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Recorder for NoopRecorder {
    async fn start_run(&self, _chain_name: &str) -> anyhow::Result<RunId> {
        Ok(RunId(0))
    }

    async fn start_step(
        &self,
        _run_id: RunId,
        _node_name: &str,
        _node_index: usize,
    ) -> anyhow::Result<StepId> {
        Ok(StepId(0))
    }

    async fn complete_step(&self, _step_id: StepId, _status: StepStatus) -> anyhow::Result<()> {
        Ok(())
    }

    async fn complete_run(&self, _run_id: RunId, _status: RunStatus) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A recorded run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub id: RunId,
    pub chain: String,
    /// `None` while the run is in progress.
    pub status: Option<RunStatus>,
}

/// A recorded step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub id: StepId,
    pub run: RunId,
    pub node: String,
    pub index: usize,
    pub status: Option<StepStatus>,
}

#[derive(Default)]
struct History {
    runs: Vec<RunRecord>,
    steps: Vec<StepRecord>,
}

/// Keeps execution history in memory. Intended for tests and debugging.
#[derive(Default)]
pub struct MemoryRecorder {
    next_id: AtomicI64,
    history: Mutex<History>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn history(&self) -> std::sync::MutexGuard<'_, History> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs in start order.
    pub fn runs(&self) -> Vec<RunRecord> {
        self.history().runs.clone()
    }

    /// Steps in start order, across all runs.
    pub fn steps(&self) -> Vec<StepRecord> {
        self.history().steps.clone()
    }

    /// Steps of one run, in start order.
    pub fn steps_of(&self, run: RunId) -> Vec<StepRecord> {
        self.history()
            .steps
            .iter()
            .filter(|s| s.run == run)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Recorder for MemoryRecorder {
    async fn start_run(&self, chain_name: &str) -> anyhow::Result<RunId> {
        let id = RunId(self.next_id());
        self.history().runs.push(RunRecord {
            id,
            chain: chain_name.to_string(),
            status: None,
        });
        Ok(id)
    }

    async fn start_step(
        &self,
        run_id: RunId,
        node_name: &str,
        node_index: usize,
    ) -> anyhow::Result<StepId> {
        let id = StepId(self.next_id());
        self.history().steps.push(StepRecord {
            id,
            run: run_id,
            node: node_name.to_string(),
            index: node_index,
            status: None,
        });
        Ok(id)
    }

    async fn complete_step(&self, step_id: StepId, status: StepStatus) -> anyhow::Result<()> {
        let mut history = self.history();
        let step = history
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| anyhow::anyhow!("unknown step {:?}", step_id))?;
        step.status = Some(status);
        Ok(())
    }

    async fn complete_run(&self, run_id: RunId, status: RunStatus) -> anyhow::Result<()> {
        let mut history = self.history();
        let run = history
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| anyhow::anyhow!("unknown run {:?}", run_id))?;
        run.status = Some(status);
        Ok(())
    }
}
