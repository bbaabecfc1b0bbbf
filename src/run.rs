//! A single invocation of a chain.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::chain::Chain;
use crate::context::RunContext;
use crate::error::ChainError;
use crate::options::InvokeOptions;
use crate::recorder::{RunId, RunStatus, StepId, StepStatus};
use crate::step::{Step, StepOutcome};

pub(crate) type SuccessFn = Box<dyn FnOnce(Vec<Value>) + Send>;
pub(crate) type FailureFn = Box<dyn FnOnce(ChainError) + Send>;

/// The caller's callbacks. Whichever terminal outcome comes first takes both,
/// so at most one of them ever fires.
struct Callbacks {
    slot: Mutex<Option<(SuccessFn, FailureFn)>>,
}

impl Callbacks {
    fn new(on_success: SuccessFn, on_failure: FailureFn) -> Self {
        Self {
            slot: Mutex::new(Some((on_success, on_failure))),
        }
    }

    fn take(&self) -> Option<(SuccessFn, FailureFn)> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    fn succeed(&self, results: Vec<Value>) {
        if let Some((on_success, _)) = self.take() {
            on_success(results);
        }
    }

    fn fail(&self, err: ChainError) {
        if let Some((_, on_failure)) = self.take() {
            on_failure(err);
        }
    }
}

/// State shared by a run and every forked run it spawns.
struct Shared {
    context: Arc<RunContext>,
    invoke: Arc<InvokeOptions>,
    callbacks: Callbacks,
}

/// Walks one chain's nodes in order. Cheap to clone; forks share everything
/// except the chain they walk.
#[derive(Clone)]
pub(crate) struct Run {
    chain: Arc<Chain>,
    shared: Arc<Shared>,
}

impl Run {
    /// Start a run in the background. Must be called within a tokio runtime.
    pub(crate) fn start(
        chain: Arc<Chain>,
        opts: InvokeOptions,
        on_success: SuccessFn,
        on_failure: FailureFn,
    ) {
        let context = Arc::new(RunContext::new(opts.deadline()));
        let run = Self {
            chain,
            shared: Arc::new(Shared {
                context,
                invoke: Arc::new(opts),
                callbacks: Callbacks::new(on_success, on_failure),
            }),
        };
        run.forward(Vec::new());
    }

    /// The same run, continuing in `chain`.
    pub(crate) fn fork(&self, chain: Arc<Chain>) -> Self {
        Self {
            chain,
            shared: self.shared.clone(),
        }
    }

    /// Walk this run's chain in the background, seeded with `input`.
    pub(crate) fn forward(self, input: Vec<Value>) {
        tokio::spawn(self.walk(input));
    }

    pub(crate) fn context(&self) -> &Arc<RunContext> {
        &self.shared.context
    }

    pub(crate) fn chain(&self) -> &Chain {
        &self.chain
    }

    pub(crate) fn invoke_options(&self) -> &Arc<InvokeOptions> {
        &self.shared.invoke
    }

    async fn walk(self, input: Vec<Value>) {
        let chain_name = self.chain.name().to_string();
        let run_id = self.record_run_start(&chain_name).await;
        info!(chain = %chain_name, nodes = self.chain.len(), "run started");

        let mut last = input;
        for (index, node) in self.chain.nodes().iter().enumerate() {
            let step_id = self.record_step_start(run_id, node.name(), index).await;
            debug!(chain = %chain_name, node = %node.name(), index, "step started");

            match Step::new(node, &self).execute(last).await {
                StepOutcome::Completed(results) => {
                    debug!(node = %node.name(), results = results.len(), "step completed");
                    self.record_step(step_id, StepStatus::Completed { results: results.len() })
                        .await;
                    last = results;
                }
                StepOutcome::Skipped(input) => {
                    self.record_step(step_id, StepStatus::Skipped).await;
                    last = input;
                }
                StepOutcome::Failed(err) => {
                    warn!(chain = %chain_name, node = %node.name(), error = %err, "run failed");
                    let error = err.to_string();
                    self.record_step(step_id, StepStatus::Failed { error: error.clone() })
                        .await;
                    self.record_run(run_id, RunStatus::Failed { error }).await;
                    self.shared.context.release();
                    self.shared.callbacks.fail(err);
                    return;
                }
                StepOutcome::Forked => {
                    // The forked run owns the callbacks and the deadline now.
                    debug!(chain = %chain_name, node = %node.name(), "run forked");
                    self.record_step(step_id, StepStatus::Forked).await;
                    self.record_run(run_id, RunStatus::Forked).await;
                    return;
                }
            }
        }

        info!(chain = %chain_name, results = last.len(), "run completed");
        self.record_run(run_id, RunStatus::Completed).await;
        self.shared.context.release();
        self.shared.callbacks.succeed(last);
    }

    async fn record_run_start(&self, chain_name: &str) -> RunId {
        self.chain
            .recorder()
            .start_run(chain_name)
            .await
            .unwrap_or_else(|err| {
                warn!(chain = %chain_name, error = %err, "failed to record run start");
                RunId(0)
            })
    }

    async fn record_step_start(&self, run_id: RunId, node: &str, index: usize) -> StepId {
        self.chain
            .recorder()
            .start_step(run_id, node, index)
            .await
            .unwrap_or_else(|err| {
                warn!(node, error = %err, "failed to record step start");
                StepId(0)
            })
    }

    async fn record_step(&self, step_id: StepId, status: StepStatus) {
        if let Err(err) = self.chain.recorder().complete_step(step_id, status).await {
            warn!(error = %err, "failed to record step completion");
        }
    }

    async fn record_run(&self, run_id: RunId, status: RunStatus) {
        if let Err(err) = self.chain.recorder().complete_run(run_id, status).await {
            warn!(error = %err, "failed to record run completion");
        }
    }
}
