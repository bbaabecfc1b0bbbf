//! Executes one node for one run.

mod channel;
mod collector;

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::context::TaskContext;
use crate::error::ChainError;
use crate::node::{Node, NodeAction};
use crate::options::{Concurrency, PanicPolicy};
use crate::pool::{contain, WorkerPool};
use crate::run::Run;
use crate::task::BoxedTask;

use channel::{result_channel, ResultChannel};
use collector::Collector;

/// How a step ended.
#[derive(Debug)]
pub(crate) enum StepOutcome {
    /// The completion policy was satisfied.
    Completed(Vec<Value>),
    /// The node was bypassed; its input passes through unchanged.
    Skipped(Vec<Value>),
    Failed(ChainError),
    /// The rest of the run continues in a sub-chain.
    Forked,
}

/// Sends exactly one outcome for a task invocation. If the invocation is torn
/// down before it finished (it panicked) and the node fails on panics, the
/// guard reports [`ChainError::Panicked`] instead of staying silent.
struct Responder {
    channel: Arc<ResultChannel>,
    policy: PanicPolicy,
    node: Arc<Node>,
    sent: bool,
}

impl Responder {
    fn new(channel: Arc<ResultChannel>, node: Arc<Node>) -> Self {
        let policy = node.options().panic_policy;
        Self {
            channel,
            policy,
            node,
            sent: false,
        }
    }

    fn send(mut self, outcome: Result<Value, ChainError>) {
        self.sent = true;
        let accepted = match outcome {
            Ok(value) => self.channel.ack(value),
            Err(err) => self.channel.nack(err),
        };
        if !accepted {
            trace!(node = %self.node.name(), "outcome discarded, step already complete");
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if !self.sent && self.policy == PanicPolicy::Fail && !self.channel.is_stopping() {
            self.channel
                .nack(ChainError::Panicked(self.node.name().to_string()));
        }
    }
}

/// One task invocation: run the task and forward what it returned.
async fn invoke(
    task: BoxedTask,
    ctx: TaskContext,
    last: Vec<Value>,
    channel: Arc<ResultChannel>,
    node: Arc<Node>,
) {
    // Created on first poll, so a job the pool rejected never reports.
    let responder = Responder::new(channel, node);
    let outcome = task.run(ctx, last).await.map_err(ChainError::Task);
    responder.send(outcome);
}

pub(crate) struct Step<'a> {
    node: &'a Arc<Node>,
    run: &'a Run,
}

impl<'a> Step<'a> {
    pub(crate) fn new(node: &'a Arc<Node>, run: &'a Run) -> Self {
        Self { node, run }
    }

    pub(crate) async fn execute(&self, input: Vec<Value>) -> StepOutcome {
        if let Some(rule) = self.node.skip_rule() {
            if rule.should_skip(self.run.context(), &input) {
                debug!(node = %self.node.name(), "node skipped");
                return StepOutcome::Skipped(input);
            }
        }

        match self.node.action() {
            NodeAction::Fork(plan) => {
                plan.launch(self.run, input);
                StepOutcome::Forked
            }
            NodeAction::Tasks { tasks, pool } => {
                match self.run_tasks(tasks, pool.as_ref(), input).await {
                    Ok(results) => StepOutcome::Completed(results),
                    Err(err) => StepOutcome::Failed(err),
                }
            }
        }
    }

    async fn run_tasks(
        &self,
        tasks: &[BoxedTask],
        pool: Option<&WorkerPool>,
        input: Vec<Value>,
    ) -> Result<Vec<Value>, ChainError> {
        let target = self.node.target_count();
        let (channel, mut receiver) = result_channel(target);
        let mut collector = Collector::new(target, self.node.options().any_passed.clone());

        self.dispatch(tasks, pool, &channel, &input);

        let context = self.run.context();
        while !collector.is_done() {
            tokio::select! {
                biased;
                outcome = receiver.recv() => match outcome {
                    Some(outcome) => {
                        collector.decide(outcome);
                    }
                    None => break,
                },
                _ = context.interrupted() => {
                    collector.interrupt(context.interruption());
                }
            }
        }

        let discarded = receiver.stop();
        if discarded > 0 {
            trace!(node = %self.node.name(), discarded, "late outcomes dropped");
        }
        // Keeps the sender alive for the whole wait; a lost outcome stalls
        // the step until the deadline rather than closing the channel.
        drop(channel);

        collector.finish()
    }

    fn dispatch(
        &self,
        tasks: &[BoxedTask],
        pool: Option<&WorkerPool>,
        channel: &Arc<ResultChannel>,
        input: &[Value],
    ) {
        let ctx = TaskContext::new(
            self.run.context().clone(),
            self.run.chain().options_arc(),
            self.run.invoke_options().clone(),
            self.node.clone(),
        );
        let job = |task: &BoxedTask| {
            invoke(
                task.clone(),
                ctx.clone(),
                input.to_vec(),
                channel.clone(),
                self.node.clone(),
            )
        };

        match (self.node.options().concurrency, pool) {
            (Concurrency::Pool(_), Some(pool)) => {
                for task in tasks {
                    if let Err(err) = pool.submit(job(task)) {
                        debug!(node = %self.node.name(), error = %err, "pool rejected task");
                        channel.nack(err);
                    }
                }
            }
            (Concurrency::Parallel(n), _) => {
                for task in tasks {
                    for _ in 0..n {
                        self.spawn(job(task));
                    }
                }
            }
            _ => {
                for task in tasks {
                    self.spawn(job(task));
                }
            }
        }
    }

    fn spawn<F>(&self, job: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handler = self.node.panic_handler().clone();
        tokio::spawn(async move { contain(job, &handler).await });
    }
}
