//! Pipeline stages.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

use crate::branch::ForkPlan;
use crate::context::RunContext;
use crate::options::{Concurrency, NodeOptions, SkipPredicate};
use crate::pool::{PanicHandler, WorkerPool, DEFAULT_MAX_BLOCKING_TASKS};
use crate::task::BoxedTask;

/// Maps the rolling input to a comparable branch key.
pub(crate) type BranchPredicate = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

static NEXT_BRANCH_ID: AtomicU64 = AtomicU64::new(1);

/// Picks one candidate out of a branch.
///
/// `expects[i]` is the key candidate `i` answers to; `None` marks the default,
/// which comes last and always matches. Only appended candidates have an
/// entry, so a branch whose default was dropped may select nothing.
pub(crate) struct BranchSelector {
    id: u64,
    predicate: BranchPredicate,
    expects: Vec<Option<Value>>,
}

impl BranchSelector {
    pub(crate) fn new(predicate: BranchPredicate, expects: Vec<Option<Value>>) -> Self {
        Self {
            id: NEXT_BRANCH_ID.fetch_add(1, Ordering::Relaxed),
            predicate,
            expects,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn expects(&self) -> &[Option<Value>] {
        &self.expects
    }

    /// Index of the first candidate whose key matches, or the default.
    pub(crate) fn select(&self, input: &[Value]) -> Option<usize> {
        let key = (self.predicate)(input);
        let chosen = self
            .expects
            .iter()
            .position(|expect| expect.as_ref().map_or(true, |expect| *expect == key));
        debug!(branch = self.id, key = %key, candidate = ?chosen, "branch selected");
        chosen
    }
}

/// Decides whether a node is bypassed.
pub(crate) enum SkipRule {
    /// User predicate over the rolling input.
    Predicate(SkipPredicate),
    /// Candidate `index` of a single-node branch; runs only when selected.
    Branch {
        selector: Arc<BranchSelector>,
        index: usize,
    },
}

impl SkipRule {
    pub(crate) fn should_skip(&self, run: &RunContext, input: &[Value]) -> bool {
        match self {
            Self::Predicate(predicate) => predicate(input),
            Self::Branch { selector, index } => {
                let chosen = run.branch_choice(selector.id(), || selector.select(input));
                chosen != Some(*index)
            }
        }
    }
}

/// What a node does when it is not skipped.
pub(crate) enum NodeAction {
    /// Run task functions under the node's concurrency mode.
    Tasks {
        tasks: Vec<BoxedTask>,
        pool: Option<WorkerPool>,
    },
    /// Hand the rest of the run over to one of several sub-chains.
    Fork(Arc<ForkPlan>),
}

/// One stage of a chain.
pub(crate) struct Node {
    name: String,
    opts: NodeOptions,
    skip: Option<SkipRule>,
    action: NodeAction,
    panic_handler: PanicHandler,
}

impl Node {
    /// Build a task node. `primary` runs first in declaration order, followed
    /// by the options' sibling tasks. Pool-mode nodes get their pool here.
    pub(crate) fn tasks(name: String, primary: BoxedTask, mut opts: NodeOptions) -> Self {
        let mut tasks = Vec::with_capacity(1 + opts.parallel_tasks.len());
        tasks.push(primary);
        tasks.append(&mut opts.parallel_tasks);

        let skip = opts.skip.take().map(SkipRule::Predicate);
        let panic_handler = panic_logger(name.clone());
        let pool = match opts.concurrency {
            Concurrency::Pool(n) => Some(WorkerPool::new(
                usize::from(n),
                DEFAULT_MAX_BLOCKING_TASKS,
                panic_handler.clone(),
            )),
            _ => None,
        };

        Self {
            name,
            opts,
            skip,
            action: NodeAction::Tasks { tasks, pool },
            panic_handler,
        }
    }

    pub(crate) fn fork(name: String, plan: Arc<ForkPlan>) -> Self {
        let panic_handler = panic_logger(name.clone());
        Self {
            name,
            opts: NodeOptions::default(),
            skip: None,
            action: NodeAction::Fork(plan),
            panic_handler,
        }
    }

    /// Make this node candidate `index` of a branch. Replaces any skip
    /// predicate the caller configured.
    pub(crate) fn into_branch_candidate(
        mut self,
        selector: Arc<BranchSelector>,
        index: usize,
    ) -> Self {
        self.skip = Some(SkipRule::Branch { selector, index });
        self
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn options(&self) -> &NodeOptions {
        &self.opts
    }

    pub(crate) fn skip_rule(&self) -> Option<&SkipRule> {
        self.skip.as_ref()
    }

    pub(crate) fn action(&self) -> &NodeAction {
        &self.action
    }

    pub(crate) fn panic_handler(&self) -> &PanicHandler {
        &self.panic_handler
    }

    pub(crate) fn task_count(&self) -> usize {
        match &self.action {
            NodeAction::Tasks { tasks, .. } => tasks.len(),
            NodeAction::Fork(_) => 0,
        }
    }

    /// Outcomes a step must collect before wait-for-all completes. Fixed
    /// before any task starts.
    pub(crate) fn target_count(&self) -> usize {
        match self.opts.concurrency {
            Concurrency::Parallel(n) => self.task_count() * usize::from(n),
            Concurrency::Sequential | Concurrency::Pool(_) => self.task_count(),
        }
    }
}

fn panic_logger(node: String) -> PanicHandler {
    Arc::new(move |message: String| {
        error!(node = %node, panic = %message, "task function panicked");
    })
}
