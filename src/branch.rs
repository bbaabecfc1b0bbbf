//! Conditional branching.
//!
//! Both builders key candidates by a predicate over the rolling input and
//! close with a default, which always matches last. Without a default the
//! branch is inert and [`Switch::end`] / [`ForkSwitch::end`] hand back the
//! chain untouched.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::chain::Chain;
use crate::context::TaskContext;
use crate::node::{BranchPredicate, BranchSelector, Node};
use crate::options::NodeOptions;
use crate::run::Run;
use crate::task::{task_fn, BoxedTask};

enum CaseTask {
    Task(BoxedTask),
    Named(String),
}

struct Case {
    expect: Option<Value>,
    task: CaseTask,
    opts: NodeOptions,
}

/// Single-node branch: exactly one candidate runs, the rest pass the rolling
/// input through.
///
/// Each candidate becomes its own consecutive stage keeping its own options,
/// so the stage after the branch sees the selected candidate's output. Skip
/// predicates set on candidate options are ignored; selection owns skipping.
///
/// ```rust,ignore
/// let chain = Chain::named("router")
///     .next(produce, NodeOptions::new())
///     .switch(|last| last[0].clone())
///     .case(8, handle_eight, NodeOptions::new())
///     .case(7, handle_seven, NodeOptions::new())
///     .default(handle_other, NodeOptions::new());
/// ```
pub struct Switch {
    chain: Chain,
    predicate: BranchPredicate,
    cases: Vec<Case>,
}

impl Switch {
    pub(crate) fn new(chain: Chain, predicate: BranchPredicate) -> Self {
        Self {
            chain,
            predicate,
            cases: Vec::new(),
        }
    }

    /// Candidate running `f` when the predicate yields `expect`.
    pub fn case<F, Fut>(self, expect: impl Into<Value>, f: F, opts: NodeOptions) -> Self
    where
        F: Fn(TaskContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.case_task(expect, task_fn(f), opts)
    }

    pub fn case_task(
        mut self,
        expect: impl Into<Value>,
        task: BoxedTask,
        opts: NodeOptions,
    ) -> Self {
        self.cases.push(Case {
            expect: Some(expect.into()),
            task: CaseTask::Task(task),
            opts,
        });
        self
    }

    /// Candidate running the tasks registered under `name`.
    pub fn case_named(mut self, expect: impl Into<Value>, name: &str, opts: NodeOptions) -> Self {
        self.cases.push(Case {
            expect: Some(expect.into()),
            task: CaseTask::Named(name.to_string()),
            opts,
        });
        self
    }

    /// Close the branch with a catch-all candidate running `f`.
    pub fn default<F, Fut>(self, f: F, opts: NodeOptions) -> Chain
    where
        F: Fn(TaskContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.default_task(task_fn(f), opts)
    }

    pub fn default_task(self, task: BoxedTask, opts: NodeOptions) -> Chain {
        self.close(Case {
            expect: None,
            task: CaseTask::Task(task),
            opts,
        })
    }

    pub fn default_named(self, name: &str, opts: NodeOptions) -> Chain {
        self.close(Case {
            expect: None,
            task: CaseTask::Named(name.to_string()),
            opts,
        })
    }

    /// Abandon the branch without a default. Nothing is appended.
    pub fn end(self) -> Chain {
        if !self.cases.is_empty() {
            debug!(
                chain = %self.chain.name(),
                cases = self.cases.len(),
                "branch without default ignored"
            );
        }
        self.chain
    }

    fn close(mut self, default: Case) -> Chain {
        self.cases.push(default);

        let mut expects = Vec::with_capacity(self.cases.len());
        let mut candidates = Vec::with_capacity(self.cases.len());
        for case in self.cases {
            let node = match case.task {
                CaseTask::Task(task) => {
                    let fallback = self.chain.default_node_name(candidates.len());
                    self.chain.build_node(task, case.opts, Some(fallback))
                }
                CaseTask::Named(name) => self.chain.named_node(&name, case.opts, None),
            };
            // A dropped candidate takes its key with it; a match falls through.
            if let Some(node) = node {
                expects.push(case.expect);
                candidates.push(node);
            }
        }

        let selector = Arc::new(BranchSelector::new(self.predicate, expects));
        let mut chain = self.chain;
        for (index, node) in candidates.into_iter().enumerate() {
            chain = chain.push(node.into_branch_candidate(selector.clone(), index));
        }
        chain
    }
}

type BranchBuilder = Box<dyn FnOnce(Chain) -> Chain>;

/// Forked branch: the selected candidate's sub-chain finishes the run.
///
/// Every candidate callback runs once, at build time, against an empty chain
/// sharing this chain's metadata. Forked control flow never rejoins, so the
/// chain returned by [`ForkSwitch::default`] accepts no further nodes.
///
/// ```rust,ignore
/// let chain = Chain::named("router")
///     .next(produce, NodeOptions::new())
///     .switch_fork(|last| last[0].clone())
///     .case(7, |sub| sub.next(fast_path, NodeOptions::new()))
///     .default(|sub| sub.next(slow_path, NodeOptions::new()));
/// ```
pub struct ForkSwitch {
    chain: Chain,
    predicate: BranchPredicate,
    cases: Vec<(Option<Value>, BranchBuilder)>,
}

impl ForkSwitch {
    pub(crate) fn new(chain: Chain, predicate: BranchPredicate) -> Self {
        Self {
            chain,
            predicate,
            cases: Vec::new(),
        }
    }

    /// Candidate sub-chain taken when the predicate yields `expect`.
    pub fn case<B>(mut self, expect: impl Into<Value>, build: B) -> Self
    where
        B: FnOnce(Chain) -> Chain + 'static,
    {
        self.cases.push((Some(expect.into()), Box::new(build)));
        self
    }

    /// Close the branch with a catch-all sub-chain and build every candidate.
    pub fn default<B>(mut self, build: B) -> Chain
    where
        B: FnOnce(Chain) -> Chain + 'static,
    {
        self.cases.push((None, Box::new(build)));

        let mut expects = Vec::with_capacity(self.cases.len());
        let mut branches = Vec::with_capacity(self.cases.len());
        for (expect, build) in self.cases {
            expects.push(expect);
            branches.push(Arc::new(build(self.chain.fork_clone())));
        }

        let plan = ForkPlan {
            selector: BranchSelector::new(self.predicate, expects),
            branches,
        };
        let name = format!("fork-{}", self.chain.len());
        self.chain.push(Node::fork(name, Arc::new(plan))).seal()
    }

    /// Abandon the branch without a default. Nothing is appended and no
    /// candidate callback runs.
    pub fn end(self) -> Chain {
        if !self.cases.is_empty() {
            warn!(
                chain = %self.chain.name(),
                cases = self.cases.len(),
                "fork without default ignored"
            );
        }
        self.chain
    }
}

/// Run-time half of a forked branch.
pub(crate) struct ForkPlan {
    selector: BranchSelector,
    branches: Vec<Arc<Chain>>,
}

impl ForkPlan {
    /// Continue `run` in the selected candidate, seeded with `input`.
    pub(crate) fn launch(&self, run: &Run, input: Vec<Value>) {
        // Every fork candidate has a branch and the default always matches.
        let branch = self
            .selector
            .select(&input)
            .and_then(|index| self.branches.get(index).map(|branch| (index, branch)));
        if let Some((index, branch)) = branch {
            debug!(
                chain = %run.chain().name(),
                candidate = index,
                nodes = branch.len(),
                "fork launched"
            );
            run.fork(branch.clone()).forward(input);
        }
    }

    pub(crate) fn candidates(&self) -> impl Iterator<Item = (&Option<Value>, &Arc<Chain>)> {
        self.selector.expects().iter().zip(self.branches.iter())
    }
}
