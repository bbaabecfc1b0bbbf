//! Chain builder and graph export.

use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::warn;

use crate::branch::{ForkSwitch, Switch};
use crate::context::TaskContext;
use crate::error::ChainError;
use crate::node::{Node, NodeAction, SkipRule};
use crate::options::{ChainOptions, Concurrency, InvokeOptions, NodeOptions};
use crate::recorder::{NoopRecorder, Recorder};
use crate::registry::{self, TaskRegistry};
use crate::run::Run;
use crate::task::{task_fn, BoxedTask};

/// Serializable chain structure for visualization.
#[derive(Debug, Clone, Serialize)]
pub struct ChainGraph {
    pub name: String,
    pub nodes: Vec<NodeGraph>,
}

/// A node in the chain graph.
#[derive(Debug, Clone, Serialize)]
pub struct NodeGraph {
    pub index: usize,
    pub name: String,
    /// Distinct task functions, before parallel replication.
    pub tasks: usize,
    pub concurrency: Concurrency,
    pub skippable: bool,
    pub any_passed: bool,
    /// Set for candidates of a single-node branch.
    pub branch: Option<BranchCase>,
    /// Candidate sub-chains of a fork node, in selection order.
    pub forks: Vec<ForkGraph>,
}

/// Position of a node within a single-node branch.
#[derive(Debug, Clone, Serialize)]
pub struct BranchCase {
    pub index: usize,
    /// `None` for the default candidate.
    pub expect: Option<Value>,
}

/// One candidate of a fork node.
#[derive(Debug, Clone, Serialize)]
pub struct ForkGraph {
    /// `None` for the default candidate.
    pub expect: Option<Value>,
    pub chain: ChainGraph,
}

/// An ordered sequence of nodes plus static metadata.
///
/// Building is synchronous and only appends nodes. Misuse (invalid options,
/// unknown task names, appending after a fork) is logged and ignored, so
/// builder calls always chain.
///
/// ```rust,ignore
/// let chain = Chain::new(ChainOptions::new().with_name("numbers"))
///     .next(|_ctx, _last| async { Ok(json!(5)) }, NodeOptions::new())
///     .next(
///         |_ctx, last| async move { Ok(json!(last[0].as_i64().unwrap_or(0) + 1)) },
///         NodeOptions::new(),
///     );
///
/// assert_eq!(chain.run(InvokeOptions::new()).await?, vec![json!(6)]);
/// ```
#[derive(Clone)]
pub struct Chain {
    options: Arc<ChainOptions>,
    nodes: Vec<Arc<Node>>,
    registry: Arc<dyn TaskRegistry>,
    recorder: Arc<dyn Recorder>,
    sealed: bool,
}

impl Chain {
    /// Create an empty chain resolving names against the global registry.
    pub fn new(options: ChainOptions) -> Self {
        Self {
            options: Arc::new(options),
            nodes: Vec::new(),
            registry: registry::global(),
            recorder: Arc::new(NoopRecorder),
            sealed: false,
        }
    }

    /// Shorthand for a chain with only a name.
    pub fn named(name: &str) -> Self {
        Self::new(ChainOptions::new().with_name(name))
    }

    /// Resolve task names against `registry` instead of the global one.
    pub fn with_registry(mut self, registry: Arc<dyn TaskRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_recorder<R: Recorder + 'static>(mut self, recorder: R) -> Self {
        self.recorder = Arc::new(recorder);
        self
    }

    /// Share a recorder with other chains or with the caller.
    pub fn with_shared_recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Append a node running `f`.
    pub fn next<F, Fut>(self, f: F, opts: NodeOptions) -> Self
    where
        F: Fn(TaskContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.next_task(task_fn(f), opts)
    }

    /// Append a node running `task`.
    pub fn next_task(self, task: BoxedTask, opts: NodeOptions) -> Self {
        match self.build_node(task, opts, None) {
            Some(node) => self.push(node),
            None => self,
        }
    }

    /// Append a node running every task registered under `name`.
    ///
    /// The first registered task is the node's primary task; the rest replace
    /// any sibling tasks in `opts`. An unknown name is a logged no-op.
    pub fn next_named(self, name: &str, opts: NodeOptions) -> Self {
        match self.named_node(name, opts, None) {
            Some(node) => self.push(node),
            None => self,
        }
    }

    /// Start a single-node branch keyed by `predicate`.
    pub fn switch<P>(self, predicate: P) -> Switch
    where
        P: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Switch::new(self, Arc::new(predicate))
    }

    /// Start a forked branch keyed by `predicate`.
    pub fn switch_fork<P>(self, predicate: P) -> ForkSwitch
    where
        P: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        ForkSwitch::new(self, Arc::new(predicate))
    }

    /// Start a run in the background and return immediately.
    ///
    /// Exactly one of the callbacks fires, once, from a runtime worker. Must
    /// be called within a tokio runtime.
    pub fn invoke<S, F>(&self, on_success: S, on_failure: F, opts: InvokeOptions)
    where
        S: FnOnce(Vec<Value>) + Send + 'static,
        F: FnOnce(ChainError) + Send + 'static,
    {
        Run::start(
            Arc::new(self.clone()),
            opts,
            Box::new(on_success),
            Box::new(on_failure),
        );
    }

    /// Run the chain and wait for its terminal outcome.
    pub async fn run(&self, opts: InvokeOptions) -> Result<Vec<Value>, ChainError> {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let deliver = move |outcome: Result<Vec<Value>, ChainError>| {
            let tx = tx
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            if let Some(tx) = tx {
                let _ = tx.send(outcome);
            }
        };
        let on_failure = deliver.clone();

        self.invoke(
            move |results| deliver(Ok(results)),
            move |err| on_failure(Err(err)),
            opts,
        );

        // The run was dropped without reaching an outcome, e.g. at runtime
        // shutdown.
        rx.await.unwrap_or(Err(ChainError::Cancelled))
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn options(&self) -> &ChainOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True once a forked branch was closed; later appends are ignored.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Describe the chain's structure.
    pub fn to_graph(&self) -> ChainGraph {
        let nodes = self
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| {
                let opts = node.options();
                let branch = match node.skip_rule() {
                    Some(SkipRule::Branch { selector, index: case }) => Some(BranchCase {
                        index: *case,
                        expect: selector.expects().get(*case).cloned().flatten(),
                    }),
                    _ => None,
                };
                let forks = match node.action() {
                    NodeAction::Fork(plan) => plan
                        .candidates()
                        .map(|(expect, chain)| ForkGraph {
                            expect: expect.clone(),
                            chain: chain.to_graph(),
                        })
                        .collect(),
                    NodeAction::Tasks { .. } => Vec::new(),
                };
                NodeGraph {
                    index,
                    name: node.name().to_string(),
                    tasks: node.task_count(),
                    concurrency: opts.concurrency,
                    skippable: matches!(node.skip_rule(), Some(SkipRule::Predicate(_))),
                    any_passed: opts.has_any_passed(),
                    branch,
                    forks,
                }
            })
            .collect();

        ChainGraph {
            name: self.options.name.clone(),
            nodes,
        }
    }

    pub(crate) fn options_arc(&self) -> Arc<ChainOptions> {
        self.options.clone()
    }

    pub(crate) fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub(crate) fn recorder(&self) -> &Arc<dyn Recorder> {
        &self.recorder
    }

    /// Empty chain sharing this one's metadata, registry and recorder.
    pub(crate) fn fork_clone(&self) -> Self {
        Self {
            options: self.options.clone(),
            nodes: Vec::new(),
            registry: self.registry.clone(),
            recorder: self.recorder.clone(),
            sealed: false,
        }
    }

    pub(crate) fn seal(mut self) -> Self {
        self.sealed = true;
        self
    }

    /// Default name for the node that would land at the next position, or
    /// `offset` positions after it.
    pub(crate) fn default_node_name(&self, offset: usize) -> String {
        format!("node-{}", self.nodes.len() + offset)
    }

    /// Validate `opts` and wrap `task` in a node. Logs and returns `None` on
    /// invalid options.
    pub(crate) fn build_node(
        &self,
        task: BoxedTask,
        opts: NodeOptions,
        fallback_name: Option<String>,
    ) -> Option<Node> {
        if let Err(err) = opts.validate() {
            warn!(chain = %self.name(), error = %err, "invalid node options, node not appended");
            return None;
        }
        let name = opts
            .name
            .clone()
            .or(fallback_name)
            .unwrap_or_else(|| self.default_node_name(0));
        Some(Node::tasks(name, task, opts))
    }

    /// Resolve `name` in the registry and build a node from its tasks.
    pub(crate) fn named_node(
        &self,
        name: &str,
        mut opts: NodeOptions,
        fallback_name: Option<String>,
    ) -> Option<Node> {
        let mut tasks = self.registry.resolve(name).into_iter();
        let Some(primary) = tasks.next() else {
            warn!(
                chain = %self.name(),
                task = name,
                "no tasks registered under name, node not appended"
            );
            return None;
        };
        opts.parallel_tasks = tasks.collect();
        let fallback = fallback_name.unwrap_or_else(|| name.to_string());
        self.build_node(primary, opts, Some(fallback))
    }

    /// Append a built node unless the chain is sealed.
    pub(crate) fn push(mut self, node: Node) -> Self {
        if self.sealed {
            warn!(chain = %self.name(), node = %node.name(), "chain forked, node not appended");
            return self;
        }
        self.nodes.push(Arc::new(node));
        self
    }
}
