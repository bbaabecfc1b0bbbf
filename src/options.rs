//! Configuration structs for chains, nodes and invocations.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::context::TaskContext;
use crate::task::{task_fn, BoxedTask};

/// Free-form properties attached to a chain, node or invocation.
pub type Props = HashMap<String, Value>;

/// Predicate deciding whether a node is skipped, given the rolling input.
pub type SkipPredicate = Arc<dyn Fn(&[Value]) -> bool + Send + Sync>;

/// Predicate accepting a single task result under the any-passed policy.
pub type AnyPassedPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Error returned by option validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionsError {
    /// Parallel or pool mode was configured with a zero count.
    #[error("{mode} concurrency requires a non-zero count")]
    ZeroConcurrency { mode: &'static str },
}

/// Static metadata of a chain.
///
/// Recognized options: `{name, param, props}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChainOptions {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub param: Value,
    #[serde(default)]
    pub props: Props,
}

impl ChainOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_param(mut self, param: impl Into<Value>) -> Self {
        self.param = param.into();
        self
    }

    pub fn with_props(mut self, props: Props) -> Self {
        self.props = props;
        self
    }

    pub fn with_prop(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.props.insert(key.to_string(), value.into());
        self
    }
}

/// Options for a single invocation of a chain.
///
/// Recognized options: `{param, props, timeout}`. A zero timeout means the
/// run has no deadline.
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    pub param: Value,
    pub props: Props,
    pub timeout: Option<Duration>,
}

impl InvokeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_param(mut self, param: impl Into<Value>) -> Self {
        self.param = param.into();
        self
    }

    pub fn with_props(mut self, props: Props) -> Self {
        self.props = props;
        self
    }

    pub fn with_prop(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.props.insert(key.to_string(), value.into());
        self
    }

    /// Deadline for the whole run, all nodes and forked branches included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The effective deadline duration, if any.
    pub(crate) fn deadline(&self) -> Option<Duration> {
        self.timeout.filter(|t| !t.is_zero())
    }
}

/// How a node runs its task functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "mode", content = "count", rename_all = "snake_case")]
pub enum Concurrency {
    /// Every task function runs once on its own spawned task.
    #[default]
    Sequential,
    /// Every task function is replicated `n` times concurrently.
    Parallel(u16),
    /// Every task function is submitted once to a dedicated pool of `n` workers.
    Pool(u16),
}

impl Concurrency {
    fn validate(&self) -> Result<(), OptionsError> {
        match self {
            Self::Parallel(0) => Err(OptionsError::ZeroConcurrency { mode: "parallel" }),
            Self::Pool(0) => Err(OptionsError::ZeroConcurrency { mode: "pool" }),
            _ => Ok(()),
        }
    }
}

/// What happens to a task invocation that panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanicPolicy {
    /// Log the panic and send no outcome. A wait-for-all step can then only
    /// finish through the run's deadline.
    #[default]
    Drop,
    /// Log the panic and report it as a
    /// [`ChainError::Panicked`](crate::ChainError::Panicked) outcome.
    Fail,
}

/// Options for a node appended to a chain.
///
/// Recognized options: `{name, param, props, parallel_tasks, concurrency,
/// skip, any_passed, panic_policy}`.
#[derive(Clone, Default)]
pub struct NodeOptions {
    pub name: Option<String>,
    pub param: Value,
    pub props: Props,
    pub concurrency: Concurrency,
    pub panic_policy: PanicPolicy,
    pub(crate) parallel_tasks: Vec<BoxedTask>,
    pub(crate) skip: Option<SkipPredicate>,
    pub(crate) any_passed: Option<AnyPassedPredicate>,
}

impl NodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label used in logs, recorder events and graphs.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_param(mut self, param: impl Into<Value>) -> Self {
        self.param = param.into();
        self
    }

    pub fn with_props(mut self, props: Props) -> Self {
        self.props = props;
        self
    }

    pub fn with_prop(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.props.insert(key.to_string(), value.into());
        self
    }

    /// Add a sibling task function running in the same node.
    pub fn with_parallel_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(TaskContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.parallel_tasks.push(task_fn(f));
        self
    }

    /// Add an already boxed sibling task.
    pub fn with_parallel_task(mut self, task: BoxedTask) -> Self {
        self.parallel_tasks.push(task);
        self
    }

    /// Replace all sibling tasks.
    pub fn with_parallel_tasks(mut self, tasks: Vec<BoxedTask>) -> Self {
        self.parallel_tasks = tasks;
        self
    }

    /// Replicate every task function `n` times.
    pub fn with_parallel(mut self, n: u16) -> Self {
        self.concurrency = Concurrency::Parallel(n);
        self
    }

    /// Run every task function through a dedicated pool of `n` workers.
    pub fn with_worker_pool(mut self, n: u16) -> Self {
        self.concurrency = Concurrency::Pool(n);
        self
    }

    /// Skip the node, passing its input through, when `predicate` holds.
    pub fn with_skip<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&[Value]) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(predicate));
        self
    }

    /// Complete on the first successful outcome.
    pub fn with_any_passed(mut self) -> Self {
        self.any_passed = Some(Arc::new(|_: &Value| true));
        self
    }

    /// Complete on the first outcome satisfying `predicate`.
    pub fn with_any_passed_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.any_passed = Some(Arc::new(predicate));
        self
    }

    pub fn with_panic_policy(mut self, policy: PanicPolicy) -> Self {
        self.panic_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        self.concurrency.validate()
    }

    pub fn has_skip(&self) -> bool {
        self.skip.is_some()
    }

    pub fn has_any_passed(&self) -> bool {
        self.any_passed.is_some()
    }
}

impl fmt::Debug for NodeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeOptions")
            .field("name", &self.name)
            .field("param", &self.param)
            .field("props", &self.props)
            .field("concurrency", &self.concurrency)
            .field("panic_policy", &self.panic_policy)
            .field("parallel_tasks", &self.parallel_tasks.len())
            .field("skip", &self.skip.is_some())
            .field("any_passed", &self.any_passed.is_some())
            .finish()
    }
}
