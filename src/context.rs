//! Run-scoped shared state and the context handed to task functions.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ChainError;
use crate::node::Node;
use crate::options::{ChainOptions, InvokeOptions, Props};

/// State shared by every step of one run, forked branches included.
pub(crate) struct RunContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    timed_out: Arc<AtomicBool>,
    timer: Mutex<Option<JoinHandle<()>>>,
    values: RwLock<HashMap<String, Value>>,
    branches: Mutex<HashMap<u64, Option<usize>>>,
}

impl RunContext {
    /// Create the context and arm the deadline timer. Must be called from
    /// within a tokio runtime when `timeout` is set.
    pub(crate) fn new(timeout: Option<Duration>) -> Self {
        let token = CancellationToken::new();
        let timed_out = Arc::new(AtomicBool::new(false));
        let deadline = timeout.map(|t| Instant::now() + t);

        let timer = deadline.map(|deadline| {
            let token = token.clone();
            let timed_out = timed_out.clone();
            tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                timed_out.store(true, Ordering::SeqCst);
                token.cancel();
            })
        });

        Self {
            token,
            deadline,
            timed_out,
            timer: Mutex::new(timer),
            values: RwLock::new(HashMap::new()),
            branches: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves once the deadline fires or the run is cancelled.
    pub(crate) async fn interrupted(&self) {
        self.token.cancelled().await
    }

    /// The error a step reports after being interrupted.
    pub(crate) fn interruption(&self) -> ChainError {
        if self.timed_out.load(Ordering::SeqCst) {
            ChainError::Timeout
        } else {
            ChainError::Cancelled
        }
    }

    /// Stop the deadline timer and cancel the token. Called once the run
    /// reaches a terminal outcome.
    pub(crate) fn release(&self) {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(timer) = timer {
            timer.abort();
        }
        self.token.cancel();
    }

    pub(crate) fn set_value(&self, key: String, value: Value) {
        self.values
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, value);
    }

    pub(crate) fn value(&self, key: &str) -> Option<Value> {
        self.values
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    /// Memoized branch decision for this run. `select` runs at most once per
    /// branch id.
    pub(crate) fn branch_choice(
        &self,
        id: u64,
        select: impl FnOnce() -> Option<usize>,
    ) -> Option<usize> {
        let mut branches = self
            .branches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *branches.entry(id).or_insert_with(select)
    }
}

/// Context handed to every task function.
///
/// Cheap to clone. Values set through [`TaskContext::set_value`] are visible
/// to every task of the same run, including tasks of forked branches.
#[derive(Clone)]
pub struct TaskContext {
    run: Arc<RunContext>,
    chain: Arc<ChainOptions>,
    invoke: Arc<InvokeOptions>,
    node: Arc<Node>,
}

impl TaskContext {
    pub(crate) fn new(
        run: Arc<RunContext>,
        chain: Arc<ChainOptions>,
        invoke: Arc<InvokeOptions>,
        node: Arc<Node>,
    ) -> Self {
        Self {
            run,
            chain,
            invoke,
            node,
        }
    }

    /// Token cancelled when the run's deadline fires or the run ends.
    pub fn cancellation_token(&self) -> &CancellationToken {
        self.run.token()
    }

    /// Cancel the whole run. The step waiting on this task fails with
    /// [`ChainError::Cancelled`].
    pub fn cancel(&self) {
        self.run.token().cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.run.token().is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.run.deadline()
    }

    /// Store a value for the rest of the run. Last writer wins.
    pub fn set_value(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.run.set_value(key.into(), value.into());
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.run.value(key)
    }

    pub fn chain_name(&self) -> &str {
        &self.chain.name
    }

    pub fn chain_param(&self) -> &Value {
        &self.chain.param
    }

    pub fn chain_props(&self) -> &Props {
        &self.chain.props
    }

    pub fn node_name(&self) -> &str {
        self.node.name()
    }

    pub fn task_param(&self) -> &Value {
        &self.node.options().param
    }

    pub fn task_props(&self) -> &Props {
        &self.node.options().props
    }

    /// Invocation parameter.
    pub fn param(&self) -> &Value {
        &self.invoke.param
    }

    /// Invocation properties.
    pub fn props(&self) -> &Props {
        &self.invoke.props
    }
}
