//! Task trait and closure adapter.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::context::TaskContext;

/// A unit of work run by a node.
///
/// `last` holds the previous stage's results. It is a vector because a stage
/// may run several task functions concurrently; the first node receives an
/// empty vector.
#[async_trait]
pub trait Task: Send + Sync {
    /// Execute the task against the previous stage's results.
    async fn run(&self, ctx: TaskContext, last: Vec<Value>) -> anyhow::Result<Value>;
}

/// Shared, type-erased task.
pub type BoxedTask = Arc<dyn Task>;

/// Adapter that turns an async closure into a [`Task`].
pub struct TaskFn<F>(F);

#[async_trait]
impl<F, Fut> Task for TaskFn<F>
where
    F: Fn(TaskContext, Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn run(&self, ctx: TaskContext, last: Vec<Value>) -> anyhow::Result<Value> {
        (self.0)(ctx, last).await
    }
}

/// Box an async closure as a task.
///
/// ```rust,ignore
/// let double = task_fn(|_ctx, last| async move {
///     let n = last.first().and_then(|v| v.as_i64()).unwrap_or(0);
///     Ok(json!(n * 2))
/// });
/// ```
pub fn task_fn<F, Fut>(f: F) -> BoxedTask
where
    F: Fn(TaskContext, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(TaskFn(f))
}
