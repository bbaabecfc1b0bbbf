//! # Chainor
//!
//! An asynchronous pipeline executor for tokio.
//!
//! A chain is an ordered list of nodes. Each node runs one or more task
//! functions, sequentially spawned, replicated in parallel, or through a
//! dedicated bounded worker pool, and hands their results to the next node.
//!
//! ## Why Chainor?
//!
//! - **Completion policies** - Wait for every task, accept the first match, or skip a node entirely
//! - **Run-wide deadline** - One timeout covers every node, forked branches included
//! - **Branching** - Pick one sibling task per run, or fork into an independent sub-chain
//! - **Embeddable** - A library, not a service. Runs in your process.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chainor::{Chain, ChainOptions, InvokeOptions, NodeOptions};
//! use serde_json::json;
//!
//! let chain = Chain::new(ChainOptions::new().with_name("numbers"))
//!     .next(|_ctx, _last| async { Ok(json!(5)) }, NodeOptions::new())
//!     .next(
//!         |_ctx, last| async move { Ok(json!(last[0].as_i64().unwrap_or(0) + 1)) },
//!         NodeOptions::new().with_parallel(3),
//!     );
//!
//! let results = chain
//!     .run(InvokeOptions::new().with_timeout(Duration::from_secs(5)))
//!     .await?;
//! assert_eq!(results, vec![json!(6), json!(6), json!(6)]);
//! ```
//!
//! ## Callbacks
//!
//! [`Chain::invoke`] returns immediately; exactly one callback fires when the
//! run ends:
//!
//! ```rust,ignore
//! chain.invoke(
//!     |results| println!("done: {results:?}"),
//!     |err| eprintln!("failed: {err}"),
//!     InvokeOptions::new().with_param("job-42"),
//! );
//! ```
//!
//! ## Branching
//!
//! ```rust,ignore
//! let chain = Chain::named("router")
//!     .next(classify, NodeOptions::new())
//!     .switch_fork(|last| last[0].clone())
//!     .case("priority", |sub| sub.next(fast_track, NodeOptions::new()))
//!     .default(|sub| sub.next(queue, NodeOptions::new()));
//! ```

pub mod branch;
pub mod chain;
pub mod context;
pub mod error;
pub mod options;
pub mod pool;
pub mod recorder;
pub mod registry;
pub mod task;

mod node;
mod run;
mod step;

pub use branch::{ForkSwitch, Switch};
pub use chain::{BranchCase, Chain, ChainGraph, ForkGraph, NodeGraph};
pub use context::TaskContext;
pub use error::ChainError;
pub use options::{
    AnyPassedPredicate, ChainOptions, Concurrency, InvokeOptions, NodeOptions, OptionsError,
    PanicPolicy, Props, SkipPredicate,
};
pub use pool::{PanicHandler, WorkerPool, DEFAULT_MAX_BLOCKING_TASKS};
pub use recorder::{
    MemoryRecorder, NoopRecorder, Recorder, RunId, RunRecord, RunStatus, StepId, StepRecord,
    StepStatus,
};
pub use registry::{InMemoryRegistry, TaskRegistry};
pub use task::{task_fn, BoxedTask, Task, TaskFn};
