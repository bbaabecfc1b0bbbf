//! Tests for execution recording.

use async_trait::async_trait;
use chainor::{
    Chain, InvokeOptions, MemoryRecorder, NodeOptions, Recorder, RunId, RunStatus, StepId,
    StepStatus,
};
use serde_json::json;
use std::sync::Arc;

fn recorded(recorder: &Arc<MemoryRecorder>) -> Chain {
    Chain::named("recorded").with_shared_recorder(recorder.clone() as Arc<dyn Recorder>)
}

#[tokio::test]
async fn test_records_every_step_of_a_successful_run() {
    let recorder = Arc::new(MemoryRecorder::new());
    let chain = recorded(&recorder)
        .next(|_ctx, _last| async { Ok(json!(1)) }, NodeOptions::new().with_name("first"))
        .next(
            |_ctx, _last| async { Ok(json!(2)) },
            NodeOptions::new().with_name("skipped").with_skip(|_| true),
        )
        .next(
            |_ctx, _last| async { Ok(json!(3)) },
            NodeOptions::new().with_name("wide").with_parallel(2),
        );

    chain.run(InvokeOptions::new()).await.unwrap();

    let runs = recorder.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].chain, "recorded");
    assert_eq!(runs[0].status, Some(RunStatus::Completed));

    let steps: Vec<_> = recorder
        .steps_of(runs[0].id)
        .into_iter()
        .map(|s| (s.index, s.node, s.status))
        .collect();
    assert_eq!(
        steps,
        vec![
            (0, "first".to_string(), Some(StepStatus::Completed { results: 1 })),
            (1, "skipped".to_string(), Some(StepStatus::Skipped)),
            (2, "wide".to_string(), Some(StepStatus::Completed { results: 2 })),
        ]
    );
}

#[tokio::test]
async fn test_records_failure_and_stops() {
    let recorder = Arc::new(MemoryRecorder::new());
    let chain = recorded(&recorder)
        .next(
            |_ctx, _last| async { Err(anyhow::anyhow!("boom")) },
            NodeOptions::new().with_name("broken"),
        )
        .next(|_ctx, _last| async { Ok(json!(1)) }, NodeOptions::new());

    chain.run(InvokeOptions::new()).await.unwrap_err();

    let runs = recorder.runs();
    assert_eq!(
        runs[0].status,
        Some(RunStatus::Failed {
            error: "boom".to_string()
        })
    );
    let steps = recorder.steps();
    assert_eq!(steps.len(), 1);
    assert_eq!(
        steps[0].status,
        Some(StepStatus::Failed {
            error: "boom".to_string()
        })
    );
}

struct BrokenRecorder;

#[async_trait]
impl Recorder for BrokenRecorder {
    async fn start_run(&self, _chain_name: &str) -> anyhow::Result<RunId> {
        Err(anyhow::anyhow!("store offline"))
    }

    async fn start_step(
        &self,
        _run_id: RunId,
        _node_name: &str,
        _node_index: usize,
    ) -> anyhow::Result<StepId> {
        Err(anyhow::anyhow!("store offline"))
    }

    async fn complete_step(&self, _step_id: StepId, _status: StepStatus) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("store offline"))
    }

    async fn complete_run(&self, _run_id: RunId, _status: RunStatus) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("store offline"))
    }
}

#[tokio::test]
async fn test_recorder_failures_do_not_change_outcome() {
    let chain = Chain::named("unrecorded")
        .with_recorder(BrokenRecorder)
        .next(|_ctx, _last| async { Ok(json!("still works")) }, NodeOptions::new());

    assert_eq!(
        chain.run(InvokeOptions::new()).await.unwrap(),
        vec![json!("still works")]
    );
}
