//! Tests for the three concurrency modes and their completion policies.
//!
//! Concurrent outcomes arrive in completion order, so results are compared
//! as sorted sequences.

use chainor::{
    Chain, ChainError, InvokeOptions, NodeOptions, PanicPolicy, TaskContext,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn sorted(values: Vec<Value>) -> Vec<i64> {
    let mut numbers: Vec<i64> = values.iter().filter_map(Value::as_i64).collect();
    numbers.sort_unstable();
    numbers
}

fn three_tasks(opts: NodeOptions) -> NodeOptions {
    opts.with_parallel_fn(|_ctx, _last| async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(json!(7))
    })
    .with_parallel_fn(|_ctx, _last| async { Ok(json!(8)) })
}

fn three_task_chain(opts: NodeOptions) -> Chain {
    Chain::named("three").next(|_ctx, _last| async { Ok(json!(2)) }, three_tasks(opts))
}

#[tokio::test]
async fn test_sequential_mode_runs_every_task_once() {
    let results = three_task_chain(NodeOptions::new())
        .run(InvokeOptions::new())
        .await
        .unwrap();
    assert_eq!(sorted(results), vec![2, 7, 8]);
}

#[tokio::test]
async fn test_parallel_mode_replicates_every_task() {
    let results = three_task_chain(NodeOptions::new().with_parallel(2))
        .run(InvokeOptions::new())
        .await
        .unwrap();
    assert_eq!(sorted(results), vec![2, 2, 7, 7, 8, 8]);
}

#[tokio::test]
async fn test_pool_mode_runs_every_task_once() {
    let results = three_task_chain(NodeOptions::new().with_worker_pool(2))
        .run(InvokeOptions::new())
        .await
        .unwrap();
    assert_eq!(sorted(results), vec![2, 7, 8]);
}

#[tokio::test]
async fn test_parallel_replicas_run_concurrently() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (r, p) = (running.clone(), peak.clone());

    let chain = Chain::named("overlap").next(
        move |_ctx, _last| {
            let running = r.clone();
            let peak = p.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(json!(1))
            }
        },
        NodeOptions::new().with_parallel(4),
    );

    let results = chain.run(InvokeOptions::new()).await.unwrap();
    assert_eq!(results.len(), 4);
    assert!(peak.load(Ordering::SeqCst) > 1);
}

#[tokio::test]
async fn test_pool_limits_concurrency_to_capacity() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut opts = NodeOptions::new().with_worker_pool(2);
    for _ in 0..5 {
        let running = running.clone();
        let peak = peak.clone();
        opts = opts.with_parallel_fn(move |_ctx, _last| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(json!(1))
            }
        });
    }

    let chain = Chain::named("bounded").next(|_ctx, _last| async { Ok(json!(1)) }, opts);
    let results = chain.run(InvokeOptions::new()).await.unwrap();
    assert_eq!(results.len(), 6);
    assert!(peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_any_passed_keeps_only_the_first_match() {
    let results = three_task_chain(NodeOptions::new().with_any_passed_if(|v| *v == json!(7)))
        .run(InvokeOptions::new())
        .await
        .unwrap();
    assert_eq!(results, vec![json!(7)]);
}

#[tokio::test]
async fn test_any_passed_in_parallel_mode_stores_one_value() {
    let results = three_task_chain(
        NodeOptions::new()
            .with_parallel(3)
            .with_any_passed_if(|v| *v == json!(8)),
    )
    .run(InvokeOptions::new())
    .await
    .unwrap();
    assert_eq!(results, vec![json!(8)]);
}

#[tokio::test]
async fn test_any_passed_without_match_fails_with_no_passed() {
    let err = three_task_chain(NodeOptions::new().with_any_passed_if(|v| *v == json!(100)))
        .run(InvokeOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::NoPassed));
}

#[tokio::test]
async fn test_any_passed_masks_errors() {
    let chain = Chain::named("masked").next(
        |_ctx, _last| async { Err(anyhow::anyhow!("transient")) },
        NodeOptions::new()
            .with_parallel_fn(|_ctx, _last| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(json!("ok"))
            })
            .with_any_passed(),
    );
    let results = chain.run(InvokeOptions::new()).await.unwrap();
    assert_eq!(results, vec![json!("ok")]);
}

#[tokio::test]
async fn test_error_completes_step_without_waiting() {
    let chain = Chain::named("fail-fast").next(
        |_ctx, _last| async { Err(anyhow::anyhow!("broken")) },
        NodeOptions::new().with_parallel_fn(|_ctx, _last| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!(1))
        }),
    );

    let started = tokio::time::Instant::now();
    let err = chain.run(InvokeOptions::new()).await.unwrap_err();
    assert_eq!(err.to_string(), "broken");
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_every_invocation_gets_its_own_input() {
    let chain = Chain::named("inputs")
        .next(|_ctx, _last| async { Ok(json!(10)) }, NodeOptions::new())
        .next(
            |_ctx, mut last: Vec<Value>| async move {
                last.push(json!(0));
                Ok(json!(last.len()))
            },
            NodeOptions::new().with_parallel(3),
        );
    let results = chain.run(InvokeOptions::new()).await.unwrap();
    assert_eq!(sorted(results), vec![2, 2, 2]);
}

#[tokio::test]
async fn test_pool_saturation_is_a_task_error() {
    let mut opts = NodeOptions::new().with_worker_pool(1);
    for _ in 0..chainor::DEFAULT_MAX_BLOCKING_TASKS + 2 {
        opts = opts.with_parallel_fn(|_ctx, _last| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(Value::Null)
        });
    }

    let chain = Chain::named("saturated").next(|_ctx, _last| async { Ok(Value::Null) }, opts);
    let err = chain.run(InvokeOptions::new()).await.unwrap_err();
    assert!(matches!(
        err,
        ChainError::PoolSaturated {
            capacity: 1,
            backlog: 20
        }
    ));
}

#[tokio::test]
async fn test_panic_with_fail_policy_fails_step() {
    let chain = Chain::named("panics").next(
        |_ctx: TaskContext, _last| async {
            if true {
                panic!("task blew up");
            }
            Ok(Value::Null)
        },
        NodeOptions::new()
            .with_name("fragile")
            .with_panic_policy(PanicPolicy::Fail),
    );

    let err = chain
        .run(InvokeOptions::new().with_timeout(Duration::from_secs(5)))
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::Panicked(ref node) if node == "fragile"));
}

#[tokio::test]
async fn test_panic_with_fail_policy_in_pool_mode() {
    let chain = Chain::named("pool-panics").next(
        |_ctx: TaskContext, _last| async {
            if true {
                panic!("pool task blew up");
            }
            Ok(Value::Null)
        },
        NodeOptions::new()
            .with_worker_pool(2)
            .with_panic_policy(PanicPolicy::Fail),
    );

    let err = chain
        .run(InvokeOptions::new().with_timeout(Duration::from_secs(5)))
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::Panicked(_)));
}

#[tokio::test]
async fn test_panic_with_drop_policy_stalls_until_deadline() {
    let chain = Chain::named("dropped").next(
        |_ctx: TaskContext, _last| async {
            if true {
                panic!("silently dropped");
            }
            Ok(Value::Null)
        },
        NodeOptions::new().with_worker_pool(1),
    );

    let err = chain
        .run(InvokeOptions::new().with_timeout(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_panic_with_any_passed_still_accepts_sibling() {
    let chain = Chain::named("sibling").next(
        |_ctx: TaskContext, _last| async {
            if true {
                panic!("one sibling panics");
            }
            Ok(Value::Null)
        },
        NodeOptions::new()
            .with_parallel_fn(|_ctx, _last| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(json!(3))
            })
            .with_any_passed(),
    );
    let results = chain
        .run(InvokeOptions::new().with_timeout(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(results, vec![json!(3)]);
}
