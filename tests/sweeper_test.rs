use lazy_dispatch::dispatch::memory::{MemoryBroker, MemoryFlags, MemoryLocks};
use lazy_dispatch::dispatch::{
    AdvisoryLocks, DispatchContext, Dispatcher, Execution, FlagStore, SWEEP_TASK, TaskSpec,
};
use lazy_dispatch::engine::SweepLoop;
use lazy_dispatch::error::{Error, TaskError};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    locks: MemoryLocks,
    flags: MemoryFlags,
    broker: MemoryBroker,
    dispatcher: Arc<Dispatcher>,
}

fn harness() -> Harness {
    let locks = MemoryLocks::new();
    let flags = MemoryFlags::new();
    let broker = MemoryBroker::new();
    let dispatcher = Dispatcher::builder(
        Arc::new(locks.clone()),
        Arc::new(flags.clone()),
        Arc::new(broker.clone()),
    )
    .task(TaskSpec::new("f", |_args| async { Ok::<_, TaskError>(Value::Null) }).queue("f_queue"))
    .build()
    .unwrap();
    Harness {
        locks,
        flags,
        broker,
        dispatcher,
    }
}

#[tokio::test]
async fn orphaned_flag_is_resubmitted_with_its_args() {
    let h = harness();
    h.flags.create("f:[42]").await.unwrap();

    let report = h.dispatcher.sweep().await.unwrap();

    assert_eq!(report.scanned, 1);
    assert_eq!(report.resubmitted, vec!["f:[42]".to_string()]);
    let published = h.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].queue, "f_queue");
    assert_eq!(published[0].message.task, "f");
    assert_eq!(published[0].message.args, vec![json!(42)]);
    // The run that picks up the message clears the flag.
    assert!(h.flags.contains("f:[42]"));
    assert_eq!(h.locks.held_count(), 0);
}

#[tokio::test]
async fn flags_with_live_holders_are_skipped() {
    let h = harness();
    h.flags.create("f:[1]").await.unwrap();
    let _held = h.locks.try_acquire("f:[1]").await.unwrap().unwrap();

    let report = h.dispatcher.sweep().await.unwrap();

    assert_eq!(report.busy, 1);
    assert!(report.resubmitted.is_empty());
    assert!(h.broker.published().is_empty());
    assert!(h.flags.contains("f:[1]"));
}

#[tokio::test]
async fn unresolvable_flags_are_left_for_inspection() {
    let h = harness();
    h.flags.create("renamed.task:[1]").await.unwrap();
    h.flags.create("f:not json").await.unwrap();

    let report = h.dispatcher.sweep().await.unwrap();

    assert_eq!(report.unresolved.len(), 2);
    assert!(report.resubmitted.is_empty());
    assert!(h.broker.published().is_empty());
    assert!(h.flags.contains("renamed.task:[1]"));
    assert!(h.flags.contains("f:not json"));
}

#[tokio::test]
async fn sweep_task_runs_through_the_lazy_executor() {
    let h = harness();
    assert!(h.dispatcher.registry().contains(SWEEP_TASK));
    h.flags.create("f").await.unwrap();

    let execution = h
        .dispatcher
        .run_sweep(DispatchContext::autocommit())
        .await
        .unwrap();

    let Execution::Completed { result, cycles } = execution else {
        panic!("expected the sweep to run here, got {execution:?}");
    };
    assert_eq!(cycles, 1);
    assert_eq!(result["resubmitted"], json!(["f"]));
    assert_eq!(h.broker.published().len(), 1);
}

#[tokio::test]
async fn concurrent_sweep_triggers_coalesce() {
    let h = harness();
    let _running = h.locks.try_acquire(SWEEP_TASK).await.unwrap().unwrap();

    let execution = h
        .dispatcher
        .run_sweep(DispatchContext::autocommit())
        .await
        .unwrap();

    assert_eq!(execution, Execution::Deferred);
    assert!(h.flags.contains(SWEEP_TASK));
}

#[tokio::test]
async fn sweep_loop_ticks_until_shutdown() {
    let h = harness();
    h.flags.create("f:[9]").await.unwrap();

    let sweep = Arc::new(
        SweepLoop::new(Arc::clone(&h.dispatcher), Duration::from_millis(10)).unwrap(),
    );
    let running = {
        let sweep = Arc::clone(&sweep);
        tokio::spawn(async move { sweep.run().await })
    };

    let mut delivered = false;
    for _ in 0..100 {
        if !h.broker.published().is_empty() {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    sweep.shutdown();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();

    assert!(delivered);
    assert_eq!(h.broker.published()[0].message.args, vec![json!(9)]);
}

#[test]
fn sweep_loop_rejects_zero_interval() {
    let h = harness();
    let err = SweepLoop::new(Arc::clone(&h.dispatcher), Duration::ZERO)
        .err()
        .unwrap();
    assert!(matches!(err, Error::Config(_)));
}
