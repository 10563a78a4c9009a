//! Registry, publisher and message handling through the dispatcher.

use lazy_dispatch::dispatch::memory::{MemoryBroker, MemoryFlags, MemoryLocks};
use lazy_dispatch::dispatch::{
    DispatchSettings, Dispatcher, DispatcherBuilder, Execution, PublishOptions, RouteOverrides,
    SWEEP_TASK, TaskArgs, TaskSpec,
};
use lazy_dispatch::error::{Error, TaskError};
use lazy_dispatch::model::{ExchangeKind, Kwargs, TaskMessage};
use serde_json::{Map, Value, json};
use std::sync::Arc;

fn builder(broker: &MemoryBroker) -> DispatcherBuilder {
    Dispatcher::builder(
        Arc::new(MemoryLocks::new()),
        Arc::new(MemoryFlags::new()),
        Arc::new(broker.clone()),
    )
}

/// Echoes its arguments back.
fn echo(name: &str) -> TaskSpec {
    TaskSpec::new(name, |args: TaskArgs| async move {
        Ok::<_, TaskError>(json!({"args": args.args, "kwargs": args.kwargs}))
    })
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

#[tokio::test]
async fn apply_async_builds_core_message_on_default_queue() {
    let broker = MemoryBroker::new();
    let dispatcher = builder(&broker).task(echo("f")).build().unwrap();

    let mut kwargs = Kwargs::new();
    kwargs.insert("force".to_string(), json!(true));
    let published = dispatcher
        .apply_async("f", vec![json!(1), json!("a")], kwargs, PublishOptions::default())
        .await
        .unwrap();

    assert!(published.delivered);
    assert_eq!(published.queue, "dispatch");
    assert_eq!(published.exchange, ExchangeKind::Direct);
    assert!(uuid::Uuid::parse_str(&published.message.id).is_ok());

    let value = published.message.to_json();
    assert_eq!(value["task"], "f");
    assert_eq!(value["args"], json!([1, "a"]));
    assert_eq!(value["kwargs"], json!({"force": true}));

    let deliveries = broker.published();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].message, published.message);
}

#[tokio::test]
async fn apply_async_options_override_queue_id_and_merge_extras() {
    let broker = MemoryBroker::new();
    let dispatcher = builder(&broker)
        .task(echo("f").queue("static"))
        .build()
        .unwrap();

    let mut extra = Map::new();
    extra.insert("expires".to_string(), json!(60));
    extra.insert("task".to_string(), json!("hijacked"));
    let options = PublishOptions {
        queue: Some("urgent".to_string()),
        id: Some("fixed-id".to_string()),
        extra,
    };
    let published = dispatcher
        .apply_async("f", vec![], Kwargs::new(), options)
        .await
        .unwrap();

    assert_eq!(published.queue, "urgent");
    assert_eq!(published.message.id, "fixed-id");
    assert_eq!(published.message.task, "f");
    assert_eq!(published.message.extra.get("expires"), Some(&json!(60)));
    assert!(!published.message.extra.contains_key("task"));
}

#[tokio::test]
async fn bypass_mode_skips_broker_but_returns_descriptor() {
    let broker = MemoryBroker::new();
    let settings = DispatchSettings {
        bypass_broker: true,
        ..DispatchSettings::default()
    };
    let dispatcher = builder(&broker)
        .settings(settings)
        .task(echo("f"))
        .build()
        .unwrap();

    let published = dispatcher
        .apply_async("f", vec![json!(1)], Kwargs::new(), PublishOptions::default())
        .await
        .unwrap();

    assert!(!published.delivered);
    assert_eq!(published.message.args, vec![json!(1)]);
    assert!(dispatcher.publisher().is_bypassed());
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn computed_and_broadcast_routes_are_honored() {
    let broker = MemoryBroker::new();
    let dispatcher = builder(&broker)
        .task(echo("per_host").computed_queue(|args| {
            format!("host_{}", args.first().and_then(Value::as_str).unwrap_or("any"))
        }))
        .task(echo("settings_changed").queue("tower_broadcast_all").broadcast())
        .build()
        .unwrap();

    dispatcher
        .apply_async("per_host", vec![json!("node1")], Kwargs::new(), PublishOptions::default())
        .await
        .unwrap();
    dispatcher
        .apply_async("settings_changed", vec![], Kwargs::new(), PublishOptions::default())
        .await
        .unwrap();

    let deliveries = broker.published();
    assert_eq!(deliveries[0].queue, "host_node1");
    assert_eq!(deliveries[0].exchange, ExchangeKind::Direct);
    assert_eq!(deliveries[1].queue, "tower_broadcast_all");
    assert_eq!(deliveries[1].exchange, ExchangeKind::Broadcast);
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[test]
fn builder_rejects_reserved_and_invalid_names() {
    let broker = MemoryBroker::new();
    assert!(builder(&broker).task(echo(SWEEP_TASK)).build().is_err());
    assert!(builder(&broker).task(echo("a:b")).build().is_err());
    assert!(
        builder(&broker)
            .task(echo("f"))
            .task(echo("f"))
            .build()
            .is_err()
    );
}

#[tokio::test]
async fn route_overrides_pin_queues_including_the_sweep() {
    let broker = MemoryBroker::new();
    let overrides = RouteOverrides::from_toml(&format!(
        "[routes]\nf = \"slow\"\n\"{SWEEP_TASK}\" = \"maintenance\"\n"
    ))
    .unwrap();
    let dispatcher = builder(&broker)
        .task(echo("f"))
        .route_overrides(overrides)
        .build()
        .unwrap();

    let f = dispatcher
        .apply_async("f", vec![], Kwargs::new(), PublishOptions::default())
        .await
        .unwrap();
    let sweep = dispatcher
        .apply_async(SWEEP_TASK, vec![], Kwargs::new(), PublishOptions::default())
        .await
        .unwrap();
    assert_eq!(f.queue, "slow");
    assert_eq!(sweep.queue, "maintenance");
}

#[test]
fn route_overrides_for_unknown_tasks_fail_the_build() {
    let broker = MemoryBroker::new();
    let overrides = RouteOverrides::from_toml("[routes]\nghost = \"q\"\n").unwrap();
    let err = builder(&broker)
        .task(echo("f"))
        .route_overrides(overrides)
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

// ---------------------------------------------------------------------------
// Message handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handle_message_runs_task_with_args_and_kwargs() {
    let broker = MemoryBroker::new();
    let dispatcher = builder(&broker).task(echo("f")).build().unwrap();

    let message = TaskMessage::from_json(json!({
        "id": "m1",
        "task": "f",
        "args": [42],
        "kwargs": {"verbose": true},
        "time_limit": 30
    }))
    .unwrap();
    let execution = dispatcher.handle_message(message).await.unwrap();

    assert_eq!(
        execution,
        Execution::Completed {
            result: json!({"args": [42], "kwargs": {"verbose": true}}),
            cycles: 1
        }
    );
}

#[tokio::test]
async fn handle_message_for_unknown_task_fails() {
    let broker = MemoryBroker::new();
    let dispatcher = builder(&broker).build().unwrap();

    let err = dispatcher
        .handle_message(TaskMessage::new("not.registered", vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownTask(_)));
}
