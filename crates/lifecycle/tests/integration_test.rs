//! Lifecycle client behaviour against the mock ledger gateway.

use std::time::Duration;

use gaia_ledger_gateway::{TaskId, TaskStatusRecord};
use gaia_ledger_gateway_mock::{ConfirmationBehavior, DEFAULT_OPERATOR, Error, MockLedgerGateway};
use gaia_lifecycle::{
    Error as LifecycleError, LifecycleClient, LifecycleClientOptions, NodeLifecycleState,
};
use tokio::time::{advance, sleep};

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn options() -> LifecycleClientOptions {
    LifecycleClientOptions {
        confirmation_timeout: Duration::from_secs(10),
        poll_interval: Duration::from_millis(500),
        retry_backoff: Duration::from_millis(100),
        ..LifecycleClientOptions::default()
    }
}

fn client(gateway: &MockLedgerGateway) -> LifecycleClient<MockLedgerGateway> {
    LifecycleClient::new(gateway.clone(), options())
}

#[tokio::test(start_paused = true)]
async fn test_start_then_status_reports_running() {
    init_logging();

    let gateway = MockLedgerGateway::new();
    gateway.set_next_task_id(7).await;
    let client = client(&gateway);

    let task_id = client.start_node("testnet", "data/gaia/node1").await.unwrap();
    assert_eq!(task_id, TaskId::new(7));

    let status = client.get_status(task_id).await.unwrap();
    assert_eq!(
        status,
        NodeLifecycleState::Running {
            uptime_seconds: 0,
            operator: DEFAULT_OPERATOR.to_string(),
        }
    );
    assert!(status.operator().unwrap().starts_with("0xabc"));
    assert_eq!(
        gateway.submitted_starts().await,
        vec![("testnet".to_string(), "data/gaia/node1".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_start_records_starting_without_refresh() {
    let gateway = MockLedgerGateway::new();
    let client = LifecycleClient::new(
        gateway.clone(),
        LifecycleClientOptions {
            refresh_after_start: false,
            ..options()
        },
    );

    let task_id = client.start_node("testnet", "data/gaia/node1").await.unwrap();

    assert_eq!(client.cached_status(task_id), NodeLifecycleState::Starting);
    assert!(client.get_status(task_id).await.unwrap().is_running());
}

#[tokio::test(start_paused = true)]
async fn test_start_rejects_empty_inputs_locally() {
    let gateway = MockLedgerGateway::new();
    let client = client(&gateway);

    let error = client.start_node("", "data/gaia/node1").await.unwrap_err();

    assert!(matches!(error, LifecycleError::Submission(_)));
    assert!(gateway.submitted_starts().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_start_surfaces_gateway_rejection() {
    let gateway = MockLedgerGateway::new();
    gateway
        .reject_next_submission(Error::Rejected("insufficient authorization".to_string()))
        .await;
    let client = client(&gateway);

    let error = client.start_node("testnet", "data/gaia/node1").await.unwrap_err();

    assert!(matches!(
        error,
        LifecycleError::Submission(message) if message.contains("insufficient authorization")
    ));
    assert!(client.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_start_resends_only_unsent_submissions() {
    let gateway = MockLedgerGateway::new();
    gateway
        .reject_next_submission(Error::Unsent("connection refused".to_string()))
        .await;
    let client = client(&gateway);

    let task_id = client.start_node("testnet", "data/gaia/node1").await.unwrap();
    assert_eq!(task_id, TaskId::new(1));

    gateway
        .reject_next_submission(Error::Transport("connection reset".to_string()))
        .await;
    let error = client.start_node("testnet", "data/gaia/node2").await.unwrap_err();

    assert!(matches!(error, LifecycleError::Submission(_)));
    assert_eq!(gateway.submitted_starts().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_revert_leaves_registry_untouched() {
    let gateway = MockLedgerGateway::new();
    gateway
        .script_start(ConfirmationBehavior::Revert("invalid data dir".to_string()))
        .await;
    let client = client(&gateway);

    let error = client.start_node("testnet", "bad").await.unwrap_err();

    assert!(matches!(
        error,
        LifecycleError::OperationReverted(reason) if reason == "invalid data dir"
    ));
    assert!(client.registry().is_empty());
    assert_eq!(client.get_latest_task_id().await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_start_timeout_is_unknown_outcome_and_not_retried() {
    let gateway = MockLedgerGateway::new();
    gateway.script_start(ConfirmationBehavior::Never).await;
    let client = client(&gateway);

    let error = client.start_node("testnet", "data/gaia/node1").await.unwrap_err();

    assert!(error.is_outcome_unknown());
    assert!(matches!(
        error,
        LifecycleError::ConfirmationTimeout { waited, .. } if waited == Duration::from_secs(10)
    ));
    assert_eq!(gateway.submitted_starts().await.len(), 1);
    assert!(client.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_then_status_reports_stopped() {
    let gateway = MockLedgerGateway::new();
    let client = client(&gateway);

    let task_id = client.start_node("testnet", "data/gaia/node1").await.unwrap();
    client.stop_node(task_id).await.unwrap();

    assert_eq!(client.cached_status(task_id), NodeLifecycleState::Stopped);
    assert_eq!(
        client.get_status(task_id).await.unwrap(),
        NodeLifecycleState::Stopped
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_timeout_keeps_ledger_view() {
    init_logging();

    let gateway = MockLedgerGateway::new();
    gateway.set_next_task_id(7).await;
    let client = client(&gateway);

    let task_id = client.start_node("testnet", "data/gaia/node1").await.unwrap();
    gateway.script_stop(ConfirmationBehavior::Never).await;

    let error = client.stop_node(task_id).await.unwrap_err();

    assert!(matches!(error, LifecycleError::ConfirmationTimeout { .. }));
    assert!(client.cached_status(task_id).is_running());
    assert!(client.get_status(task_id).await.unwrap().is_running());
    assert_eq!(gateway.submitted_stops().await, vec![task_id]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_submitted_for_uncached_task() {
    let gateway = MockLedgerGateway::new();
    gateway
        .insert_task(
            TaskId::new(3),
            TaskStatusRecord {
                exists: true,
                is_running: true,
                uptime_seconds: 120,
                operator: DEFAULT_OPERATOR.to_string(),
            },
        )
        .await;
    let client = client(&gateway);

    assert_eq!(client.cached_status(TaskId::new(3)), NodeLifecycleState::Unknown);
    client.stop_node(TaskId::new(3)).await.unwrap();

    assert_eq!(client.cached_status(TaskId::new(3)), NodeLifecycleState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_stop_of_missing_task_is_unknown_task() {
    let gateway = MockLedgerGateway::new();
    let client = client(&gateway);

    let error = client.stop_node(TaskId::new(99)).await.unwrap_err();

    assert!(matches!(
        error,
        LifecycleError::UnknownTask(task_id) if task_id == TaskId::new(99)
    ));
    assert_eq!(client.cached_status(TaskId::new(99)), NodeLifecycleState::Unknown);
}

#[tokio::test(start_paused = true)]
async fn test_stop_of_foreign_task_is_unknown_task() {
    let gateway = MockLedgerGateway::new();
    gateway
        .insert_task(
            TaskId::new(4),
            TaskStatusRecord {
                exists: true,
                is_running: true,
                uptime_seconds: 10,
                operator: "0xdef0000000000000000000000000000000000002".to_string(),
            },
        )
        .await;
    let client = client(&gateway);
    client.get_status(TaskId::new(4)).await.unwrap();

    let error = client.stop_node(TaskId::new(4)).await.unwrap_err();

    assert!(matches!(error, LifecycleError::UnknownTask(_)));
    assert!(client.cached_status(TaskId::new(4)).is_running());
}

#[tokio::test(start_paused = true)]
async fn test_stop_revert_of_own_task_keeps_reason() {
    let gateway = MockLedgerGateway::new();
    let client = client(&gateway);
    let task_id = client.start_node("testnet", "data/gaia/node1").await.unwrap();
    gateway
        .script_stop(ConfirmationBehavior::Revert("node busy".to_string()))
        .await;

    let error = client.stop_node(task_id).await.unwrap_err();

    assert!(matches!(
        error,
        LifecycleError::OperationReverted(reason) if reason == "node busy"
    ));
    assert!(client.cached_status(task_id).is_running());
}

#[tokio::test(start_paused = true)]
async fn test_status_of_missing_task_is_unknown_task() {
    let gateway = MockLedgerGateway::new();
    let client = client(&gateway);

    let error = client.get_status(TaskId::new(5)).await.unwrap_err();

    assert!(matches!(
        error,
        LifecycleError::UnknownTask(task_id) if task_id == TaskId::new(5)
    ));
    assert!(client.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_status_retries_transport_failures() {
    let gateway = MockLedgerGateway::new();
    let client = client(&gateway);
    let task_id = client.start_node("testnet", "data/gaia/node1").await.unwrap();
    gateway.set_uptime(task_id, 30).await;
    gateway.fail_next_queries(2).await;

    let status = client.get_status(task_id).await.unwrap();
    assert_eq!(status.uptime_seconds(), Some(30));

    gateway.fail_next_queries(3).await;
    let error = client.get_status(task_id).await.unwrap_err();
    assert!(matches!(error, LifecycleError::Transport(_)));
}

#[tokio::test(start_paused = true)]
async fn test_status_picks_up_external_stop() {
    let gateway = MockLedgerGateway::new();
    let client = client(&gateway);
    let task_id = client.start_node("testnet", "data/gaia/node1").await.unwrap();

    gateway.set_uptime(task_id, 45).await;
    gateway.set_running(task_id, false).await;

    assert_eq!(
        client.get_status(task_id).await.unwrap(),
        NodeLifecycleState::Stopped
    );
}

#[tokio::test(start_paused = true)]
async fn test_latest_task_id_is_idempotent() {
    let gateway = MockLedgerGateway::new();
    let client = client(&gateway);

    assert_eq!(client.get_latest_task_id().await.unwrap(), None);

    let task_id = client.start_node("testnet", "data/gaia/node1").await.unwrap();
    let first = client.get_latest_task_id().await.unwrap();
    let second = client.get_latest_task_id().await.unwrap();

    assert_eq!(first, Some(task_id));
    assert_eq!(first, second);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_starts_get_distinct_tasks() {
    let gateway = MockLedgerGateway::new();
    gateway.set_next_task_id(5).await;
    gateway.set_default_behavior(ConfirmationBehavior::AfterPolls(1)).await;
    let client = client(&gateway);

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.start_node("testnet", "data/gaia/node1").await }
    });
    let second = tokio::spawn({
        let client = client.clone();
        async move { client.start_node("testnet", "data/gaia/node2").await }
    });

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_ne!(first, second);
    let mut assigned = vec![first.get(), second.get()];
    assigned.sort_unstable();
    assert_eq!(assigned, vec![5, 6]);

    let snapshot = client.registry().snapshot();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.iter().all(|(_, state)| state.is_running()));
}

#[tokio::test(start_paused = true)]
async fn test_task_reaches_running_only_through_starting() {
    let gateway = MockLedgerGateway::new();
    gateway.script_start(ConfirmationBehavior::AfterPolls(2)).await;
    let client = LifecycleClient::new(
        gateway.clone(),
        LifecycleClientOptions {
            refresh_after_start: false,
            ..options()
        },
    );

    let task_id = client.start_node("testnet", "data/gaia/node1").await.unwrap();
    let starting = client.registry().entry(task_id).unwrap();
    assert_eq!(starting.state, NodeLifecycleState::Starting);

    let running = client.get_status(task_id).await.unwrap();
    let entry = client.registry().entry(task_id).unwrap();

    assert!(running.is_running());
    assert_eq!(entry.revision, starting.revision + 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_without_task_id_is_malformed() {
    let gateway = MockLedgerGateway::new();
    gateway.script_start(ConfirmationBehavior::WithoutTaskId).await;
    let client = client(&gateway);

    let error = client.start_node("testnet", "data/gaia/node1").await.unwrap_err();

    assert!(matches!(error, LifecycleError::MalformedResult(_)));
    assert!(client.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_start_fails_after_grace_and_recovers_when_running() {
    let gateway = MockLedgerGateway::new();
    let client = LifecycleClient::new(
        gateway.clone(),
        LifecycleClientOptions {
            refresh_after_start: false,
            ..options()
        },
    );

    let task_id = client.start_node("testnet", "data/gaia/node1").await.unwrap();
    gateway.set_running(task_id, false).await;

    assert_eq!(
        client.get_status(task_id).await.unwrap(),
        NodeLifecycleState::Starting
    );

    advance(Duration::from_secs(301)).await;
    assert_eq!(
        client.get_status(task_id).await.unwrap(),
        NodeLifecycleState::Failed
    );

    gateway.set_uptime(task_id, 12).await;
    gateway.set_running(task_id, true).await;
    let status = client.get_status(task_id).await.unwrap();

    assert!(status.is_running());
    assert_eq!(status.uptime_seconds(), Some(12));
}

#[tokio::test(start_paused = true)]
async fn test_other_client_sees_stopped_task_as_stopped() {
    let gateway = MockLedgerGateway::new();
    let first = client(&gateway);
    let second = client(&gateway);

    let task_id = first.start_node("testnet", "data/gaia/node1").await.unwrap();
    first.stop_node(task_id).await.unwrap();

    assert_eq!(
        first.get_status(task_id).await.unwrap(),
        NodeLifecycleState::Stopped
    );
    assert_eq!(
        second.get_status(task_id).await.unwrap(),
        NodeLifecycleState::Stopped
    );
}

#[tokio::test(start_paused = true)]
async fn test_status_refresh_during_stop_ends_stopped() {
    init_logging();

    let gateway = MockLedgerGateway::new();
    let client = client(&gateway);
    let task_id = client.start_node("testnet", "data/gaia/node1").await.unwrap();
    gateway.script_stop(ConfirmationBehavior::AfterPolls(3)).await;

    let stop = tokio::spawn({
        let client = client.clone();
        async move { client.stop_node(task_id).await }
    });

    // Two polls in, the stop is still pending on the ledger
    sleep(Duration::from_millis(600)).await;
    assert_eq!(gateway.submitted_stops().await, vec![task_id]);
    assert!(client.get_status(task_id).await.unwrap().is_running());

    stop.await.unwrap().unwrap();

    assert_eq!(client.cached_status(task_id), NodeLifecycleState::Stopped);
    assert_eq!(
        client.get_status(task_id).await.unwrap(),
        NodeLifecycleState::Stopped
    );
}
