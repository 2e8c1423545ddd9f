use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use gaia_ledger_gateway::{
    LedgerGateway, LedgerGatewayError, LedgerGatewayErrorKind, PendingHandle, TaskId,
    TaskStatusRecord,
};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::registry::{TaskEntry, TaskRegistry};
use crate::waiter::{ConfirmationWaiter, WaitOutcome};
use crate::{Error, NodeLifecycleState, OperationKind, PendingOperation};

/// Tunables for the lifecycle client.
#[derive(Clone, Debug)]
pub struct LifecycleClientOptions {
    /// How long to wait for a mutation to reach a terminal state.
    pub confirmation_timeout: Duration,

    /// How often to poll for confirmation.
    pub poll_interval: Duration,

    /// Extra attempts for read-only queries that fail on transport.
    pub query_retries: u32,

    /// Whether to read a task's status right after its start commits.
    pub refresh_after_start: bool,

    /// Pause between retries.
    pub retry_backoff: Duration,

    /// How long a started task may report not running before it is considered failed.
    pub start_grace: Duration,

    /// Extra attempts for submissions the gateway reports were never sent.
    pub submission_retries: u32,
}

impl Default for LifecycleClientOptions {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
            query_retries: 2,
            refresh_after_start: true,
            retry_backoff: Duration::from_millis(250),
            start_grace: Duration::from_secs(300),
            submission_retries: 1,
        }
    }
}

/// Drives node lifecycle operations against a ledger gateway and keeps a cache of task states.
#[derive(Clone, Debug)]
pub struct LifecycleClient<G>
where
    G: LedgerGateway,
{
    gateway: G,
    options: LifecycleClientOptions,
    registry: TaskRegistry,
    sequence: Arc<AtomicU64>,
    waiter: ConfirmationWaiter,
}

impl<G> LifecycleClient<G>
where
    G: LedgerGateway,
{
    /// Creates a client over the given gateway.
    pub fn new(gateway: G, options: LifecycleClientOptions) -> Self {
        let waiter = ConfirmationWaiter::new(options.poll_interval);

        Self {
            gateway,
            options,
            registry: TaskRegistry::new(),
            sequence: Arc::new(AtomicU64::new(0)),
            waiter,
        }
    }

    /// The underlying gateway.
    pub const fn gateway(&self) -> &G {
        &self.gateway
    }

    /// The task state cache.
    pub const fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Starts a node and returns the task id the ledger assigned to it.
    ///
    /// # Errors
    ///
    /// - `Submission` if the inputs are empty or the gateway refuses the request
    /// - `ConfirmationTimeout` if the start is not confirmed in time (outcome unknown)
    /// - `OperationReverted` if the ledger rejects the start
    /// - `MalformedResult` if the committed start carries no task id
    pub async fn start_node(&self, network: &str, data_dir: &str) -> Result<TaskId, Error> {
        if network.trim().is_empty() || data_dir.trim().is_empty() {
            return Err(Error::Submission(
                "network and data directory must not be empty".to_string(),
            ));
        }

        let operation = self
            .submit(OperationKind::Start, None, || {
                self.gateway.submit_start(network, data_dir)
            })
            .await
            .map_err(|e| Error::Submission(e.to_string()))?;

        info!(
            "submitted start #{} of node on {network} at {data_dir} as {}",
            operation.sequence, operation.handle
        );

        let outcome = self
            .waiter
            .wait(&self.gateway, &operation, self.options.confirmation_timeout)
            .await
            .map_err(|e| Error::from_gateway(&e, None))?;

        let result = match outcome {
            WaitOutcome::Committed(result) => result,
            WaitOutcome::Reverted(reason) => return Err(Error::OperationReverted(reason)),
            WaitOutcome::TimedOut => return Err(self.timeout_error(&operation)),
        };

        let task_id = result.task_id.ok_or_else(|| {
            Error::MalformedResult(format!(
                "start {} committed without a task id",
                operation.handle
            ))
        })?;

        self.registry.record(task_id, NodeLifecycleState::Starting);
        info!("task {task_id} created by start {}", operation.handle);

        if self.options.refresh_after_start {
            if let Err(e) = self.get_status(task_id).await {
                warn!("failed to refresh status of new task {task_id}: {e}");
            }
        }

        Ok(task_id)
    }

    /// Stops a task.
    ///
    /// The request is submitted whatever the cached state of the task is, since
    /// the ledger and not the cache decides whether it applies.
    ///
    /// # Errors
    ///
    /// - `UnknownTask` if the ledger has no such task or it belongs to another identity
    /// - `Submission` if the gateway refuses the request
    /// - `ConfirmationTimeout` if the stop is not confirmed in time (outcome unknown)
    /// - `OperationReverted` if the ledger rejects the stop
    pub async fn stop_node(&self, task_id: TaskId) -> Result<(), Error> {
        let operation = match self
            .submit(OperationKind::Stop, Some(task_id), || {
                self.gateway.submit_stop(task_id)
            })
            .await
        {
            Ok(operation) => operation,
            Err(e) if e.kind() == LedgerGatewayErrorKind::UnknownTask => {
                return Err(Error::UnknownTask(task_id));
            }
            Err(e) => {
                return Err(self
                    .explain_stop_failure(task_id, Error::Submission(e.to_string()))
                    .await);
            }
        };

        info!(
            "submitted stop #{} of task {task_id} as {}",
            operation.sequence, operation.handle
        );

        let previous = self.registry.entry(task_id);
        let marker = self.registry.record(task_id, NodeLifecycleState::Stopping);
        let marker_revision =
            (marker.state == NodeLifecycleState::Stopping).then_some(marker.revision);

        let outcome = match self
            .waiter
            .wait(&self.gateway, &operation, self.options.confirmation_timeout)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.roll_back(task_id, marker_revision, previous);
                return Err(Error::from_gateway(&e, Some(task_id)));
            }
        };

        match outcome {
            WaitOutcome::Committed(_) => {
                self.registry.record(task_id, NodeLifecycleState::Stopped);
                info!("task {task_id} stopped by {}", operation.handle);
                Ok(())
            }
            WaitOutcome::Reverted(reason) => {
                self.roll_back(task_id, marker_revision, previous);
                Err(self
                    .explain_stop_failure(task_id, Error::OperationReverted(reason))
                    .await)
            }
            WaitOutcome::TimedOut => {
                self.roll_back(task_id, marker_revision, previous);
                Err(self.timeout_error(&operation))
            }
        }
    }

    /// Returns the highest task id the ledger ever assigned, or `None` if no task was started.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the gateway stays unreachable after retries.
    pub async fn get_latest_task_id(&self) -> Result<Option<TaskId>, Error> {
        self.query(|| self.gateway.query_latest_task_id())
            .await
            .map_err(|e| Error::from_gateway(&e, None))
    }

    /// Reads a task's state from the ledger and refreshes the cache with it.
    ///
    /// # Errors
    ///
    /// - `UnknownTask` if the ledger has no record of the task
    /// - `Transport` if the gateway stays unreachable after retries
    pub async fn get_status(&self, task_id: TaskId) -> Result<NodeLifecycleState, Error> {
        let record = self
            .query(|| self.gateway.query_status(task_id))
            .await
            .map_err(|e| Error::from_gateway(&e, Some(task_id)))?;

        if !record.exists {
            return Err(Error::UnknownTask(task_id));
        }

        let start_grace = self.options.start_grace;
        let entry = self.registry.update_with(task_id, |current| {
            observed_state(&record, current, start_grace)
        });
        debug!("task {task_id} is {}", entry.state);

        Ok(entry.state)
    }

    /// The cached state of a task without asking the ledger.
    #[must_use]
    pub fn cached_status(&self, task_id: TaskId) -> NodeLifecycleState {
        self.registry.get(task_id)
    }

    async fn submit<F, Fut>(
        &self,
        kind: OperationKind,
        task_id: Option<TaskId>,
        submit: F,
    ) -> Result<PendingOperation, G::Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<PendingHandle, G::Error>>,
    {
        let mut attempt = 0;

        loop {
            match submit().await {
                Ok(handle) => {
                    let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
                    return Ok(PendingOperation::new(kind, task_id, handle, sequence));
                }
                Err(e)
                    if e.kind() == LedgerGatewayErrorKind::Unsent
                        && attempt < self.options.submission_retries =>
                {
                    attempt += 1;
                    warn!("{kind} request was not sent ({e}), resending");
                    sleep(self.options.retry_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn query<T, F, Fut>(&self, query: F) -> Result<T, G::Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, G::Error>>,
    {
        let mut attempt = 0;

        loop {
            match query().await {
                Ok(value) => return Ok(value),
                Err(e)
                    if matches!(
                        e.kind(),
                        LedgerGatewayErrorKind::Transport | LedgerGatewayErrorKind::Unsent
                    ) && attempt < self.options.query_retries =>
                {
                    attempt += 1;
                    warn!("ledger query failed ({e}), retrying");
                    sleep(self.options.retry_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Turns a failed stop into `UnknownTask` when the ledger says the task is not ours to stop.
    async fn explain_stop_failure(&self, task_id: TaskId, fallback: Error) -> Error {
        match self.query(|| self.gateway.query_status(task_id)).await {
            Ok(record) if !record.exists => Error::UnknownTask(task_id),
            Ok(record) if !record.operator.eq_ignore_ascii_case(&self.gateway.identity()) => {
                warn!(
                    "task {task_id} is operated by {}, not {}",
                    record.operator,
                    self.gateway.identity()
                );
                Error::UnknownTask(task_id)
            }
            Ok(_) => fallback,
            Err(e) => {
                warn!("failed to check task {task_id} after failed stop: {e}");
                fallback
            }
        }
    }

    fn roll_back(
        &self,
        task_id: TaskId,
        marker_revision: Option<u64>,
        previous: Option<TaskEntry>,
    ) {
        if let Some(revision) = marker_revision {
            if !self.registry.restore(task_id, revision, previous) {
                debug!("task {task_id} changed while stopping, keeping newer state");
            }
        }
    }

    fn timeout_error(&self, operation: &PendingOperation) -> Error {
        Error::ConfirmationTimeout {
            handle: operation.handle.clone(),
            kind: operation.kind,
            waited: self.options.confirmation_timeout,
        }
    }
}

/// Maps a ledger record onto a lifecycle state given what the cache held before.
fn observed_state(
    record: &TaskStatusRecord,
    current: Option<&TaskEntry>,
    start_grace: Duration,
) -> NodeLifecycleState {
    if record.is_running {
        return NodeLifecycleState::Running {
            uptime_seconds: record.uptime_seconds,
            operator: record.operator.clone(),
        };
    }

    match current.map(|entry| (&entry.state, entry.since)) {
        Some((NodeLifecycleState::Starting, since)) if since.elapsed() < start_grace => {
            NodeLifecycleState::Starting
        }
        Some((NodeLifecycleState::Starting | NodeLifecycleState::Failed, _)) => {
            NodeLifecycleState::Failed
        }
        _ => NodeLifecycleState::Stopped,
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::{Instant, advance};

    use super::*;

    fn record(is_running: bool, uptime_seconds: u64) -> TaskStatusRecord {
        TaskStatusRecord {
            exists: true,
            is_running,
            uptime_seconds,
            operator: "0xabc".to_string(),
        }
    }

    fn entry(state: NodeLifecycleState) -> TaskEntry {
        TaskEntry {
            revision: 1,
            since: Instant::now(),
            state,
        }
    }

    #[test]
    fn test_running_record_maps_to_running() {
        let state = observed_state(&record(true, 42), None, Duration::from_secs(1));

        assert_eq!(state.uptime_seconds(), Some(42));
        assert_eq!(state.operator(), Some("0xabc"));
    }

    #[test]
    fn test_idle_record_for_unseen_task_is_stopped() {
        let grace = Duration::from_secs(1);

        assert_eq!(
            observed_state(&record(false, 0), None, grace),
            NodeLifecycleState::Stopped
        );
        assert_eq!(
            observed_state(&record(false, 30), None, grace),
            NodeLifecycleState::Stopped
        );
    }

    #[test]
    fn test_idle_record_after_running_is_stopped() {
        let current = entry(NodeLifecycleState::Running {
            uptime_seconds: 3,
            operator: "0xabc".to_string(),
        });

        assert_eq!(
            observed_state(&record(false, 3), Some(&current), Duration::from_secs(1)),
            NodeLifecycleState::Stopped
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_starting_task_fails_after_grace() {
        let grace = Duration::from_secs(60);
        let current = entry(NodeLifecycleState::Starting);

        assert_eq!(
            observed_state(&record(false, 0), Some(&current), grace),
            NodeLifecycleState::Starting
        );

        advance(Duration::from_secs(61)).await;

        assert_eq!(
            observed_state(&record(false, 0), Some(&current), grace),
            NodeLifecycleState::Failed
        );
    }

    #[test]
    fn test_failed_task_reported_running_is_running() {
        let current = entry(NodeLifecycleState::Failed);

        let state = observed_state(&record(true, 7), Some(&current), Duration::from_secs(1));

        assert_eq!(state.uptime_seconds(), Some(7));
    }
}
