//! A mock implementation of the ledger gateway.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use gaia_ledger_gateway::{
    CommitResult, Confirmation, LedgerGateway, PendingHandle, TaskId, TaskStatusRecord,
};
use tokio::sync::Mutex;
use tracing::debug;

/// Operator address the mock uses unless told otherwise.
pub const DEFAULT_OPERATOR: &str = "0xabc0000000000000000000000000000000000001";

/// How the mock ledger confirms a submitted operation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum ConfirmationBehavior {
    /// Commits on the first poll.
    #[default]
    Immediate,

    /// Reports pending for the given number of polls, then commits.
    AfterPolls(u32),

    /// Stays pending forever.
    Never,

    /// Reverts with the given reason on the first poll.
    Revert(String),

    /// Commits on the first poll but reports no task id in the result.
    WithoutTaskId,
}

#[derive(Clone, Debug)]
enum Mutation {
    Start { network: String, data_dir: String },
    Stop(TaskId),
}

#[derive(Debug)]
struct Operation {
    behavior: ConfirmationBehavior,
    mutation: Mutation,
    outcome: Option<Confirmation>,
    polls: u32,
}

#[derive(Debug)]
struct State {
    default_behavior: ConfirmationBehavior,
    latest_task_id: Option<TaskId>,
    next_handle: u64,
    next_task_id: u32,
    operations: HashMap<PendingHandle, Operation>,
    pending_poll_failures: u32,
    pending_query_failures: u32,
    pending_rejections: VecDeque<Error>,
    scripted_starts: VecDeque<ConfirmationBehavior>,
    scripted_stops: VecDeque<ConfirmationBehavior>,
    submitted_starts: Vec<(String, String)>,
    submitted_stops: Vec<TaskId>,
    tasks: HashMap<TaskId, TaskStatusRecord>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            default_behavior: ConfirmationBehavior::Immediate,
            latest_task_id: None,
            next_handle: 1,
            next_task_id: 1,
            operations: HashMap::new(),
            pending_poll_failures: 0,
            pending_query_failures: 0,
            pending_rejections: VecDeque::new(),
            scripted_starts: VecDeque::new(),
            scripted_stops: VecDeque::new(),
            submitted_starts: Vec::new(),
            submitted_stops: Vec::new(),
            tasks: HashMap::new(),
        }
    }
}

impl State {
    fn take_rejection(&mut self) -> Result<(), Error> {
        self.pending_rejections.pop_front().map_or(Ok(()), Err)
    }

    fn register(&mut self, mutation: Mutation, behavior: ConfirmationBehavior) -> PendingHandle {
        let handle = PendingHandle::new(format!("0x{:064x}", self.next_handle));
        self.next_handle += 1;

        self.operations.insert(
            handle.clone(),
            Operation {
                behavior,
                mutation,
                outcome: None,
                polls: 0,
            },
        );

        handle
    }

    fn apply(&mut self, mutation: &Mutation, operator: &str) -> Confirmation {
        match mutation {
            Mutation::Start { network, data_dir } => {
                let task_id = TaskId::new(self.next_task_id);
                self.next_task_id += 1;
                self.latest_task_id = Some(task_id);
                self.tasks.insert(
                    task_id,
                    TaskStatusRecord {
                        exists: true,
                        is_running: true,
                        uptime_seconds: 0,
                        operator: operator.to_string(),
                    },
                );
                debug!("mock ledger started task {task_id} on {network} at {data_dir}");

                Confirmation::Committed(CommitResult {
                    block_number: Some(self.next_handle),
                    task_id: Some(task_id),
                })
            }
            Mutation::Stop(task_id) => match self.tasks.get_mut(task_id) {
                None => Confirmation::Reverted(format!("task {task_id} does not exist")),
                Some(record) if !record.operator.eq_ignore_ascii_case(operator) => {
                    Confirmation::Reverted(format!("caller is not the operator of task {task_id}"))
                }
                Some(record) => {
                    record.is_running = false;
                    debug!("mock ledger stopped task {task_id}");

                    Confirmation::Committed(CommitResult {
                        block_number: Some(self.next_handle),
                        task_id: None,
                    })
                }
            },
        }
    }
}

/// A scriptable in-memory ledger implementing `LedgerGateway`. Used for testing.
#[derive(Clone, Debug)]
pub struct MockLedgerGateway {
    operator: String,
    state: Arc<Mutex<State>>,
}

impl Default for MockLedgerGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedgerGateway {
    /// Creates a mock ledger submitting as `DEFAULT_OPERATOR`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_operator(DEFAULT_OPERATOR)
    }

    /// Creates a mock ledger submitting as the given identity.
    #[must_use]
    pub fn with_operator(operator: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Sets the id the next committed start will be assigned.
    pub async fn set_next_task_id(&self, task_id: u32) {
        self.state.lock().await.next_task_id = task_id;
    }

    /// Sets how operations are confirmed when nothing more specific was scripted.
    pub async fn set_default_behavior(&self, behavior: ConfirmationBehavior) {
        self.state.lock().await.default_behavior = behavior;
    }

    /// Scripts the confirmation behavior of the next submitted start.
    pub async fn script_start(&self, behavior: ConfirmationBehavior) {
        self.state.lock().await.scripted_starts.push_back(behavior);
    }

    /// Scripts the confirmation behavior of the next submitted stop.
    pub async fn script_stop(&self, behavior: ConfirmationBehavior) {
        self.state.lock().await.scripted_stops.push_back(behavior);
    }

    /// Makes the next submission fail with the given error.
    pub async fn reject_next_submission(&self, error: Error) {
        self.state.lock().await.pending_rejections.push_back(error);
    }

    /// Makes the next `count` status or latest-id queries fail with a transport error.
    pub async fn fail_next_queries(&self, count: u32) {
        self.state.lock().await.pending_query_failures = count;
    }

    /// Makes the next `count` confirmation polls fail with a transport error.
    pub async fn fail_next_polls(&self, count: u32) {
        self.state.lock().await.pending_poll_failures = count;
    }

    /// Records a task directly on the mock ledger, as if another client had created it.
    pub async fn insert_task(&self, task_id: TaskId, record: TaskStatusRecord) {
        let mut state = self.state.lock().await;
        state.tasks.insert(task_id, record);
        if state.latest_task_id.is_none_or(|latest| latest < task_id) {
            state.latest_task_id = Some(task_id);
            state.next_task_id = state.next_task_id.max(task_id.get() + 1);
        }
    }

    /// Updates the recorded uptime of a task.
    pub async fn set_uptime(&self, task_id: TaskId, uptime_seconds: u64) {
        if let Some(record) = self.state.lock().await.tasks.get_mut(&task_id) {
            record.uptime_seconds = uptime_seconds;
        }
    }

    /// Updates the recorded running flag of a task.
    pub async fn set_running(&self, task_id: TaskId, is_running: bool) {
        if let Some(record) = self.state.lock().await.tasks.get_mut(&task_id) {
            record.is_running = is_running;
        }
    }

    /// Every `(network, data_dir)` pair submitted for start so far.
    pub async fn submitted_starts(&self) -> Vec<(String, String)> {
        self.state.lock().await.submitted_starts.clone()
    }

    /// Every task id submitted for stop so far.
    pub async fn submitted_stops(&self) -> Vec<TaskId> {
        self.state.lock().await.submitted_stops.clone()
    }
}

#[async_trait]
impl LedgerGateway for MockLedgerGateway {
    type Error = Error;

    async fn submit_start(
        &self,
        network: &str,
        data_dir: &str,
    ) -> Result<PendingHandle, Self::Error> {
        let mut state = self.state.lock().await;
        state.take_rejection()?;

        state
            .submitted_starts
            .push((network.to_string(), data_dir.to_string()));
        let behavior = state
            .scripted_starts
            .pop_front()
            .unwrap_or_else(|| state.default_behavior.clone());

        Ok(state.register(
            Mutation::Start {
                network: network.to_string(),
                data_dir: data_dir.to_string(),
            },
            behavior,
        ))
    }

    async fn submit_stop(&self, task_id: TaskId) -> Result<PendingHandle, Self::Error> {
        let mut state = self.state.lock().await;
        state.take_rejection()?;

        state.submitted_stops.push(task_id);
        let behavior = state
            .scripted_stops
            .pop_front()
            .unwrap_or_else(|| state.default_behavior.clone());

        Ok(state.register(Mutation::Stop(task_id), behavior))
    }

    async fn poll_confirmation(&self, handle: &PendingHandle) -> Result<Confirmation, Self::Error> {
        let mut state = self.state.lock().await;

        if state.pending_poll_failures > 0 {
            state.pending_poll_failures -= 1;
            return Err(Error::Transport("connection reset while polling".to_string()));
        }

        let operation = state
            .operations
            .get_mut(handle)
            .ok_or_else(|| Error::UnknownHandle(handle.to_string()))?;

        if let Some(outcome) = &operation.outcome {
            return Ok(outcome.clone());
        }

        operation.polls += 1;
        let strip_task_id = operation.behavior == ConfirmationBehavior::WithoutTaskId;
        let ready = match &operation.behavior {
            ConfirmationBehavior::Immediate | ConfirmationBehavior::WithoutTaskId => Some(None),
            ConfirmationBehavior::AfterPolls(polls) => (operation.polls > *polls).then_some(None),
            ConfirmationBehavior::Never => None,
            ConfirmationBehavior::Revert(reason) => Some(Some(reason.clone())),
        };

        let outcome = match ready {
            None => return Ok(Confirmation::Pending),
            Some(Some(reason)) => Confirmation::Reverted(reason),
            Some(None) => {
                let mutation = operation.mutation.clone();
                match state.apply(&mutation, &self.operator) {
                    Confirmation::Committed(result) if strip_task_id => {
                        Confirmation::Committed(CommitResult {
                            task_id: None,
                            ..result
                        })
                    }
                    outcome => outcome,
                }
            }
        };

        if let Some(operation) = state.operations.get_mut(handle) {
            operation.outcome = Some(outcome.clone());
        }

        Ok(outcome)
    }

    async fn query_latest_task_id(&self) -> Result<Option<TaskId>, Self::Error> {
        let mut state = self.state.lock().await;

        if state.pending_query_failures > 0 {
            state.pending_query_failures -= 1;
            return Err(Error::Transport("connection refused".to_string()));
        }

        Ok(state.latest_task_id)
    }

    async fn query_status(&self, task_id: TaskId) -> Result<TaskStatusRecord, Self::Error> {
        let mut state = self.state.lock().await;

        if state.pending_query_failures > 0 {
            state.pending_query_failures -= 1;
            return Err(Error::Transport("connection refused".to_string()));
        }

        Ok(state
            .tasks
            .get(&task_id)
            .cloned()
            .unwrap_or_else(TaskStatusRecord::missing))
    }

    fn identity(&self) -> String {
        self.operator.clone()
    }
}

#[cfg(test)]
mod tests {
    use gaia_ledger_gateway::{LedgerGatewayError, LedgerGatewayErrorKind};

    use super::*;

    #[tokio::test]
    async fn test_start_commits_and_assigns_task() {
        let gateway = MockLedgerGateway::new();
        gateway.set_next_task_id(7).await;

        let handle = gateway
            .submit_start("testnet", "data/gaia/node1")
            .await
            .unwrap();
        let confirmation = gateway.poll_confirmation(&handle).await.unwrap();

        assert!(matches!(
            confirmation,
            Confirmation::Committed(CommitResult {
                task_id: Some(task_id),
                ..
            }) if task_id == TaskId::new(7)
        ));
        assert_eq!(
            gateway.query_latest_task_id().await.unwrap(),
            Some(TaskId::new(7))
        );

        let status = gateway.query_status(TaskId::new(7)).await.unwrap();
        assert!(status.exists);
        assert!(status.is_running);
        assert_eq!(status.operator, DEFAULT_OPERATOR);
    }

    #[tokio::test]
    async fn test_outcome_is_stable_across_polls() {
        let gateway = MockLedgerGateway::new();
        let handle = gateway.submit_start("testnet", "data").await.unwrap();

        let first = gateway.poll_confirmation(&handle).await.unwrap();
        let second = gateway.poll_confirmation(&handle).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            gateway.query_latest_task_id().await.unwrap(),
            Some(TaskId::new(1))
        );
    }

    #[tokio::test]
    async fn test_after_polls_reports_pending_first() {
        let gateway = MockLedgerGateway::new();
        gateway.script_start(ConfirmationBehavior::AfterPolls(2)).await;
        let handle = gateway.submit_start("testnet", "data").await.unwrap();

        assert_eq!(
            gateway.poll_confirmation(&handle).await.unwrap(),
            Confirmation::Pending
        );
        assert_eq!(
            gateway.poll_confirmation(&handle).await.unwrap(),
            Confirmation::Pending
        );
        assert!(matches!(
            gateway.poll_confirmation(&handle).await.unwrap(),
            Confirmation::Committed(_)
        ));
    }

    #[tokio::test]
    async fn test_stop_of_missing_task_reverts() {
        let gateway = MockLedgerGateway::new();
        let handle = gateway.submit_stop(TaskId::new(3)).await.unwrap();

        assert!(matches!(
            gateway.poll_confirmation(&handle).await.unwrap(),
            Confirmation::Reverted(_)
        ));
    }

    #[tokio::test]
    async fn test_stop_of_foreign_task_reverts() {
        let gateway = MockLedgerGateway::new();
        gateway
            .insert_task(
                TaskId::new(4),
                TaskStatusRecord {
                    exists: true,
                    is_running: true,
                    uptime_seconds: 10,
                    operator: "0xdef".to_string(),
                },
            )
            .await;

        let handle = gateway.submit_stop(TaskId::new(4)).await.unwrap();

        assert!(matches!(
            gateway.poll_confirmation(&handle).await.unwrap(),
            Confirmation::Reverted(_)
        ));
        assert!(gateway.query_status(TaskId::new(4)).await.unwrap().is_running);
    }

    #[tokio::test]
    async fn test_rejections_and_failures_are_consumed() {
        let gateway = MockLedgerGateway::new();
        gateway
            .reject_next_submission(Error::Rejected("bad input".to_string()))
            .await;
        gateway.fail_next_queries(1).await;

        let error = gateway.submit_start("testnet", "data").await.unwrap_err();
        assert_eq!(error.kind(), LedgerGatewayErrorKind::Rejected);
        assert!(gateway.submit_start("testnet", "data").await.is_ok());

        let error = gateway.query_latest_task_id().await.unwrap_err();
        assert_eq!(error.kind(), LedgerGatewayErrorKind::Transport);
        assert!(gateway.query_latest_task_id().await.is_ok());
    }
}
