//! Abstract interface for submitting node lifecycle operations to a ledger and reading task state back.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::{self, Debug, Display};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Ledger-assigned identifier of one node lifecycle instance.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u32);

impl TaskId {
    /// Wraps a raw task number.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw task number as stored on the ledger.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for TaskId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle returned by the gateway for a submitted mutation.
///
/// For an EVM ledger this is the transaction hash; other gateways may use any
/// string that lets them find the operation again.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingHandle(String);

impl PendingHandle {
    /// Creates a handle from its string form.
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// The handle's string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PendingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the ledger reported for a committed mutation.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CommitResult {
    /// Block (or ledger height) the mutation was included at, if the ledger has such a notion.
    pub block_number: Option<u64>,

    /// Task assigned by a committed start. Absent for stops.
    pub task_id: Option<TaskId>,
}

/// Result of a single confirmation poll.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Confirmation {
    /// The mutation has not reached a terminal state yet.
    Pending,

    /// The mutation was durably applied.
    Committed(CommitResult),

    /// The ledger definitively rejected the mutation.
    Reverted(String), // The reason reported by the ledger.
}

/// Raw status of a task as recorded on the ledger.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusRecord {
    /// Whether the ledger has any record of the task.
    pub exists: bool,

    /// Whether the ledger reports the node as running.
    pub is_running: bool,

    /// Seconds the node has been up, as recorded by the ledger.
    pub uptime_seconds: u64,

    /// Identity controlling the task on the ledger.
    pub operator: String,
}

impl TaskStatusRecord {
    /// A record for a task the ledger does not know about.
    #[must_use]
    pub fn missing() -> Self {
        Self::default()
    }
}

/// The kind of gateway error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LedgerGatewayErrorKind {
    /// The request was refused before it was broadcast (bad input, authorization).
    Rejected,

    /// The ledger has no record of the referenced task.
    UnknownTask,

    /// Connectivity failed and the request may have reached the ledger.
    Transport,

    /// Connectivity failed before anything left the client. Safe to resend.
    Unsent,

    /// Other/unknown error
    Other,
}

impl Display for LedgerGatewayErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Marker trait for `LedgerGateway` errors
pub trait LedgerGatewayError: Debug + Error + Send + Sync + 'static {
    /// Returns the kind of this error
    fn kind(&self) -> LedgerGatewayErrorKind;
}

/// Abstract interface over ledger connectivity, submission and querying.
#[async_trait]
pub trait LedgerGateway
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for this gateway.
    type Error: LedgerGatewayError;

    /// Signs and broadcasts a request to start a node.
    async fn submit_start(&self, network: &str, data_dir: &str)
    -> Result<PendingHandle, Self::Error>;

    /// Signs and broadcasts a request to stop a task.
    async fn submit_stop(&self, task_id: TaskId) -> Result<PendingHandle, Self::Error>;

    /// Checks whether a submitted mutation has reached a terminal state.
    async fn poll_confirmation(&self, handle: &PendingHandle) -> Result<Confirmation, Self::Error>;

    /// Returns the highest task id ever assigned, or `None` if no task was ever started.
    async fn query_latest_task_id(&self) -> Result<Option<TaskId>, Self::Error>;

    /// Reads the ledger's record for a task.
    async fn query_status(&self, task_id: TaskId) -> Result<TaskStatusRecord, Self::Error>;

    /// The signing identity this gateway submits as.
    fn identity(&self) -> String;
}
