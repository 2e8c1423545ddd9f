use std::fmt::{self, Display};
use std::mem;

use gaia_ledger_gateway::{PendingHandle, TaskId};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Lifecycle state of a task as seen by this client.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NodeLifecycleState {
    /// Never observed by this client.
    #[default]
    Unknown,

    /// Created on the ledger, node not yet reported running.
    Starting,

    /// The ledger reports the node as running.
    Running {
        /// Seconds the node has been up.
        uptime_seconds: u64,

        /// Identity controlling the task on the ledger.
        operator: String,
    },

    /// A stop has been submitted and is awaiting confirmation.
    Stopping,

    /// Stopped for good.
    Stopped,

    /// Never came up.
    Failed,
}

impl NodeLifecycleState {
    /// Whether the node is running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// Whether no further transition can leave this state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Uptime, only present while running.
    #[must_use]
    pub const fn uptime_seconds(&self) -> Option<u64> {
        match self {
            Self::Running { uptime_seconds, .. } => Some(*uptime_seconds),
            _ => None,
        }
    }

    /// Operator, only present while running.
    #[must_use]
    pub fn operator(&self) -> Option<&str> {
        match self {
            Self::Running { operator, .. } => Some(operator),
            _ => None,
        }
    }

    /// Whether `self` and `other` are the same state, ignoring running details.
    #[must_use]
    pub fn same_phase(&self, other: &Self) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }

    /// Whether the registry may move a task from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: &Self) -> bool {
        match (self, next) {
            (_, Self::Unknown) => false,
            (Self::Unknown | Self::Starting, _)
            | (Self::Running { .. } | Self::Stopping, Self::Running { .. } | Self::Stopping)
            | (_, Self::Stopped) => true,
            (Self::Failed, Self::Running { .. } | Self::Stopping | Self::Failed) => true,
            _ => false,
        }
    }
}

impl Display for NodeLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Starting => write!(f, "Starting"),
            Self::Running {
                uptime_seconds,
                operator,
            } => write!(
                f,
                "Running (uptime: {uptime_seconds}s, operator: {operator})"
            ),
            Self::Stopping => write!(f, "Stopping"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Kind of mutation submitted to the ledger.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum OperationKind {
    /// Start a node.
    Start,

    /// Stop a task.
    Stop,
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

/// A submitted mutation awaiting confirmation.
#[derive(Clone, Debug)]
pub struct PendingOperation {
    /// Confirmation handle returned by the gateway.
    pub handle: PendingHandle,

    /// What was submitted.
    pub kind: OperationKind,

    /// Per-client submission counter, strictly increasing.
    pub sequence: u64,

    /// When the gateway accepted the submission.
    pub submitted_at: Instant,

    /// Target task. Absent for starts until the ledger assigns one.
    pub task_id: Option<TaskId>,
}

impl PendingOperation {
    /// Creates a pending operation stamped with the current instant.
    #[must_use]
    pub fn new(
        kind: OperationKind,
        task_id: Option<TaskId>,
        handle: PendingHandle,
        sequence: u64,
    ) -> Self {
        Self {
            handle,
            kind,
            sequence,
            submitted_at: Instant::now(),
            task_id,
        }
    }
}
