use std::time::Duration;

use gaia_ledger_gateway::{LedgerGatewayError, LedgerGatewayErrorKind, PendingHandle, TaskId};
use thiserror::Error;

use crate::OperationKind;

/// Errors surfaced by the lifecycle client.
#[derive(Debug, Error)]
pub enum Error {
    /// No terminal result arrived before the deadline. The operation may still commit.
    #[error(
        "{kind} operation {handle} was not confirmed within {waited:?}; its outcome is unknown"
    )]
    ConfirmationTimeout {
        /// Handle of the unconfirmed operation.
        handle: PendingHandle,

        /// What was submitted.
        kind: OperationKind,

        /// How long the client waited.
        waited: Duration,
    },

    /// Gateway failure that fits no other category.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// The ledger reported a result the client cannot interpret.
    #[error("malformed ledger result: {0}")]
    MalformedResult(String),

    /// The ledger rejected the mutation after submission.
    #[error("operation reverted: {0}")]
    OperationReverted(String),

    /// The request was refused before broadcast.
    #[error("submission rejected: {0}")]
    Submission(String),

    /// Connectivity to the gateway failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The ledger has no record of the task, or it is controlled by another identity.
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),
}

impl Error {
    /// Classifies a gateway error raised by a read or a poll.
    ///
    /// Nothing was submitted on these paths, so a refused request is a
    /// `Gateway` error and never a `Submission` one.
    pub fn from_gateway<E>(error: &E, task_id: Option<TaskId>) -> Self
    where
        E: LedgerGatewayError,
    {
        match (error.kind(), task_id) {
            (LedgerGatewayErrorKind::UnknownTask, Some(task_id)) => Self::UnknownTask(task_id),
            (LedgerGatewayErrorKind::Transport | LedgerGatewayErrorKind::Unsent, _) => {
                Self::Transport(error.to_string())
            }
            _ => Self::Gateway(error.to_string()),
        }
    }

    /// Whether the ledger may still apply the operation this error is about.
    #[must_use]
    pub const fn is_outcome_unknown(&self) -> bool {
        matches!(self, Self::ConfirmationTimeout { .. })
    }
}
