//! Error types for the mock gateway.

use gaia_ledger_gateway::{LedgerGatewayError, LedgerGatewayErrorKind};
use thiserror::Error;

/// Error type for the mock gateway.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The submission was refused before broadcast.
    #[error("submission rejected: {0}")]
    Rejected(String),

    /// Connectivity failure that may have reached the ledger.
    #[error("transport error: {0}")]
    Transport(String),

    /// No operation was ever submitted under this handle.
    #[error("unknown handle: {0}")]
    UnknownHandle(String),

    /// Connectivity failure before anything was sent.
    #[error("request not sent: {0}")]
    Unsent(String),
}

impl LedgerGatewayError for Error {
    fn kind(&self) -> LedgerGatewayErrorKind {
        match self {
            Self::Rejected(_) => LedgerGatewayErrorKind::Rejected,
            Self::Transport(_) => LedgerGatewayErrorKind::Transport,
            Self::UnknownHandle(_) => LedgerGatewayErrorKind::Other,
            Self::Unsent(_) => LedgerGatewayErrorKind::Unsent,
        }
    }
}
