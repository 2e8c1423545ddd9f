use alloy::transports::{RpcError, TransportErrorKind};
use gaia_ledger_gateway::{LedgerGatewayError, LedgerGatewayErrorKind};
use thiserror::Error;

/// Errors that can occur when talking to the task manager contract.
#[derive(Debug, Error)]
pub enum Error {
    /// Error from the contract bindings (ABI encoding/decoding, deployment checks).
    #[error("Contract error: {0}")]
    Contract(String),

    /// Error parsing a contract address
    #[error("Invalid address for {0}")]
    InvalidAddress(String),

    /// A confirmation handle that is not a transaction hash.
    #[error("Invalid transaction hash: {0}")]
    InvalidHandle(String),

    /// Error parsing the signing key
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// The node answered the request with an error (reverted estimate, bad nonce, ...).
    #[error("RPC error response: {0}")]
    Rejected(String),

    /// Connectivity failure after the request may have been sent.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Could not connect to the node at all.
    #[error("Could not reach RPC endpoint: {0}")]
    Unreachable(String),
}

impl Error {
    pub(crate) fn from_rpc(error: RpcError<TransportErrorKind>) -> Self {
        match error {
            RpcError::ErrorResp(payload) => Self::Rejected(payload.to_string()),
            RpcError::Transport(TransportErrorKind::Custom(source))
                if source
                    .downcast_ref::<reqwest::Error>()
                    .is_some_and(reqwest::Error::is_connect) =>
            {
                Self::Unreachable(source.to_string())
            }
            RpcError::Transport(kind) => Self::Transport(kind.to_string()),
            other => Self::Contract(other.to_string()),
        }
    }

    pub(crate) fn from_contract(error: alloy::contract::Error) -> Self {
        match error {
            alloy::contract::Error::TransportError(error) => Self::from_rpc(error),
            other => Self::Contract(other.to_string()),
        }
    }
}

impl LedgerGatewayError for Error {
    fn kind(&self) -> LedgerGatewayErrorKind {
        match self {
            Self::Rejected(_) | Self::InvalidHandle(_) => LedgerGatewayErrorKind::Rejected,
            Self::Transport(_) => LedgerGatewayErrorKind::Transport,
            Self::Unreachable(_) => LedgerGatewayErrorKind::Unsent,
            Self::Contract(_) | Self::InvalidAddress(_) | Self::InvalidPrivateKey(_) => {
                LedgerGatewayErrorKind::Other
            }
        }
    }
}
