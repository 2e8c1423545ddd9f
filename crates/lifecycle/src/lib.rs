//! Client for starting, stopping and inspecting Gaia nodes whose lifecycle is recorded on a ledger.
//!
//! Mutations go through a [`LedgerGateway`](gaia_ledger_gateway::LedgerGateway)
//! and only count once the ledger confirms them. Confirmation waits are
//! bounded; a timeout means the outcome is unknown, never that the operation
//! failed, and nothing is resubmitted automatically.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod client;
mod error;
mod registry;
mod state;
mod waiter;

pub use client::{LifecycleClient, LifecycleClientOptions};
pub use error::Error;
pub use registry::{TaskEntry, TaskRegistry};
pub use state::{NodeLifecycleState, OperationKind, PendingOperation};
pub use waiter::{ConfirmationWaiter, WaitOutcome};

pub use gaia_ledger_gateway::{PendingHandle, TaskId};
