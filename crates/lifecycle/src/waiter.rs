//! Turns a pending operation into a terminal outcome by polling the gateway.

use std::time::Duration;

use gaia_ledger_gateway::{
    CommitResult, Confirmation, LedgerGateway, LedgerGatewayError, LedgerGatewayErrorKind,
};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, warn};

use crate::PendingOperation;

// Stand-in deadline for waits too long to represent
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Terminal result of waiting on a pending operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WaitOutcome {
    /// The ledger applied the mutation.
    Committed(CommitResult),

    /// The ledger rejected the mutation.
    Reverted(String),

    /// No terminal result before the deadline. The operation may still commit.
    TimedOut,
}

/// Polls the gateway for an operation's confirmation at a fixed interval.
#[derive(Clone, Copy, Debug)]
pub struct ConfirmationWaiter {
    poll_interval: Duration,
}

impl ConfirmationWaiter {
    /// Creates a waiter polling every `poll_interval`.
    #[must_use]
    pub const fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Waits until the operation commits, reverts, or `deadline_after` elapses.
    ///
    /// Transport failures while polling are logged and polling continues.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if a poll fails for any other reason.
    pub async fn wait<G>(
        &self,
        gateway: &G,
        operation: &PendingOperation,
        deadline_after: Duration,
    ) -> Result<WaitOutcome, G::Error>
    where
        G: LedgerGateway,
    {
        let started = Instant::now();
        let deadline = started
            .checked_add(deadline_after)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let mut polls = 0u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            polls += 1;

            match timeout(remaining, gateway.poll_confirmation(&operation.handle)).await {
                Err(_) => {
                    debug!(
                        "poll {polls} of {} operation {} did not return before the deadline",
                        operation.kind, operation.handle
                    );
                }
                Ok(Ok(Confirmation::Committed(result))) => {
                    debug!(
                        "{} operation {} committed after {polls} polls",
                        operation.kind, operation.handle
                    );
                    return Ok(WaitOutcome::Committed(result));
                }
                Ok(Ok(Confirmation::Reverted(reason))) => {
                    debug!(
                        "{} operation {} reverted: {reason}",
                        operation.kind, operation.handle
                    );
                    return Ok(WaitOutcome::Reverted(reason));
                }
                Ok(Ok(Confirmation::Pending)) => {}
                Ok(Err(e))
                    if matches!(
                        e.kind(),
                        LedgerGatewayErrorKind::Transport | LedgerGatewayErrorKind::Unsent
                    ) =>
                {
                    warn!(
                        "failed to poll {} operation {}: {e}",
                        operation.kind, operation.handle
                    );
                }
                Ok(Err(e)) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "{} operation {} not confirmed within {deadline_after:?}",
                    operation.kind, operation.handle
                );
                return Ok(WaitOutcome::TimedOut);
            }

            let next_poll = now.checked_add(self.poll_interval).unwrap_or(deadline);
            sleep_until(deadline.min(next_poll)).await;
        }
    }
}
