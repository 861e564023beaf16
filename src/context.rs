//! Per-check cancellation and deadline.
//!
//! Every dispatch stage receives a [`DispatchContext`]. Fan-out branches get a
//! [`child`](DispatchContext::child) so that a short-circuiting join can cancel
//! its outstanding siblings without touching the caller's token.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{DispatchError, DispatchResult};

#[derive(Debug, Clone, Default)]
pub struct DispatchContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl DispatchContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().with_deadline(Instant::now() + timeout)
    }

    /// Tightens the deadline; a later deadline than the current one is ignored.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Context for a sub-check. Cancelling the child leaves `self` untouched;
    /// cancelling `self` cancels the child.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fails fast when the check is already cancelled or past its deadline.
    pub fn check(&self) -> DispatchResult<()> {
        if self.token.is_cancelled() {
            return Err(DispatchError::Cancelled("cancelled by caller".into()));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(DispatchError::Cancelled("deadline exceeded".into()));
            }
        }
        Ok(())
    }

    /// Races `fut` against cancellation and the deadline.
    ///
    /// When cancellation wins, `fut` is dropped before it completes.
    pub async fn guard<F, T>(&self, fut: F) -> DispatchResult<T>
    where
        F: Future<Output = DispatchResult<T>>,
    {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                Err(DispatchError::Cancelled("cancelled by caller".into()))
            }
            _ = deadline => {
                Err(DispatchError::Cancelled("deadline exceeded".into()))
            }
            result = fut => result,
        }
    }
}
