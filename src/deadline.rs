//! Caller-supplied deadlines for store and cache work.
//!
//! A deadline bounds a whole core operation. When it elapses the in-flight
//! future is dropped, which rolls back any open transaction it owned.

use crate::errors::AppError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline: the operation runs until it completes.
    pub fn none() -> Self {
        Self(None)
    }

    /// Deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    /// Time left before expiry, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    /// Runs `fut` under this deadline. `op` names the operation in the timeout error.
    pub async fn run<T, F>(self, op: &str, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        match self.0 {
            None => fut.await,
            Some(at) => match tokio::time::timeout_at(at, fut).await {
                Ok(result) => result,
                Err(_) => Err(AppError::Timeout(op.to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unbounded_deadline_runs_to_completion() {
        let out = Deadline::none()
            .run("noop", async { Ok::<_, AppError>(5) })
            .await
            .unwrap();
        assert_eq!(out, 5);
        assert!(Deadline::none().remaining().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_deadline_drops_future() {
        let deadline = Deadline::after(Duration::from_millis(50));
        let result = deadline
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, AppError>(())
            })
            .await;

        assert!(matches!(result, Err(AppError::Timeout(op)) if op == "slow"));
        assert!(deadline.is_expired());
    }
}
