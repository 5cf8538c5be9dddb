//! Cancellation and deadline helpers shared by every suspension point.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Races `fut` against `cancel`.
pub async fn cancellable<F, T>(cancel: &CancellationToken, operation: &str, fut: F) -> Result<T>
where
	F: Future<Output = Result<T>>,
{
	tokio::select! {
		biased;
		_ = cancel.cancelled() => Err(Error::cancelled(operation)),
		result = fut => result,
	}
}

/// Sleeps for `duration` unless cancelled first.
pub async fn sleep(cancel: &CancellationToken, operation: &str, duration: Duration) -> Result<()> {
	tokio::select! {
		biased;
		_ = cancel.cancelled() => Err(Error::cancelled(operation)),
		_ = tokio::time::sleep(duration) => Ok(()),
	}
}

/// Bounds `fut` by `limit` when one is given.
pub async fn with_deadline<F, T>(limit: Option<Duration>, operation: &str, fut: F) -> Result<T>
where
	F: Future<Output = Result<T>>,
{
	match limit {
		Some(after) => tokio::time::timeout(after, fut).await.map_err(|_| Error::Timeout {
			operation: operation.to_string(),
			after,
		})?,
		None => fut.await,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn cancellation_wins_over_pending_work() {
		let cancel = CancellationToken::new();
		cancel.cancel();
		let err = cancellable(&cancel, "login", std::future::pending::<Result<()>>()).await.unwrap_err();
		assert!(err.is_cancelled());
		assert!(sleep(&cancel, "retry delay", Duration::from_secs(60)).await.unwrap_err().is_cancelled());
	}

	#[tokio::test]
	async fn deadline_reports_timeout_not_cancellation() {
		let err = with_deadline(Some(Duration::from_millis(10)), "task wait", std::future::pending::<Result<()>>())
			.await
			.unwrap_err();
		assert!(matches!(err, Error::Timeout { .. }));
		assert_eq!(with_deadline(None, "noop", async { Ok(7) }).await.unwrap(), 7);
	}
}
