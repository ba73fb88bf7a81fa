//! Time-budgeted retry of fallible store operations.

use std::time::Duration;

use tokio::time::Instant;

/// Pause before the first retry; single blips usually clear immediately.
const FIRST_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Pause before every later retry.
const RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Re-invokes `operation` until it succeeds or `budget` elapses.
///
/// The final sleep is clamped to the remaining budget so the last attempt
/// lands exactly at the deadline; once elapsed time exceeds the budget the
/// last error is returned. No jitter, no attempt cap.
pub async fn retry_for<T, E, F, Fut>(budget: Duration, mut operation: F) -> std::result::Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = std::result::Result<T, E>>,
{
	let started = Instant::now();
	let mut delay = FIRST_RETRY_DELAY;
	loop {
		match operation().await {
			Ok(value) => return Ok(value),
			Err(err) => {
				let elapsed = started.elapsed();
				if elapsed >= budget {
					return Err(err);
				}
				tokio::time::sleep(delay.min(budget - elapsed)).await;
				delay = RETRY_DELAY;
			}
		}
	}
}
