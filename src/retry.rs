//! Per-attempt retry decisions and the bounded exponential backoff schedule.
//!
//! The executor drives a linear loop: run an attempt, feed its result to
//! [`RetryPolicy::decide`], then either return, fail, or sleep for the decided delay.

// self
use crate::{_prelude::*, error::ErrorKind};

/// Base delay of the backoff schedule.
pub const BACKOFF_BASE: StdDuration = StdDuration::from_millis(1_000);
/// Upper bound of the backoff schedule.
pub const BACKOFF_CAP: StdDuration = StdDuration::from_millis(30_000);

/// Backoff applied before retry number `attempt` (zero-based): `min(1000·2^attempt, 30000)` ms.
pub fn backoff_delay(attempt: u32) -> StdDuration {
	let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);

	BACKOFF_BASE.checked_mul(factor).map_or(BACKOFF_CAP, |delay| delay.min(BACKOFF_CAP))
}

/// Why an attempt is being retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RetryReason {
	/// HTTP 429.
	RateLimited,
	/// HTTP 5xx.
	ServerError,
	/// Timeout or connection failure.
	Transport,
}
impl RetryReason {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::RateLimited => "rate_limited",
			Self::ServerError => "server_error",
			Self::Transport => "transport",
		}
	}

	fn of(error: &Error) -> Option<Self> {
		match error {
			Error::Transport(_) => Some(Self::Transport),
			Error::Api(api) if api.kind == ErrorKind::Network => Some(Self::Transport),
			Error::Api(api) if api.kind == ErrorKind::RateLimit => Some(Self::RateLimited),
			Error::Api(api) if api.status.is_some_and(|status| status >= 500) =>
				Some(Self::ServerError),
			_ => None,
		}
	}
}

/// Result of a single attempt once the retry policy has looked at it.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
	/// The attempt produced a value.
	Succeed(T),
	/// The attempt failed transiently and another attempt is allowed.
	Retry {
		/// Pause before the next attempt.
		delay: StdDuration,
		/// Failure classification.
		reason: RetryReason,
		/// Failure that triggered the retry.
		error: Error,
	},
	/// The attempt failed terminally.
	Fail(Error),
}

/// Bounded retry policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Retries allowed after the first attempt.
	pub max_retries: u32,
}
impl RetryPolicy {
	/// Creates a policy allowing `max_retries` retries.
	pub const fn new(max_retries: u32) -> Self {
		Self { max_retries }
	}

	/// Total attempts, including the first one.
	pub const fn max_attempts(&self) -> u32 {
		self.max_retries.saturating_add(1)
	}

	/// Decides what follows attempt number `attempt` (zero-based).
	///
	/// Throttling honors the server's retry hint and falls back to the backoff schedule; server
	/// and transport faults always use the schedule. Non-transient failures and failures on the
	/// last attempt are terminal.
	pub fn decide<T>(&self, attempt: u32, result: Result<T>) -> AttemptOutcome<T> {
		let error = match result {
			Ok(value) => return AttemptOutcome::Succeed(value),
			Err(error) => error,
		};
		let Some(reason) = RetryReason::of(&error) else {
			return AttemptOutcome::Fail(error);
		};

		if attempt >= self.max_retries {
			return AttemptOutcome::Fail(error);
		}

		let delay = match reason {
			RetryReason::RateLimited => error.retry_after().unwrap_or_else(|| backoff_delay(attempt)),
			RetryReason::ServerError | RetryReason::Transport => backoff_delay(attempt),
		};

		AttemptOutcome::Retry { delay, reason, error }
	}
}
