//! Quota tracking and proactive self-throttling.

// crates.io
use oauth2::http::HeaderMap;
// self
use crate::{_prelude::*, error::header_str};

/// Header carrying the request quota for the current window.
pub const LIMIT_HEADER: &str = "x-rate-limit-limit";
/// Header carrying the requests left in the current window.
pub const REMAINING_HEADER: &str = "x-rate-limit-remaining";
/// Header carrying the window reset instant in Unix seconds.
pub const RESET_HEADER: &str = "x-rate-limit-reset";

/// Upper bound applied to a single proactive pause.
pub const MAX_PROACTIVE_DELAY: StdDuration = StdDuration::from_secs(2);
/// Smallest remaining budget that never triggers pacing.
pub const MIN_THROTTLE_THRESHOLD: u64 = 5;

/// Quota snapshot parsed from the last response carrying all three rate-limit headers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RateLimitState {
	/// Requests allowed in the current window.
	pub limit: u64,
	/// Requests left in the current window.
	pub remaining: u64,
	/// Instant the window resets.
	#[serde(with = "time::serde::rfc3339")]
	pub reset_at: OffsetDateTime,
	/// Instant the snapshot was observed.
	#[serde(with = "time::serde::rfc3339")]
	pub observed_at: OffsetDateTime,
}
impl RateLimitState {
	/// Parses a snapshot from response headers; partial or malformed sets yield `None`.
	pub fn from_headers(headers: &HeaderMap, observed_at: OffsetDateTime) -> Option<Self> {
		let limit = header_str(headers, LIMIT_HEADER)?.parse().ok()?;
		let remaining = header_str(headers, REMAINING_HEADER)?.parse().ok()?;
		let reset = header_str(headers, RESET_HEADER)?.parse::<i64>().ok()?;
		let reset_at = OffsetDateTime::from_unix_timestamp(reset).ok()?;

		Some(Self { limit, remaining, reset_at, observed_at })
	}

	/// Remaining budget below which requests are paced.
	pub fn throttle_threshold(&self) -> u64 {
		MIN_THROTTLE_THRESHOLD.max(self.limit.div_ceil(10))
	}

	/// Pause to apply before the next request issued at `now`.
	///
	/// Spreads the time left until reset across the remaining budget, capped at
	/// [`MAX_PROACTIVE_DELAY`]. A window that has already reset needs no pause.
	pub fn proactive_delay_at(&self, now: OffsetDateTime) -> StdDuration {
		if self.remaining >= self.throttle_threshold() {
			return StdDuration::ZERO;
		}

		let until_reset = self.reset_at - now;

		if !until_reset.is_positive() {
			return StdDuration::ZERO;
		}

		let until_reset = StdDuration::try_from(until_reset).unwrap_or(StdDuration::ZERO);
		let budget = u32::try_from(self.remaining.max(1)).unwrap_or(u32::MAX);

		(until_reset / budget).min(MAX_PROACTIVE_DELAY)
	}
}

/// Shared holder of the most recent [`RateLimitState`].
///
/// Writers replace the whole snapshot; readers may see a slightly stale value, which only
/// affects pacing.
#[derive(Clone, Debug, Default)]
pub struct RateLimitTracker {
	state: Arc<RwLock<Option<RateLimitState>>>,
}
impl RateLimitTracker {
	/// Creates an empty tracker.
	pub fn new() -> Self {
		Self::default()
	}

	/// Records quota headers observed now.
	pub fn observe(&self, headers: &HeaderMap) -> Option<RateLimitState> {
		self.observe_at(headers, OffsetDateTime::now_utc())
	}

	/// Records quota headers observed at `instant`; returns the stored snapshot when the header
	/// set was complete.
	pub fn observe_at(&self, headers: &HeaderMap, instant: OffsetDateTime) -> Option<RateLimitState> {
		let snapshot = RateLimitState::from_headers(headers, instant)?;

		*self.state.write() = Some(snapshot.clone());

		Some(snapshot)
	}

	/// Latest snapshot, if any response carried quota headers.
	pub fn snapshot(&self) -> Option<RateLimitState> {
		self.state.read().clone()
	}

	/// Pause to apply before issuing a request now.
	pub fn proactive_delay(&self) -> StdDuration {
		self.proactive_delay_at(OffsetDateTime::now_utc())
	}

	/// Pause to apply before issuing a request at `now`; zero when no quota was observed.
	pub fn proactive_delay_at(&self, now: OffsetDateTime) -> StdDuration {
		self.state.read().as_ref().map_or(StdDuration::ZERO, |state| state.proactive_delay_at(now))
	}
}
