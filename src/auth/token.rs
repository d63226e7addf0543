//! Cached access token and its freshness rules.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Margin subtracted from the server-declared lifetime before a token is cached.
pub const EXPIRY_SAFETY_MARGIN: Duration = Duration::seconds(60);

/// Access token held by the token manager.
///
/// Created by a successful exchange and replaced wholesale by the next one; never mutated in
/// place. `expires_at` already includes [`EXPIRY_SAFETY_MARGIN`], so a token is servable only
/// while `now < expires_at`.
#[derive(Clone, PartialEq, Eq)]
pub struct CachedToken {
	/// Bearer value presented in the `Authorization` header.
	pub bearer: TokenSecret,
	/// Token type announced by the token endpoint (`DPoP` when bound).
	pub token_type: String,
	/// Instant the exchange completed.
	pub issued_at: OffsetDateTime,
	/// Instant after which the token must not be served.
	pub expires_at: OffsetDateTime,
}
impl CachedToken {
	/// Builds a cache entry from a server-declared lifetime observed at `issued_at`.
	///
	/// Returns `None` when the lifetime does not outlast the safety margin, because such a token
	/// would already be unservable.
	pub fn from_lifetime(
		bearer: TokenSecret,
		token_type: impl Into<String>,
		issued_at: OffsetDateTime,
		expires_in: Duration,
	) -> Option<Self> {
		if expires_in <= EXPIRY_SAFETY_MARGIN {
			return None;
		}

		Some(Self {
			bearer,
			token_type: token_type.into(),
			issued_at,
			expires_at: issued_at + expires_in - EXPIRY_SAFETY_MARGIN,
		})
	}

	/// Returns `true` while the token may still be handed to callers at `instant`.
	pub fn is_servable_at(&self, instant: OffsetDateTime) -> bool {
		instant < self.expires_at
	}
}
impl Debug for CachedToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CachedToken")
			.field("bearer", &"<redacted>")
			.field("token_type", &self.token_type)
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}
