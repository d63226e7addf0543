//! Process-wide authentication state, owned in one place.
//!
//! An [`AuthSession`] holds the cached token, the proof key, the replay nonce, and the quota
//! snapshot. The token manager and request executor share it through an `Arc`; tests build a
//! fresh one per case.

// crates.io
use oauth2::http::Method;
// self
use crate::{
	_prelude::*,
	auth::CachedToken,
	dpop::{DpopSigner, ReplayNonce},
	error::CryptoError,
	http::ResponseMetadata,
	obs::{self, OperationKind},
	rate_limit::{RateLimitState, RateLimitTracker},
};

/// Shared authentication context.
#[derive(Debug, Default)]
pub struct AuthSession {
	token: RwLock<Option<CachedToken>>,
	signer: DpopSigner,
	nonce: ReplayNonce,
	rate_limits: RateLimitTracker,
}
impl AuthSession {
	/// Creates an empty session; the proof key is generated on first use.
	pub fn new() -> Self {
		Self::default()
	}

	/// Quota tracker fed by every response.
	pub fn rate_limits(&self) -> &RateLimitTracker {
		&self.rate_limits
	}

	/// Latest replay nonce issued by the server.
	pub fn nonce(&self) -> Option<String> {
		self.nonce.current()
	}

	/// Stores a nonce received outside a response observation (for example a challenge).
	pub fn set_nonce(&self, nonce: impl Into<String>) -> bool {
		self.nonce.update(nonce)
	}

	/// Signs a proof for `method` + `url` using the freshest known nonce.
	pub fn proof(
		&self,
		method: &Method,
		url: &Url,
		access_token: Option<&str>,
	) -> Result<String, CryptoError> {
		let nonce = self.nonce.current();

		self.signer.proof(method, url, access_token, nonce.as_deref())
	}

	/// Feeds a response into the nonce and quota state; returns the recorded quota snapshot.
	pub fn observe(
		&self,
		operation: OperationKind,
		metadata: &ResponseMetadata,
	) -> Option<RateLimitState> {
		let rotated = metadata.dpop_nonce.as_deref().is_some_and(|nonce| self.nonce.update(nonce));

		if rotated {
			obs::trace_nonce_rotation(operation);
		}

		self.rate_limits.observe(&metadata.headers)
	}

	/// Cached token, whether or not it is still servable.
	pub fn cached_token(&self) -> Option<CachedToken> {
		self.token.read().clone()
	}

	/// Cached token if it is servable at `now`.
	pub fn servable_token_at(&self, now: OffsetDateTime) -> Option<CachedToken> {
		self.token.read().as_ref().filter(|token| token.is_servable_at(now)).cloned()
	}

	/// Replaces the cached token wholesale.
	pub fn store_token(&self, token: CachedToken) {
		*self.token.write() = Some(token);
	}

	/// Drops the cached token; the next request re-acquires.
	pub fn clear_token(&self) {
		self.token.write().take();
	}
}
