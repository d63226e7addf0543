//! Token acquisition with a single-flight cache and nonce-challenge adaptation.
//!
//! [`TokenManager::access_token`] serves the cached token while it is servable. Otherwise one
//! caller takes the refresh guard and runs the acquisition protocol while every concurrent
//! caller waits on the same guard and then receives that acquisition's outcome: the freshly
//! cached token, or the report of the failure:
//!
//! 1. Build a fresh assertion and proof (echoing the freshest known nonce) and submit the grant.
//! 2. On a `use_dpop_nonce` challenge, store the server nonce, rebuild both the assertion and the
//!    proof, and resubmit once. A second challenge is a hard failure.
//! 3. Every response, successful or not, feeds its nonce and quota headers into the session.
//! 4. Cache the token with the lifetime minus the safety margin. Failures leave the cache alone.

mod metrics;

pub use metrics::*;

// crates.io
use oauth2::http::Method;
// self
use crate::{
	_prelude::*,
	assertion::AssertionSigner,
	auth::{CachedToken, EXPIRY_SAFETY_MARGIN, TokenSecret},
	config::ClientConfig,
	error::{ApiError, ErrorKind, ProtocolError, TransportError},
	http::TokenHttpClient,
	oauth::{ExchangeOutcome, TokenEndpoint, TokenGrant, TransportErrorMapper, USE_DPOP_NONCE},
	obs::{self, OperationKind, OperationSpan, Outcome},
	session::AuthSession,
};

/// Serves valid access tokens, acquiring new ones through the client credentials grant.
pub struct TokenManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	session: Arc<AuthSession>,
	endpoint: TokenEndpoint<C, M>,
	assertions: AssertionSigner,
	timeout: StdDuration,
	refresh_guard: AsyncMutex<()>,
	flight: Mutex<Flight>,
	metrics: ExchangeMetrics,
}
impl<C, M> TokenManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a manager for `config` that stores its state in `session`.
	///
	/// The assertion signing key is imported here, so an unusable key fails construction.
	pub fn new(
		config: &ClientConfig,
		session: Arc<AuthSession>,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Result<Self> {
		let endpoint = TokenEndpoint::from_config(config, http_client.into(), error_mapper.into())?;
		let assertions = AssertionSigner::from_config(config)?;

		Ok(Self {
			session,
			endpoint,
			assertions,
			timeout: config.timeout,
			refresh_guard: AsyncMutex::new(()),
			flight: Mutex::new(Flight::default()),
			metrics: ExchangeMetrics::default(),
		})
	}

	/// Shared session backing this manager.
	pub fn session(&self) -> &Arc<AuthSession> {
		&self.session
	}

	/// Exchange counters.
	pub fn metrics(&self) -> &ExchangeMetrics {
		&self.metrics
	}

	/// Returns a bearer value that is servable at the time it is returned.
	pub async fn access_token(&self) -> Result<TokenSecret> {
		Ok(self.token().await?.bearer)
	}

	/// Returns the servable cached token, acquiring a new one when needed.
	pub async fn token(&self) -> Result<CachedToken> {
		const KIND: OperationKind = OperationKind::TokenExchange;

		if let Some(token) = self.session.servable_token_at(OffsetDateTime::now_utc()) {
			return Ok(token);
		}

		let generation = self.flight.lock().generation;
		let _singleflight = self.refresh_guard.lock().await;

		// Another caller may have refreshed while this one waited.
		if let Some(token) = self.session.servable_token_at(OffsetDateTime::now_utc()) {
			return Ok(token);
		}
		if let Some(failure) = self.flight.lock().failure_since(generation) {
			return Err(failure.into());
		}

		let span = OperationSpan::new(KIND, "acquire");

		obs::record_outcome(KIND, Outcome::Attempt);
		self.metrics.record_attempt();

		let result = span.instrument(self.acquire()).await;

		match &result {
			Ok(_) => {
				obs::record_outcome(KIND, Outcome::Success);
				self.metrics.record_success();
			},
			Err(_) => {
				obs::record_outcome(KIND, Outcome::Failure);
				self.metrics.record_failure();
			},
		}

		self.flight.lock().finish(result.as_ref().err().map(Error::report));

		result
	}

	/// Drops the cached token so the next call re-acquires.
	pub fn invalidate(&self) {
		self.session.clear_token();
	}

	async fn acquire(&self) -> Result<CachedToken> {
		let mut adapted = false;

		loop {
			match self.exchange_once().await? {
				ExchangeOutcome::Issued(grant) => return self.cache(grant),
				ExchangeOutcome::NonceChallenge { nonce } => {
					self.metrics.record_nonce_challenge();

					if adapted {
						return Err(nonce_failure(
							"Token endpoint issued a second nonce challenge after the proof was adapted.",
						));
					}

					let Some(nonce) = nonce else {
						return Err(nonce_failure(
							"Token endpoint demanded a nonce without providing one.",
						));
					};

					self.session.set_nonce(nonce);
					obs::trace_nonce_challenge();

					adapted = true;
				},
			}
		}
	}

	/// One round trip with a freshly built assertion and proof.
	async fn exchange_once(&self) -> Result<ExchangeOutcome> {
		let url = self.endpoint.url();
		let assertion = self.assertions.assertion(url)?;
		let proof = self.session.proof(&Method::POST, url, None)?;
		let response = tokio::time::timeout(self.timeout, self.endpoint.exchange(assertion, proof))
			.await
			.map_err(|_| TransportError::Timeout {
				operation: OperationKind::TokenExchange,
				timeout: self.timeout,
			})?;

		if let Some(metadata) = &response.metadata {
			self.session.observe(OperationKind::TokenExchange, metadata);
		}

		response.outcome
	}

	fn cache(&self, grant: TokenGrant) -> Result<CachedToken> {
		let expires_in = grant.expires_in;
		let token = CachedToken::from_lifetime(
			grant.access_token,
			grant.token_type,
			OffsetDateTime::now_utc(),
			expires_in,
		)
		.ok_or_else(|| ProtocolError::LifetimeTooShort {
			expires_in: u64::try_from(expires_in.whole_seconds()).unwrap_or_default(),
			margin: EXPIRY_SAFETY_MARGIN.whole_seconds(),
		})?;

		self.session.store_token(token.clone());

		Ok(token)
	}
}
impl<C, M> Debug for TokenManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenManager")
			.field("token_endpoint", &self.endpoint.url().as_str())
			.field("timeout", &self.timeout)
			.field("metrics", &self.metrics)
			.finish_non_exhaustive()
	}
}

/// Outcome of the most recent acquisition, published to the callers that waited on it.
#[derive(Debug, Default)]
struct Flight {
	generation: u64,
	failure: Option<ApiError>,
}
impl Flight {
	fn finish(&mut self, failure: Option<ApiError>) {
		self.generation = self.generation.wrapping_add(1);
		self.failure = failure;
	}

	/// Failure of an acquisition that completed after `generation` was observed.
	fn failure_since(&self, generation: u64) -> Option<ApiError> {
		if self.generation == generation {
			return None;
		}

		self.failure.clone()
	}
}

fn nonce_failure(message: &str) -> Error {
	ApiError::new(ErrorKind::Validation, message).with_status(400).with_code(USE_DPOP_NONCE).into()
}
