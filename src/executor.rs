//! Outward-facing transport for resource calls.
//!
//! Each attempt paces itself against the last quota snapshot, resolves a token, signs a proof
//! bound to the exact method, URL, and token, and issues the call under the configured timeout.
//! [`RetryPolicy`] decides what happens next; decoding a successful body happens after the loop
//! and is never retried.

// crates.io
use oauth2::{
	AsyncHttpClient, HttpRequest,
	http::{
		Method, Request,
		header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
	},
};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	config::ClientConfig,
	dpop::DPOP_HEADER,
	error::{ApiError, ConfigError, TransportError},
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	oauth::TransportErrorMapper,
	obs::{self, OperationKind, OperationSpan, Outcome},
	pagination::{self, CURSOR_PARAM, PaginatedResult},
	retry::{AttemptOutcome, RetryPolicy},
	session::AuthSession,
	token::TokenManager,
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper};

const KIND: OperationKind = OperationKind::ResourceCall;

/// Resource call description.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
	/// HTTP method.
	pub method: Method,
	/// Path under the org URL, or an absolute URL on the same org.
	pub path: String,
	/// Query parameters appended in order.
	pub query: Vec<(String, String)>,
	/// JSON request body.
	pub body: Option<serde_json::Value>,
}
impl ApiRequest {
	/// Creates a request without query or body.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self { method, path: path.into(), query: Vec::new(), body: None }
	}

	/// `GET` request.
	pub fn get(path: impl Into<String>) -> Self {
		Self::new(Method::GET, path)
	}

	/// `POST` request.
	pub fn post(path: impl Into<String>) -> Self {
		Self::new(Method::POST, path)
	}

	/// `PUT` request.
	pub fn put(path: impl Into<String>) -> Self {
		Self::new(Method::PUT, path)
	}

	/// `DELETE` request.
	pub fn delete(path: impl Into<String>) -> Self {
		Self::new(Method::DELETE, path)
	}

	/// Appends a query parameter.
	pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.push((name.into(), value.into()));

		self
	}

	/// Continues a paginated collection from `cursor`.
	pub fn after(self, cursor: impl Into<String>) -> Self {
		self.query(CURSOR_PARAM, cursor)
	}

	/// Sets the JSON body.
	pub fn json(mut self, body: serde_json::Value) -> Self {
		self.body = Some(body);

		self
	}
}

/// Successful response captured by the retry loop.
#[derive(Debug)]
struct RawResponse {
	status: u16,
	url: Url,
	metadata: ResponseMetadata,
	body: Vec<u8>,
}

/// Executes resource calls with DPoP-bound tokens, pacing, retries, and pagination.
pub struct RequestExecutor<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	config: ClientConfig,
	session: Arc<AuthSession>,
	tokens: TokenManager<C, M>,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
	policy: RetryPolicy,
}
impl<C, M> RequestExecutor<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates an executor with a fresh [`AuthSession`].
	pub fn with_http_client(
		config: ClientConfig,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Result<Self> {
		Self::with_session(config, Arc::new(AuthSession::new()), http_client, error_mapper)
	}

	/// Creates an executor sharing an existing [`AuthSession`].
	pub fn with_session(
		config: ClientConfig,
		session: Arc<AuthSession>,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Result<Self> {
		let http_client = http_client.into();
		let error_mapper = error_mapper.into();
		let tokens = TokenManager::new(
			&config,
			Arc::clone(&session),
			Arc::clone(&http_client),
			Arc::clone(&error_mapper),
		)?;
		let policy = RetryPolicy::new(config.max_retries);

		Ok(Self { config, session, tokens, http_client, error_mapper, policy })
	}

	/// Configuration the executor was built with.
	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	/// Shared authentication state.
	pub fn session(&self) -> &Arc<AuthSession> {
		&self.session
	}

	/// Token manager used to authorize calls.
	pub fn tokens(&self) -> &TokenManager<C, M> {
		&self.tokens
	}

	/// Runs `request` and decodes the body into `T`. Empty bodies decode as JSON `null`.
	pub async fn execute<T>(&self, request: &ApiRequest) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let response = self.send(request).await?;

		decode_body(&response)
	}

	/// Runs `request` and decodes one page of a collection plus its continuation.
	pub async fn execute_paginated<T>(&self, request: &ApiRequest) -> Result<PaginatedResult<T>>
	where
		T: DeserializeOwned,
	{
		let response = self.send(request).await?;
		let value = decode_body::<serde_json::Value>(&response)?;
		let (items, embedded_next) = pagination::decode_page(value)
			.map_err(|source| Error::Decode { source, status: Some(response.status) })?;
		let next_url = pagination::next_link(&response.metadata.headers, &response.url)
			.or_else(|| embedded_next.and_then(|href| response.url.join(&href).ok()));

		Ok(PaginatedResult::new(items, next_url))
	}

	async fn send(&self, request: &ApiRequest) -> Result<RawResponse> {
		let url = self.request_url(request)?;
		let span = OperationSpan::new(KIND, "execute");

		obs::record_outcome(KIND, Outcome::Attempt);

		let result = span
			.instrument(async {
				let mut attempt = 0;

				loop {
					let result = self.attempt(request, &url).await;

					match self.policy.decide(attempt, result) {
						AttemptOutcome::Succeed(response) => return Ok(response),
						AttemptOutcome::Fail(error) => return Err(error),
						AttemptOutcome::Retry { delay, reason, error } => {
							obs::trace_retry(KIND, reason, attempt, delay, &error);
							obs::record_retry(KIND, reason);
							tokio::time::sleep(delay).await;

							attempt += 1;
						},
					}
				}
			})
			.await;

		match &result {
			Ok(_) => obs::record_outcome(KIND, Outcome::Success),
			Err(_) => obs::record_outcome(KIND, Outcome::Failure),
		}

		result
	}

	async fn attempt(&self, request: &ApiRequest, url: &Url) -> Result<RawResponse> {
		let pause = self.session.rate_limits().proactive_delay();

		if !pause.is_zero() {
			obs::trace_throttle(pause);
			tokio::time::sleep(pause).await;
		}

		let token = self.tokens.access_token().await?;
		let proof = self.session.proof(&request.method, url, Some(token.expose()))?;
		let http_request = build_request(request, url, token.expose(), &proof)?;
		let slot = ResponseMetadataSlot::default();
		let handle = self.http_client.with_metadata(slot.clone());
		let response = tokio::time::timeout(self.config.timeout, handle.call(http_request))
			.await
			.map_err(|_| TransportError::Timeout { operation: KIND, timeout: self.config.timeout })?
			.map_err(|e| self.error_mapper.map_transport_error(KIND, slot.take().as_ref(), e))?;
		let status = response.status().as_u16();
		let metadata =
			slot.take().unwrap_or_else(|| ResponseMetadata::capture(status, response.headers()));
		let snapshot = self.session.observe(KIND, &metadata);

		if response.status().is_success() {
			return Ok(RawResponse {
				status,
				url: url.clone(),
				metadata,
				body: response.into_body(),
			});
		}

		let now = OffsetDateTime::now_utc();
		let retry_after = if status == 429 { metadata.retry_hint_at(now) } else { None };

		Err(ApiError::from_response(KIND, status, response.body())
			.with_retry_after(retry_after)
			.with_rate_limit(snapshot.or_else(|| self.session.rate_limits().snapshot()))
			.into())
	}

	fn request_url(&self, request: &ApiRequest) -> Result<Url> {
		let mut url = self.config.resource_url(&request.path)?;

		if !request.query.is_empty() {
			url.query_pairs_mut().extend_pairs(request.query.iter());
		}

		Ok(url)
	}
}
#[cfg(feature = "reqwest")]
impl RequestExecutor<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a reqwest-backed executor with a fresh [`AuthSession`].
	pub fn new(config: ClientConfig) -> Result<Self> {
		Self::with_http_client(config, ReqwestHttpClient::new()?, ReqwestTransportErrorMapper)
	}
}
impl<C, M> Debug for RequestExecutor<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestExecutor")
			.field("org_url", &self.config.org_url.as_str())
			.field("policy", &self.policy)
			.field("tokens", &self.tokens)
			.finish_non_exhaustive()
	}
}

fn build_request(
	request: &ApiRequest,
	url: &Url,
	access_token: &str,
	proof: &str,
) -> Result<HttpRequest, ConfigError> {
	let mut builder = Request::builder()
		.method(request.method.clone())
		.uri(url.as_str())
		.header(ACCEPT, "application/json")
		.header(AUTHORIZATION, format!("DPoP {access_token}"))
		.header(DPOP_HEADER, proof);
	let body = match &request.body {
		Some(body) => {
			builder = builder.header(CONTENT_TYPE, "application/json");

			body.to_string().into_bytes()
		},
		None => Vec::new(),
	};

	Ok(builder.body(body)?)
}

fn decode_body<T>(response: &RawResponse) -> Result<T>
where
	T: DeserializeOwned,
{
	let status = Some(response.status);
	let decoded = if response.body.iter().all(u8::is_ascii_whitespace) {
		serde_path_to_error::deserialize(serde_json::Value::Null)
	} else {
		serde_path_to_error::deserialize(&mut serde_json::Deserializer::from_slice(&response.body))
	};

	decoded.map_err(|source| Error::Decode { source, status })
}
