//! Transport primitives shared by token exchanges and resource calls.
//!
//! The module exposes [`TokenHttpClient`] alongside [`ResponseMetadata`] and
//! [`ResponseMetadataSlot`] so embedding crates can plug in custom HTTP clients without losing
//! the metadata the retry and nonce logic depends on. Implementations call
//! [`ResponseMetadataSlot::take`] before dispatching a request and
//! [`ResponseMetadataSlot::store`] once a response status and headers are known.

// std
#[cfg(feature = "reqwest")] use std::ops::Deref;
// crates.io
#[cfg(feature = "reqwest")] use oauth2::HttpResponse;
use oauth2::{
	AsyncHttpClient, HttpClientError, HttpRequest,
	http::{HeaderMap, HeaderValue, header::RETRY_AFTER},
};
use time::format_description::well_known::Rfc2822;
// self
use crate::{
	_prelude::*,
	dpop::{DPOP_HEADER, DPOP_NONCE_HEADER},
	error::{ConfigError, header_str},
	rate_limit::RESET_HEADER,
};

/// Abstraction over HTTP transports used for both token exchanges and resource calls.
///
/// Callers provide an implementation (typically behind `Arc<T>`) and the crate requests
/// short-lived [`AsyncHttpClient`] handles that each carry a clone of a
/// [`ResponseMetadataSlot`]. Implementations must be `Send + Sync + 'static`, and the handles
/// they return must own whatever state they need so their request futures stay `Send`.
pub trait TokenHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// [`AsyncHttpClient`] handle tied to a [`ResponseMetadataSlot`].
	type Handle: for<'c> AsyncHttpClient<
			'c,
			Error = HttpClientError<Self::TransportError>,
			Future: 'c + Send,
		>
		+ 'static
		+ Send
		+ Sync;

	/// Builds an [`AsyncHttpClient`] handle that records outcomes in `slot`.
	///
	/// # Metadata Contract
	///
	/// - Call [`ResponseMetadataSlot::take`] before submitting the HTTP request so stale
	///   information never leaks across retries.
	/// - Once a response (successful or not) is received, save it with
	///   [`ResponseMetadataSlot::store`], typically via [`ResponseMetadata::capture`].
	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle;
}

/// Metadata captured from the most recent HTTP response.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code, if a response was received.
	pub status: Option<u16>,
	/// `Retry-After` hint expressed as a relative duration.
	pub retry_after: Option<StdDuration>,
	/// Replay nonce issued through the `DPoP-Nonce` header.
	pub dpop_nonce: Option<String>,
	/// Full response header map.
	pub headers: HeaderMap,
}
impl ResponseMetadata {
	/// Captures the status and headers of a response.
	pub fn capture(status: u16, headers: &HeaderMap) -> Self {
		Self {
			status: Some(status),
			retry_after: parse_retry_after(headers),
			dpop_nonce: header_str(headers, DPOP_NONCE_HEADER).map(str::to_owned),
			headers: headers.clone(),
		}
	}

	/// Retry hint for a throttled response observed at `now`.
	///
	/// `Retry-After` wins; otherwise the time left until the quota window resets, when positive.
	pub fn retry_hint_at(&self, now: OffsetDateTime) -> Option<StdDuration> {
		if let Some(retry_after) = self.retry_after {
			return Some(retry_after);
		}

		let reset = header_str(&self.headers, RESET_HEADER)?.parse::<i64>().ok()?;
		let until_reset = OffsetDateTime::from_unix_timestamp(reset).ok()? - now;

		if until_reset.is_positive() { StdDuration::try_from(until_reset).ok() } else { None }
	}
}

/// Thread-safe slot for sharing [`ResponseMetadata`] between transport and error layers.
///
/// A fresh slot is created for every request and read right after the call resolves.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores new metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Returns the captured metadata, if any, consuming it from the slot.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// Handle decorator that attaches a DPoP proof to the wrapped request.
///
/// The token exchange request is assembled by `oauth2`, so the proof is injected at the
/// transport seam instead.
pub struct ProofBoundHandle<H> {
	inner: H,
	proof: HeaderValue,
}
impl<H> ProofBoundHandle<H> {
	/// Wraps `inner`, attaching `proof` to every request it sends.
	pub fn new(inner: H, proof: &str) -> Result<Self, ConfigError> {
		let proof =
			HeaderValue::from_str(proof).map_err(|_| ConfigError::InvalidHeader { name: "DPoP" })?;

		Ok(Self { inner, proof })
	}
}
impl<'c, H> AsyncHttpClient<'c> for ProofBoundHandle<H>
where
	H: AsyncHttpClient<'c>,
{
	type Error = H::Error;
	type Future = H::Future;

	fn call(&'c self, mut request: HttpRequest) -> Self::Future {
		request.headers_mut().insert(DPOP_HEADER, self.proof.clone());

		self.inner.call(request)
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
///
/// Redirects are not followed: the token endpoint must answer directly and resource calls must
/// not leak proofs to another origin. Configure any custom [`ReqwestClient`] the same way.
#[cfg(feature = "reqwest")]
#[derive(Clone)]
pub struct ReqwestHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Builds a client that never follows redirects.
	pub fn new() -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder().redirect(reqwest::redirect::Policy::none()).build()?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds an instrumented handle that captures response metadata.
	pub(crate) fn instrumented(&self, slot: ResponseMetadataSlot) -> InstrumentedHandle {
		InstrumentedHandle::new(self.0.clone(), slot)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl TokenHttpClient for ReqwestHttpClient {
	type Handle = InstrumentedHandle;
	type TransportError = ReqwestError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		self.instrumented(slot)
	}
}

#[cfg(feature = "reqwest")]
struct InstrumentedHttpClient {
	client: ReqwestClient,
	slot: ResponseMetadataSlot,
}

/// Handle returned by [`ReqwestHttpClient`] that satisfies [`TokenHttpClient`].
#[cfg(feature = "reqwest")]
#[derive(Clone)]
pub struct InstrumentedHandle(Arc<InstrumentedHttpClient>);
#[cfg(feature = "reqwest")]
impl InstrumentedHandle {
	fn new(client: ReqwestClient, slot: ResponseMetadataSlot) -> Self {
		Self(Arc::new(InstrumentedHttpClient { client, slot }))
	}
}
#[cfg(feature = "reqwest")]
impl<'c> AsyncHttpClient<'c> for InstrumentedHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let client = Arc::clone(&self.0);

		Box::pin(async move {
			client.slot.take();

			let response = client
				.client
				.execute(request.try_into().map_err(Box::new)?)
				.await
				.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();

			client.slot.store(ResponseMetadata::capture(status.as_u16(), &headers));

			let mut response_new =
				HttpResponse::new(response.bytes().await.map_err(Box::new)?.to_vec());

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}

/// Parses `Retry-After` as delta seconds or an HTTP date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<StdDuration> {
	parse_retry_after_at(headers, OffsetDateTime::now_utc())
}

fn parse_retry_after_at(headers: &HeaderMap, now: OffsetDateTime) -> Option<StdDuration> {
	let raw = header_str(headers, RETRY_AFTER.as_str())?;

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(StdDuration::from_secs(secs));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - now;

		if delta.is_positive() {
			return StdDuration::try_from(delta).ok();
		}
	}

	None
}
