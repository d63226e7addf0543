//! Client credentials exchange against the token endpoint.
//!
//! The grant is assembled by `oauth2` and sent through a [`TokenHttpClient`] handle wrapped in a
//! [`ProofBoundHandle`], so the request carries the DPoP proof while the response still feeds
//! the shared metadata slot. Failures are classified here, once; a nonce challenge is surfaced as
//! [`ExchangeOutcome::NonceChallenge`] rather than as an error.

pub use oauth2;

// crates.io
use oauth2::{
	ClientId as OAuthClientId, EndpointNotSet, EndpointSet, HttpClientError, RequestTokenError,
	Scope, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError, BasicTokenResponse},
};
// self
use crate::{
	_prelude::*,
	assertion::CLIENT_ASSERTION_TYPE,
	auth::{ScopeSet, TokenSecret},
	config::ClientConfig,
	error::{ApiError, ConfigError, ProtocolError, TransportError},
	http::{ProofBoundHandle, ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	obs::OperationKind,
	rate_limit::RateLimitState,
};

/// OAuth error code announcing that the proof must carry a server nonce.
pub const USE_DPOP_NONCE: &str = "use_dpop_nonce";

type ConfiguredBasicClient =
	BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;
type FacadeFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a + Send>>;

/// Maps HTTP transport failures into crate [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into a crate error.
	fn map_transport_error(
		&self,
		operation: OperationKind,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		operation: OperationKind,
		_metadata: Option<&ResponseMetadata>,
		error: HttpClientError<ReqwestError>,
	) -> Error {
		match error {
			HttpClientError::Reqwest(inner) => map_reqwest_error(operation, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) =>
				TransportError::Network { operation, source: message.into() }.into(),
			_ => TransportError::Network {
				operation,
				source: "unrecognized HTTP client failure".into(),
			}
			.into(),
		}
	}
}

/// Token issued by a successful exchange.
#[derive(Clone, Debug)]
pub struct TokenGrant {
	/// Access token value.
	pub access_token: TokenSecret,
	/// Token type announced by the server.
	pub token_type: String,
	/// Server-declared lifetime.
	pub expires_in: Duration,
}

/// Result of one token endpoint round trip.
#[derive(Debug)]
pub enum ExchangeOutcome {
	/// The server issued a token.
	Issued(TokenGrant),
	/// The server demands a nonce; `nonce` is the value from the `DPoP-Nonce` header.
	NonceChallenge {
		/// Nonce to echo in the next proof, when the server provided one.
		nonce: Option<String>,
	},
}

/// Outcome of an exchange plus the metadata of the response that produced it.
///
/// Metadata is returned even on failure so callers can pick up a rotated nonce.
#[derive(Debug)]
pub struct ExchangeResponse {
	/// Classified result.
	pub outcome: Result<ExchangeOutcome>,
	/// Status and headers of the response, when one was received.
	pub metadata: Option<ResponseMetadata>,
}

/// `oauth2`-backed client for the configured token endpoint.
pub(crate) struct TokenEndpoint<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	oauth_client: ConfiguredBasicClient,
	url: Url,
	scopes: ScopeSet,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
}
impl<C, M> TokenEndpoint<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	pub(crate) fn from_config(
		config: &ClientConfig,
		http_client: Arc<C>,
		error_mapper: Arc<M>,
	) -> Result<Self> {
		let url = config.token_endpoint()?;
		let token_url = TokenUrl::from_url(url.clone());
		let oauth_client =
			BasicClient::new(OAuthClientId::new(config.client_id.to_string())).set_token_uri(token_url);

		Ok(Self { oauth_client, url, scopes: config.scopes.clone(), http_client, error_mapper })
	}

	/// Token endpoint URL; the audience of every assertion and the `htu` of every exchange proof.
	pub(crate) fn url(&self) -> &Url {
		&self.url
	}

	/// Submits one client credentials grant carrying `assertion`, with `proof` as the DPoP header.
	pub(crate) fn exchange<'a>(
		&'a self,
		assertion: String,
		proof: String,
	) -> FacadeFuture<'a, ExchangeResponse> {
		let slot = ResponseMetadataSlot::default();

		Box::pin(async move {
			let handle = match ProofBoundHandle::new(self.http_client.with_metadata(slot.clone()), &proof)
			{
				Ok(handle) => handle,
				Err(e) => return ExchangeResponse { outcome: Err(e.into()), metadata: None },
			};
			let mut request = self
				.oauth_client
				.exchange_client_credentials()
				.add_extra_param("client_assertion_type", CLIENT_ASSERTION_TYPE)
				.add_extra_param("client_assertion", assertion);

			for scope in self.scopes.iter() {
				request = request.add_scope(Scope::new(scope.to_owned()));
			}

			let result = request.request_async(&handle).await;
			let metadata = slot.take();
			let outcome = match result {
				Ok(response) => token_grant(&response).map(ExchangeOutcome::Issued),
				Err(e) => classify_failure(e, metadata.as_ref(), self.error_mapper.as_ref()),
			};

			ExchangeResponse { outcome, metadata }
		})
	}
}

fn token_grant(response: &BasicTokenResponse) -> Result<TokenGrant> {
	let expires_in = response.expires_in().ok_or(ProtocolError::MissingExpiresIn)?.as_secs();
	let expires_in = i64::try_from(expires_in).map_err(|_| ProtocolError::ExpiresInOutOfRange)?;

	Ok(TokenGrant {
		access_token: TokenSecret::new(response.access_token().secret().to_owned()),
		token_type: response.token_type().as_ref().to_owned(),
		expires_in: Duration::seconds(expires_in),
	})
}

fn classify_failure<E, M>(
	error: BasicRequestTokenError<HttpClientError<E>>,
	meta: Option<&ResponseMetadata>,
	mapper: &M,
) -> Result<ExchangeOutcome>
where
	E: 'static + Send + Sync + StdError,
	M: ?Sized + TransportErrorMapper<E>,
{
	let status = meta.and_then(|meta| meta.status);

	match error {
		RequestTokenError::ServerResponse(response) => {
			if response.error().as_ref() == USE_DPOP_NONCE {
				return Ok(challenge(meta));
			}

			Err(server_error(&response, meta))
		},
		RequestTokenError::Parse(source, body) => {
			if is_nonce_challenge_body(&body) {
				return Ok(challenge(meta));
			}

			match status {
				Some(status) if status != 200 => Err(upstream_error(status, &body, meta)),
				_ => Err(Error::Decode { source, status }),
			}
		},
		RequestTokenError::Request(e) =>
			Err(mapper.map_transport_error(OperationKind::TokenExchange, meta, e)),
		RequestTokenError::Other(message) => match status {
			Some(status) if status != 200 => Err(upstream_error(status, &[], meta)),
			_ => Err(ProtocolError::UnexpectedResponse { message }.into()),
		},
	}
}

fn challenge(meta: Option<&ResponseMetadata>) -> ExchangeOutcome {
	ExchangeOutcome::NonceChallenge { nonce: meta.and_then(|meta| meta.dpop_nonce.clone()) }
}

fn is_nonce_challenge_body(body: &[u8]) -> bool {
	String::from_utf8_lossy(body).contains(USE_DPOP_NONCE)
}

fn server_error(response: &BasicErrorResponse, meta: Option<&ResponseMetadata>) -> Error {
	let status = meta.and_then(|meta| meta.status).unwrap_or(400);
	let body = serde_json::to_vec(response).unwrap_or_default();

	upstream_error(status, &body, meta)
}

fn upstream_error(status: u16, body: &[u8], meta: Option<&ResponseMetadata>) -> Error {
	let now = OffsetDateTime::now_utc();

	ApiError::from_response(OperationKind::TokenExchange, status, body)
		.with_retry_after(meta.and_then(|meta| meta.retry_hint_at(now)))
		.with_rate_limit(meta.and_then(|meta| RateLimitState::from_headers(&meta.headers, now)))
		.into()
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(operation: OperationKind, error: ReqwestError) -> Error {
	if error.is_builder() {
		return ConfigError::from(error).into();
	}
	if error.is_connect() {
		return TransportError::Connect { operation, source: Box::new(error) }.into();
	}

	TransportError::network(operation, error).into()
}
