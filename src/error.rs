//! Crate-level error types and the structured error report surfaced to callers.
//!
//! Every failure path ends in [`Error`]. Upstream HTTP failures are classified once, at the point
//! where the response is read, into an [`ApiError`]; local failures (configuration, key material,
//! transport faults, payload decoding) keep their own variants but can always be rendered into
//! the same [`ApiError`] shape through [`Error::report`].

// crates.io
use oauth2::http::HeaderMap;
// self
use crate::{_prelude::*, obs::OperationKind, rate_limit::RateLimitState};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Key import or signing failure.
	#[error(transparent)]
	Crypto(#[from] CryptoError),
	/// Transport failure (timeout, connect, DNS, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Token endpoint answered with a payload that breaks the token contract.
	#[error(transparent)]
	Protocol(#[from] ProtocolError),
	/// A successful response body did not match the expected shape.
	#[error("Response body could not be decoded: {source}.")]
	Decode {
		/// Structured parsing failure including the JSON path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code of the decoded response.
		status: Option<u16>,
	},
	/// Classified upstream failure, or the report of a failed token acquisition shared with the
	/// callers that awaited it.
	#[error(transparent)]
	Api(Box<ApiError>),
}
impl Error {
	/// Returns the closed classification for this error.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Config(_) | Self::Protocol(_) | Self::Decode { .. } => ErrorKind::Unknown,
			Self::Crypto(_) => ErrorKind::Auth,
			Self::Transport(_) => ErrorKind::Network,
			Self::Api(api) => api.kind,
		}
	}

	/// HTTP status attached to the failure, when one was observed.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Decode { status, .. } => *status,
			Self::Api(api) => api.status,
			_ => None,
		}
	}

	/// Returns `true` when the failure is transient (throttling, server error, transport fault).
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::Transport(_) => true,
			Self::Api(api) => matches!(api.kind, ErrorKind::RateLimit | ErrorKind::Network)
				|| api.status.is_some_and(|status| status >= 500),
			_ => false,
		}
	}

	/// Server-declared retry interval carried by a throttling error.
	pub fn retry_after(&self) -> Option<StdDuration> {
		match self {
			Self::Api(api) => api.retry_after,
			_ => None,
		}
	}

	/// Renders the error into the structured report shape shared by every failure path.
	pub fn report(&self) -> ApiError {
		match self {
			Self::Api(api) => api.as_ref().clone(),
			other => ApiError::new(other.kind(), other.to_string()).with_optional_status(other.status()),
		}
	}
}
impl From<ApiError> for Error {
	fn from(e: ApiError) -> Self {
		Self::Api(Box::new(e))
	}
}

/// Closed classification of every failure surfaced by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	/// HTTP 429.
	RateLimit,
	/// HTTP 401/403 or unusable client credentials.
	Auth,
	/// HTTP 404.
	NotFound,
	/// HTTP 400/422.
	Validation,
	/// Timeout, connect, or other transport-level fault.
	Network,
	/// Generic upstream failure (5xx and unclassified statuses).
	Api,
	/// Anything that could not be classified.
	Unknown,
}
impl ErrorKind {
	/// Classifies an HTTP status code.
	pub fn from_status(status: u16) -> Self {
		match status {
			429 => Self::RateLimit,
			401 | 403 => Self::Auth,
			404 => Self::NotFound,
			400 | 422 => Self::Validation,
			_ => Self::Api,
		}
	}

	/// Returns a stable label suitable for logs or serialized reports.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::RateLimit => "rate_limit",
			Self::Auth => "auth",
			Self::NotFound => "not_found",
			Self::Validation => "validation",
			Self::Network => "network",
			Self::Api => "api",
			Self::Unknown => "unknown",
		}
	}

	/// Actionable suggestion attached to reports of this kind.
	pub const fn suggestion(self) -> &'static str {
		match self {
			Self::RateLimit =>
				"Too many requests were sent. Wait for the rate-limit window to reset before retrying.",
			Self::Auth =>
				"Check the client id, private key, and granted scopes configured for this application.",
			Self::NotFound => "Verify that the resource identifier exists and is visible to this client.",
			Self::Validation => "Review the request parameters against the endpoint requirements.",
			Self::Network => "Check network connectivity to the org and retry the request.",
			Self::Api =>
				"The upstream service reported an error. Retry later or contact support with the error id.",
			Self::Unknown => "Inspect the error details; the failure could not be classified.",
		}
	}
}
impl Display for ErrorKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Structured error report created where a raw failure is classified.
///
/// Reports are immutable once built; the `with_*` helpers consume `self` and are only used
/// while the report is being assembled.
#[derive(Clone, Debug, PartialEq, Serialize, ThisError)]
#[error("{message}")]
pub struct ApiError {
	/// Closed classification.
	pub kind: ErrorKind,
	/// Human-readable summary.
	pub message: String,
	/// HTTP status code, when the failure came from a response.
	pub status: Option<u16>,
	/// Upstream error code (`errorCode` or OAuth `error`).
	pub code: Option<String>,
	/// Upstream error identifier (`errorId`).
	pub id: Option<String>,
	/// Upstream error causes, in the order reported.
	pub causes: Vec<String>,
	/// Actionable suggestion for the caller.
	pub suggestion: String,
	/// Server-declared retry interval.
	#[serde(rename = "retry_after_ms", serialize_with = "serialize_millis")]
	pub retry_after: Option<StdDuration>,
	/// Quota snapshot observed alongside the failure.
	pub rate_limit: Option<RateLimitState>,
	/// Instant the report was created.
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
}
impl ApiError {
	/// Creates a report of `kind` with the kind's default suggestion.
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		Self {
			kind,
			message: message.into(),
			status: None,
			code: None,
			id: None,
			causes: Vec::new(),
			suggestion: kind.suggestion().into(),
			retry_after: None,
			rate_limit: None,
			timestamp: OffsetDateTime::now_utc(),
		}
	}

	/// Classifies a non-success HTTP response and decodes its error body when possible.
	pub fn from_response(operation: OperationKind, status: u16, body: &[u8]) -> Self {
		let kind = ErrorKind::from_status(status);
		let upstream = serde_json::from_slice::<UpstreamErrorBody>(body).ok();
		let summary = upstream.as_ref().and_then(UpstreamErrorBody::summary);
		let message = match summary {
			Some(summary) => format!("{operation} failed with HTTP {status}: {summary}"),
			None => format!("{operation} failed with HTTP {status}."),
		};
		let mut report = Self::new(kind, message).with_status(status);

		if let Some(upstream) = upstream {
			report.code = upstream.error_code.or(upstream.error);
			report.id = upstream.error_id;
			report.causes = upstream
				.error_causes
				.into_iter()
				.filter_map(|cause| cause.error_summary)
				.collect();
		}

		report
	}

	/// Attaches an HTTP status.
	pub fn with_status(mut self, status: u16) -> Self {
		self.status = Some(status);

		self
	}

	fn with_optional_status(mut self, status: Option<u16>) -> Self {
		self.status = status;

		self
	}

	/// Attaches an upstream error code.
	pub fn with_code(mut self, code: impl Into<String>) -> Self {
		self.code = Some(code.into());

		self
	}

	/// Attaches a retry hint.
	pub fn with_retry_after(mut self, retry_after: Option<StdDuration>) -> Self {
		self.retry_after = retry_after;

		self
	}

	/// Attaches a quota snapshot.
	pub fn with_rate_limit(mut self, snapshot: Option<RateLimitState>) -> Self {
		self.rate_limit = snapshot;

		self
	}
}

/// Error body shapes understood when classifying upstream failures.
///
/// Resource APIs answer with `errorCode`/`errorSummary`/`errorId`/`errorCauses`, while the
/// token endpoint answers with OAuth `error`/`error_description`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpstreamErrorBody {
	error_code: Option<String>,
	error_summary: Option<String>,
	error_id: Option<String>,
	#[serde(default)]
	error_causes: Vec<UpstreamErrorCause>,
	error: Option<String>,
	#[serde(rename = "error_description")]
	error_description: Option<String>,
}
impl UpstreamErrorBody {
	fn summary(&self) -> Option<String> {
		self.error_summary
			.clone()
			.or_else(|| self.error_description.clone())
			.or_else(|| self.error.clone())
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpstreamErrorCause {
	error_summary: Option<String>,
}

/// Configuration and request-construction failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// A URL could not be parsed or joined.
	#[error("URL is invalid: {source}.")]
	InvalidUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Endpoints must use HTTPS outside loopback hosts.
	#[error("The {endpoint} URL must use HTTPS: {url}.")]
	InsecureUrl {
		/// Which URL failed validation.
		endpoint: &'static str,
		/// URL that failed validation.
		url: String,
	},
	/// Absolute request URLs must stay on the configured org.
	#[error("Request URL {url} does not belong to the configured org.")]
	ForeignUrl {
		/// Rejected URL.
		url: String,
	},
	/// At least one scope must be requested.
	#[error("At least one scope must be configured.")]
	EmptyScopes,
	/// Requested scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Identifier validation failed.
	#[error(transparent)]
	InvalidIdentifier(#[from] crate::auth::IdentifierError),
	/// The per-attempt timeout must be positive.
	#[error("The request timeout must be greater than zero.")]
	ZeroTimeout,
	/// Retry bound exceeds the supported range.
	#[error("The retry bound {requested} exceeds the supported maximum of {max}.")]
	TooManyRetries {
		/// Requested retry count.
		requested: u32,
		/// Maximum supported retry count.
		max: u32,
	},
	/// A header value could not be encoded.
	#[error("Header `{name}` contains characters that cannot be sent.")]
	InvalidHeader {
		/// Header name.
		name: &'static str,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<url::ParseError> for ConfigError {
	fn from(source: url::ParseError) -> Self {
		Self::InvalidUrl { source }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Key import and signing failures. Both are fatal: a broken key fails every later call the
/// same way, so these are never retried.
#[derive(Debug, ThisError)]
pub enum CryptoError {
	/// The configured assertion signing key could not be parsed.
	#[error("Signing key could not be imported: {reason}.")]
	KeyImport {
		/// Parser-supplied reason.
		reason: String,
	},
	/// The proof key pair could not be generated.
	#[error("Proof key pair could not be generated: {reason}.")]
	KeyGeneration {
		/// Generator-supplied reason.
		reason: String,
	},
	/// A token could not be signed.
	#[error("Token signing failed.")]
	Signing {
		/// Underlying JWS failure.
		#[source]
		source: jsonwebtoken::errors::Error,
	},
}

/// Token endpoint responses that violate the token contract.
#[derive(Debug, ThisError)]
pub enum ProtocolError {
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token lifetime does not outlast the refresh safety margin.
	#[error("Token lifetime of {expires_in}s does not exceed the {margin}s safety margin.")]
	LifetimeTooShort {
		/// Server-declared lifetime in seconds.
		expires_in: u64,
		/// Safety margin in seconds.
		margin: i64,
	},
	/// Token endpoint answered with a response the OAuth client could not interpret.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	UnexpectedResponse {
		/// Client-supplied description.
		message: String,
	},
}

/// Transport-level failures, tagged at the single point where the HTTP call is issued.
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// The attempt exceeded the configured timeout.
	#[error("The {operation} attempt timed out after {timeout:?}.")]
	Timeout {
		/// Operation that timed out.
		operation: OperationKind,
		/// Timeout that elapsed.
		timeout: StdDuration,
	},
	/// The connection could not be established.
	#[error("Could not connect while performing the {operation}.")]
	Connect {
		/// Operation being attempted.
		operation: OperationKind,
		/// Transport-specific failure.
		#[source]
		source: BoxError,
	},
	/// Any other network failure.
	#[error("Network error occurred while performing the {operation}.")]
	Network {
		/// Operation being attempted.
		operation: OperationKind,
		/// Transport-specific failure.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred during transport.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(
		operation: OperationKind,
		src: impl 'static + Send + Sync + std::error::Error,
	) -> Self {
		Self::Network { operation, source: Box::new(src) }
	}
}

/// Extracts a header as a trimmed string slice.
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
	headers.get(name)?.to_str().ok().map(str::trim).filter(|value| !value.is_empty())
}

fn serialize_millis<S>(value: &Option<StdDuration>, serializer: S) -> Result<S::Ok, S::Error>
where
	S: serde::Serializer,
{
	match value {
		Some(duration) =>
			serializer.serialize_some(&u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)),
		None => serializer.serialize_none(),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn status_classification_is_exhaustive() {
		assert_eq!(ErrorKind::from_status(429), ErrorKind::RateLimit);
		assert_eq!(ErrorKind::from_status(401), ErrorKind::Auth);
		assert_eq!(ErrorKind::from_status(403), ErrorKind::Auth);
		assert_eq!(ErrorKind::from_status(404), ErrorKind::NotFound);
		assert_eq!(ErrorKind::from_status(400), ErrorKind::Validation);
		assert_eq!(ErrorKind::from_status(422), ErrorKind::Validation);
		assert_eq!(ErrorKind::from_status(500), ErrorKind::Api);
		assert_eq!(ErrorKind::from_status(503), ErrorKind::Api);
		assert_eq!(ErrorKind::from_status(409), ErrorKind::Api);
	}

	#[test]
	fn upstream_error_body_is_decoded() {
		let body = br#"{
			"errorCode": "E0000001",
			"errorSummary": "Api validation failed: name",
			"errorId": "oae123",
			"errorCauses": [{ "errorSummary": "name: must not be blank" }]
		}"#;
		let report = ApiError::from_response(OperationKind::ResourceCall, 422, body);

		assert_eq!(report.kind, ErrorKind::Validation);
		assert_eq!(report.status, Some(422));
		assert_eq!(report.code.as_deref(), Some("E0000001"));
		assert_eq!(report.id.as_deref(), Some("oae123"));
		assert_eq!(report.causes, vec!["name: must not be blank".to_string()]);
		assert!(report.message.contains("Api validation failed: name"));
		assert_eq!(report.suggestion, ErrorKind::Validation.suggestion());
	}

	#[test]
	fn oauth_error_body_is_decoded() {
		let body = br#"{"error":"invalid_client","error_description":"The client_assertion is invalid."}"#;
		let report = ApiError::from_response(OperationKind::TokenExchange, 401, body);

		assert_eq!(report.kind, ErrorKind::Auth);
		assert_eq!(report.code.as_deref(), Some("invalid_client"));
		assert!(report.message.contains("The client_assertion is invalid."));
	}

	#[test]
	fn non_json_bodies_fall_back_to_status() {
		let report = ApiError::from_response(OperationKind::ResourceCall, 502, b"<html>bad gateway</html>");

		assert_eq!(report.kind, ErrorKind::Api);
		assert!(report.code.is_none());
		assert!(report.causes.is_empty());
		assert!(report.message.contains("HTTP 502"));
	}

	#[test]
	fn every_error_renders_a_report() {
		let timeout: Error = TransportError::Timeout {
			operation: OperationKind::ResourceCall,
			timeout: StdDuration::from_secs(5),
		}
		.into();
		let report = timeout.report();

		assert_eq!(report.kind, ErrorKind::Network);
		assert!(timeout.is_retryable());
		assert_eq!(report.suggestion, ErrorKind::Network.suggestion());

		let crypto: Error = CryptoError::KeyImport { reason: "not a key".into() }.into();

		assert_eq!(crypto.kind(), ErrorKind::Auth);
		assert!(!crypto.is_retryable());
	}

	#[test]
	fn reports_keep_retryability() {
		let timeout: Error = TransportError::Timeout {
			operation: OperationKind::TokenExchange,
			timeout: StdDuration::from_secs(5),
		}
		.into();
		let shared: Error = timeout.report().into();

		assert_eq!(shared.kind(), ErrorKind::Network);
		assert!(shared.is_retryable());

		let decode: Error = ProtocolError::MissingExpiresIn.into();
		let shared: Error = decode.report().into();

		assert_eq!(shared.kind(), ErrorKind::Unknown);
		assert!(!shared.is_retryable());
	}

	#[test]
	fn report_serializes_with_stable_labels() {
		let report = ApiError::new(ErrorKind::RateLimit, "throttled")
			.with_status(429)
			.with_retry_after(Some(StdDuration::from_millis(1500)));
		let value = serde_json::to_value(&report).expect("Report should serialize.");

		assert_eq!(value["kind"], "rate_limit");
		assert_eq!(value["retry_after_ms"], 1500);
		assert_eq!(value["status"], 429);
	}
}
