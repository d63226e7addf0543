//! Optional observability helpers for token exchanges and resource calls.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `governance_transport.operation` with the
//!   `operation` and `stage` fields, plus events for retries, throttling, and nonce rotation.
//! - Enable `metrics` to increment `governance_transport_operation_total` for every
//!   attempt/success/failure (labeled by `operation` + `outcome`) and
//!   `governance_transport_retry_total` for every scheduled retry (labeled by `operation` +
//!   `reason`).

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Outbound operations observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
	/// Client credentials exchange against the token endpoint.
	TokenExchange,
	/// Authenticated call against a resource endpoint.
	ResourceCall,
}
impl OperationKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OperationKind::TokenExchange => "token_exchange",
			OperationKind::ResourceCall => "resource_call",
		}
	}
}
impl Display for OperationKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl Outcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Outcome::Attempt => "attempt",
			Outcome::Success => "success",
			Outcome::Failure => "failure",
		}
	}
}
impl Display for Outcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
