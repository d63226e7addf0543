// self
use crate::{_prelude::*, obs::OperationKind, retry::RetryReason};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedOperation<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedOperation<F> = F;

/// A span builder used around token exchanges and resource calls.
#[derive(Clone, Debug)]
pub struct OperationSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl OperationSpan {
	/// Creates a new span tagged with the provided operation + stage.
	pub fn new(kind: OperationKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span =
				tracing::info_span!("governance_transport.operation", operation = kind.as_str(), stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedOperation<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Emits a warning for a scheduled retry.
pub fn trace_retry(
	kind: OperationKind,
	reason: RetryReason,
	attempt: u32,
	delay: StdDuration,
	error: &Error,
) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(
			operation = kind.as_str(),
			reason = reason.as_str(),
			attempt,
			delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
			error = %error,
			"retrying request"
		);
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (kind, reason, attempt, delay, error);
	}
}

/// Emits a debug event when the client paces itself ahead of the quota reset.
pub fn trace_throttle(delay: StdDuration) {
	#[cfg(feature = "tracing")]
	{
		tracing::debug!(
			delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
			"pacing request ahead of rate-limit reset"
		);
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = delay;
	}
}

/// Emits a debug event when the authorization server rotates the replay nonce.
pub fn trace_nonce_rotation(kind: OperationKind) {
	#[cfg(feature = "tracing")]
	{
		tracing::debug!(operation = kind.as_str(), "replay nonce rotated");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = kind;
	}
}

/// Emits a debug event when the token endpoint demands a nonce.
pub fn trace_nonce_challenge() {
	#[cfg(feature = "tracing")]
	{
		tracing::debug!("token endpoint issued a nonce challenge; rebuilding assertion and proof");
	}
}
