// self
use crate::_prelude::*;

/// Most recent replay nonce issued by the server, shared by every proof.
///
/// Each new value overwrites the previous one.
#[derive(Debug, Default)]
pub struct ReplayNonce(RwLock<Option<String>>);
impl ReplayNonce {
	/// Creates an empty holder.
	pub fn new() -> Self {
		Self::default()
	}

	/// Current nonce, if the server has issued one.
	pub fn current(&self) -> Option<String> {
		self.0.read().clone()
	}

	/// Stores `nonce`; returns `true` when it differs from the previous value.
	pub fn update(&self, nonce: impl Into<String>) -> bool {
		let nonce = nonce.into();
		let mut slot = self.0.write();

		if slot.as_deref() == Some(nonce.as_str()) {
			return false;
		}

		*slot = Some(nonce);

		true
	}
}
