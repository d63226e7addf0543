//! Proof-of-possession (DPoP) proofs bound to a process-lifetime P-256 key.

mod key;
mod nonce;

pub use key::*;
pub use nonce::*;

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, Header};
use oauth2::http::Method;
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, error::CryptoError};

/// Request header carrying the proof.
pub const DPOP_HEADER: &str = "dpop";
/// Response header carrying a server-issued replay nonce.
pub const DPOP_NONCE_HEADER: &str = "dpop-nonce";
/// `typ` header value of every proof.
pub const PROOF_TYPE: &str = "dpop+jwt";

/// Claims embedded in every proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofClaims {
	/// Unique proof identifier.
	pub jti: String,
	/// HTTP method of the bound request.
	pub htm: String,
	/// Target URL without query or fragment.
	pub htu: String,
	/// Issue time in Unix seconds.
	pub iat: i64,
	/// Server-issued replay nonce.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub nonce: Option<String>,
	/// Base64url SHA-256 of the bound access token.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ath: Option<String>,
}

/// Signs DPoP proofs with a lazily generated key.
///
/// The key is created on the first proof and reused for the lifetime of the signer. The signer
/// never touches the shared nonce; callers pass whichever nonce applies.
#[derive(Debug, Default)]
pub struct DpopSigner {
	key: Mutex<Option<Arc<ProofKeyMaterial>>>,
}
impl DpopSigner {
	/// Creates a signer that generates its key on first use.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the signing key, generating it on first use.
	pub fn key(&self) -> Result<Arc<ProofKeyMaterial>, CryptoError> {
		let mut slot = self.key.lock();

		if let Some(key) = slot.as_ref() {
			return Ok(Arc::clone(key));
		}

		let key = Arc::new(ProofKeyMaterial::generate()?);

		*slot = Some(Arc::clone(&key));

		Ok(key)
	}

	/// Signs a proof for `method` + `url`, optionally bound to `access_token` and echoing `nonce`.
	pub fn proof(
		&self,
		method: &Method,
		url: &Url,
		access_token: Option<&str>,
		nonce: Option<&str>,
	) -> Result<String, CryptoError> {
		self.proof_at(method, url, access_token, nonce, OffsetDateTime::now_utc())
	}

	/// Same as [`proof`](Self::proof) with an explicit issue time.
	pub fn proof_at(
		&self,
		method: &Method,
		url: &Url,
		access_token: Option<&str>,
		nonce: Option<&str>,
		issued_at: OffsetDateTime,
	) -> Result<String, CryptoError> {
		let key = self.key()?;
		let mut header = Header::new(Algorithm::ES256);

		header.typ = Some(PROOF_TYPE.into());
		header.jwk = Some(key.jwk().clone());

		let claims = ProofClaims {
			jti: unique_id(),
			htm: method.as_str().to_owned(),
			htu: target_uri(url),
			iat: issued_at.unix_timestamp(),
			nonce: nonce.map(str::to_owned),
			ath: access_token.map(access_token_hash),
		};

		jsonwebtoken::encode(&header, &claims, key.encoding_key())
			.map_err(|source| CryptoError::Signing { source })
	}
}

/// `htu` form of a URL: scheme, authority, and path only.
pub fn target_uri(url: &Url) -> String {
	let mut target = url.clone();

	target.set_query(None);
	target.set_fragment(None);

	target.into()
}

/// `ath` claim for an access token: base64url(SHA-256(token)).
pub fn access_token_hash(access_token: &str) -> String {
	URL_SAFE_NO_PAD.encode(Sha256::digest(access_token.as_bytes()))
}

/// 128-bit random identifier encoded as base64url.
pub(crate) fn unique_id() -> String {
	URL_SAFE_NO_PAD.encode(rand::random::<[u8; 16]>())
}
