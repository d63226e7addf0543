//! `private_key_jwt` client assertions (RFC 7523) signed with the configured key.

// crates.io
use jsonwebtoken::{Algorithm, EncodingKey, Header};
// self
use crate::{
	_prelude::*,
	auth::{ClientId, KeyId},
	config::ClientConfig,
	dpop::unique_id,
	error::CryptoError,
};

/// `client_assertion_type` value sent alongside every assertion.
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
/// Validity window of a single assertion.
pub const ASSERTION_LIFETIME: Duration = Duration::minutes(5);

/// Claims embedded in every assertion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
	/// Issuer; always the client id.
	pub iss: String,
	/// Subject; always the client id.
	pub sub: String,
	/// Audience; the token endpoint URL.
	pub aud: String,
	/// Issue time in Unix seconds.
	pub iat: i64,
	/// Expiry in Unix seconds.
	pub exp: i64,
	/// Unique assertion identifier.
	pub jti: String,
}

/// Builds signed client assertions.
///
/// Every call produces a fresh `jti`, so a rebuilt assertion is never byte-identical to a
/// previous one.
pub struct AssertionSigner {
	client_id: ClientId,
	key_id: Option<KeyId>,
	algorithm: Algorithm,
	key: EncodingKey,
}
impl AssertionSigner {
	/// Imports a PEM private key. RSA keys sign with RS256, P-256 keys with ES256.
	pub fn from_pem(
		client_id: ClientId,
		private_key_pem: &str,
		key_id: Option<KeyId>,
	) -> Result<Self, CryptoError> {
		let (algorithm, key) = import_key(private_key_pem)?;

		Ok(Self { client_id, key_id, algorithm, key })
	}

	/// Imports the signing key named by `config`.
	pub fn from_config(config: &ClientConfig) -> Result<Self, CryptoError> {
		Self::from_pem(
			config.client_id.clone(),
			config.private_key_pem.expose(),
			config.key_id.clone(),
		)
	}

	/// Algorithm detected from the key.
	pub fn algorithm(&self) -> Algorithm {
		self.algorithm
	}

	/// Signs an assertion for `audience` issued now.
	pub fn assertion(&self, audience: &Url) -> Result<String, CryptoError> {
		self.assertion_at(audience, OffsetDateTime::now_utc())
	}

	/// Signs an assertion for `audience` issued at `issued_at`.
	pub fn assertion_at(
		&self,
		audience: &Url,
		issued_at: OffsetDateTime,
	) -> Result<String, CryptoError> {
		let mut header = Header::new(self.algorithm);

		header.kid = self.key_id.as_ref().map(ToString::to_string);

		let claims = AssertionClaims {
			iss: self.client_id.to_string(),
			sub: self.client_id.to_string(),
			aud: audience.to_string(),
			iat: issued_at.unix_timestamp(),
			exp: (issued_at + ASSERTION_LIFETIME).unix_timestamp(),
			jti: unique_id(),
		};

		jsonwebtoken::encode(&header, &claims, &self.key)
			.map_err(|source| CryptoError::Signing { source })
	}
}
impl Debug for AssertionSigner {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AssertionSigner")
			.field("client_id", &self.client_id)
			.field("key_id", &self.key_id)
			.field("algorithm", &self.algorithm)
			.field("key", &"<redacted>")
			.finish()
	}
}

fn import_key(pem: &str) -> Result<(Algorithm, EncodingKey), CryptoError> {
	if let Ok(key) = EncodingKey::from_rsa_pem(pem.as_bytes()) {
		return Ok((Algorithm::RS256, key));
	}

	match EncodingKey::from_ec_pem(pem.as_bytes()) {
		Ok(key) => Ok((Algorithm::ES256, key)),
		Err(e) => Err(CryptoError::KeyImport { reason: e.to_string() }),
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::collections::HashSet;
	// crates.io
	use jsonwebtoken::{DecodingKey, Validation};
	use time::macros;
	// self
	use super::*;

	const RSA_PEM: &str = include_str!("../tests/fixtures/assertion_rsa.pem");
	const RSA_PUBLIC_PEM: &str = include_str!("../tests/fixtures/assertion_rsa.pub.pem");
	const EC_PEM: &str = include_str!("../tests/fixtures/assertion_ec.pem");
	const EC_PUBLIC_PEM: &str = include_str!("../tests/fixtures/assertion_ec.pub.pem");

	fn client() -> ClientId {
		ClientId::new("0oa-client").expect("Client fixture should be valid.")
	}

	fn audience() -> Url {
		Url::parse("https://acme.okta.com/oauth2/v1/token").expect("Audience fixture should parse.")
	}

	fn verify(token: &str, algorithm: Algorithm, key: &DecodingKey) -> AssertionClaims {
		let mut validation = Validation::new(algorithm);

		validation.set_audience(&[audience().as_str()]);
		validation.set_issuer(&["0oa-client"]);

		jsonwebtoken::decode::<AssertionClaims>(token, key, &validation)
			.expect("Assertion should verify.")
			.claims
	}

	#[test]
	fn rsa_keys_sign_rs256_assertions() {
		let signer = AssertionSigner::from_pem(
			client(),
			RSA_PEM,
			Some(KeyId::new("kid-1").expect("Key id fixture should be valid.")),
		)
		.expect("RSA key should import.");
		let token = signer.assertion(&audience()).expect("Assertion should sign.");
		let header = jsonwebtoken::decode_header(&token).expect("Header should decode.");
		let claims = verify(
			&token,
			Algorithm::RS256,
			&DecodingKey::from_rsa_pem(RSA_PUBLIC_PEM.as_bytes()).expect("Public key should load."),
		);

		assert_eq!(signer.algorithm(), Algorithm::RS256);
		assert_eq!(header.kid.as_deref(), Some("kid-1"));
		assert_eq!(claims.iss, "0oa-client");
		assert_eq!(claims.sub, "0oa-client");
		assert_eq!(claims.aud, "https://acme.okta.com/oauth2/v1/token");
		assert_eq!(claims.exp - claims.iat, 300);
	}

	#[test]
	fn ec_keys_sign_es256_assertions() {
		let signer =
			AssertionSigner::from_pem(client(), EC_PEM, None).expect("EC key should import.");
		let token = signer.assertion(&audience()).expect("Assertion should sign.");
		let header = jsonwebtoken::decode_header(&token).expect("Header should decode.");

		verify(
			&token,
			Algorithm::ES256,
			&DecodingKey::from_ec_pem(EC_PUBLIC_PEM.as_bytes()).expect("Public key should load."),
		);

		assert_eq!(signer.algorithm(), Algorithm::ES256);
		assert!(header.kid.is_none());
	}

	#[test]
	fn every_assertion_is_unique() {
		let signer =
			AssertionSigner::from_pem(client(), EC_PEM, None).expect("EC key should import.");
		let issued = macros::datetime!(2025-01-01 00:00 UTC);
		let tokens = (0..50)
			.map(|_| signer.assertion_at(&audience(), issued).expect("Assertion should sign."))
			.collect::<HashSet<_>>();

		assert_eq!(tokens.len(), 50);
	}

	#[test]
	fn unparsable_keys_fail_import() {
		let err = AssertionSigner::from_pem(client(), "definitely not a key", None)
			.expect_err("Garbage keys must be rejected.");

		assert!(matches!(err, CryptoError::KeyImport { .. }));
		assert_eq!(crate::error::Error::from(err).kind(), crate::error::ErrorKind::Auth);
	}
}
