// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{
	EncodingKey,
	jwk::{
		AlgorithmParameters, CommonParameters, EllipticCurve, EllipticCurveKeyParameters,
		EllipticCurveKeyType, Jwk,
	},
};
use ring::{
	rand::SystemRandom,
	signature::{ECDSA_P256_SHA256_FIXED_SIGNING, EcdsaKeyPair, KeyPair},
};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, error::CryptoError};

const P256_COORDINATE_LEN: usize = 32;

/// P-256 key pair used to sign proofs; only the public half is ever exposed.
pub struct ProofKeyMaterial {
	encoding_key: EncodingKey,
	jwk: Jwk,
	x: String,
	y: String,
}
impl ProofKeyMaterial {
	/// Generates a fresh key pair.
	pub fn generate() -> Result<Self, CryptoError> {
		let rng = SystemRandom::new();
		let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
			.map_err(|e| CryptoError::KeyGeneration { reason: e.to_string() })?;

		Self::from_pkcs8_der(pkcs8.as_ref())
	}

	/// Loads a PKCS#8 DER encoded P-256 private key.
	pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, CryptoError> {
		let rng = SystemRandom::new();
		let pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, der, &rng)
			.map_err(|e| CryptoError::KeyImport { reason: e.to_string() })?;
		// Uncompressed SEC1 point: 0x04 || x || y.
		let point = pair.public_key().as_ref();

		if point.len() != 1 + 2 * P256_COORDINATE_LEN || point[0] != 0x04 {
			return Err(CryptoError::KeyImport {
				reason: "public key is not an uncompressed P-256 point".into(),
			});
		}

		let (x, y) = point[1..].split_at(P256_COORDINATE_LEN);
		let x = URL_SAFE_NO_PAD.encode(x);
		let y = URL_SAFE_NO_PAD.encode(y);
		let jwk = Jwk {
			common: CommonParameters::default(),
			algorithm: AlgorithmParameters::EllipticCurve(EllipticCurveKeyParameters {
				key_type: EllipticCurveKeyType::EC,
				curve: EllipticCurve::P256,
				x: x.clone(),
				y: y.clone(),
			}),
		};

		Ok(Self { encoding_key: EncodingKey::from_ec_der(der), jwk, x, y })
	}

	/// Public key as a JWK, embedded in every proof header.
	pub fn jwk(&self) -> &Jwk {
		&self.jwk
	}

	/// JWK SHA-256 thumbprint (RFC 7638), the value servers bind tokens to (`cnf.jkt`).
	pub fn thumbprint(&self) -> String {
		let canonical =
			format!(r#"{{"crv":"P-256","kty":"EC","x":"{}","y":"{}"}}"#, self.x, self.y);

		URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
	}

	pub(crate) fn encoding_key(&self) -> &EncodingKey {
		&self.encoding_key
	}
}
impl Debug for ProofKeyMaterial {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ProofKeyMaterial")
			.field("private_key", &"<redacted>")
			.field("thumbprint", &self.thumbprint())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn jwk_exposes_only_public_coordinates() {
		let key = ProofKeyMaterial::generate().expect("Key generation should succeed.");
		let value = serde_json::to_value(key.jwk()).expect("JWK should serialize.");

		assert_eq!(value["kty"], "EC");
		assert_eq!(value["crv"], "P-256");
		assert!(value.get("d").is_none());
		assert_eq!(
			URL_SAFE_NO_PAD
				.decode(value["x"].as_str().expect("x should be a string."))
				.expect("x should be base64url.")
				.len(),
			P256_COORDINATE_LEN
		);
	}

	#[test]
	fn thumbprint_is_stable_per_key() {
		let key = ProofKeyMaterial::generate().expect("Key generation should succeed.");
		let other = ProofKeyMaterial::generate().expect("Key generation should succeed.");

		assert_eq!(key.thumbprint(), key.thumbprint());
		assert_eq!(key.thumbprint().len(), 43);
		assert_ne!(key.thumbprint(), other.thumbprint());
		assert!(!format!("{key:?}").contains(&key.x));
	}

	#[test]
	fn garbage_der_is_rejected() {
		assert!(matches!(
			ProofKeyMaterial::from_pkcs8_der(b"not a key"),
			Err(CryptoError::KeyImport { .. })
		));
	}
}
