//! Identifiers that end up on the wire: the client id (assertion issuer and subject), the custom
//! authorization server id (a path segment of the token endpoint), and the assertion `kid`.

// self
use crate::_prelude::*;

/// Characters an identifier may carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Charset {
	/// Printable ASCII without spaces; safe inside JWT claims, JWS headers, and form bodies.
	Printable,
	/// RFC 3986 unreserved characters; safe to splice into a URL path unescaped.
	PathSegment,
}
impl Charset {
	fn admits(self, c: char) -> bool {
		match self {
			Self::Printable => c.is_ascii_graphic(),
			Self::PathSegment => c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'),
		}
	}
}

struct Rule {
	kind: &'static str,
	charset: Charset,
	max_len: usize,
}
impl Rule {
	fn check(&self, value: &str) -> Result<(), IdentifierError> {
		let kind = self.kind;

		if value.is_empty() {
			return Err(IdentifierError::Empty { kind });
		}
		if let Some(character) = value.chars().find(|c| !self.charset.admits(*c)) {
			return Err(IdentifierError::InvalidCharacter { kind, character });
		}
		if value.len() > self.max_len {
			return Err(IdentifierError::TooLong { kind, max: self.max_len });
		}
		// `.` and `..` would be resolved away when joined onto the org URL.
		if self.charset == Charset::PathSegment && matches!(value, "." | "..") {
			return Err(IdentifierError::DotSegment { kind });
		}

		Ok(())
	}
}

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} cannot be empty.")]
	Empty {
		/// Which identifier failed.
		kind: &'static str,
	},
	/// The identifier contains a character its wire position cannot carry.
	#[error("{kind} contains the disallowed character {character:?}.")]
	InvalidCharacter {
		/// Which identifier failed.
		kind: &'static str,
		/// First offending character.
		character: char,
	},
	/// The identifier exceeded the allowed length.
	#[error("{kind} exceeds {max} characters.")]
	TooLong {
		/// Which identifier failed.
		kind: &'static str,
		/// Maximum permitted length.
		max: usize,
	},
	/// The identifier is a relative path segment.
	#[error("{kind} cannot be a relative path segment.")]
	DotSegment {
		/// Which identifier failed.
		kind: &'static str,
	},
}

macro_rules! def_id {
	($(#[$meta:meta])* $name:ident => $rule:expr) => {
		$(#[$meta])*
		#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
		#[serde(try_from = "String")]
		pub struct $name(String);
		impl $name {
			const RULE: Rule = $rule;

			/// Validates `value` and wraps it.
			pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
				let value = value.into();

				Self::RULE.check(&value)?;

				Ok(Self(value))
			}

			/// Borrows the identifier.
			pub fn as_str(&self) -> &str {
				&self.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				Self::new(value)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
	};
}

def_id! {
	/// OAuth client identifier; doubles as assertion issuer and subject.
	ClientId => Rule { kind: "Client id", charset: Charset::Printable, max_len: 255 }
}
def_id! {
	/// Custom authorization server identifier, spliced into the token endpoint path.
	AuthServerId => Rule { kind: "Authorization server id", charset: Charset::PathSegment, max_len: 64 }
}
def_id! {
	/// Key identifier published as the `kid` header of client assertions.
	KeyId => Rule { kind: "Key id", charset: Charset::Printable, max_len: 255 }
}
