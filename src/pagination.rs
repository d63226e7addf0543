//! Continuation extraction for paginated collections.
//!
//! Collections advertise their next page through a `Link` header entry with `rel="next"`; the
//! cursor is that URL's `after` query parameter. Some endpoints embed the same link in the body
//! instead (`{"data": [...], "_links": {"next": {"href": "..."}}}`), which is accepted as a
//! fallback.

// crates.io
use oauth2::http::{HeaderMap, header::LINK};
use serde::de::DeserializeOwned;
// self
use crate::_prelude::*;

/// Query parameter carrying the continuation cursor.
pub const CURSOR_PARAM: &str = "after";

/// One page of a collection plus its continuation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginatedResult<T> {
	/// Items in server order.
	pub items: Vec<T>,
	/// Cursor derived from `next_url`; pass it back as `after` to continue.
	pub next_cursor: Option<String>,
	/// Absolute URL of the next page.
	pub next_url: Option<Url>,
}
impl<T> PaginatedResult<T> {
	/// Builds a page, deriving the cursor from `next_url`.
	pub fn new(items: Vec<T>, next_url: Option<Url>) -> Self {
		let next_cursor = next_url.as_ref().and_then(cursor_from_url);

		Self { items, next_cursor, next_url }
	}

	/// Returns `true` when the collection has no further pages.
	pub fn is_exhausted(&self) -> bool {
		self.next_cursor.is_none() && self.next_url.is_none()
	}
}

/// Extracts the `rel="next"` target from every `Link` header on the response.
///
/// Relative targets resolve against `base`.
pub fn next_link(headers: &HeaderMap, base: &Url) -> Option<Url> {
	headers
		.get_all(LINK)
		.iter()
		.filter_map(|value| value.to_str().ok())
		.find_map(|value| parse_next(value, base))
}

/// Reads the continuation cursor from a next-page URL.
pub fn cursor_from_url(url: &Url) -> Option<String> {
	url.query_pairs()
		.find(|(name, _)| name == CURSOR_PARAM)
		.map(|(_, value)| value.into_owned())
		.filter(|cursor| !cursor.is_empty())
}

fn parse_next(header: &str, base: &Url) -> Option<Url> {
	let mut rest = header;

	while let Some(start) = rest.find('<') {
		let after_start = &rest[start + 1..];
		let end = after_start.find('>')?;
		let target = &after_start[..end];
		let params = &after_start[end + 1..];
		let (params, next) = match params.find('<') {
			Some(idx) => (&params[..idx], &params[idx..]),
			None => (params, ""),
		};

		if params.split(';').any(is_next_relation) {
			return base.join(target.trim()).ok();
		}

		rest = next;
	}

	None
}

fn is_next_relation(param: &str) -> bool {
	let Some((name, value)) = param.split_once('=') else {
		return false;
	};

	name.trim().eq_ignore_ascii_case("rel")
		&& value
			.trim()
			.trim_matches(|c| c == '"' || c == ',')
			.split_whitespace()
			.any(|rel| rel.eq_ignore_ascii_case("next"))
}

/// Decodes a collection body into items and an optional embedded next link.
pub(crate) fn decode_page<T>(
	value: serde_json::Value,
) -> Result<(Vec<T>, Option<String>), serde_path_to_error::Error<serde_json::Error>>
where
	T: DeserializeOwned,
{
	let (items, next) = match value {
		serde_json::Value::Object(mut map) if map.contains_key("data") => {
			let next = map
				.get("_links")
				.and_then(|links| links.get("next"))
				.and_then(|next| next.get("href"))
				.and_then(serde_json::Value::as_str)
				.map(str::to_owned);

			(map.remove("data").unwrap_or_default(), next)
		},
		other => (other, None),
	};
	let items = serde_path_to_error::deserialize(items)?;

	Ok((items, next))
}
