//! Content-type aware body parsing with a best-effort JSON fallback.

// self
use crate::_prelude::*;

const XSSI_PREFIXES: [&str; 2] = [")]}'", "while(1);"];

/// Response body after content negotiation.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ParsedBody {
	/// No body, or only whitespace.
	#[default]
	Empty,
	/// JSON document.
	Json(Value),
	/// Anything that could not be read as JSON.
	Text(String),
}
impl ParsedBody {
	/// Parses `bytes` according to the declared content type.
	///
	/// Servers are unreliable about `Content-Type`, so a body that looks like JSON is parsed
	/// as JSON regardless of the declaration, and a strict parse failure falls back to reading
	/// the first complete JSON value after stripping a BOM and common XSSI guards.
	pub fn parse(content_type: Option<&str>, bytes: &[u8]) -> Self {
		let text = String::from_utf8_lossy(bytes);
		let trimmed = text.trim_start_matches('\u{feff}').trim();

		if trimmed.is_empty() {
			return Self::Empty;
		}

		let declared_json = content_type.is_some_and(|value| value.contains("json"));

		if !declared_json && !looks_like_json(trimmed) {
			return Self::Text(trimmed.to_owned());
		}
		if let Ok(value) = serde_json::from_str(trimmed) {
			return Self::Json(value);
		}

		match best_effort_json(trimmed) {
			Some(value) => Self::Json(value),
			None => Self::Text(trimmed.to_owned()),
		}
	}

	/// Returns the JSON document, if any.
	pub fn as_json(&self) -> Option<&Value> {
		match self {
			Self::Json(value) => Some(value),
			_ => None,
		}
	}

	/// Returns `true` for an empty body.
	pub fn is_empty(&self) -> bool {
		matches!(self, Self::Empty)
	}
}

fn strip_xssi(text: &str) -> &str {
	XSSI_PREFIXES
		.iter()
		.find_map(|prefix| text.strip_prefix(prefix))
		.map(str::trim_start)
		.unwrap_or(text)
}

fn looks_like_json(text: &str) -> bool {
	matches!(strip_xssi(text).as_bytes().first(), Some(b'{' | b'['))
}

fn best_effort_json(text: &str) -> Option<Value> {
	let candidate = strip_xssi(text);

	if !matches!(candidate.as_bytes().first(), Some(b'{' | b'[')) {
		return None;
	}

	serde_json::Deserializer::from_str(candidate).into_iter::<Value>().next()?.ok()
}
