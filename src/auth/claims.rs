//! Unverified decoding of the claims embedded in a bearer token's payload segment.
//!
//! Signature verification is the backend's job; the decoder only reads `sub`, `iat`, and `exp`
//! so the scheduler can plan renewals. Foreign-format tokens decode to `None` instead of
//! failing.

// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::{Map, Value};
// self
use crate::_prelude::*;

/// Claims decoded from an access token.
#[derive(Clone, Debug, PartialEq)]
pub struct Claims {
	/// `sub` claim.
	pub subject: Option<String>,
	/// `iat` claim.
	pub issued_at: Option<OffsetDateTime>,
	/// `exp` claim.
	pub expires_at: Option<OffsetDateTime>,
	/// Remaining application-specific claims.
	pub extra: Map<String, Value>,
}
impl Claims {
	/// Decodes the payload segment of a three-segment token.
	///
	/// Returns `None` on a wrong segment count, invalid base64url, or a payload that is not a
	/// JSON object.
	pub fn decode(token: &str) -> Option<Self> {
		let mut segments = token.split('.');
		let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);

		if segments.next().is_some() {
			return None;
		}

		let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
		let mut extra = match serde_json::from_slice::<Value>(&bytes).ok()? {
			Value::Object(map) => map,
			_ => return None,
		};
		let subject = match extra.remove("sub") {
			Some(Value::String(subject)) => Some(subject),
			_ => None,
		};
		let issued_at = extra.remove("iat").as_ref().and_then(timestamp);
		let expires_at = extra.remove("exp").as_ref().and_then(timestamp);

		Some(Self { subject, issued_at, expires_at, extra })
	}

	/// Returns `true` only when an expiry is known and lies after `now`.
	pub fn is_live_at(&self, now: OffsetDateTime) -> bool {
		self.expires_at.is_some_and(|expires_at| now < expires_at)
	}

	/// Remaining lifetime at `now`, if an expiry is known.
	pub fn remaining_at(&self, now: OffsetDateTime) -> Option<Duration> {
		self.expires_at.map(|expires_at| expires_at - now)
	}
}

fn timestamp(value: &Value) -> Option<OffsetDateTime> {
	let secs = match value {
		Value::Number(number) => number.as_i64().or_else(|| number.as_f64().map(|f| f as i64))?,
		_ => return None,
	};

	OffsetDateTime::from_unix_timestamp(secs).ok()
}

#[cfg(test)]
pub(crate) fn encode_test_token(payload: &Value) -> String {
	let header = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"none\",\"typ\":\"JWT\"}");
	let body = URL_SAFE_NO_PAD.encode(payload.to_string());

	format!("{header}.{body}.signature")
}
