//! Access/refresh credential pair that is always stored, replaced, and cleared as a unit.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Access + refresh token pair.
///
/// Both halves are present or the pair does not exist; partial input is treated as absent.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
	/// Short-lived bearer credential attached to protected requests.
	pub access_token: TokenSecret,
	/// Longer-lived credential exchanged for a new pair.
	pub refresh_token: TokenSecret,
}
impl CredentialPair {
	/// Builds a pair from two non-empty tokens.
	pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Option<Self> {
		Self::from_parts(Some(access_token.into()), Some(refresh_token.into()))
	}

	/// Builds a pair from independently persisted halves, yielding `None` unless both are
	/// present and non-empty.
	pub fn from_parts(access_token: Option<String>, refresh_token: Option<String>) -> Option<Self> {
		let access_token = access_token.filter(|value| !value.is_empty())?;
		let refresh_token = refresh_token.filter(|value| !value.is_empty())?;

		Some(Self {
			access_token: TokenSecret::new(access_token),
			refresh_token: TokenSecret::new(refresh_token),
		})
	}

	/// Returns `true` if both halves carry a value.
	pub fn is_complete(&self) -> bool {
		!self.access_token.is_empty() && !self.refresh_token.is_empty()
	}

	/// Decodes the access token's claims.
	pub fn claims(&self) -> Option<crate::auth::Claims> {
		crate::auth::Claims::decode(self.access_token.expose())
	}
}
impl Debug for CredentialPair {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialPair")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &"<redacted>")
			.finish()
	}
}

/// Wire shape of `{ access_token, refresh_token }` responses from login and refresh.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct TokenPairResponse {
	pub(crate) access_token: TokenSecret,
	#[serde(default)]
	pub(crate) refresh_token: Option<TokenSecret>,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn partial_pairs_are_absent() {
		assert!(CredentialPair::from_parts(Some("access".into()), None).is_none());
		assert!(CredentialPair::from_parts(None, Some("refresh".into())).is_none());
		assert!(CredentialPair::from_parts(Some(String::new()), Some("refresh".into())).is_none());
		assert!(CredentialPair::new("access", "").is_none());

		let pair = CredentialPair::new("access", "refresh").expect("Complete pair should build.");

		assert!(pair.is_complete());
		assert_eq!(pair.access_token.expose(), "access");
		assert_eq!(pair.refresh_token.expose(), "refresh");
	}

	#[test]
	fn debug_output_redacts_both_tokens() {
		let pair = CredentialPair::new("a-secret", "r-secret").expect("Complete pair should build.");
		let rendered = format!("{pair:?}");

		assert!(!rendered.contains("a-secret"));
		assert!(!rendered.contains("r-secret"));
	}

	#[test]
	fn pair_serializes_as_flat_strings() {
		let pair = CredentialPair::new("a", "r").expect("Complete pair should build.");
		let json = serde_json::to_string(&pair).expect("Pair should serialize.");

		assert_eq!(json, "{\"access_token\":\"a\",\"refresh_token\":\"r\"}");
	}
}
