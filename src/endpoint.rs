//! Endpoint classification against the public (unauthenticated) allow-list.

// self
use crate::_prelude::*;

/// Whether a call carries a bearer credential and participates in refresh recovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndpointClass {
	/// Unauthenticated route; no credential attached, 401s are returned untouched.
	Public,
	/// Every other route.
	Protected,
}
impl EndpointClass {
	/// Returns `true` for [`EndpointClass::Protected`].
	pub const fn is_protected(self) -> bool {
		matches!(self, Self::Protected)
	}
}

/// Fixed allow-list of path fragments treated as public.
///
/// A request is public when its path (query excluded) contains any listed fragment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicRoutes(Vec<String>);
impl PublicRoutes {
	/// Fragments used when no allow-list is configured.
	pub const DEFAULT_FRAGMENTS: [&'static str; 6] = [
		"/users/login",
		"/users/refresh",
		"/users/register",
		"/users/password",
		"/sessions/register",
		"/sessions/verify",
	];

	/// Builds an allow-list from the provided fragments, dropping empty entries.
	pub fn new<I, S>(fragments: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self(fragments.into_iter().map(Into::into).filter(|fragment| !fragment.is_empty()).collect())
	}

	/// Adds one more public fragment.
	pub fn with(mut self, fragment: impl Into<String>) -> Self {
		let fragment = fragment.into();

		if !fragment.is_empty() && !self.0.contains(&fragment) {
			self.0.push(fragment);
		}

		self
	}

	/// Classifies a request path.
	pub fn classify(&self, path: &str) -> EndpointClass {
		let path = path.split_once('?').map_or(path, |(path, _)| path);

		if self.0.iter().any(|fragment| path.contains(fragment.as_str())) {
			EndpointClass::Public
		} else {
			EndpointClass::Protected
		}
	}

	/// Iterates over the configured fragments.
	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.0.iter().map(String::as_str)
	}
}
impl Default for PublicRoutes {
	fn default() -> Self {
		Self::new(Self::DEFAULT_FRAGMENTS)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn default_routes_cover_auth_endpoints() {
		let routes = PublicRoutes::default();

		assert_eq!(routes.classify("/sessions/register"), EndpointClass::Public);
		assert_eq!(routes.classify("/api/users/login"), EndpointClass::Public);
		assert_eq!(routes.classify("/users/password/reset"), EndpointClass::Public);
		assert_eq!(routes.classify("/users/refresh"), EndpointClass::Public);
		assert_eq!(routes.classify("/events/42"), EndpointClass::Protected);
		assert_eq!(routes.classify("/users/me"), EndpointClass::Protected);
	}

	#[test]
	fn query_string_does_not_make_a_route_public() {
		let routes = PublicRoutes::default();

		assert_eq!(routes.classify("/events?next=/users/login"), EndpointClass::Protected);
	}

	#[test]
	fn custom_routes_ignore_empty_fragments() {
		let routes = PublicRoutes::new(["", "/health"]).with("/health").with("/status");

		assert_eq!(routes.iter().collect::<Vec<_>>(), vec!["/health", "/status"]);
		assert_eq!(routes.classify("/anything"), EndpointClass::Protected);
		assert!(EndpointClass::Protected.is_protected());
		assert!(!routes.classify("/health").is_protected());
	}
}
