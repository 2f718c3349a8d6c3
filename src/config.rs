//! Client configuration plus the validating builder used to assemble it.

// self
use crate::{_prelude::*, endpoint::PublicRoutes, scheduler::RefreshPolicy};

/// Errors raised while validating a [`ClientConfig`].
#[derive(Debug, PartialEq, Eq, ThisError)]
pub enum ClientConfigError {
	/// Base URL must be an absolute http(s) URL.
	#[error("Base URL must use http or https: {url}.")]
	UnsupportedScheme {
		/// URL that failed validation.
		url: String,
	},
	/// Base URL cannot carry query or fragment components.
	#[error("Base URL must not contain a query or fragment: {url}.")]
	BaseUrlHasQuery {
		/// URL that failed validation.
		url: String,
	},
	/// The in-flight ceiling must admit at least one call.
	#[error("The in-flight ceiling must be greater than zero.")]
	ZeroCeiling,
	/// Request timeout must be positive.
	#[error("Request timeout must be positive.")]
	NonPositiveTimeout,
	/// Refresh policy durations must not be negative.
	#[error("The refresh {field} must not be negative.")]
	NegativeRefreshWindow {
		/// Which policy field failed validation.
		field: &'static str,
	},
	/// Endpoint paths must be absolute.
	#[error("The {endpoint} path must start with `/`: {path}.")]
	RelativePath {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Offending path.
		path: String,
	},
}

/// Immutable configuration consumed by [`Client`](crate::Client).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
	/// Root every request path is appended to.
	pub base_url: Url,
	/// Path of the refresh exchange.
	pub refresh_path: String,
	/// Path of the password login exchange.
	pub login_path: String,
	/// Allow-list of unauthenticated endpoint fragments.
	pub public_routes: PublicRoutes,
	/// Ceiling on concurrently in-flight calls.
	pub max_in_flight: usize,
	/// Per-call timeout after which the call settles as a network error.
	pub request_timeout: Duration,
	/// Proactive renewal window.
	pub refresh_policy: RefreshPolicy,
}
impl ClientConfig {
	/// Default refresh endpoint.
	pub const DEFAULT_REFRESH_PATH: &'static str = "/users/refresh";
	/// Default login endpoint.
	pub const DEFAULT_LOGIN_PATH: &'static str = "/users/login";
	/// Default in-flight ceiling.
	pub const DEFAULT_MAX_IN_FLIGHT: usize = 50;
	/// Default per-call timeout.
	pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::seconds(10);

	/// Creates a builder seeded with defaults for the provided base URL.
	pub fn builder(base_url: Url) -> ClientConfigBuilder {
		ClientConfigBuilder::new(base_url)
	}

	/// Timeout converted for the async runtime.
	pub fn request_timeout_std(&self) -> StdDuration {
		self.request_timeout.unsigned_abs()
	}

	fn validate(&self) -> Result<(), ClientConfigError> {
		if !matches!(self.base_url.scheme(), "http" | "https") {
			return Err(ClientConfigError::UnsupportedScheme { url: self.base_url.to_string() });
		}
		if self.base_url.query().is_some() || self.base_url.fragment().is_some() {
			return Err(ClientConfigError::BaseUrlHasQuery { url: self.base_url.to_string() });
		}
		if self.max_in_flight == 0 {
			return Err(ClientConfigError::ZeroCeiling);
		}
		if !self.request_timeout.is_positive() {
			return Err(ClientConfigError::NonPositiveTimeout);
		}
		if self.refresh_policy.safety_margin.is_negative() {
			return Err(ClientConfigError::NegativeRefreshWindow { field: "safety margin" });
		}
		if self.refresh_policy.minimum_delay.is_negative() {
			return Err(ClientConfigError::NegativeRefreshWindow { field: "minimum delay" });
		}

		validate_path("refresh", &self.refresh_path)?;
		validate_path("login", &self.login_path)?;

		Ok(())
	}
}

/// Builder for [`ClientConfig`] values.
#[derive(Debug)]
pub struct ClientConfigBuilder {
	base_url: Url,
	refresh_path: String,
	login_path: String,
	public_routes: PublicRoutes,
	max_in_flight: usize,
	request_timeout: Duration,
	refresh_policy: RefreshPolicy,
}
impl ClientConfigBuilder {
	fn new(base_url: Url) -> Self {
		Self {
			base_url,
			refresh_path: ClientConfig::DEFAULT_REFRESH_PATH.into(),
			login_path: ClientConfig::DEFAULT_LOGIN_PATH.into(),
			public_routes: PublicRoutes::default(),
			max_in_flight: ClientConfig::DEFAULT_MAX_IN_FLIGHT,
			request_timeout: ClientConfig::DEFAULT_REQUEST_TIMEOUT,
			refresh_policy: RefreshPolicy::default(),
		}
	}

	/// Overrides the refresh endpoint path.
	pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
		self.refresh_path = path.into();

		self
	}

	/// Overrides the login endpoint path.
	pub fn login_path(mut self, path: impl Into<String>) -> Self {
		self.login_path = path.into();

		self
	}

	/// Replaces the public endpoint allow-list.
	pub fn public_routes(mut self, routes: PublicRoutes) -> Self {
		self.public_routes = routes;

		self
	}

	/// Overrides the in-flight ceiling.
	pub fn max_in_flight(mut self, ceiling: usize) -> Self {
		self.max_in_flight = ceiling;

		self
	}

	/// Overrides the per-call timeout.
	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;

		self
	}

	/// Overrides the proactive renewal window.
	pub fn refresh_policy(mut self, policy: RefreshPolicy) -> Self {
		self.refresh_policy = policy;

		self
	}

	/// Consumes the builder and validates the resulting configuration.
	pub fn build(self) -> Result<ClientConfig, ClientConfigError> {
		let config = ClientConfig {
			base_url: self.base_url,
			refresh_path: self.refresh_path,
			login_path: self.login_path,
			public_routes: self.public_routes,
			max_in_flight: self.max_in_flight,
			request_timeout: self.request_timeout,
			refresh_policy: self.refresh_policy,
		};

		config.validate()?;

		Ok(config)
	}
}

fn validate_path(endpoint: &'static str, path: &str) -> Result<(), ClientConfigError> {
	if path.starts_with('/') {
		Ok(())
	} else {
		Err(ClientConfigError::RelativePath { endpoint, path: path.to_owned() })
	}
}
