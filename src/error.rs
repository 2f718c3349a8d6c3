//! Client-level error types shared by the gate, coordinator, scheduler, and stores.

// self
use crate::{_prelude::*, config::ClientConfigError, store::StoreError};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Upper bound on the response body bytes retained inside an [`ApiFailure`].
pub const BODY_PREVIEW_LIMIT: usize = 512;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		StoreError,
	),
	/// Local configuration or request construction problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// No response was received (connectivity loss, timeout).
	#[error(transparent)]
	Network(#[from] TransportError),
	/// A protected endpoint rejected the access credential with HTTP 401.
	#[error("Request was not authenticated: {0}")]
	Authentication(ApiFailure),
	/// The refresh exchange itself failed.
	#[error(transparent)]
	Refresh(#[from] RefreshFailure),
	/// Dispatch was refused locally because the in-flight ceiling was reached.
	#[error("Too many requests in flight (ceiling {ceiling}).")]
	AdmissionControl {
		/// Configured ceiling that was hit.
		ceiling: usize,
	},
	/// Backend answered with a 5xx status.
	#[error("Server error: {0}")]
	Server(ApiFailure),
	/// Backend answered with a 4xx status other than 401.
	#[error("Request was rejected: {0}")]
	Validation(ApiFailure),
	/// Response body could not be decoded as the expected JSON shape.
	#[error("Response body is malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure including the JSON path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code of the response.
		status: u16,
	},
	/// The session ended (logout or a new login) while the request was waiting on a refresh.
	#[error("Session was terminated.")]
	SessionTerminated,
}
impl Error {
	/// Returns the backend failure carried by HTTP-status variants.
	pub fn api_failure(&self) -> Option<&ApiFailure> {
		match self {
			Self::Authentication(failure) | Self::Server(failure) | Self::Validation(failure) =>
				Some(failure),
			_ => None,
		}
	}

	/// Returns `true` for [`Error::Authentication`].
	pub fn is_authentication(&self) -> bool {
		matches!(self, Self::Authentication(_))
	}
}

/// Non-2xx response summary retained for error reporting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiFailure {
	/// HTTP status code.
	pub status: u16,
	/// Request path that produced the response.
	pub path: String,
	/// Lossy UTF-8 preview of the response body, capped at [`BODY_PREVIEW_LIMIT`] bytes.
	pub body_preview: String,
}
impl ApiFailure {
	/// Builds a failure summary, truncating the body preview.
	pub fn new(status: u16, path: impl Into<String>, body: &[u8]) -> Self {
		let end = body.len().min(BODY_PREVIEW_LIMIT);

		Self {
			status,
			path: path.into(),
			body_preview: String::from_utf8_lossy(&body[..end]).into_owned(),
		}
	}
}
impl Display for ApiFailure {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "HTTP {} from {}", self.status, self.path)
	}
}

/// Configuration and request construction failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// Client configuration failed validation.
	#[error(transparent)]
	InvalidConfig(#[from] ClientConfigError),
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] http::Error),
	/// Request path cannot be joined onto the base URL.
	#[error("Request path `{path}` is invalid.")]
	InvalidPath {
		/// Offending path.
		path: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Request body could not be serialized.
	#[error("Request body could not be serialized.")]
	RequestBody(#[source] serde_json::Error),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures where no response was received.
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the backend.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The call did not settle within the configured timeout.
	#[error("Request timed out after {after:?}.")]
	Timeout {
		/// Timeout that elapsed.
		after: StdDuration,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

/// Reasons a refresh exchange failed.
#[derive(Debug, ThisError)]
pub enum RefreshFailure {
	/// No persisted refresh token was available.
	#[error("No refresh token is available.")]
	MissingCredential,
	/// Backend refused the refresh token (any non-2xx response).
	#[error("Refresh token was rejected: {0}")]
	Rejected(ApiFailure),
	/// Refresh call did not receive a response.
	#[error("Refresh call failed in transit.")]
	Transport(#[source] TransportError),
	/// Refresh response did not contain a credential pair.
	#[error("Refresh response is malformed.")]
	MalformedResponse(#[source] serde_path_to_error::Error<serde_json::Error>),
	/// Refresh response carried an empty access token.
	#[error("Refresh response did not contain an access token.")]
	IncompleteResponse,
	/// The refresh this caller joined failed; the leader observed the cause.
	#[error("The coalesced refresh failed.")]
	Coalesced,
	/// The new credential pair could not be persisted.
	#[error("Refreshed credentials could not be persisted.")]
	Storage(#[source] StoreError),
	/// Refresh request could not be built.
	#[error("Refresh request could not be built.")]
	Config(#[source] ConfigError),
}
