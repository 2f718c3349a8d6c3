//! Transport primitives for backend calls.
//!
//! [`HttpTransport`] is the only dependency on an HTTP stack. The crate builds wire requests
//! from a [`RequestDescriptor`] (URL join, bearer attachment) and classifies responses
//! itself, so transports only move bytes. [`RequestDescriptor`] is the immutable record kept
//! alongside every logical request so it can be replayed after a refresh.

// std
#[cfg(feature = "reqwest")] use std::ops::Deref;
// crates.io
use http::{
	HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
	header::{AUTHORIZATION, CONTENT_TYPE},
};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	error::{ConfigError, TransportError},
};

/// Wire request handed to transports.
pub type HttpRequest = http::Request<Vec<u8>>;
/// Wire response returned by transports.
pub type HttpResponse = http::Response<Vec<u8>>;
/// Owned future returned by [`HttpTransport::send`].
pub type TransportFuture =
	Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + 'static + Send>>;

/// Abstraction over HTTP stacks able to execute a single request.
///
/// Implementations must be `Send + Sync + 'static` so one transport can back every clone of a
/// [`Client`](crate::Client). The returned future must own whatever state it needs: the gate
/// calls [`send`](HttpTransport::send) synchronously at admission time and awaits the future
/// later, which is what keeps replay order equal to queue order.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Starts executing `request`.
	///
	/// Any HTTP status, including 4xx/5xx, is a successful transport outcome; only failures
	/// where no response arrived map to [`TransportError`].
	fn send(&self, request: HttpRequest) -> TransportFuture;
}

/// Immutable description of a logical request (method, path, headers, body).
///
/// The `Authorization` header is owned by the gate and never kept here, so a replay cannot
/// carry a stale credential.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
	method: Method,
	path: String,
	headers: HeaderMap,
	body: Option<Vec<u8>>,
}
impl RequestDescriptor {
	/// Creates a descriptor for `method` + `path` (relative to the configured base URL).
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self { method, path: path.into(), headers: HeaderMap::new(), body: None }
	}

	/// `GET` shortcut.
	pub fn get(path: impl Into<String>) -> Self {
		Self::new(Method::GET, path)
	}

	/// `POST` shortcut.
	pub fn post(path: impl Into<String>) -> Self {
		Self::new(Method::POST, path)
	}

	/// `PUT` shortcut.
	pub fn put(path: impl Into<String>) -> Self {
		Self::new(Method::PUT, path)
	}

	/// `PATCH` shortcut.
	pub fn patch(path: impl Into<String>) -> Self {
		Self::new(Method::PATCH, path)
	}

	/// `DELETE` shortcut.
	pub fn delete(path: impl Into<String>) -> Self {
		Self::new(Method::DELETE, path)
	}

	/// Serializes `body` as JSON and sets the content type.
	pub fn json<B>(mut self, body: &B) -> Result<Self>
	where
		B: ?Sized + Serialize,
	{
		let bytes = serde_json::to_vec(body).map_err(ConfigError::RequestBody)?;

		self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
		self.body = Some(bytes);

		Ok(self)
	}

	/// Sets a raw body.
	pub fn body(mut self, bytes: impl Into<Vec<u8>>) -> Self {
		self.body = Some(bytes.into());

		self
	}

	/// Adds a header; `Authorization` is ignored because the gate owns it.
	pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		if name != AUTHORIZATION {
			self.headers.insert(name, value);
		}

		self
	}

	/// HTTP method.
	pub fn method(&self) -> &Method {
		&self.method
	}

	/// Path relative to the base URL, including any query string.
	pub fn path(&self) -> &str {
		&self.path
	}

	/// Caller-supplied headers.
	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	/// Request body, if any.
	pub fn payload(&self) -> Option<&[u8]> {
		self.body.as_deref()
	}

	/// Builds the wire request, attaching `bearer` when provided.
	pub(crate) fn to_wire(&self, base: &Url, bearer: Option<&TokenSecret>) -> Result<HttpRequest> {
		let url = join_url(base, &self.path)?;
		let mut headers = self.headers.clone();

		headers.remove(AUTHORIZATION);

		if let Some(secret) = bearer {
			let value = secret.authorization().map_err(|e| ConfigError::HttpRequest(e.into()))?;

			headers.insert(AUTHORIZATION, value);
		}

		let mut request = http::Request::builder()
			.method(self.method.clone())
			.uri(url.as_str())
			.body(self.body.clone().unwrap_or_default())
			.map_err(ConfigError::from)?;

		*request.headers_mut() = headers;

		Ok(request)
	}
}

/// Successful (2xx) backend response.
#[derive(Clone, Debug)]
pub struct ApiResponse {
	/// HTTP status code.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Raw response body.
	pub body: Vec<u8>,
}
impl ApiResponse {
	pub(crate) fn from_wire(response: HttpResponse) -> Self {
		let (parts, body) = response.into_parts();

		Self { status: parts.status, headers: parts.headers, body }
	}

	/// Decodes the body as JSON, reporting the failing path on mismatch.
	pub fn json<T>(&self) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let mut deserializer = serde_json::Deserializer::from_slice(&self.body);

		serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|source| Error::ResponseParse { source, status: self.status.as_u16() })
	}

	/// Lossy UTF-8 view of the body.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}
}

/// Joins a request path onto the base URL without discarding the base path.
pub(crate) fn join_url(base: &Url, path: &str) -> Result<Url> {
	let mut joined = base.as_str().trim_end_matches('/').to_owned();

	joined.push('/');
	joined.push_str(path.trim_start_matches('/'));

	Url::parse(&joined)
		.map_err(|source| ConfigError::InvalidPath { path: path.to_owned(), source }.into())
}

/// Thin wrapper around [`ReqwestHttp`] implementing [`HttpTransport`].
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport(pub ReqwestHttp);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing reqwest client.
	pub fn with_client(client: ReqwestHttp) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestHttp> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestHttp {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestTransport {
	type Target = ReqwestHttp;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
	fn send(&self, request: HttpRequest) -> TransportFuture {
		let client = self.0.clone();

		Box::pin(async move {
			let request = reqwest::Request::try_from(request).map_err(TransportError::network)?;
			let response = client.execute(request).await?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let mut response_new = HttpResponse::new(response.bytes().await?.to_vec());

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn base(raw: &str) -> Url {
		Url::parse(raw).expect("Base URL fixture should parse.")
	}

	#[test]
	fn join_keeps_base_path() {
		let joined = join_url(&base("https://api.example.com/v1/"), "/users/refresh")
			.expect("Join should succeed.");

		assert_eq!(joined.as_str(), "https://api.example.com/v1/users/refresh");

		let joined = join_url(&base("https://api.example.com"), "events?page=2")
			.expect("Join should succeed.");

		assert_eq!(joined.as_str(), "https://api.example.com/events?page=2");
	}

	#[test]
	fn wire_request_replaces_authorization() {
		let descriptor = RequestDescriptor::get("/events")
			.header(AUTHORIZATION, HeaderValue::from_static("Bearer stale"))
			.header(HeaderName::from_static("x-trace"), HeaderValue::from_static("1"));

		assert!(descriptor.headers().get(AUTHORIZATION).is_none());

		let secret = TokenSecret::new("fresh");
		let wire = descriptor
			.to_wire(&base("https://api.example.com"), Some(&secret))
			.expect("Wire request should build.");

		assert_eq!(wire.headers().get(AUTHORIZATION).map(|v| v.as_bytes()), Some(&b"Bearer fresh"[..]));
		assert_eq!(wire.headers().get("x-trace").map(|v| v.as_bytes()), Some(&b"1"[..]));
		assert_eq!(wire.uri(), "https://api.example.com/events");

		let anonymous = descriptor
			.to_wire(&base("https://api.example.com"), None)
			.expect("Anonymous wire request should build.");

		assert!(anonymous.headers().get(AUTHORIZATION).is_none());
	}

	#[test]
	fn json_body_sets_content_type() {
		let descriptor = RequestDescriptor::post("/events")
			.json(&serde_json::json!({ "title": "Picnic" }))
			.expect("JSON body should serialize.");

		assert_eq!(descriptor.payload(), Some(&b"{\"title\":\"Picnic\"}"[..]));
		assert_eq!(
			descriptor.headers().get(CONTENT_TYPE).map(|v| v.as_bytes()),
			Some(&b"application/json"[..])
		);
	}

	#[test]
	fn response_json_reports_path() {
		#[derive(Debug, Deserialize)]
		struct Event {
			#[allow(dead_code)]
			title: String,
		}

		let response = ApiResponse {
			status: StatusCode::OK,
			headers: HeaderMap::new(),
			body: b"{\"title\":42}".to_vec(),
		};
		let err = response.json::<Event>().expect_err("Mismatched JSON should fail to decode.");

		match err {
			Error::ResponseParse { source, status } => {
				assert_eq!(status, 200);
				assert_eq!(source.path().to_string(), "title");
			},
			other => panic!("Unexpected error: {other:?}"),
		}
	}
}
