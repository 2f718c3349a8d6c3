#![allow(dead_code)]

// std
use std::sync::{Arc, Mutex};
// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use credential_coordinator::{
	Client,
	auth::CredentialPair,
	config::ClientConfig,
	error::TransportError,
	store::{CredentialStore, MemoryStore},
	transport::{HttpRequest, HttpResponse, HttpTransport, TransportFuture},
	url::Url,
};
use http::StatusCode;
use time::OffsetDateTime;
use tokio::sync::Semaphore;

/// Encodes an unsigned three-segment token expiring `expires_in` seconds from now.
pub fn token_expiring_in(tag: &str, expires_in: i64) -> String {
	let exp = OffsetDateTime::now_utc().unix_timestamp() + expires_in;
	let header = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"none\",\"typ\":\"JWT\"}");
	let payload =
		URL_SAFE_NO_PAD.encode(serde_json::json!({ "sub": "user-1", "jti": tag, "exp": exp }).to_string());

	format!("{header}.{payload}.signature")
}

pub fn pair(access: &str, refresh: &str) -> CredentialPair {
	CredentialPair::new(access, refresh).expect("Credential pair fixture should build.")
}

pub fn config(base: &str) -> ClientConfig {
	ClientConfig::builder(Url::parse(base).expect("Base URL fixture should parse."))
		.build()
		.expect("Client config fixture should build.")
}

pub fn seeded_store(access: &str, refresh: &str) -> Arc<MemoryStore> {
	Arc::new(MemoryStore::with_pair(pair(access, refresh)))
}

pub fn client_with<T>(
	config: ClientConfig,
	store: &Arc<MemoryStore>,
	transport: Arc<T>,
) -> Client<T>
where
	T: HttpTransport,
{
	let store: Arc<dyn CredentialStore> = store.clone();

	Client::with_transport(config, store, transport)
}

pub fn json_response(status: u16, body: &str) -> HttpResponse {
	let mut response = HttpResponse::new(body.as_bytes().to_vec());

	*response.status_mut() = StatusCode::from_u16(status).expect("Status fixture should be valid.");
	response
		.headers_mut()
		.insert(http::header::CONTENT_TYPE, http::HeaderValue::from_static("application/json"));

	response
}

/// Request observed by a fake transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recorded {
	pub path: String,
	pub authorization: Option<String>,
	pub body: String,
}

type Responder = dyn Fn(&Recorded) -> Result<HttpResponse, TransportError> + Send + Sync;

/// Transport answering synchronously from a closure and recording every request in order.
pub struct ScriptedTransport {
	log: Mutex<Vec<Recorded>>,
	responder: Box<Responder>,
	/// Paths listed here wait for a permit before answering.
	held_paths: Vec<String>,
	release: Arc<Semaphore>,
}
impl ScriptedTransport {
	pub fn new<F>(responder: F) -> Arc<Self>
	where
		F: 'static + Send + Sync + Fn(&Recorded) -> Result<HttpResponse, TransportError>,
	{
		Self::holding(responder, &[])
	}

	pub fn holding<F>(responder: F, held_paths: &[&str]) -> Arc<Self>
	where
		F: 'static + Send + Sync + Fn(&Recorded) -> Result<HttpResponse, TransportError>,
	{
		Arc::new(Self {
			log: Mutex::new(Vec::new()),
			responder: Box::new(responder),
			held_paths: held_paths.iter().map(|path| (*path).to_owned()).collect(),
			release: Arc::new(Semaphore::new(0)),
		})
	}

	pub fn release(&self, permits: usize) {
		self.release.add_permits(permits);
	}

	pub fn requests(&self) -> Vec<Recorded> {
		self.log.lock().expect("Request log should not be poisoned.").clone()
	}

	pub fn count(&self, path: &str) -> usize {
		self.requests().iter().filter(|request| request.path == path).count()
	}
}
impl HttpTransport for ScriptedTransport {
	fn send(&self, request: HttpRequest) -> TransportFuture {
		let recorded = Recorded {
			path: request.uri().path().to_owned(),
			authorization: request
				.headers()
				.get(http::header::AUTHORIZATION)
				.and_then(|value| value.to_str().ok())
				.map(str::to_owned),
			body: String::from_utf8_lossy(request.body()).into_owned(),
		};
		let outcome = (self.responder)(&recorded);
		let held = self.held_paths.contains(&recorded.path);
		let release = self.release.clone();

		self.log.lock().expect("Request log should not be poisoned.").push(recorded);

		Box::pin(async move {
			if held {
				let _permit = release.acquire().await.expect("Release semaphore should stay open.");
			}

			outcome
		})
	}
}

/// Yields until `condition` holds, failing the test after a bounded number of polls.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
	for _ in 0..10_000 {
		if condition() {
			return;
		}

		tokio::task::yield_now().await;
	}

	panic!("Condition was not reached in time.");
}
