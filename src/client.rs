//! Client facade that every backend call goes through.
//!
//! [`Client`] owns the transport, the credential store, the request gate, the refresh
//! coordinator, and the proactive scheduler. Clones share all of them, so the single
//! refresh-in-flight guarantee and the in-flight ceiling hold across every clone.

// crates.io
use http::Method;
use tokio::sync::watch;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	config::ClientConfig,
	coordinator::{RefreshCoordinator, RefreshMetrics, RefreshState},
	gate::{PendingCall, RequestGate},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	scheduler::RefreshScheduler,
	session::{LogoutReason, SessionState},
	store::CredentialStore,
	transport::{ApiResponse, HttpTransport, RequestDescriptor},
};
#[cfg(feature = "reqwest")] use crate::{error::ConfigError, transport::ReqwestTransport};

#[cfg(feature = "reqwest")]
/// Client specialized for the crate's default reqwest transport.
pub type ReqwestClient = Client<ReqwestTransport>;

/// Credential-aware REST client.
pub struct Client<T>
where
	T: ?Sized + HttpTransport,
{
	pub(crate) inner: Arc<ClientInner<T>>,
}
impl<T> Client<T>
where
	T: ?Sized + HttpTransport,
{
	/// Creates a client that reuses the caller-provided transport.
	///
	/// The session starts as [`SessionState::LoggedOut`] with [`LogoutReason::Initial`] until
	/// [`bootstrap`](Self::bootstrap) or [`login`](Self::login) runs.
	pub fn with_transport(
		config: ClientConfig,
		store: Arc<dyn CredentialStore>,
		transport: impl Into<Arc<T>>,
	) -> Self {
		let gate = RequestGate::new(config.max_in_flight, config.public_routes.clone());
		let (session, _) = watch::channel(SessionState::LoggedOut(LogoutReason::Initial));

		Self {
			inner: Arc::new(ClientInner {
				config,
				transport: transport.into(),
				store,
				gate,
				coordinator: RefreshCoordinator::default(),
				scheduler: RefreshScheduler::default(),
				metrics: RefreshMetrics::default(),
				session,
				write_lock: AsyncMutex::new(()),
			}),
		}
	}

	/// Configuration the client was built with.
	pub fn config(&self) -> &ClientConfig {
		&self.inner.config
	}

	/// Transport used for every call.
	pub fn transport(&self) -> &Arc<T> {
		&self.inner.transport
	}

	/// Credential store backing the client.
	pub fn store(&self) -> &Arc<dyn CredentialStore> {
		&self.inner.store
	}

	/// Admission-control gate (ceiling, pending count, endpoint classification).
	pub fn gate(&self) -> &RequestGate {
		&self.inner.gate
	}

	/// Refresh state machine.
	pub fn coordinator(&self) -> &RefreshCoordinator {
		&self.inner.coordinator
	}

	/// Current refresh phase.
	pub fn refresh_state(&self) -> RefreshState {
		self.inner.coordinator.state()
	}

	/// Proactive renewal timer.
	pub fn scheduler(&self) -> &RefreshScheduler {
		&self.inner.scheduler
	}

	/// Counters for refresh activity.
	pub fn refresh_metrics(&self) -> &RefreshMetrics {
		&self.inner.metrics
	}

	/// Sends a request through the gate, recovering once from a 401 on protected endpoints.
	///
	/// Public endpoints never carry a credential and never trigger a refresh. A protected call
	/// that was rejected with 401 is either queued behind the refresh in flight, replayed with
	/// a credential rotated since it was dispatched, or leads a new refresh. The replayed call
	/// never recovers again: a second 401 ends the session and surfaces as
	/// [`Error::Authentication`].
	pub async fn send(&self, request: RequestDescriptor) -> Result<ApiResponse> {
		const KIND: FlowKind = FlowKind::Dispatch;

		let span = FlowSpan::new(KIND, "send");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.dispatch(request)).await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	/// `GET` shortcut for [`send`](Self::send).
	pub async fn get(&self, path: impl Into<String>) -> Result<ApiResponse> {
		self.send(RequestDescriptor::get(path)).await
	}

	/// `POST` shortcut sending `body` as JSON.
	pub async fn post<B>(&self, path: impl Into<String>, body: &B) -> Result<ApiResponse>
	where
		B: ?Sized + Serialize,
	{
		self.send_json(Method::POST, path, body).await
	}

	/// `PUT` shortcut sending `body` as JSON.
	pub async fn put<B>(&self, path: impl Into<String>, body: &B) -> Result<ApiResponse>
	where
		B: ?Sized + Serialize,
	{
		self.send_json(Method::PUT, path, body).await
	}

	/// `DELETE` shortcut for [`send`](Self::send).
	pub async fn delete(&self, path: impl Into<String>) -> Result<ApiResponse> {
		self.send(RequestDescriptor::delete(path)).await
	}

	/// Sends `body` as JSON with `method`.
	pub async fn send_json<B>(
		&self,
		method: Method,
		path: impl Into<String>,
		body: &B,
	) -> Result<ApiResponse>
	where
		B: ?Sized + Serialize,
	{
		self.send(RequestDescriptor::new(method, path).json(body)?).await
	}

	async fn dispatch(&self, request: RequestDescriptor) -> Result<ApiResponse> {
		let inner = &self.inner;
		let class = inner.gate.classify(request.path());

		if !class.is_protected() {
			return inner.start(&request, None)?.settle().await;
		}

		let rotation = inner.coordinator.rotation();
		let bearer = inner.gate.credential_for(class, inner.store.as_ref()).await;
		let call = inner.start(&request, bearer.as_ref())?;

		match call.settle().await {
			Err(Error::Authentication(failure)) if bearer.is_some() =>
				self.recover(request, failure, rotation).await,
			result => result,
		}
	}
}
#[cfg(feature = "reqwest")]
impl Client<ReqwestTransport> {
	/// Creates a client backed by a default reqwest transport.
	pub fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
		let http = ReqwestHttp::builder().build().map_err(ConfigError::from)?;

		Ok(Self::with_transport(config, store, ReqwestTransport::with_client(http)))
	}
}
impl<T> Clone for Client<T>
where
	T: ?Sized + HttpTransport,
{
	fn clone(&self) -> Self {
		Self { inner: self.inner.clone() }
	}
}
impl<T> Debug for Client<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Client")
			.field("base_url", &self.inner.config.base_url.as_str())
			.field("refresh_state", &self.inner.coordinator.state())
			.field("pending", &self.inner.gate.pending())
			.finish_non_exhaustive()
	}
}

pub(crate) struct ClientInner<T>
where
	T: ?Sized + HttpTransport,
{
	pub(crate) config: ClientConfig,
	pub(crate) transport: Arc<T>,
	pub(crate) store: Arc<dyn CredentialStore>,
	pub(crate) gate: RequestGate,
	pub(crate) coordinator: RefreshCoordinator,
	pub(crate) scheduler: RefreshScheduler,
	pub(crate) metrics: RefreshMetrics,
	pub(crate) session: watch::Sender<SessionState>,
	/// Serializes every credential write (refresh persistence, login, logout, expiry).
	pub(crate) write_lock: AsyncMutex<()>,
}
impl<T> ClientInner<T>
where
	T: ?Sized + HttpTransport,
{
	pub(crate) fn start(
		&self,
		request: &RequestDescriptor,
		bearer: Option<&TokenSecret>,
	) -> Result<PendingCall> {
		self.gate.start(
			self.transport.as_ref(),
			&self.config.base_url,
			self.config.request_timeout_std(),
			request,
			bearer,
		)
	}

	pub(crate) fn publish(&self, state: SessionState) {
		let previous = self.session.send_replace(state);

		if previous != state {
			obs::event(FlowKind::Session, "state_changed", &format_args!("{previous:?} -> {state:?}"));
		}
	}
}
