//! Per-call admission control and credential attachment.
//!
//! Every outbound call goes through [`RequestGate`]: it classifies the path against the public
//! allow-list, attaches the current access token to protected calls, and refuses dispatch once
//! the in-flight ceiling is reached. Each admitted call holds an [`InFlightPermit`] that
//! decrements the counter exactly once when the call settles or is dropped.

// std
use std::sync::atomic::{AtomicUsize, Ordering};
// crates.io
use http::StatusCode;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	endpoint::{EndpointClass, PublicRoutes},
	error::{ApiFailure, TransportError},
	obs::{self, FlowKind},
	store::CredentialStore,
	transport::{ApiResponse, HttpResponse, HttpTransport, RequestDescriptor, TransportFuture},
};

/// Gatekeeper for every outbound call.
#[derive(Debug)]
pub struct RequestGate {
	ceiling: usize,
	routes: PublicRoutes,
	pending: Arc<AtomicUsize>,
}
impl RequestGate {
	/// Creates a gate with the provided ceiling and public allow-list.
	pub fn new(ceiling: usize, routes: PublicRoutes) -> Self {
		Self { ceiling, routes, pending: Default::default() }
	}

	/// Configured in-flight ceiling.
	pub fn ceiling(&self) -> usize {
		self.ceiling
	}

	/// Number of calls between dispatch and settlement.
	pub fn pending(&self) -> usize {
		self.pending.load(Ordering::Acquire)
	}

	/// Classifies a request path.
	pub fn classify(&self, path: &str) -> EndpointClass {
		self.routes.classify(path)
	}

	/// Reserves one in-flight slot, failing without side effects when the ceiling is reached.
	pub fn admit(&self) -> Result<InFlightPermit> {
		self.pending
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
				(current < self.ceiling).then_some(current + 1)
			})
			.map_err(|_| Error::AdmissionControl { ceiling: self.ceiling })?;

		Ok(InFlightPermit { pending: self.pending.clone() })
	}

	/// Loads the access token to attach to a call of class `class`.
	///
	/// Public calls never carry a credential. A failed load is treated as "no credential";
	/// the call then fails authentication downstream.
	pub async fn credential_for(
		&self,
		class: EndpointClass,
		store: &dyn CredentialStore,
	) -> Option<TokenSecret> {
		if !class.is_protected() {
			return None;
		}

		match store.load().await {
			Ok(pair) => pair.map(|pair| pair.access_token),
			Err(e) => {
				obs::event(FlowKind::Dispatch, "credential_load_failed", &e);

				None
			},
		}
	}

	/// Builds the wire request, admits it, and hands it to the transport.
	///
	/// The transport's `send` runs before this returns, so calls started in sequence reach the
	/// transport in that sequence.
	pub(crate) fn start<T>(
		&self,
		transport: &T,
		base: &Url,
		timeout: StdDuration,
		request: &RequestDescriptor,
		bearer: Option<&TokenSecret>,
	) -> Result<PendingCall>
	where
		T: ?Sized + HttpTransport,
	{
		let wire = request.to_wire(base, bearer)?;
		let permit = self.admit()?;
		let future = transport.send(wire);

		Ok(PendingCall { permit, future, timeout, path: request.path().to_owned() })
	}
}

/// RAII reservation of one in-flight slot.
#[derive(Debug)]
pub struct InFlightPermit {
	pending: Arc<AtomicUsize>,
}
impl Drop for InFlightPermit {
	fn drop(&mut self) {
		self.pending.fetch_sub(1, Ordering::AcqRel);
	}
}

/// An admitted call whose transport future has not settled yet.
pub(crate) struct PendingCall {
	permit: InFlightPermit,
	future: TransportFuture,
	timeout: StdDuration,
	path: String,
}
impl PendingCall {
	/// Awaits the response under the per-call timeout and classifies its status.
	pub(crate) async fn settle(self) -> Result<ApiResponse> {
		let Self { permit, future, timeout, path } = self;
		let outcome = tokio::time::timeout(timeout, future).await;

		drop(permit);

		match outcome {
			Ok(Ok(response)) => classify(&path, response),
			Ok(Err(e)) => Err(e.into()),
			Err(_) => Err(TransportError::Timeout { after: timeout }.into()),
		}
	}
}
impl Debug for PendingCall {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PendingCall")
			.field("path", &self.path)
			.field("timeout", &self.timeout)
			.finish_non_exhaustive()
	}
}

/// Maps a wire response onto the error taxonomy.
pub(crate) fn classify(path: &str, response: HttpResponse) -> Result<ApiResponse> {
	let status = response.status();

	if status.is_success() {
		return Ok(ApiResponse::from_wire(response));
	}

	let failure = ApiFailure::new(status.as_u16(), path, response.body());

	Err(match status {
		StatusCode::UNAUTHORIZED => Error::Authentication(failure),
		status if status.is_server_error() => Error::Server(failure),
		_ => Error::Validation(failure),
	})
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::MemoryStore;

	fn gate(ceiling: usize) -> RequestGate {
		RequestGate::new(ceiling, PublicRoutes::default())
	}

	fn response(status: u16) -> HttpResponse {
		let mut response = HttpResponse::new(b"body".to_vec());

		*response.status_mut() =
			StatusCode::from_u16(status).expect("Status fixture should be valid.");

		response
	}

	#[test]
	fn ceiling_rejects_without_counting() {
		let gate = gate(2);
		let first = gate.admit().expect("First admission should succeed.");
		let second = gate.admit().expect("Second admission should succeed.");

		assert_eq!(gate.pending(), 2);
		assert!(matches!(gate.admit(), Err(Error::AdmissionControl { ceiling: 2 })));
		assert_eq!(gate.pending(), 2);

		drop(first);

		assert_eq!(gate.pending(), 1);

		let third = gate.admit().expect("Freed slot should be reusable.");

		drop((second, third));

		assert_eq!(gate.pending(), 0);
	}

	#[test]
	fn classify_maps_status_families() {
		assert!(classify("/events", response(204)).is_ok());
		assert!(matches!(classify("/events", response(401)), Err(Error::Authentication(_))));
		assert!(matches!(classify("/events", response(403)), Err(Error::Validation(_))));
		assert!(matches!(classify("/events", response(422)), Err(Error::Validation(_))));
		assert!(matches!(classify("/events", response(503)), Err(Error::Server(f)) if f.status == 503));
	}

	#[tokio::test]
	async fn credentials_attach_only_to_protected_calls() {
		let gate = gate(1);
		let store = MemoryStore::with_pair(
			crate::auth::CredentialPair::new("access", "refresh").expect("Pair should build."),
		);

		assert!(gate.credential_for(gate.classify("/users/login"), &store).await.is_none());

		let token = gate
			.credential_for(gate.classify("/events"), &store)
			.await
			.expect("Protected call should carry the access token.");

		assert_eq!(token.expose(), "access");
		assert!(gate.credential_for(EndpointClass::Protected, &MemoryStore::default()).await.is_none());
	}
}
