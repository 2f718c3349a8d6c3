//! Refresh exchange, leader completion, and replay of parked requests.
//!
//! Exactly one task leads a refresh (see
//! [`RefreshCoordinator`](crate::coordinator::RefreshCoordinator)). The leader exchanges the
//! refresh token, persists the new pair under the client's write lock, then dispatches its own
//! replay followed by every queued replay in arrival order. Each
//! replay is handed to the transport before the next one is started, so the transport
//! observes them in queue order. A failed refresh clears the credential store and ends the
//! session. A refresh refused by admission control never left the process, so it only fails
//! the requests that waited on it.

// self
use crate::{
	_prelude::*,
	Client,
	auth::{CredentialPair, TokenPairResponse},
	coordinator::{Recovery, RefreshLease, WaiterOutcome},
	error::{ApiFailure, RefreshFailure},
	gate::PendingCall,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	session::{LogoutReason, SessionState},
	store::StoreError,
	transport::{ApiResponse, HttpTransport, RequestDescriptor},
};

#[derive(Serialize)]
struct RefreshBody<'a> {
	refresh_token: &'a str,
}

/// Successful refresh led by the current task.
struct Rotated {
	pair: CredentialPair,
	own_replay: Option<Result<PendingCall>>,
}

/// Why a led refresh did not produce a pair.
#[derive(Debug)]
enum LeadError {
	Failed(RefreshFailure),
	/// The refresh call hit the in-flight ceiling; the session survives.
	NotAdmitted { ceiling: usize },
	/// A logout or login ended the session while the exchange was in flight.
	Superseded,
}
impl From<RefreshFailure> for LeadError {
	fn from(failure: RefreshFailure) -> Self {
		Self::Failed(failure)
	}
}
impl From<StoreError> for LeadError {
	fn from(e: StoreError) -> Self {
		Self::Failed(RefreshFailure::Storage(e))
	}
}
impl From<Error> for LeadError {
	fn from(error: Error) -> Self {
		let failure = match error {
			Error::AdmissionControl { ceiling } => return Self::NotAdmitted { ceiling },
			Error::Storage(e) => RefreshFailure::Storage(e),
			Error::Config(e) => RefreshFailure::Config(e),
			Error::Network(e) => RefreshFailure::Transport(e),
			Error::Authentication(failure) | Error::Server(failure) | Error::Validation(failure) =>
				RefreshFailure::Rejected(failure),
			Error::Refresh(failure) => failure,
			Error::ResponseParse { source, .. } => RefreshFailure::MalformedResponse(source),
			Error::SessionTerminated => RefreshFailure::MissingCredential,
		};

		Self::Failed(failure)
	}
}

impl<T> Client<T>
where
	T: ?Sized + HttpTransport,
{
	/// Forces a refresh now, joining the refresh in flight if there is one.
	///
	/// On success the scheduler is re-armed from the new access token.
	pub async fn force_refresh(&self) -> Result<CredentialPair> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "force_refresh");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.refresh_or_join()).await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	pub(crate) async fn refresh_or_join(&self) -> Result<CredentialPair> {
		match self.inner.coordinator.join() {
			Recovery::Lead(lease) => match self.lead(lease, None).await {
				Ok(rotated) => Ok(rotated.pair),
				Err(LeadError::Failed(failure)) => Err(failure.into()),
				Err(LeadError::NotAdmitted { ceiling }) => Err(Error::AdmissionControl { ceiling }),
				Err(LeadError::Superseded) => Err(Error::SessionTerminated),
			},
			Recovery::Queued(outcome) => {
				self.inner.metrics.record_coalesced();
				obs::record_coalesced();

				match outcome.await {
					Ok(WaiterOutcome::Refreshed | WaiterOutcome::Replayed(_)) =>
						self.current_pair().await,
					Ok(WaiterOutcome::RefreshFailed) => Err(RefreshFailure::Coalesced.into()),
					Ok(WaiterOutcome::Terminated) | Err(_) => Err(Error::SessionTerminated),
				}
			},
			Recovery::Replay => self.current_pair().await,
		}
	}

	async fn current_pair(&self) -> Result<CredentialPair> {
		self.inner.store.load().await?.ok_or_else(|| RefreshFailure::MissingCredential.into())
	}

	/// Recovers a protected call that received its first 401.
	pub(crate) async fn recover(
		&self,
		request: RequestDescriptor,
		failure: ApiFailure,
		observed_rotation: u64,
	) -> Result<ApiResponse> {
		let inner = &self.inner;

		match inner.coordinator.on_unauthorized(&request, observed_rotation) {
			Recovery::Replay => {
				obs::event(FlowKind::Refresh, "replay_rotated", &request.path());

				let bearer = inner.store.load().await?.map(|pair| pair.access_token);

				self.finish_replay(inner.start(&request, bearer.as_ref())).await
			},
			Recovery::Queued(outcome) => {
				inner.metrics.record_coalesced();
				obs::record_coalesced();
				obs::event(FlowKind::Refresh, "queued", &request.path());

				match outcome.await {
					Ok(WaiterOutcome::Replayed(call)) => self.finish_replay(call).await,
					Ok(WaiterOutcome::Refreshed) => {
						let bearer = inner.store.load().await?.map(|pair| pair.access_token);

						self.finish_replay(inner.start(&request, bearer.as_ref())).await
					},
					Ok(WaiterOutcome::RefreshFailed) => Err(Error::Authentication(failure)),
					Ok(WaiterOutcome::Terminated) | Err(_) => Err(Error::SessionTerminated),
				}
			},
			Recovery::Lead(lease) => match self.refresh_as_leader(lease, Some(&request)).await {
				Ok(Rotated { own_replay: Some(call), .. }) => self.finish_replay(call).await,
				Ok(Rotated { own_replay: None, pair }) =>
					self.finish_replay(inner.start(&request, Some(&pair.access_token))).await,
				Err(LeadError::Failed(_) | LeadError::NotAdmitted { .. }) =>
					Err(Error::Authentication(failure)),
				Err(LeadError::Superseded) => Err(Error::SessionTerminated),
			},
		}
	}

	/// Timer entry point; skips when a refresh is already in flight.
	pub(crate) async fn refresh_proactively(&self) {
		let Some(lease) = self.inner.coordinator.try_lead() else {
			self.inner.metrics.record_skipped();
			obs::event(FlowKind::Schedule, "skipped", &"refresh already in flight");

			return;
		};

		match self.refresh_as_leader(lease, None).await {
			Err(LeadError::NotAdmitted { .. }) =>
				if let Ok(Some(pair)) = self.inner.store.load().await {
					self.arm_scheduler(&pair);
				},
			Ok(_) | Err(LeadError::Failed(_) | LeadError::Superseded) => {},
		}
	}

	/// Re-arms the proactive timer from `pair`, or cancels it when the expiry is unknown.
	pub(crate) fn arm_scheduler(&self, pair: &CredentialPair) {
		let inner = &self.inner;
		let now = OffsetDateTime::now_utc();
		let delay =
			pair.claims().and_then(|claims| inner.config.refresh_policy.delay_at(&claims, now));
		let Some(delay) = delay else {
			inner.scheduler.cancel();
			obs::event(FlowKind::Schedule, "not_armed", &"access token carries no expiry");

			return;
		};
		let weak = Arc::downgrade(&self.inner);

		inner.scheduler.arm(delay.unsigned_abs(), move |generation| async move {
			let Some(inner) = weak.upgrade() else { return };

			if !inner.scheduler.take_fired(generation) {
				return;
			}

			let client = Client { inner };
			let span = FlowSpan::new(FlowKind::Refresh, "scheduled");

			span.instrument(client.refresh_proactively()).await;
		});
	}

	/// Clears credentials after the retried call was rejected again.
	pub(crate) async fn expire_session(&self) {
		let inner = &self.inner;
		let _write = inner.write_lock.lock().await;

		if let Err(e) = inner.store.clear().await {
			obs::event(FlowKind::Session, "clear_failed", &e);
		}

		inner.scheduler.cancel();
		inner.publish(SessionState::LoggedOut(LogoutReason::SessionExpired));
	}

	async fn finish_replay(&self, call: Result<PendingCall>) -> Result<ApiResponse> {
		match call?.settle().await {
			Err(Error::Authentication(failure)) => {
				obs::event(FlowKind::Refresh, "replay_unauthorized", &failure);
				self.expire_session().await;

				Err(Error::Authentication(failure))
			},
			result => result,
		}
	}

	async fn refresh_as_leader(
		&self,
		lease: RefreshLease,
		own: Option<&RequestDescriptor>,
	) -> Result<Rotated, LeadError> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "lead");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.lead(lease, own)).await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	async fn lead(
		&self,
		lease: RefreshLease,
		own: Option<&RequestDescriptor>,
	) -> Result<Rotated, LeadError> {
		let inner = &self.inner;

		inner.metrics.record_attempt();

		let pair = match self.exchange().await {
			Ok(pair) => pair,
			Err(LeadError::Failed(failure)) => return Err(self.fail(lease, failure).await),
			Err(LeadError::NotAdmitted { ceiling }) => return Err(self.refuse(lease, ceiling)),
			Err(LeadError::Superseded) => return Err(LeadError::Superseded),
		};
		let write = inner.write_lock.lock().await;

		if !inner.coordinator.is_current(&lease) {
			return Err(LeadError::Superseded);
		}
		if let Err(e) = inner.store.save(pair.clone()).await {
			drop(write);

			return Err(self.fail(lease, RefreshFailure::Storage(e)).await);
		}

		let Some(waiters) = inner.coordinator.complete_success(lease) else {
			return Err(LeadError::Superseded);
		};

		drop(write);
		inner.metrics.record_success();
		inner.publish(SessionState::Authenticated);
		obs::event(FlowKind::Refresh, "rotated", &format_args!("{} waiter(s)", waiters.len()));

		let own_replay = own.map(|request| inner.start(request, Some(&pair.access_token)));

		for waiter in waiters {
			let outcome = match waiter.request() {
				Some(request) =>
					WaiterOutcome::Replayed(inner.start(request, Some(&pair.access_token))),
				None => WaiterOutcome::Refreshed,
			};

			waiter.resolve(outcome);
		}

		self.arm_scheduler(&pair);

		Ok(Rotated { pair, own_replay })
	}

	/// Fails the waiters of a refresh that was never admitted, keeping the session.
	fn refuse(&self, lease: RefreshLease, ceiling: usize) -> LeadError {
		let inner = &self.inner;

		inner.metrics.record_failure();
		obs::event(FlowKind::Refresh, "not_admitted", &format_args!("ceiling {ceiling}"));

		let Some(waiters) = inner.coordinator.complete_failure(lease) else {
			return LeadError::Superseded;
		};

		waiters.into_iter().for_each(|waiter| waiter.resolve(WaiterOutcome::RefreshFailed));

		LeadError::NotAdmitted { ceiling }
	}

	async fn fail(&self, lease: RefreshLease, failure: RefreshFailure) -> LeadError {
		let inner = &self.inner;

		inner.metrics.record_failure();
		obs::event(FlowKind::Refresh, "failed", &failure);

		let write = inner.write_lock.lock().await;

		if !inner.coordinator.is_current(&lease) {
			return LeadError::Superseded;
		}
		if let Err(e) = inner.store.clear().await {
			obs::event(FlowKind::Session, "clear_failed", &e);
		}

		let waiters = inner.coordinator.complete_failure(lease).unwrap_or_default();

		drop(write);
		inner.scheduler.cancel();
		inner.publish(SessionState::LoggedOut(LogoutReason::SessionExpired));
		waiters.into_iter().for_each(|waiter| waiter.resolve(WaiterOutcome::RefreshFailed));

		LeadError::Failed(failure)
	}

	/// Exchanges the persisted refresh token for a new pair.
	///
	/// The call is public (no bearer) and counts against the in-flight ceiling like any other
	/// call. A response without a `refresh_token` keeps the current one.
	async fn exchange(&self) -> Result<CredentialPair, LeadError> {
		let inner = &self.inner;
		let current = inner.store.load().await?.ok_or(RefreshFailure::MissingCredential)?;
		let request = RequestDescriptor::post(&inner.config.refresh_path)
			.json(&RefreshBody { refresh_token: current.refresh_token.expose() })?;
		let response = inner.start(&request, None)?.settle().await?;
		let parsed = response.json::<TokenPairResponse>()?;
		let refresh_token = parsed
			.refresh_token
			.filter(|token| !token.is_empty())
			.unwrap_or(current.refresh_token);

		if parsed.access_token.is_empty() {
			return Err(RefreshFailure::IncompleteResponse.into());
		}

		Ok(CredentialPair { access_token: parsed.access_token, refresh_token })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::error::TransportError;

	#[test]
	fn exchange_errors_narrow_to_lead_errors() {
		let rejected = LeadError::from(Error::Server(ApiFailure::new(502, "/users/refresh", b"")));

		assert!(matches!(
			rejected,
			LeadError::Failed(RefreshFailure::Rejected(ref failure)) if failure.status == 502
		));
		assert!(matches!(
			LeadError::from(Error::AdmissionControl { ceiling: 3 }),
			LeadError::NotAdmitted { ceiling: 3 }
		));
		assert!(matches!(
			LeadError::from(Error::Network(TransportError::Timeout {
				after: StdDuration::from_secs(10)
			})),
			LeadError::Failed(RefreshFailure::Transport(_))
		));
		assert!(matches!(
			LeadError::from(Error::Refresh(RefreshFailure::IncompleteResponse)),
			LeadError::Failed(RefreshFailure::IncompleteResponse)
		));
	}
}
