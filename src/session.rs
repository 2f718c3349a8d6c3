//! Session lifecycle: bootstrap from persisted credentials, login, logout.
//!
//! Every credential write here happens under the client's write lock and resets the
//! coordinator first, so a refresh that was in flight can no longer persist its result and
//! every request parked behind it settles with [`Error::SessionTerminated`].

// crates.io
use tokio::sync::watch;
// self
use crate::{
	_prelude::*,
	Client,
	auth::{CredentialPair, TokenPairResponse},
	coordinator::WaiterOutcome,
	error::RefreshFailure,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	transport::{HttpTransport, RequestDescriptor},
};

/// Why the session is logged out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogoutReason {
	/// No credentials were ever established in this process.
	Initial,
	/// The user logged out.
	UserLogout,
	/// A refresh failed or a retried call was rejected again.
	SessionExpired,
}

/// Observable session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
	/// A credential pair is persisted and believed valid.
	Authenticated,
	/// No usable credentials.
	LoggedOut(LogoutReason),
}
impl SessionState {
	/// Returns `true` for [`SessionState::Authenticated`].
	pub fn is_authenticated(self) -> bool {
		matches!(self, Self::Authenticated)
	}
}

impl<T> Client<T>
where
	T: ?Sized + HttpTransport,
{
	/// Current session state.
	pub fn session_state(&self) -> SessionState {
		*self.inner.session.borrow()
	}

	/// Subscribes to session state changes (for example to route the UI back to login).
	pub fn subscribe(&self) -> watch::Receiver<SessionState> {
		self.inner.session.subscribe()
	}

	/// Restores the session from the credential store.
	///
	/// A live access token arms the proactive timer. An expired or undecodable one triggers
	/// one refresh, and a failure leaves the session logged out. Without a stored pair the
	/// session stays [`LogoutReason::Initial`].
	pub async fn bootstrap(&self) -> SessionState {
		const KIND: FlowKind = FlowKind::Session;

		let span = FlowSpan::new(KIND, "bootstrap");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let state = span.instrument(self.restore()).await;

		obs::record_flow_outcome(
			KIND,
			if state.is_authenticated() { FlowOutcome::Success } else { FlowOutcome::Failure },
		);

		state
	}

	/// Persists a pair obtained out of band and marks the session authenticated.
	///
	/// Supersedes any refresh in flight; requests parked behind it settle with
	/// [`Error::SessionTerminated`].
	pub async fn login(&self, pair: CredentialPair) -> Result<()> {
		const KIND: FlowKind = FlowKind::Session;

		let span = FlowSpan::new(KIND, "login");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.establish(pair)).await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	/// Posts `body` to the configured login endpoint and establishes the returned pair.
	pub async fn sign_in<B>(&self, body: &B) -> Result<CredentialPair>
	where
		B: ?Sized + Serialize,
	{
		let request = RequestDescriptor::post(&self.inner.config.login_path).json(body)?;
		let response = self.inner.start(&request, None)?.settle().await?;
		let parsed = response.json::<TokenPairResponse>()?;
		let pair = CredentialPair::from_parts(
			Some(parsed.access_token.expose().to_owned()),
			parsed.refresh_token.map(|token| token.expose().to_owned()),
		)
		.ok_or(RefreshFailure::IncompleteResponse)?;

		self.login(pair.clone()).await?;

		Ok(pair)
	}

	/// Clears credentials, cancels the proactive timer, and terminates parked requests.
	pub async fn logout(&self) -> Result<()> {
		let inner = &self.inner;
		let write = inner.write_lock.lock().await;
		let waiters = inner.coordinator.reset();

		inner.scheduler.cancel();

		let cleared = inner.store.clear().await;

		drop(write);
		waiters.into_iter().for_each(|waiter| waiter.resolve(WaiterOutcome::Terminated));
		inner.publish(SessionState::LoggedOut(LogoutReason::UserLogout));

		cleared.map_err(Error::from)
	}

	async fn restore(&self) -> SessionState {
		let stored = match self.inner.store.load().await {
			Ok(stored) => stored,
			Err(e) => {
				obs::event(FlowKind::Session, "load_failed", &e);

				None
			},
		};
		let Some(pair) = stored else {
			return self.session_state();
		};
		let now = OffsetDateTime::now_utc();

		if pair.claims().is_some_and(|claims| claims.is_live_at(now)) {
			self.inner.publish(SessionState::Authenticated);
			self.arm_scheduler(&pair);

			return SessionState::Authenticated;
		}

		match self.refresh_or_join().await {
			Ok(_) => SessionState::Authenticated,
			Err(e) => {
				obs::event(FlowKind::Session, "bootstrap_refresh_failed", &e);

				self.session_state()
			},
		}
	}

	async fn establish(&self, pair: CredentialPair) -> Result<()> {
		let inner = &self.inner;
		let write = inner.write_lock.lock().await;
		let waiters = inner.coordinator.replace();
		let saved = inner.store.save(pair.clone()).await;

		drop(write);
		waiters.into_iter().for_each(|waiter| waiter.resolve(WaiterOutcome::Terminated));
		saved?;
		inner.publish(SessionState::Authenticated);
		self.arm_scheduler(&pair);

		Ok(())
	}
}
