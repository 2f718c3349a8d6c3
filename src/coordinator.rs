//! Refresh state machine: at most one refresh in flight, FIFO waiters, explicit leases.
//!
//! [`RefreshCoordinator`] owns the `Idle`/`Refreshing` flag and the waiter queue. Every
//! transition is a short critical section under one lock that is never held across an
//! `.await`, so the check of the state and its update cannot interleave with another task.
//! The async side of a refresh (network exchange, persistence, replays) lives in
//! [`crate::refresh`]; this module only decides who leads, who waits, and who is drained.

mod metrics;

pub use metrics::RefreshMetrics;

// crates.io
use tokio::sync::oneshot;
// self
use crate::{
	_prelude::*,
	gate::PendingCall,
	obs::{self, FlowKind},
	transport::RequestDescriptor,
};

/// Coordinator phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RefreshState {
	/// No refresh in flight.
	#[default]
	Idle,
	/// One refresh exchange is in flight; new 401s queue behind it.
	Refreshing,
}

/// Owned refresh state machine.
#[derive(Debug, Default)]
pub struct RefreshCoordinator {
	state: Arc<Mutex<CoordinatorState>>,
}
impl RefreshCoordinator {
	/// Current phase.
	pub fn state(&self) -> RefreshState {
		self.state.lock().phase
	}

	/// Number of queued waiters.
	pub fn queued(&self) -> usize {
		self.state.lock().waiters.len()
	}

	/// Counter of successful credential rotations.
	///
	/// Callers read it before loading the credential they attach, so a later 401 can tell
	/// whether the credential was rotated in the meantime.
	pub fn rotation(&self) -> u64 {
		self.state.lock().rotation
	}

	/// Decides how a protected call that received its first 401 recovers.
	pub(crate) fn on_unauthorized(
		&self,
		request: &RequestDescriptor,
		observed_rotation: u64,
	) -> Recovery {
		let mut state = self.state.lock();

		match state.phase {
			RefreshState::Refreshing => {
				let (reply, outcome) = oneshot::channel();

				state.waiters.push_back(Waiter { request: Some(request.clone()), reply });

				Recovery::Queued(outcome)
			},
			RefreshState::Idle if state.rotation != observed_rotation => Recovery::Replay,
			RefreshState::Idle => Recovery::Lead(self.begin(&mut state)),
		}
	}

	/// Joins the refresh in flight, or leads a new one.
	pub(crate) fn join(&self) -> Recovery {
		let mut state = self.state.lock();

		match state.phase {
			RefreshState::Refreshing => {
				let (reply, outcome) = oneshot::channel();

				state.waiters.push_back(Waiter { request: None, reply });

				Recovery::Queued(outcome)
			},
			RefreshState::Idle => Recovery::Lead(self.begin(&mut state)),
		}
	}

	/// Leads a new refresh only when none is in flight.
	pub(crate) fn try_lead(&self) -> Option<RefreshLease> {
		let mut state = self.state.lock();

		match state.phase {
			RefreshState::Refreshing => None,
			RefreshState::Idle => Some(self.begin(&mut state)),
		}
	}

	/// Returns `true` while no logout or login superseded `lease`.
	pub(crate) fn is_current(&self, lease: &RefreshLease) -> bool {
		self.state.lock().epoch == lease.epoch
	}

	/// Records a successful rotation and drains every waiter in arrival order.
	///
	/// Returns `None` when the lease was superseded; the state is left untouched then.
	pub(crate) fn complete_success(&self, mut lease: RefreshLease) -> Option<Vec<Waiter>> {
		lease.settled = true;

		let mut state = self.state.lock();

		if state.epoch != lease.epoch {
			return None;
		}

		state.phase = RefreshState::Idle;
		state.rotation += 1;

		Some(state.waiters.drain(..).collect())
	}

	/// Returns to `Idle` after a failed refresh and drains every waiter in arrival order.
	pub(crate) fn complete_failure(&self, mut lease: RefreshLease) -> Option<Vec<Waiter>> {
		lease.settled = true;

		abandon(&self.state, lease.epoch)
	}

	/// Invalidates any lease in flight, returns to `Idle`, and drains the queue.
	pub(crate) fn reset(&self) -> Vec<Waiter> {
		self.supersede(false)
	}

	/// Like [`reset`](Self::reset), and counts the adopted pair as a rotation so 401s for calls
	/// dispatched with the previous credential replay instead of refreshing.
	pub(crate) fn replace(&self) -> Vec<Waiter> {
		self.supersede(true)
	}

	fn supersede(&self, rotated: bool) -> Vec<Waiter> {
		let mut state = self.state.lock();

		state.epoch += 1;
		state.phase = RefreshState::Idle;

		if rotated {
			state.rotation += 1;
		}

		state.waiters.drain(..).collect()
	}

	fn begin(&self, state: &mut CoordinatorState) -> RefreshLease {
		state.phase = RefreshState::Refreshing;

		RefreshLease { state: self.state.clone(), epoch: state.epoch, settled: false }
	}
}

/// Returns to `Idle` and drains the queue, unless `epoch` was superseded.
fn abandon(state: &Mutex<CoordinatorState>, epoch: u64) -> Option<Vec<Waiter>> {
	let mut state = state.lock();

	if state.epoch != epoch {
		return None;
	}

	state.phase = RefreshState::Idle;

	Some(state.waiters.drain(..).collect())
}

#[derive(Debug, Default)]
struct CoordinatorState {
	phase: RefreshState,
	waiters: VecDeque<Waiter>,
	epoch: u64,
	rotation: u64,
}

/// Proof that the holder leads the refresh in flight.
///
/// A lease dropped before it was completed (the leader's future was cancelled) fails the
/// refresh: the coordinator returns to `Idle` and every waiter settles with
/// [`WaiterOutcome::RefreshFailed`].
pub(crate) struct RefreshLease {
	state: Arc<Mutex<CoordinatorState>>,
	epoch: u64,
	settled: bool,
}
impl Debug for RefreshLease {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshLease")
			.field("epoch", &self.epoch)
			.field("settled", &self.settled)
			.finish_non_exhaustive()
	}
}
impl Drop for RefreshLease {
	fn drop(&mut self) {
		if self.settled {
			return;
		}

		let Some(waiters) = abandon(&self.state, self.epoch) else {
			return;
		};

		obs::event(FlowKind::Refresh, "abandoned", &format_args!("{} waiter(s)", waiters.len()));
		waiters.into_iter().for_each(|waiter| waiter.resolve(WaiterOutcome::RefreshFailed));
	}
}

/// Outcome of a 401 or join request.
#[derive(Debug)]
pub(crate) enum Recovery {
	/// Caller transitioned the coordinator to `Refreshing` and must run the exchange.
	Lead(RefreshLease),
	/// Caller waits for the refresh in flight.
	Queued(oneshot::Receiver<WaiterOutcome>),
	/// The credential was rotated after the call was dispatched; replay without refreshing.
	Replay,
}

/// Continuation parked behind a refresh.
#[derive(Debug)]
pub(crate) struct Waiter {
	request: Option<RequestDescriptor>,
	reply: oneshot::Sender<WaiterOutcome>,
}
impl Waiter {
	/// Original request to replay; `None` for callers that only wait for fresh credentials.
	pub(crate) fn request(&self) -> Option<&RequestDescriptor> {
		self.request.as_ref()
	}

	/// Resolves the waiter. A caller that stopped waiting is ignored.
	pub(crate) fn resolve(self, outcome: WaiterOutcome) {
		let _ = self.reply.send(outcome);
	}
}

/// Resolution delivered to a waiter.
#[derive(Debug)]
pub(crate) enum WaiterOutcome {
	/// Refresh succeeded; the replay was already admitted and handed to the transport.
	Replayed(Result<PendingCall>),
	/// Refresh succeeded; nothing to replay.
	Refreshed,
	/// Refresh failed; the waiter surfaces its own original error.
	RefreshFailed,
	/// Logout or login ended the session while the waiter was queued.
	Terminated,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn lead(recovery: Recovery) -> RefreshLease {
		match recovery {
			Recovery::Lead(lease) => lease,
			other => panic!("Expected to lead the refresh, got {other:?}."),
		}
	}

	fn queued(recovery: Recovery) -> oneshot::Receiver<WaiterOutcome> {
		match recovery {
			Recovery::Queued(outcome) => outcome,
			other => panic!("Expected to be queued, got {other:?}."),
		}
	}

	#[test]
	fn first_unauthorized_leads_and_later_ones_queue_in_order() {
		let coordinator = RefreshCoordinator::default();
		let rotation = coordinator.rotation();
		let lease = lead(coordinator.on_unauthorized(&RequestDescriptor::get("/a"), rotation));

		assert_eq!(coordinator.state(), RefreshState::Refreshing);

		let _b = queued(coordinator.on_unauthorized(&RequestDescriptor::get("/b"), rotation));
		let _c = queued(coordinator.on_unauthorized(&RequestDescriptor::get("/c"), rotation));
		let _join = queued(coordinator.join());

		assert!(coordinator.try_lead().is_none());
		assert_eq!(coordinator.queued(), 3);

		let drained = coordinator.complete_success(lease).expect("Lease should be current.");
		let paths: Vec<_> =
			drained.iter().map(|waiter| waiter.request().map(|r| r.path().to_owned())).collect();

		assert_eq!(paths, vec![Some("/b".to_owned()), Some("/c".to_owned()), None]);
		assert_eq!(coordinator.state(), RefreshState::Idle);
		assert_eq!(coordinator.queued(), 0);
		assert_eq!(coordinator.rotation(), rotation + 1);
	}

	#[test]
	fn unauthorized_after_rotation_replays_without_refreshing() {
		let coordinator = RefreshCoordinator::default();
		let stale = coordinator.rotation();
		let lease = coordinator.try_lead().expect("Idle coordinator should accept a leader.");

		coordinator.complete_success(lease).expect("Lease should be current.");

		assert!(matches!(
			coordinator.on_unauthorized(&RequestDescriptor::get("/a"), stale),
			Recovery::Replay
		));
		assert_eq!(coordinator.state(), RefreshState::Idle);
	}

	#[test]
	fn failure_drains_queue_without_rotating() {
		let coordinator = RefreshCoordinator::default();
		let lease = lead(coordinator.join());
		let mut waiter = queued(coordinator.on_unauthorized(&RequestDescriptor::get("/b"), 0));
		let drained = coordinator.complete_failure(lease).expect("Lease should be current.");

		assert_eq!(drained.len(), 1);
		assert_eq!(coordinator.rotation(), 0);
		assert_eq!(coordinator.state(), RefreshState::Idle);

		drained.into_iter().for_each(|waiter| waiter.resolve(WaiterOutcome::RefreshFailed));

		assert!(matches!(waiter.try_recv(), Ok(WaiterOutcome::RefreshFailed)));
	}

	#[test]
	fn reset_supersedes_the_lease_in_flight() {
		let coordinator = RefreshCoordinator::default();
		let stale = lead(coordinator.join());
		let _waiter = queued(coordinator.join());
		let drained = coordinator.reset();

		assert_eq!(drained.len(), 1);
		assert_eq!(coordinator.state(), RefreshState::Idle);
		assert!(!coordinator.is_current(&stale));

		let fresh = coordinator.try_lead().expect("Reset coordinator should accept a leader.");

		assert!(coordinator.complete_success(stale).is_none());
		assert_eq!(coordinator.state(), RefreshState::Refreshing);
		assert!(coordinator.is_current(&fresh));
	}

	#[test]
	fn dropped_lease_fails_the_refresh_it_led() {
		let coordinator = RefreshCoordinator::default();
		let lease = lead(coordinator.join());
		let mut waiter = queued(coordinator.on_unauthorized(&RequestDescriptor::get("/b"), 0));

		drop(lease);

		assert_eq!(coordinator.state(), RefreshState::Idle);
		assert_eq!(coordinator.queued(), 0);
		assert_eq!(coordinator.rotation(), 0);
		assert!(matches!(waiter.try_recv(), Ok(WaiterOutcome::RefreshFailed)));
		assert!(coordinator.try_lead().is_some());
	}

	#[test]
	fn dropped_stale_lease_leaves_the_next_refresh_alone() {
		let coordinator = RefreshCoordinator::default();
		let stale = lead(coordinator.join());

		coordinator.reset();

		let _fresh = coordinator.try_lead().expect("Reset coordinator should accept a leader.");
		let mut waiter = queued(coordinator.join());

		drop(stale);

		assert_eq!(coordinator.state(), RefreshState::Refreshing);
		assert!(waiter.try_recv().is_err());
	}

	#[test]
	fn replace_counts_as_a_rotation() {
		let coordinator = RefreshCoordinator::default();
		let before_login = coordinator.rotation();
		let lease = lead(coordinator.join());
		let _waiter = queued(coordinator.join());
		let drained = coordinator.replace();

		assert_eq!(drained.len(), 1);
		assert_eq!(coordinator.rotation(), before_login + 1);
		assert!(matches!(
			coordinator.on_unauthorized(&RequestDescriptor::get("/a"), before_login),
			Recovery::Replay
		));

		drop(lease);

		assert_eq!(coordinator.state(), RefreshState::Idle);
	}

	#[test]
	fn resolving_a_dropped_waiter_is_harmless() {
		let coordinator = RefreshCoordinator::default();
		let lease = lead(coordinator.join());

		drop(queued(coordinator.join()));

		for waiter in coordinator.complete_success(lease).expect("Lease should be current.") {
			waiter.resolve(WaiterOutcome::Refreshed);
		}
	}
}
