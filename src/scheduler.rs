//! Proactive renewal timer.
//!
//! [`RefreshPolicy`] turns a credential's decoded expiry into a delay and
//! [`RefreshScheduler`] keeps at most one armed timer for it. Arming always aborts the
//! previous timer first; a timer that fires detaches itself from the slot before it starts the
//! refresh, so the re-arm that follows a successful refresh never aborts the task that is
//! performing it.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use tokio::{runtime::Handle, task::AbortHandle};
// self
use crate::{
	_prelude::*,
	auth::Claims,
	obs::{self, FlowKind},
};

/// Window used to compute when the next silent refresh fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RefreshPolicy {
	/// How long before expiry the refresh should happen.
	pub safety_margin: Duration,
	/// Lower bound on any computed delay.
	pub minimum_delay: Duration,
}
impl RefreshPolicy {
	/// Default safety margin (2 minutes).
	pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::minutes(2);
	/// Default minimum delay (30 seconds).
	pub const DEFAULT_MINIMUM_DELAY: Duration = Duration::seconds(30);

	/// Creates a policy from explicit durations.
	pub const fn new(safety_margin: Duration, minimum_delay: Duration) -> Self {
		Self { safety_margin, minimum_delay }
	}

	/// Computes `max(expires_at - now - safety_margin, minimum_delay)`.
	///
	/// Returns `None` when the claims carry no expiry.
	pub fn delay_at(&self, claims: &Claims, now: OffsetDateTime) -> Option<Duration> {
		let until_expiry = claims.remaining_at(now)?;

		Some((until_expiry - self.safety_margin).max(self.minimum_delay))
	}
}
impl Default for RefreshPolicy {
	fn default() -> Self {
		Self::new(Self::DEFAULT_SAFETY_MARGIN, Self::DEFAULT_MINIMUM_DELAY)
	}
}

/// Owner of the single proactive refresh timer.
#[derive(Debug, Default)]
pub struct RefreshScheduler {
	slot: Mutex<TimerSlot>,
	arms: AtomicU64,
}
impl RefreshScheduler {
	/// Returns `true` while a timer is armed and has not fired.
	pub fn is_armed(&self) -> bool {
		self.slot.lock().current.is_some()
	}

	/// Delay the live timer was armed with.
	pub fn armed_delay(&self) -> Option<StdDuration> {
		self.slot.lock().current.as_ref().map(|timer| timer.delay)
	}

	/// Total number of timers armed over the scheduler's lifetime.
	pub fn arms(&self) -> u64 {
		self.arms.load(Ordering::Relaxed)
	}

	/// Cancels the live timer, returning `true` if one was armed.
	pub fn cancel(&self) -> bool {
		match self.slot.lock().current.take() {
			Some(timer) => {
				timer.task.abort();

				true
			},
			None => false,
		}
	}

	/// Cancels any live timer and arms a new one that runs `fire` after `delay`.
	///
	/// `fire` receives the timer's generation, which it must hand to
	/// [`take_fired`](Self::take_fired) before doing any work. Outside a Tokio runtime nothing
	/// is armed and `false` is returned.
	pub(crate) fn arm<F, Fut>(&self, delay: StdDuration, fire: F) -> bool
	where
		F: 'static + Send + FnOnce(u64) -> Fut,
		Fut: 'static + Send + Future<Output = ()>,
	{
		let Ok(runtime) = Handle::try_current() else {
			self.cancel();
			obs::event(FlowKind::Schedule, "no_runtime", &"proactive refresh disabled");

			return false;
		};
		let mut slot = self.slot.lock();

		if let Some(previous) = slot.current.take() {
			previous.task.abort();
		}

		slot.generation += 1;

		let generation = slot.generation;
		let task = runtime
			.spawn(async move {
				tokio::time::sleep(delay).await;
				fire(generation).await;
			})
			.abort_handle();

		slot.current = Some(ArmedTimer { generation, delay, task });
		self.arms.fetch_add(1, Ordering::Relaxed);
		obs::event(FlowKind::Schedule, "armed", &format_args!("{delay:?}"));

		true
	}

	/// Detaches a fired timer from the slot; `false` means it was superseded.
	pub(crate) fn take_fired(&self, generation: u64) -> bool {
		let mut slot = self.slot.lock();

		if slot.current.as_ref().is_some_and(|timer| timer.generation == generation) {
			slot.current = None;

			true
		} else {
			false
		}
	}
}

#[derive(Debug, Default)]
struct TimerSlot {
	current: Option<ArmedTimer>,
	generation: u64,
}

#[derive(Debug)]
struct ArmedTimer {
	generation: u64,
	delay: StdDuration,
	task: AbortHandle,
}
