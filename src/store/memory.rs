//! Thread-safe in-memory [`CredentialStore`] for tests and ephemeral sessions.

// self
use crate::{
	_prelude::*,
	auth::CredentialPair,
	store::{CredentialStore, StoreError, StoreFuture},
};

type Slot = Arc<RwLock<Option<CredentialPair>>>;

/// Storage backend that keeps the pair in-process.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Slot);
impl MemoryStore {
	/// Creates a store seeded with a pair.
	pub fn with_pair(pair: CredentialPair) -> Self {
		Self(Arc::new(RwLock::new(Some(pair))))
	}

	/// Synchronous snapshot of the stored pair.
	pub fn snapshot(&self) -> Option<CredentialPair> {
		self.0.read().clone()
	}

	fn save_now(slot: Slot, pair: CredentialPair) -> Result<(), StoreError> {
		*slot.write() = Some(pair);

		Ok(())
	}

	fn clear_now(slot: Slot) -> Result<(), StoreError> {
		slot.write().take();

		Ok(())
	}
}
impl CredentialStore for MemoryStore {
	fn save(&self, pair: CredentialPair) -> StoreFuture<'_, ()> {
		let slot = self.0.clone();

		Box::pin(async move { Self::save_now(slot, pair) })
	}

	fn load(&self) -> StoreFuture<'_, Option<CredentialPair>> {
		let slot = self.0.clone();

		Box::pin(async move { Ok(slot.read().clone().filter(CredentialPair::is_complete)) })
	}

	fn clear(&self) -> StoreFuture<'_, ()> {
		let slot = self.0.clone();

		Box::pin(async move { Self::clear_now(slot) })
	}
}
