//! Storage contract and built-in backends for the persisted credential pair.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{_prelude::*, auth::CredentialPair};

/// Boxed future returned by [`CredentialStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Durable key/value persistence of the access/refresh pair.
///
/// Every operation is atomic from the caller's perspective: a reader never observes one token
/// updated and the other stale. Only the refresh procedure and the session layer write
/// through this contract.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Persists or replaces the pair as a unit.
	fn save(&self, pair: CredentialPair) -> StoreFuture<'_, ()>;

	/// Loads the current pair; a partially persisted pair is reported as absent.
	fn load(&self) -> StoreFuture<'_, Option<CredentialPair>>;

	/// Removes both tokens.
	fn clear(&self) -> StoreFuture<'_, ()>;
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Key names under which the two tokens are persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreKeys {
	/// Key for the access token.
	pub access: String,
	/// Key for the refresh token.
	pub refresh: String,
}
impl Default for StoreKeys {
	fn default() -> Self {
		Self { access: "access_token".into(), refresh: "refresh_token".into() }
	}
}
