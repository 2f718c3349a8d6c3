//! File-backed [`CredentialStore`] with a synchronous cache and atomic durable writes.

// std
use std::{
	collections::BTreeMap,
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::CredentialPair,
	store::{CredentialStore, StoreError, StoreFuture, StoreKeys},
};

type Snapshot = BTreeMap<String, String>;

/// Persists both tokens as one JSON document after each mutation.
///
/// Reads are served from the in-memory cache; writes are serialized and only become visible
/// once the temp-file-and-rename replacement succeeded.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	keys: StoreKeys,
	cache: Arc<RwLock<Option<CredentialPair>>>,
	write_guard: Arc<AsyncMutex<()>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path using the default key names.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		Self::open_with_keys(path, StoreKeys::default())
	}

	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open_with_keys(path: impl Into<PathBuf>, keys: StoreKeys) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;
		let pair = CredentialPair::from_parts(
			snapshot.get(&keys.access).cloned(),
			snapshot.get(&keys.refresh).cloned(),
		);

		Ok(Self {
			path,
			keys,
			cache: Arc::new(RwLock::new(pair)),
			write_guard: Arc::new(AsyncMutex::new(())),
		})
	}

	/// Location of the backing file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
		if !path.exists() {
			return Ok(Snapshot::new());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.is_empty() {
			return Ok(Snapshot::new());
		}

		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist(&self, pair: Option<&CredentialPair>) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let mut snapshot = Snapshot::new();

		if let Some(pair) = pair {
			snapshot.insert(self.keys.access.clone(), pair.access_token.expose().to_owned());
			snapshot.insert(self.keys.refresh.clone(), pair.refresh_token.expose().to_owned());
		}

		let serialized =
			serde_json::to_vec_pretty(&snapshot).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize credential snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}
}
impl CredentialStore for FileStore {
	fn save(&self, pair: CredentialPair) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let _write = self.write_guard.lock().await;

			self.persist(Some(&pair))?;
			*self.cache.write() = Some(pair);

			Ok(())
		})
	}

	fn load(&self) -> StoreFuture<'_, Option<CredentialPair>> {
		Box::pin(async move { Ok(self.cache.read().clone()) })
	}

	fn clear(&self) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let _write = self.write_guard.lock().await;

			self.persist(None)?;
			self.cache.write().take();

			Ok(())
		})
	}
}
