mod common;

// std
use std::{env, fs, path::PathBuf, process, sync::Arc};
// crates.io
use credential_coordinator::{
	Client,
	session::SessionState,
	store::{CredentialStore, FileStore, MemoryStore, StoreKeys},
};
use time::OffsetDateTime;
// self
use common::ScriptedTransport;

fn temp_path(tag: &str) -> PathBuf {
	env::temp_dir().join(format!(
		"credential_coordinator_store_it_{tag}_{}_{}.json",
		process::id(),
		OffsetDateTime::now_utc().unix_timestamp_nanos(),
	))
}

#[tokio::test]
async fn stores_share_one_contract() {
	let path = temp_path("contract");
	let backends: Vec<Arc<dyn CredentialStore>> = vec![
		Arc::new(MemoryStore::default()),
		Arc::new(FileStore::open(&path).expect("Failed to open file store snapshot.")),
	];

	for store in backends {
		assert!(store.load().await.expect("Empty load should succeed.").is_none());

		store.save(common::pair("access-1", "refresh-1")).await.expect("Save should succeed.");
		store.save(common::pair("access-2", "refresh-2")).await.expect("Overwrite should succeed.");

		let loaded =
			store.load().await.expect("Load should succeed.").expect("Pair should be present.");

		assert_eq!(loaded.access_token.expose(), "access-2");
		assert_eq!(loaded.refresh_token.expose(), "refresh-2");

		store.clear().await.expect("Clear should succeed.");

		assert!(store.load().await.expect("Load after clear should succeed.").is_none());
	}

	fs::remove_file(&path).unwrap_or_else(|e| {
		panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
	});
}

#[tokio::test]
async fn file_store_uses_custom_keys() {
	let path = temp_path("keys");
	let keys = StoreKeys { access: "accessToken".into(), refresh: "refreshToken".into() };
	let store =
		FileStore::open_with_keys(&path, keys.clone()).expect("Failed to open file store snapshot.");

	store.save(common::pair("a", "r")).await.expect("Save should succeed.");

	let raw = fs::read_to_string(&path).expect("Snapshot should be readable.");
	let snapshot: serde_json::Value = serde_json::from_str(&raw).expect("Snapshot should be JSON.");

	assert_eq!(snapshot["accessToken"], "a");
	assert_eq!(snapshot["refreshToken"], "r");

	fs::remove_file(&path).unwrap_or_else(|e| {
		panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
	});
}

#[tokio::test]
async fn session_survives_a_restart_through_the_file_store() {
	let path = temp_path("restart");
	let transport = ScriptedTransport::new(|_| Ok(common::json_response(200, "{}")));
	let live = common::token_expiring_in("restart", 3_600);

	{
		let store: Arc<dyn CredentialStore> =
			Arc::new(FileStore::open(&path).expect("Failed to open file store snapshot."));
		let client = Client::<ScriptedTransport>::with_transport(
			common::config("https://api.example.com"),
			store,
			transport.clone(),
		);

		client.login(common::pair(&live, "refresh")).await.expect("Login should succeed.");
	}

	let store: Arc<dyn CredentialStore> =
		Arc::new(FileStore::open(&path).expect("Failed to reopen file store snapshot."));
	let client = Client::<ScriptedTransport>::with_transport(
		common::config("https://api.example.com"),
		store,
		transport.clone(),
	);

	assert_eq!(client.bootstrap().await, SessionState::Authenticated);

	client.get("/me").await.expect("Restored credential should be attached.");

	assert_eq!(transport.requests()[0].authorization, Some(format!("Bearer {live}")));

	client.logout().await.expect("Logout should succeed.");

	let reopened = FileStore::open(&path).expect("Failed to reopen file store snapshot.");

	assert!(reopened.load().await.expect("Load should succeed.").is_none());

	fs::remove_file(&path).unwrap_or_else(|e| {
		panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
	});
}
