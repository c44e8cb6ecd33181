use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::auth::session::Profile;
use crate::error::{errors, ClientResult};

/// Key holding the short-lived token
pub const TOKEN_KEY: &str = "access";
/// Keys holding the cached profile fields
pub const PROFILE_KEYS: [&str; 4] = ["id", "name", "nickname", "role"];

/// Durable key/value storage behind the credential store
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read every persisted entry
    async fn load(&self) -> Result<HashMap<String, String>>;

    /// Replace the persisted entries with `entries`
    async fn save(&self, entries: &HashMap<String, String>) -> Result<()>;
}

/// Backend that only lives as long as the value itself
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn load(&self) -> Result<HashMap<String, String>> {
        Ok(self.entries.read().await.clone())
    }

    async fn save(&self, entries: &HashMap<String, String>) -> Result<()> {
        *self.entries.write().await = entries.clone();
        Ok(())
    }
}

/// Backend persisting all keys as one JSON object on disk, so state
/// survives a restart of the client
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl StorageBackend for FileBackend {
    async fn load(&self) -> Result<HashMap<String, String>> {
        if !fs::try_exists(&self.path).await? {
            debug!(path = %self.path.display(), "No persisted session state");
            return Ok(HashMap::new());
        }

        let raw = fs::read_to_string(&self.path).await?;
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Discarding unreadable session state");
                Ok(HashMap::new())
            }
        }
    }

    async fn save(&self, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        // Write then rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(entries)?).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Holder of the short-lived token and the cached profile fields.
///
/// Every key is independently settable and removable. Mutations are applied
/// under one write lock and persisted before the lock is released, so writes
/// are totally ordered by completion. Clones share the same state.
#[derive(Clone)]
pub struct CredentialStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
    backend: Arc<dyn StorageBackend>,
}

impl CredentialStore {
    /// Load persisted state from `backend`
    pub async fn hydrate(backend: Arc<dyn StorageBackend>) -> ClientResult<Self> {
        let entries = backend.load().await.map_err(errors::storage)?;
        info!(
            keys = entries.len(),
            has_token = entries.get(TOKEN_KEY).is_some_and(|t| !t.is_empty()),
            "Credential store hydrated"
        );

        Ok(Self {
            entries: Arc::new(RwLock::new(entries)),
            backend,
        })
    }

    /// An empty store that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            backend: Arc::new(MemoryBackend::new()),
        }
    }

    /// Current token. An empty stored value counts as absent.
    pub async fn get(&self) -> Option<String> {
        self.entries
            .read()
            .await
            .get(TOKEN_KEY)
            .filter(|t| !t.is_empty())
            .cloned()
    }

    /// Overwrite the token. The content is not validated.
    pub async fn set(&self, token: impl Into<String>) -> ClientResult<()> {
        let token = token.into();
        self.mutate(|entries| {
            entries.insert(TOKEN_KEY.to_string(), token);
        })
        .await
    }

    /// Remove only the token, keeping cached profile fields
    pub async fn remove_token(&self) -> ClientResult<()> {
        self.erase(|entries| {
            entries.remove(TOKEN_KEY);
        })
        .await
    }

    /// Remove the token and every cached profile field
    pub async fn clear(&self) -> ClientResult<()> {
        self.erase(|entries| {
            entries.remove(TOKEN_KEY);
            for key in PROFILE_KEYS {
                entries.remove(key);
            }
        })
        .await
    }

    /// Remove every persisted key, including ones this crate does not own
    pub async fn clear_all(&self) -> ClientResult<()> {
        self.erase(|entries| entries.clear()).await
    }

    /// Read a single cached field
    pub async fn get_field(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    /// Write a single cached field
    pub async fn set_field(&self, key: &str, value: impl Into<String>) -> ClientResult<()> {
        let value = value.into();
        self.mutate(|entries| {
            entries.insert(key.to_string(), value);
        })
        .await
    }

    /// Profile assembled from the cached fields; missing fields are empty
    pub async fn profile(&self) -> Profile {
        let entries = self.entries.read().await;
        let field = |key: &str| entries.get(key).cloned().unwrap_or_default();
        Profile {
            id: field("id"),
            name: field("name"),
            nickname: field("nickname"),
            role: field("role"),
        }
    }

    /// Persist every profile field
    pub async fn store_profile(&self, profile: &Profile) -> ClientResult<()> {
        self.mutate(|entries| {
            entries.insert("id".to_string(), profile.id.clone());
            entries.insert("name".to_string(), profile.name.clone());
            entries.insert("nickname".to_string(), profile.nickname.clone());
            entries.insert("role".to_string(), profile.role.clone());
        })
        .await
    }

    /// Apply a write only once it has been persisted
    async fn mutate(&self, apply: impl FnOnce(&mut HashMap<String, String>)) -> ClientResult<()> {
        let mut entries = self.entries.write().await;
        let mut staged = entries.clone();
        apply(&mut staged);

        if let Err(e) = self.backend.save(&staged).await {
            error!(error = %e, "Failed to persist credential store, write discarded");
            return Err(errors::storage(e));
        }
        *entries = staged;
        Ok(())
    }

    /// Apply a removal in memory even when it cannot be persisted, so a
    /// failed save never keeps a credential alive
    async fn erase(&self, apply: impl FnOnce(&mut HashMap<String, String>)) -> ClientResult<()> {
        let mut entries = self.entries.write().await;
        apply(&mut entries);

        if let Err(e) = self.backend.save(&entries).await {
            error!(error = %e, "Failed to persist credential removal");
            return Err(errors::storage(e));
        }
        Ok(())
    }
}
