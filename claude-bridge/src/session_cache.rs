//! Durable cache of incoming session bindings
//!
//! The cache is a narrow port ([`IncomingSessionCache`]) so the engine can run
//! against the file implementation, an in-memory map, or nothing at all.
//!
//! # File Layout
//!
//! One JSON record per `(model_id, incoming_session_key)` pair. Both components
//! are base64url-encoded; records are bucketed by the first two characters of the
//! encoded key so a busy model never piles every file into one directory:
//!
//! ```text
//! <root>/
//! └── <b64(model_id)>/
//!     └── <first 2 chars of b64(key)>/
//!         └── <b64(key)>.json
//! ```
//!
//! Writes go to a uniquely named temp file in the same directory and are then
//! renamed over the record, so an interrupted write never leaves a torn file.
//! Reads and writes for the same record are serialized through a per-path lock.

use crate::constants::sizes::cache;
use crate::error::{BridgeError, Result};
use crate::session_store::IncomingSessionState;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Port for persisting incoming session bindings across process restarts
#[async_trait]
pub trait IncomingSessionCache: Send + Sync {
    /// Load the binding for `incoming_session_key` under `model_id`
    ///
    /// # Returns
    /// * `Ok(Some(state))` if a valid record exists
    /// * `Ok(None)` if there is no record, or the record is stale or unreadable as a record
    /// * `Err(...)` if the underlying storage failed
    async fn load(
        &self,
        model_id: &str,
        incoming_session_key: &str,
    ) -> Result<Option<IncomingSessionState>>;

    /// Persist `state` under `model_id`, replacing any previous record for its key
    async fn store(&self, model_id: &str, state: &IncomingSessionState) -> Result<()>;
}

/// Versioned on-disk record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCacheRecord {
    pub version: u32,
    pub incoming_session_key: String,
    pub session_id: String,
    pub prompt_message_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_prompt_message_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_prompt_message_signature: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SessionCacheRecord {
    pub fn from_state(state: &IncomingSessionState) -> Self {
        Self {
            version: cache::RECORD_VERSION,
            incoming_session_key: state.incoming_session_key.clone(),
            session_id: state.session_id.clone(),
            prompt_message_count: state.prompt_message_count,
            first_prompt_message_signature: state.first_prompt_message_signature.clone(),
            last_prompt_message_signature: state.last_prompt_message_signature.clone(),
            updated_at: Utc::now(),
        }
    }

    pub fn into_state(self) -> IncomingSessionState {
        IncomingSessionState {
            incoming_session_key: self.incoming_session_key,
            session_id: self.session_id,
            prompt_message_count: self.prompt_message_count,
            first_prompt_message_signature: self.first_prompt_message_signature,
            last_prompt_message_signature: self.last_prompt_message_signature,
        }
    }
}

/// File-backed cache following the layout in the module docs
pub struct FileSessionCache {
    root: PathBuf,
    record_locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl FileSessionCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            record_locks: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record for `(model_id, incoming_session_key)`
    pub fn record_path(&self, model_id: &str, incoming_session_key: &str) -> PathBuf {
        let encoded_model = URL_SAFE_NO_PAD.encode(model_id.as_bytes());
        let encoded_key = URL_SAFE_NO_PAD.encode(incoming_session_key.as_bytes());
        let bucket: String = encoded_key.chars().take(cache::BUCKET_PREFIX_LEN).collect();
        self.root
            .join(encoded_model)
            .join(bucket)
            .join(format!("{}.json", encoded_key))
    }

    /// Number of record locks currently held or awaited
    pub fn active_lock_count(&self) -> usize {
        self.record_locks.len()
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.record_locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry for `path` once no other task holds a handle to it
    fn release_lock(&self, path: &Path, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.record_locks
            .remove_if(path, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn load_record(
        path: &Path,
        incoming_session_key: &str,
    ) -> Result<Option<IncomingSessionState>> {
        let Some(record) = Self::read_record(path).await? else {
            return Ok(None);
        };

        if record.version != cache::RECORD_VERSION {
            tracing::debug!(
                "Skipping session record {} with version {}",
                path.display(),
                record.version
            );
            return Ok(None);
        }
        if record.incoming_session_key != incoming_session_key {
            tracing::warn!(
                "Session record {} belongs to a different key, ignoring",
                path.display()
            );
            return Ok(None);
        }

        Ok(Some(record.into_state()))
    }

    async fn read_record(path: &Path) -> Result<Option<SessionCacheRecord>> {
        let metadata = match fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BridgeError::Cache(format!(
                    "Failed to stat {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        if metadata.len() > cache::MAX_RECORD_BYTES {
            tracing::warn!(
                "Ignoring oversized session record {} ({} bytes)",
                path.display(),
                metadata.len()
            );
            return Ok(None);
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            BridgeError::Cache(format!("Failed to read {}: {}", path.display(), e))
        })?;

        match serde_json::from_str::<SessionCacheRecord>(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!("Ignoring corrupt session record {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    async fn write_record(path: &Path, record: &SessionCacheRecord) -> Result<()> {
        let parent = path.parent().ok_or_else(|| {
            BridgeError::Cache(format!("Record path {} has no parent", path.display()))
        })?;
        fs::create_dir_all(parent).await.map_err(|e| {
            BridgeError::Cache(format!("Failed to create {}: {}", parent.display(), e))
        })?;

        let json = serde_json::to_string_pretty(record)?;
        let temp_path = path.with_extension(format!("json.tmp.{}", ulid::Ulid::new()));

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(json.as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(BridgeError::Cache(format!(
                "Failed to write {}: {}",
                path.display(),
                e
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl IncomingSessionCache for FileSessionCache {
    async fn load(
        &self,
        model_id: &str,
        incoming_session_key: &str,
    ) -> Result<Option<IncomingSessionState>> {
        let path = self.record_path(model_id, incoming_session_key);
        let lock = self.lock_for(&path);
        let loaded = {
            let _guard = lock.lock().await;
            Self::load_record(&path, incoming_session_key).await
        };
        self.release_lock(&path, lock);
        loaded
    }

    async fn store(&self, model_id: &str, state: &IncomingSessionState) -> Result<()> {
        let path = self.record_path(model_id, &state.incoming_session_key);
        let lock = self.lock_for(&path);
        let written = {
            let _guard = lock.lock().await;
            Self::write_record(&path, &SessionCacheRecord::from_state(state)).await
        };
        self.release_lock(&path, lock);

        written?;
        tracing::debug!("Persisted session record {}", path.display());
        Ok(())
    }
}

/// Process-local cache, mostly useful in tests
#[derive(Default)]
pub struct MemorySessionCache {
    records: DashMap<(String, String), IncomingSessionState>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl IncomingSessionCache for MemorySessionCache {
    async fn load(
        &self,
        model_id: &str,
        incoming_session_key: &str,
    ) -> Result<Option<IncomingSessionState>> {
        Ok(self
            .records
            .get(&(model_id.to_string(), incoming_session_key.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn store(&self, model_id: &str, state: &IncomingSessionState) -> Result<()> {
        self.records.insert(
            (model_id.to_string(), state.incoming_session_key.clone()),
            state.clone(),
        );
        Ok(())
    }
}

/// Cache that remembers nothing
pub struct NoopSessionCache;

#[async_trait]
impl IncomingSessionCache for NoopSessionCache {
    async fn load(&self, _model_id: &str, _key: &str) -> Result<Option<IncomingSessionState>> {
        Ok(None)
    }

    async fn store(&self, _model_id: &str, _state: &IncomingSessionState) -> Result<()> {
        Ok(())
    }
}

/// Fires once per failure site so a broken cache does not flood the logs
#[derive(Debug, Default)]
pub struct LogOnce {
    fired: AtomicBool,
}

impl LogOnce {
    pub const fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
        }
    }

    /// True the first time it is called, false afterwards
    pub fn first(&self) -> bool {
        !self.fired.swap(true, Ordering::Relaxed)
    }
}
