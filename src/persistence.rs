//! Persistence coupling: adapts a [`StorageAdapter`] into the GenServer
//! lifecycle (restore-on-start, periodic snapshot, shutdown snapshot,
//! cleanup).
//!
//! A [`PersistenceCoupler`] is owned entirely by the process task that
//! configured it (see [`crate::process`]); every save/load it performs runs
//! on that task's own dispatch loop, so two saves for the same key can never
//! race each other.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::ids::ProcessId;

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Metadata stored alongside a snapshot. See §3 (Persisted state envelope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    pub persisted_at: i64,
    pub server_id: String,
    pub server_name: Option<String>,
    pub schema_version: u32,
    pub checksum: Option<String>,
}

/// A point-in-time snapshot of a process's state, as written to storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<S> {
    pub state: S,
    pub metadata: EnvelopeMetadata,
}

/// Encodes/decodes an [`Envelope`] to/from the bytes a [`StorageAdapter`]
/// actually stores. Behaviors may supply their own in place of the default
/// [`JsonCodec`] (e.g. a msgpack codec behind the `msgpack` feature).
pub trait Codec<S>: Send + Sync {
    fn encode(&self, envelope: &Envelope<S>) -> Result<Vec<u8>, PersistenceError>;
    fn decode(&self, bytes: &[u8]) -> Result<Envelope<S>, PersistenceError>;
}

/// The default codec: a JSON round-trip via `serde_json`.
pub struct JsonCodec;

impl<S: Serialize + DeserializeOwned + Send + Sync> Codec<S> for JsonCodec {
    fn encode(&self, envelope: &Envelope<S>) -> Result<Vec<u8>, PersistenceError> {
        serde_json::to_vec(envelope).map_err(|e| PersistenceError::Serialize(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope<S>, PersistenceError> {
        serde_json::from_slice(bytes).map_err(|e| PersistenceError::Serialize(e.to_string()))
    }
}

/// A msgpack codec, available under the `msgpack` feature.
#[cfg(feature = "msgpack")]
pub struct MsgpackCodec;

#[cfg(feature = "msgpack")]
impl<S: Serialize + DeserializeOwned + Send + Sync> Codec<S> for MsgpackCodec {
    fn encode(&self, envelope: &Envelope<S>) -> Result<Vec<u8>, PersistenceError> {
        rmp_serde::to_vec(envelope).map_err(|e| PersistenceError::Serialize(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope<S>, PersistenceError> {
        rmp_serde::from_slice(bytes).map_err(|e| PersistenceError::Serialize(e.to_string()))
    }
}

/// The storage collaborator's contract. Opaque to the core — only the
/// verbs matter. `cleanup_older_than` defaults to a no-op for adapters that
/// don't support pruning.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;
    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<(), PersistenceError>;
    async fn delete(&self, key: &str) -> Result<(), PersistenceError>;
    async fn close(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
    async fn cleanup_older_than(&self, _age: Duration) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// `DashMap`-backed adapter; good enough for tests and ephemeral use, gone
/// the moment the process holding it is dropped.
#[derive(Default)]
pub struct MemoryAdapter {
    store: DashMap<String, Vec<u8>>,
    saved_at: DashMap<String, i64>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.store.get(key).map(|v| v.clone()))
    }

    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<(), PersistenceError> {
        self.store.insert(key.to_string(), bytes);
        self.saved_at.insert(key.to_string(), now_ms());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        self.store.remove(key);
        self.saved_at.remove(key);
        Ok(())
    }

    async fn cleanup_older_than(&self, age: Duration) -> Result<(), PersistenceError> {
        let cutoff = now_ms() - age.as_millis() as i64;
        let stale: Vec<String> = self
            .saved_at
            .iter()
            .filter(|e| *e.value() < cutoff)
            .map(|e| e.key().clone())
            .collect();
        for key in stale {
            self.store.remove(&key);
            self.saved_at.remove(&key);
        }
        Ok(())
    }
}

/// One JSON-shaped blob per key under `root`, written via `tokio::fs`. Keys
/// are sanitized to a single path segment so they can't escape `root`.
pub struct FileAdapter {
    root: PathBuf,
}

impl FileAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(format!("{safe}.snapshot"))
    }
}

#[async_trait]
impl StorageAdapter for FileAdapter {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::Load(e.to_string())),
        }
    }

    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| PersistenceError::Save(e.to_string()))?;
        let path = self.path_for(key);
        let tmp = path.with_extension("snapshot.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| PersistenceError::Save(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| PersistenceError::Save(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::Save(e.to_string())),
        }
    }

    async fn cleanup_older_than(&self, age: Duration) -> Result<(), PersistenceError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(PersistenceError::Load(e.to_string())),
        };
        let cutoff = SystemTime::now()
            .checked_sub(age)
            .unwrap_or(UNIX_EPOCH);
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(metadata) = entry.metadata().await else { continue };
            let Ok(modified) = metadata.modified() else { continue };
            if modified < cutoff {
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
        Ok(())
    }
}

/// All knobs a behavior can set for its `PersistenceCoupler`. `S` is the
/// process's state type.
pub struct PersistenceConfig<S> {
    pub adapter: Arc<dyn StorageAdapter>,
    pub codec: Arc<dyn Codec<S>>,
    /// Storage key; defaults to the registered name, else the process id.
    pub key: Option<String>,
    pub snapshot_interval: Option<Duration>,
    pub persist_on_shutdown: bool,
    pub restore_on_start: bool,
    pub max_state_age: Option<Duration>,
    pub cleanup_on_terminate: bool,
    pub cleanup_interval: Option<Duration>,
    pub schema_version: u32,
    /// Applied when a loaded snapshot's `schema_version` differs from
    /// `schema_version` above. Assumes the codec already deserialized the
    /// raw bytes into a structurally valid `S`; `migrate` then only needs
    /// to repair values, not shapes (see DESIGN.md for why this is a
    /// deliberate simplification over a dynamically-typed migration).
    pub migrate: Option<Arc<dyn Fn(S, u32) -> S + Send + Sync>>,
    pub on_error: Arc<dyn Fn(PersistenceError) + Send + Sync>,
}

impl<S> Clone for PersistenceConfig<S> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            codec: self.codec.clone(),
            key: self.key.clone(),
            snapshot_interval: self.snapshot_interval,
            persist_on_shutdown: self.persist_on_shutdown,
            restore_on_start: self.restore_on_start,
            max_state_age: self.max_state_age,
            cleanup_on_terminate: self.cleanup_on_terminate,
            cleanup_interval: self.cleanup_interval,
            schema_version: self.schema_version,
            migrate: self.migrate.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<S: Serialize + DeserializeOwned + Send + Sync + 'static> PersistenceConfig<S> {
    /// A config with JSON encoding and every other knob at its documented
    /// default, so callers only need to set what they care about.
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self {
            adapter,
            codec: Arc::new(JsonCodec),
            key: None,
            snapshot_interval: None,
            persist_on_shutdown: true,
            restore_on_start: true,
            max_state_age: None,
            cleanup_on_terminate: false,
            cleanup_interval: None,
            schema_version: 1,
            migrate: None,
            on_error: Arc::new(|err| tracing::warn!(%err, "persistence error")),
        }
    }
}

/// Adapts a [`PersistenceConfig`] into restore/save/delete operations keyed
/// by this process's resolved storage key.
pub struct PersistenceCoupler<S> {
    pub config: PersistenceConfig<S>,
    pub key: String,
    server_id: ProcessId,
    server_name: Option<String>,
}

impl<S: Serialize + DeserializeOwned + Clone + Send + Sync + 'static> PersistenceCoupler<S> {
    pub fn new(config: PersistenceConfig<S>, server_id: ProcessId, server_name: Option<String>) -> Self {
        let key = config
            .key
            .clone()
            .or_else(|| server_name.clone())
            .unwrap_or_else(|| server_id.clone());
        Self {
            config,
            key,
            server_id,
            server_name,
        }
    }

    /// §4.4 startup sequence steps 1-4, minus the `on_state_restore`
    /// hook/`StateRestored` event, which the caller (the process dispatch
    /// loop, which alone can call back into the behavior) performs itself
    /// with the returned state.
    pub async fn restore(&self) -> Result<Option<(S, EnvelopeMetadata)>, PersistenceError> {
        let bytes = match self.config.adapter.load(&self.key).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let envelope = self.config.codec.decode(&bytes)?;
        if let Some(max_age) = self.config.max_state_age {
            let age_ms = now_ms() - envelope.metadata.persisted_at;
            if age_ms > max_age.as_millis() as i64 {
                return Err(PersistenceError::Stale);
            }
        }
        let mut state = envelope.state;
        if envelope.metadata.schema_version != self.config.schema_version {
            if let Some(migrate) = &self.config.migrate {
                state = migrate(state, envelope.metadata.schema_version);
            }
        }
        Ok(Some((state, envelope.metadata)))
    }

    /// Encodes and writes a fresh snapshot, returning the metadata that was
    /// written (so the caller can answer `last_checkpoint_meta`).
    pub async fn save(&self, state: &S) -> Result<EnvelopeMetadata, PersistenceError> {
        let metadata = EnvelopeMetadata {
            persisted_at: now_ms(),
            server_id: self.server_id.clone(),
            server_name: self.server_name.clone(),
            schema_version: self.config.schema_version,
            checksum: None,
        };
        let envelope = Envelope {
            state: state.clone(),
            metadata: metadata.clone(),
        };
        let bytes = self.config.codec.encode(&envelope)?;
        self.config.adapter.save(&self.key, bytes).await?;
        Ok(metadata)
    }

    pub async fn delete(&self) -> Result<(), PersistenceError> {
        self.config.adapter.delete(&self.key).await
    }
}
