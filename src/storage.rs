// Durable profile storage (RocksDB).
//
// One record per profile id, value = the serialized (definition, store,
// display) triple. The store provides its own per-call consistency;
// callers do not serialize access beyond the registry lock they already
// hold.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::RwLock;
use rocksdb::{IteratorMode, Options, DB};
use tracing::{info, warn};

use crate::profile::Profile;
use crate::{PulseError, Result};

/// Storage interface backing the profile registry.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Deserialize every stored record. Malformed records are skipped, not
    /// fatal; a profile that no longer parses should not take the rest of
    /// the registry down with it.
    async fn load_all(&self) -> Result<Vec<Profile>>;

    /// Overwrite the record for this profile with its full current state.
    async fn put(&self, profile: &Profile) -> Result<()>;

    /// Remove the record for this id; a missing key is not an error.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Bulk overwrite pass over every live profile. A failure for one
    /// profile is logged and skipped within the same pass.
    async fn sync_all(&self, profiles: &[Profile]) -> Result<()>;
}

/// Persistent store. Failure to open is fatal at startup; the server
/// cannot serve without durability.
pub struct RocksDbProfileStore {
    db: DB,
}

impl RocksDbProfileStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, path).map_err(|e| PulseError::StorageError(e.to_string()))?;

        info!("profile store opened");
        Ok(Self { db })
    }
}

#[async_trait]
impl ProfileStore for RocksDbProfileStore {
    async fn load_all(&self) -> Result<Vec<Profile>> {
        let mut profiles = Vec::new();
        for entry in self.db.iterator(IteratorMode::Start) {
            let (key, value) = entry.map_err(|e| PulseError::StorageError(e.to_string()))?;
            match serde_json::from_slice::<Profile>(&value) {
                Ok(profile) => profiles.push(profile),
                Err(e) => {
                    warn!(
                        key = %String::from_utf8_lossy(&key),
                        error = %e,
                        "skipping malformed profile record"
                    );
                }
            }
        }
        Ok(profiles)
    }

    async fn put(&self, profile: &Profile) -> Result<()> {
        let serialized = serde_json::to_vec(profile)?;
        self.db
            .put(profile.definition.id.as_bytes(), serialized)
            .map_err(|e| PulseError::StorageError(e.to_string()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.db
            .delete(id.as_bytes())
            .map_err(|e| PulseError::StorageError(e.to_string()))
    }

    async fn sync_all(&self, profiles: &[Profile]) -> Result<()> {
        for profile in profiles {
            let serialized = match serde_json::to_vec(profile) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(id = %profile.definition.id, error = %e, "skipping profile during sync");
                    continue;
                }
            };
            if let Err(e) = self.db.put(profile.definition.id.as_bytes(), serialized) {
                warn!(id = %profile.definition.id, error = %e, "skipping profile during sync");
            }
        }
        Ok(())
    }
}

/// In-memory store with the same contract, for tests and ephemeral runs.
/// Records are held serialized so load/put exercise the same round-trip as
/// the persistent store.
#[derive(Default)]
pub struct MemoryProfileStore {
    records: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.records.read().await.contains_key(id)
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn load_all(&self) -> Result<Vec<Profile>> {
        let records = self.records.read().await;
        let mut profiles = Vec::new();
        for (key, value) in records.iter() {
            match serde_json::from_slice::<Profile>(value) {
                Ok(profile) => profiles.push(profile),
                Err(e) => warn!(key = %key, error = %e, "skipping malformed profile record"),
            }
        }
        Ok(profiles)
    }

    async fn put(&self, profile: &Profile) -> Result<()> {
        let serialized = serde_json::to_vec(profile)?;
        self.records
            .write()
            .await
            .insert(profile.definition.id.clone(), serialized);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.records.write().await.remove(id);
        Ok(())
    }

    async fn sync_all(&self, profiles: &[Profile]) -> Result<()> {
        for profile in profiles {
            match serde_json::to_vec(profile) {
                Ok(serialized) => {
                    self.records
                        .write()
                        .await
                        .insert(profile.definition.id.clone(), serialized);
                }
                Err(e) => {
                    warn!(id = %profile.definition.id, error = %e, "skipping profile during sync")
                }
            }
        }
        Ok(())
    }
}
