// The profile registry: ordered, lock-guarded collection of live profiles.
//
// Reads (enumeration, the evaluation sweep, durable sync) share the outer
// lock; structural add/remove take it exclusively. Each profile carries its
// own mutex because evaluation mutates profile state while the collection
// itself is only read. The registry lock and the broadcaster's connection
// lock are never held at the same time.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::library::ScriptLibrary;
use crate::message::Message;
use crate::profile::{Profile, ProfileDefinition, ProfileState, ProfileUpdate};
use crate::storage::ProfileStore;
use crate::{PulseError, Result};

type SharedProfile = Arc<Mutex<Profile>>;

pub struct ProfileRegistry {
    profiles: RwLock<Vec<SharedProfile>>,
    store: Arc<dyn ProfileStore>,
    library: Arc<ScriptLibrary>,
}

impl ProfileRegistry {
    pub fn new(store: Arc<dyn ProfileStore>, library: Arc<ScriptLibrary>) -> Self {
        Self {
            profiles: RwLock::new(Vec::new()),
            store,
            library,
        }
    }

    /// Populate the registry from the durable store. Called once at
    /// startup, before any other activity runs.
    pub async fn load(&self) -> Result<usize> {
        let loaded = self.store.load_all().await?;
        let mut profiles = self.profiles.write().await;
        let count = loaded.len();
        for profile in loaded {
            profiles.push(Arc::new(Mutex::new(profile)));
        }
        Ok(count)
    }

    /// Insert a new profile. The durable record is written before the
    /// profile becomes visible to any reader; if persistence fails the
    /// registry is unchanged.
    pub async fn add(&self, definition: ProfileDefinition) -> Result<ProfileState> {
        if definition.id.is_empty() {
            return Err(PulseError::RegistryError(
                "profile id must not be empty".to_string(),
            ));
        }

        let mut profiles = self.profiles.write().await;
        for existing in profiles.iter() {
            if existing.lock().await.definition.id == definition.id {
                return Err(PulseError::RegistryError(format!(
                    "duplicate profile id {:?}",
                    definition.id
                )));
            }
        }

        let profile = Profile::new(definition);
        self.store.put(&profile).await?;
        let state = profile.value();
        debug!(profile = %state.definition.id, "profile added");
        profiles.push(Arc::new(Mutex::new(profile)));
        Ok(state)
    }

    /// Replace the supplied definition fields of an existing profile and
    /// persist the result. Returns `None` when no profile has this id.
    pub async fn update(&self, id: &str, update: ProfileUpdate) -> Result<Option<ProfileState>> {
        let profiles = self.profiles.read().await;
        for shared in profiles.iter() {
            let mut profile = shared.lock().await;
            if profile.definition.id == id {
                profile.definition.apply(update);
                self.store.put(&profile).await?;
                return Ok(Some(profile.value()));
            }
        }
        Ok(None)
    }

    /// Remove the profile with this id and delete its durable record.
    /// Removing an absent id is a no-op, not an error.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let mut profiles = self.profiles.write().await;
        let current: Vec<SharedProfile> = profiles.drain(..).collect();
        let mut removed = false;
        for shared in current {
            if shared.lock().await.definition.id == id {
                removed = true;
            } else {
                profiles.push(shared);
            }
        }
        drop(profiles);

        if removed {
            self.store.delete(id).await?;
            debug!(profile = %id, "profile removed");
        }
        Ok(removed)
    }

    /// Snapshot-consistent enumeration of viewer-facing states.
    pub async fn list(&self) -> Vec<ProfileState> {
        let profiles = self.profiles.read().await;
        let mut states = Vec::with_capacity(profiles.len());
        for shared in profiles.iter() {
            states.push(shared.lock().await.value());
        }
        states
    }

    /// Evaluate one message against every profile, in registration order,
    /// under a single shared-read hold. Returns the post-evaluation state
    /// of every profile, in the same order.
    pub async fn eval_sweep(&self, message: &Message) -> Vec<ProfileState> {
        let profiles = self.profiles.read().await;
        let mut states = Vec::with_capacity(profiles.len());
        for shared in profiles.iter() {
            let mut profile = shared.lock().await;
            profile.eval(message, &self.library);
            states.push(profile.value());
        }
        states
    }

    /// Full clones of every profile, for the periodic durable sync pass.
    pub async fn snapshot(&self) -> Vec<Profile> {
        let profiles = self.profiles.read().await;
        let mut snapshot = Vec::with_capacity(profiles.len());
        for shared in profiles.iter() {
            snapshot.push(shared.lock().await.clone());
        }
        snapshot
    }

    pub async fn len(&self) -> usize {
        self.profiles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.profiles.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Value;
    use crate::storage::MemoryProfileStore;

    const SUM_SCRIPT: &str = r#"
        let sum = get("sum", 0);
        sum += message.value;
        set("sum", sum);
        title("the sum is " + sum);
    "#;

    fn registry_with_store() -> (Arc<MemoryProfileStore>, ProfileRegistry) {
        let store = Arc::new(MemoryProfileStore::new());
        let registry = ProfileRegistry::new(store.clone(), Arc::new(ScriptLibrary::default()));
        (store, registry)
    }

    fn definition(id: &str) -> ProfileDefinition {
        ProfileDefinition {
            id: id.to_string(),
            eval_script: SUM_SCRIPT.to_string(),
            ..Default::default()
        }
    }

    fn message(value: i64) -> Message {
        Message {
            name: "cpu_temp".to_string(),
            timestamp: 1,
            value: Some(Value::Int(value)),
        }
    }

    #[tokio::test]
    async fn add_persists_before_returning() {
        let (store, registry) = registry_with_store();
        registry.add(definition("p-1")).await.unwrap();
        assert!(store.contains("p-1").await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn add_rejects_empty_and_duplicate_ids() {
        let (_, registry) = registry_with_store();

        assert!(registry.add(definition("")).await.is_err());

        registry.add(definition("p-1")).await.unwrap();
        assert!(registry.add(definition("p-1")).await.is_err());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn remove_is_a_noop_for_absent_ids() {
        let (store, registry) = registry_with_store();
        registry.add(definition("p-1")).await.unwrap();

        assert!(!registry.remove("p-2").await.unwrap());
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove("p-1").await.unwrap());
        assert!(!store.contains("p-1").await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn sweep_evaluates_in_registration_order() {
        let (_, registry) = registry_with_store();
        registry.add(definition("p-1")).await.unwrap();
        registry.add(definition("p-2")).await.unwrap();

        registry.eval_sweep(&message(2)).await;
        let states = registry.eval_sweep(&message(3)).await;

        assert_eq!(states.len(), 2);
        assert_eq!(states[0].definition.id, "p-1");
        assert_eq!(states[1].definition.id, "p-2");
        for state in states {
            assert_eq!(
                state.display.get("title"),
                Some(&Value::Text("the sum is 5".to_string()))
            );
        }
    }

    #[tokio::test]
    async fn update_replaces_fields_and_persists() {
        let (store, registry) = registry_with_store();
        registry.add(definition("p-1")).await.unwrap();

        let updated = registry
            .update(
                "p-1",
                ProfileUpdate {
                    is_local: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert!(updated.definition.is_local);
        assert!(store.contains("p-1").await);

        let missing = registry
            .update("p-9", ProfileUpdate::default())
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn load_restores_persisted_profiles() {
        let store = Arc::new(MemoryProfileStore::new());
        {
            let registry = ProfileRegistry::new(store.clone(), Arc::new(ScriptLibrary::default()));
            registry.add(definition("p-1")).await.unwrap();
            registry.eval_sweep(&message(4)).await;
            store.sync_all(&registry.snapshot().await).await.unwrap();
        }

        let registry = ProfileRegistry::new(store, Arc::new(ScriptLibrary::default()));
        assert_eq!(registry.load().await.unwrap(), 1);
        let states = registry.list().await;
        assert_eq!(
            states[0].display.get("title"),
            Some(&Value::Text("the sum is 4".to_string()))
        );
    }
}
