//! Persisted wizard progress for one flow.
//!
//! Every mutation writes an allow-listed snapshot (`step`, `session_end`,
//! `payload`) to storage under the flow's key, wrapped in a versioned
//! envelope: `{"state": {...}, "version": N}`.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::payload::SessionPayload;
use super::steps::{checked_index, next_index, previous_index};
use crate::api::types::{Device, DeviceConfig};
use crate::storage::SessionStorage;

/// Bump when `PersistedSession` changes shape. Snapshots written with any
/// other version are discarded on load.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Device created during enrollment. Held in memory only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    pub device: Device,
    pub configs: Vec<DeviceConfig>,
}

/// The persisted subset of the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub step: usize,
    #[serde(default)]
    pub session_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payload: Option<SessionPayload>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    state: T,
    version: u32,
}

/// Serialize a snapshot into its storage envelope
pub fn encode_snapshot(snapshot: &PersistedSession) -> Result<String> {
    serde_json::to_string(&Envelope {
        state: snapshot,
        version: SNAPSHOT_VERSION,
    })
    .context("Failed to serialize session snapshot")
}

/// Parse a storage envelope. `Ok(None)` when it was written by another
/// schema version.
pub fn decode_snapshot(raw: &str) -> Result<Option<PersistedSession>> {
    let envelope: Envelope<serde_json::Value> =
        serde_json::from_str(raw).context("Failed to parse session envelope")?;
    if envelope.version != SNAPSHOT_VERSION {
        return Ok(None);
    }
    let state = serde_json::from_value(envelope.state).context("Failed to parse session state")?;
    Ok(Some(state))
}

/// Partial update for [`SessionStore::set_state`]; `None` fields are left alone
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub step: Option<usize>,
    pub steps_max: Option<usize>,
    pub session_end: Option<Option<DateTime<Utc>>>,
    pub device: Option<Option<DeviceState>>,
}

pub struct SessionStore {
    key: String,
    storage: Arc<dyn SessionStorage>,
    step: usize,
    steps_max: usize,
    session_start: Option<DateTime<Utc>>,
    session_end: Option<DateTime<Utc>>,
    payload: Option<SessionPayload>,
    device: Option<DeviceState>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("key", &self.key)
            .field("step", &self.step)
            .field("steps_max", &self.steps_max)
            .field("session_end", &self.session_end)
            .field("has_payload", &self.payload.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Empty store, nothing read from storage
    pub fn new(key: impl Into<String>, steps_max: usize, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            key: key.into(),
            storage,
            step: 0,
            steps_max,
            session_start: None,
            session_end: None,
            payload: None,
            device: None,
        }
    }

    /// Load the snapshot stored under `key`, or start empty.
    ///
    /// Snapshots from another schema version or that fail to parse are
    /// dropped. A stored step beyond `steps_max` is clamped.
    pub fn rehydrate(
        key: impl Into<String>,
        steps_max: usize,
        storage: Arc<dyn SessionStorage>,
    ) -> Result<Self> {
        let mut store = Self::new(key, steps_max, storage);

        let Some(raw) = store.storage.load(&store.key)? else {
            return Ok(store);
        };

        match decode_snapshot(&raw) {
            Ok(Some(snapshot)) => {
                if snapshot.step > steps_max {
                    tracing::warn!(
                        key = %store.key,
                        step = snapshot.step,
                        steps_max,
                        "stored step out of range, clamping"
                    );
                }
                store.step = snapshot.step.min(steps_max);
                store.session_end = snapshot.session_end;
                store.payload = snapshot.payload;
                tracing::debug!(key = %store.key, step = store.step, "session rehydrated");
            }
            Ok(None) => {
                tracing::warn!(key = %store.key, "discarding session snapshot from another version");
                store.storage.remove(&store.key)?;
            }
            Err(e) => {
                tracing::warn!(key = %store.key, error = %e, "discarding unreadable session snapshot");
                store.storage.remove(&store.key)?;
            }
        }

        Ok(store)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn steps_max(&self) -> usize {
        self.steps_max
    }

    pub fn session_start(&self) -> Option<DateTime<Utc>> {
        self.session_start
    }

    pub fn session_end(&self) -> Option<DateTime<Utc>> {
        self.session_end
    }

    pub fn payload(&self) -> Option<&SessionPayload> {
        self.payload.as_ref()
    }

    pub fn device(&self) -> Option<&DeviceState> {
        self.device.as_ref()
    }

    /// The allow-listed fields that get persisted
    pub fn snapshot(&self) -> PersistedSession {
        PersistedSession {
            step: self.step,
            session_end: self.session_end,
            payload: self.payload.clone(),
        }
    }

    fn save(&self) -> Result<()> {
        let encoded = encode_snapshot(&self.snapshot())?;
        self.storage
            .save(&self.key, &encoded)
            .with_context(|| format!("Failed to persist session '{}'", self.key))
    }

    fn clear(&mut self) {
        self.step = 0;
        self.session_start = None;
        self.session_end = None;
        self.payload = None;
        self.device = None;
    }

    /// Reset to defaults, then apply the start payload and deadline
    pub fn init(&mut self, payload: SessionPayload, deadline: DateTime<Utc>) -> Result<()> {
        self.clear();
        self.payload = Some(payload);
        self.session_start = Some(Utc::now());
        self.session_end = Some(deadline);
        tracing::info!(key = %self.key, deadline = %deadline, "session started");
        self.save()
    }

    /// Shallow merge; no bounds checks on `step`
    pub fn set_state(&mut self, patch: SessionPatch) -> Result<()> {
        if let Some(step) = patch.step {
            self.step = step;
        }
        if let Some(steps_max) = patch.steps_max {
            self.steps_max = steps_max;
        }
        if let Some(session_end) = patch.session_end {
            self.session_end = session_end;
        }
        if let Some(device) = patch.device {
            self.device = device;
        }
        self.save()
    }

    /// Advance one step; returns false (and changes nothing) at `steps_max`
    pub fn next(&mut self) -> Result<bool> {
        let target = next_index(self.step, self.steps_max);
        if target == self.step {
            return Ok(false);
        }
        self.step = target;
        self.save()?;
        Ok(true)
    }

    /// Go back one step; returns false (and changes nothing) at 0
    pub fn previous(&mut self) -> Result<bool> {
        let target = previous_index(self.step);
        if target == self.step {
            return Ok(false);
        }
        self.step = target;
        self.save()?;
        Ok(true)
    }

    /// Jump to `step`; returns false (and changes nothing) when out of range
    pub fn go_to(&mut self, step: usize) -> Result<bool> {
        let Some(target) = checked_index(step, self.steps_max) else {
            return Ok(false);
        };
        self.step = target;
        self.save()?;
        Ok(true)
    }

    /// Back to step 0 with no payload, deadline or device
    pub fn reset(&mut self) -> Result<()> {
        self.clear();
        tracing::debug!(key = %self.key, "session reset");
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::enrollment_response;
    use crate::session::payload::SessionStart;
    use crate::storage::MemoryStorage;
    use chrono::Duration;

    const KEY: &str = "enrollment-storage";

    fn started_store(storage: &MemoryStorage) -> SessionStore {
        let mut store = SessionStore::new(KEY, 4, Arc::new(storage.clone()));
        let start = SessionStart::try_from(enrollment_response(Some(
            (Utc::now() + Duration::seconds(600)).timestamp(),
        )))
        .unwrap();
        store.init(start.payload, start.deadline).unwrap();
        store
    }

    #[test]
    fn test_next_stops_at_max() {
        let storage = MemoryStorage::new();
        let mut store = started_store(&storage);

        for _ in 0..4 {
            assert!(store.next().unwrap());
        }
        assert_eq!(store.step(), 4);
        assert!(!store.next().unwrap());
        assert_eq!(store.step(), 4);
    }

    #[test]
    fn test_previous_stops_at_zero() {
        let storage = MemoryStorage::new();
        let mut store = started_store(&storage);

        assert!(!store.previous().unwrap());
        assert_eq!(store.step(), 0);
    }

    #[test]
    fn test_go_to_rejects_out_of_range() {
        let storage = MemoryStorage::new();
        let mut store = started_store(&storage);

        assert!(store.go_to(3).unwrap());
        assert!(!store.go_to(5).unwrap());
        assert_eq!(store.step(), 3);
    }

    #[test]
    fn test_reset_clears_everything() {
        let storage = MemoryStorage::new();
        let mut store = started_store(&storage);
        store.next().unwrap();
        store.next().unwrap();

        store.reset().unwrap();
        assert_eq!(store.step(), 0);
        assert!(store.session_end().is_none());
        assert!(store.payload().is_none());
        assert!(store.session_start().is_none());

        let persisted = decode_snapshot(&storage.load(KEY).unwrap().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(persisted.step, 0);
        assert!(persisted.payload.is_none());
    }

    #[test]
    fn test_init_discards_previous_progress() {
        let storage = MemoryStorage::new();
        let mut store = started_store(&storage);
        store.go_to(3).unwrap();

        let start = SessionStart::try_from(enrollment_response(Some(1_900_000_000))).unwrap();
        store.init(start.payload, start.deadline).unwrap();
        assert_eq!(store.step(), 0);
        assert_eq!(store.session_end().unwrap().timestamp(), 1_900_000_000);
        assert!(store.session_start().is_some());
    }

    #[test]
    fn test_set_state_is_a_shallow_merge() {
        let storage = MemoryStorage::new();
        let mut store = started_store(&storage);
        let deadline = store.session_end();

        store
            .set_state(SessionPatch {
                step: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(store.step(), 2);
        assert_eq!(store.session_end(), deadline);
        assert!(store.payload().is_some());

        store
            .set_state(SessionPatch {
                session_end: Some(None),
                ..Default::default()
            })
            .unwrap();
        assert!(store.session_end().is_none());
        assert_eq!(store.step(), 2);
    }

    #[test]
    fn test_rehydrate_restores_persisted_fields_only() {
        let storage = MemoryStorage::new();
        let mut store = started_store(&storage);
        store.next().unwrap();
        store
            .set_state(SessionPatch {
                device: Some(Some(DeviceState {
                    device: Device {
                        id: 7,
                        name: "laptop".to_string(),
                        pubkey: "pk".to_string(),
                        user_id: 1,
                        created_at: 0,
                    },
                    configs: Vec::new(),
                })),
                ..Default::default()
            })
            .unwrap();

        let reloaded = SessionStore::rehydrate(KEY, 4, Arc::new(storage.clone())).unwrap();
        assert_eq!(reloaded.step(), 1);
        assert_eq!(reloaded.payload(), store.payload());
        assert_eq!(reloaded.session_end(), store.session_end());
        assert!(reloaded.device().is_none());
        assert!(reloaded.session_start().is_none());
    }

    #[test]
    fn test_rehydrate_clamps_step_to_current_registry() {
        let storage = MemoryStorage::new();
        let mut store = started_store(&storage);
        store.go_to(4).unwrap();

        let reloaded = SessionStore::rehydrate(KEY, 2, Arc::new(storage.clone())).unwrap();
        assert_eq!(reloaded.step(), 2);
    }

    #[test]
    fn test_rehydrate_discards_other_versions() {
        let storage = MemoryStorage::new();
        storage
            .save(KEY, r#"{"state":{"step":3,"session_end":null,"payload":null},"version":0}"#)
            .unwrap();

        let store = SessionStore::rehydrate(KEY, 4, Arc::new(storage.clone())).unwrap();
        assert_eq!(store.step(), 0);
        assert!(storage.load(KEY).unwrap().is_none());
    }

    #[test]
    fn test_rehydrate_discards_garbage() {
        let storage = MemoryStorage::new();
        storage.save(KEY, "not json").unwrap();

        let store = SessionStore::rehydrate(KEY, 4, Arc::new(storage.clone())).unwrap();
        assert_eq!(store.step(), 0);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_envelope_shape() {
        let snapshot = PersistedSession {
            step: 2,
            session_end: None,
            payload: None,
        };
        let raw = encode_snapshot(&snapshot).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["version"], SNAPSHOT_VERSION);
        assert_eq!(value["state"]["step"], 2);
        assert_eq!(decode_snapshot(&raw).unwrap(), Some(snapshot));
    }
}
