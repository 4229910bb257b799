//! The device registry: single source of truth for live device state.
//!
//! Every mutation goes through [`DeviceRegistry::update`], which holds the
//! device's own mutex while applying the change and writing it through to
//! the store. There is no secondary in-memory mirror to drift out of sync;
//! REST handlers, the telemetry bus, and WebSocket pushes all read the same
//! record. Updates to the same device are serialized, distinct devices
//! proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use stroller_store::Store;
use stroller_types::DeviceState;

struct DeviceEntry {
    state: Mutex<DeviceState>,
}

impl DeviceEntry {
    fn new(state: DeviceState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

/// Map of device ID to its authoritative state record.
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Arc<DeviceEntry>>>,
    store: Arc<Mutex<Store>>,
}

impl DeviceRegistry {
    /// Create an empty registry writing through to `store`.
    pub fn new(store: Arc<Mutex<Store>>) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Load every persisted device state into the registry.
    ///
    /// Called once at startup so state survives restarts. Devices already
    /// present in memory are left untouched.
    pub async fn hydrate(&self) -> stroller_store::Result<usize> {
        let states = self.store.lock().await.list_device_states()?;
        let count = states.len();

        let mut devices = self.devices.write().await;
        for state in states {
            devices
                .entry(state.device_id.clone())
                .or_insert_with(|| Arc::new(DeviceEntry::new(state)));
        }
        drop(devices);

        info!(devices = count, "hydrated device registry");
        Ok(count)
    }

    /// Whether a device has a state record.
    pub async fn contains(&self, device_id: &str) -> bool {
        self.devices.read().await.contains_key(device_id)
    }

    /// IDs of all devices with a state record.
    pub async fn device_ids(&self) -> Vec<String> {
        self.devices.read().await.keys().cloned().collect()
    }

    /// Number of devices with a state record.
    pub async fn count(&self) -> usize {
        self.devices.read().await.len()
    }

    /// A point-in-time copy of a device's state.
    pub async fn snapshot(&self, device_id: &str) -> Option<DeviceState> {
        let entry = {
            let devices = self.devices.read().await;
            devices.get(device_id).cloned()
        }?;
        let state = entry.state.lock().await;
        Some(state.clone())
    }

    /// Initialize a device, or return its existing state unchanged.
    ///
    /// Returns the state and whether it was created by this call. Calling
    /// initialize on an already-initialized device is not an error and does
    /// not reset anything.
    pub async fn initialize(&self, device_id: &str) -> (DeviceState, bool) {
        let (entry, created) = self.entry_or_create(device_id).await;
        let snapshot = entry.state.lock().await.clone();

        if created {
            self.persist(&snapshot).await;
            info!(device_id, "initialized device state");
        }

        (snapshot, created)
    }

    /// Apply a mutation to a known device.
    ///
    /// Returns the closure's result plus a snapshot taken after the change,
    /// or `None` when the device has no state record. The snapshot is
    /// written through to the store while the device mutex is still held,
    /// so persisted records never interleave out of order.
    pub async fn update<F, T>(&self, device_id: &str, f: F) -> Option<(T, DeviceState)>
    where
        F: FnOnce(&mut DeviceState) -> T,
    {
        let entry = {
            let devices = self.devices.read().await;
            devices.get(device_id).cloned()
        }?;

        let mut state = entry.state.lock().await;
        let result = f(&mut state);
        let snapshot = state.clone();
        self.persist(&snapshot).await;
        drop(state);

        Some((result, snapshot))
    }

    /// Apply a mutation, creating the device's state record on first sight.
    ///
    /// The telemetry path uses this: a stroller that was provisioned out of
    /// band starts reporting before anyone calls `/api/initialize`, and its
    /// data should not be dropped on the floor.
    pub async fn update_or_create<F, T>(&self, device_id: &str, f: F) -> (T, DeviceState)
    where
        F: FnOnce(&mut DeviceState) -> T,
    {
        let (entry, created) = self.entry_or_create(device_id).await;
        if created {
            info!(device_id, "created state record for first-seen device");
        }

        let mut state = entry.state.lock().await;
        let result = f(&mut state);
        let snapshot = state.clone();
        self.persist(&snapshot).await;
        drop(state);

        (result, snapshot)
    }

    /// Drop a device's state record, in memory and in the store.
    ///
    /// Returns true if anything was removed.
    pub async fn remove(&self, device_id: &str) -> bool {
        let had_entry = self.devices.write().await.remove(device_id).is_some();

        let deleted = {
            let store = self.store.lock().await;
            store.delete_device_state(device_id).unwrap_or_else(|e| {
                warn!(device_id, error = %e, "failed to delete persisted device state");
                false
            })
        };

        had_entry || deleted
    }

    async fn entry_or_create(&self, device_id: &str) -> (Arc<DeviceEntry>, bool) {
        {
            let devices = self.devices.read().await;
            if let Some(entry) = devices.get(device_id) {
                return (Arc::clone(entry), false);
            }
        }

        let mut devices = self.devices.write().await;
        // Re-check: a racing caller may have created it between locks.
        if let Some(entry) = devices.get(device_id) {
            return (Arc::clone(entry), false);
        }

        let entry = Arc::new(DeviceEntry::new(DeviceState::new(device_id)));
        devices.insert(device_id.to_string(), Arc::clone(&entry));
        (entry, true)
    }

    async fn persist(&self, state: &DeviceState) {
        let store = self.store.lock().await;
        if let Err(e) = store.upsert_device_state(state) {
            // The in-memory record stays authoritative; no rollback.
            warn!(
                device_id = %state.device_id,
                error = %e,
                "failed to persist device state"
            );
        }
    }
}
