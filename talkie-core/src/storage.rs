//! Persistent key-value storage capability, plus device identity.

use std::collections::HashMap;

use parking_lot::Mutex;
use uuid::Uuid;

/// Minimal persistent store the device platform provides (NVS, flash
/// file, sqlite — the engine does not care).
pub trait KeyValueStore: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;
    fn set_string(&self, key: &str, value: &str);
}

pub const DEVICE_ID_KEY: &str = "device_id";

/// Fetch the persisted device identifier, generating and storing a
/// fresh UUID v4 on first boot.
pub fn ensure_device_id(store: &dyn KeyValueStore) -> String {
    if let Some(id) = store.get_string(DEVICE_ID_KEY) {
        if !id.is_empty() {
            return id;
        }
    }
    let id = Uuid::new_v4().to_string();
    store.set_string(DEVICE_ID_KEY, &id);
    id
}

/// In-memory store for tests and harnesses.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set_string(&self, key: &str, value: &str) {
        self.values.lock().insert(key.to_string(), value.to_string());
    }
}
