use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use super::client::OdooClient;
use super::instance::InstanceStore;

/// Lazily constructed, shared clients, one per instance name.
///
/// Construction is serialized per name (double-checked under a per-name
/// lock) so a burst of first calls builds exactly one handle; different
/// names construct in parallel. Dropping an entry does not disturb calls
/// already running on the old handle.
#[derive(Clone)]
pub struct ClientPool {
    store: InstanceStore,
    clients: Arc<Mutex<HashMap<String, OdooClient>>>,
    building: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ClientPool {
    pub fn new(store: InstanceStore) -> Self {
        Self {
            store,
            clients: Arc::new(Mutex::new(HashMap::new())),
            building: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &InstanceStore {
        &self.store
    }

    pub fn instance_names(&self) -> Vec<String> {
        self.store.names()
    }

    pub async fn get(&self, instance: &str) -> anyhow::Result<OdooClient> {
        {
            let guard = self.clients.lock().await;
            if let Some(c) = guard.get(instance) {
                return Ok(c.clone());
            }
        }

        // Per-name construction lock.
        let gate = {
            let mut building = self.building.lock().await;
            building
                .entry(instance.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _construction = gate.lock().await;

        // Another caller may have won the race while we waited.
        {
            let guard = self.clients.lock().await;
            if let Some(c) = guard.get(instance) {
                return Ok(c.clone());
            }
        }

        let cfg = self.store.get(instance).ok_or_else(|| {
            let available = self.store.names().join(", ");
            anyhow::anyhow!("Unknown Odoo instance '{instance}'. Available: {available}")
        })?;

        let client = OdooClient::new(&cfg)?;
        debug!(instance, legacy = client.is_legacy(), "constructed Odoo client");

        let mut guard = self.clients.lock().await;
        guard.insert(instance.to_string(), client.clone());
        Ok(client)
    }

    /// Drop the handles for the given names; the next `get` rebuilds them
    /// from the current descriptors.
    pub async fn invalidate(&self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        let mut guard = self.clients.lock().await;
        for name in names {
            guard.remove(name);
        }
        let mut building = self.building.lock().await;
        for name in names {
            building.remove(name);
        }
        debug!(instances = ?names, "dropped pooled clients");
    }
}
