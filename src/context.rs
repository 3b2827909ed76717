use std::path::Path;
use std::sync::Arc;

use crate::odoo::cache::MetadataCache;
use crate::odoo::instance::InstanceStore;
use crate::odoo::pool::ClientPool;
use crate::registry::Registry;

/// The process singletons: instance store, client pool, metadata cache and
/// registry. Created once at startup and shared by every transport; nothing
/// holds a back-reference to the handlers.
#[derive(Clone)]
pub struct AppContext {
    pub store: InstanceStore,
    pub pool: ClientPool,
    pub cache: MetadataCache,
    pub registry: Arc<Registry>,
}

impl AppContext {
    pub fn from_env(config_dir: &Path) -> anyhow::Result<Self> {
        let store = InstanceStore::from_env()?;
        let pool = ClientPool::new(store.clone());
        Ok(Self {
            store,
            pool,
            cache: MetadataCache::new(),
            registry: Arc::new(Registry::from_env(config_dir)),
        })
    }

    pub fn new(store: InstanceStore, registry: Arc<Registry>) -> Self {
        let pool = ClientPool::new(store.clone());
        Self {
            store,
            pool,
            cache: MetadataCache::new(),
            registry,
        }
    }

    /// Swap the instance mapping and drop per-instance state for every name
    /// whose descriptor changed. In-flight calls keep their old handles.
    pub async fn replace_instances(
        &self,
        map: std::collections::HashMap<String, crate::odoo::instance::InstanceDescriptor>,
    ) -> anyhow::Result<Vec<String>> {
        let stale = self.store.replace(map)?;
        self.pool.invalidate(&stale).await;
        for name in &stale {
            self.cache.purge_instance(name).await;
        }
        Ok(stale)
    }
}
