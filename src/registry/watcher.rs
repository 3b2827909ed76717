use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use super::Registry;
use crate::odoo::cache::MetadataCache;
use crate::odoo::instance::InstanceStore;
use crate::odoo::pool::ClientPool;

const DEBOUNCE: Duration = Duration::from_millis(150);

/// Keeps the filesystem watcher alive; dropping it stops hot reload.
pub struct WatchGuard {
    _watcher: RecommendedWatcher,
}

/// Watch the registry files (and the instances file, when file-backed) and
/// republish snapshots on change.
///
/// Events are funneled through a channel and debounced so an editor's
/// write-rename burst triggers one reload. A failed reload keeps the last
/// good snapshot and logs the validation error.
pub fn start(
    registry: Arc<Registry>,
    store: InstanceStore,
    pool: ClientPool,
    cache: MetadataCache,
) -> Option<WatchGuard> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();

    let reload_registry = registry.clone();
    let reload_store = store.clone();
    tokio::spawn(async move {
        loop {
            if rx.recv().await.is_none() {
                break;
            }
            tokio::time::sleep(DEBOUNCE).await;
            while rx.try_recv().is_ok() {}

            if let Err(e) = reload_registry.reload().await {
                warn!(error = %e, "registry reload failed; keeping last good snapshot");
            }
            match reload_store.reload_from_disk() {
                Ok(stale) if !stale.is_empty() => {
                    pool.invalidate(&stale).await;
                    for name in &stale {
                        cache.purge_instance(name).await;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "instance reload failed; keeping last good mapping");
                }
            }
        }
    });

    let mut watcher = match notify::recommended_watcher(move |res| match res {
        Ok(event) => {
            debug!(?event, "config fs event");
            let _ = tx.send(());
        }
        Err(err) => warn!(error = %err, "config watcher error"),
    }) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "failed to create config watcher; hot reload disabled");
            return None;
        }
    };

    for dir in watch_dirs(&registry, store.source_path()) {
        if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
            warn!(dir = %dir.display(), error = %e, "failed to watch config directory");
        } else {
            info!(dir = %dir.display(), "watching config directory");
        }
    }

    Some(WatchGuard { _watcher: watcher })
}

fn watch_dirs(registry: &Registry, instances_path: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = [
        registry.tools_path(),
        registry.prompts_path(),
        registry.server_path(),
    ]
    .into_iter()
    .chain(instances_path)
    .map(parent_dir_or_current)
    .collect();
    dirs.sort();
    dirs.dedup();
    dirs
}

fn parent_dir_or_current(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
