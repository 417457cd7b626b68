//! Process-wide registry of active filesystem watches.
//!
//! Every live connection registers its watcher here and holds a
//! [`WatchGuard`]. Dropping the guard releases the watch immediately.
//! [`WatchRegistry::shutdown`] is the single teardown hook run at process exit:
//! it releases whatever is still registered and refuses new registrations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use notify::RecommendedWatcher;

use crate::error::LiveError;

pub type SharedRegistry = Arc<WatchRegistry>;

struct ActiveWatch {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    watches: HashMap<u64, ActiveWatch>,
    closed: bool,
}

#[derive(Default)]
pub struct WatchRegistry {
    inner: Mutex<Inner>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take ownership of `watcher` for as long as the returned guard lives.
    pub fn register(
        self: &Arc<Self>,
        path: &Path,
        watcher: RecommendedWatcher,
    ) -> Result<WatchGuard, LiveError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(LiveError::RegistryClosed);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.watches.insert(
            id,
            ActiveWatch {
                path: path.to_path_buf(),
                _watcher: watcher,
            },
        );
        tracing::debug!(id, path = %path.display(), active = inner.watches.len(), "watch registered");
        Ok(WatchGuard {
            id,
            registry: Arc::clone(self),
        })
    }

    /// Number of watches currently held.
    pub fn active(&self) -> usize {
        self.lock().watches.len()
    }

    /// Paths currently watched, in registration order.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let inner = self.lock();
        let mut entries: Vec<(&u64, &ActiveWatch)> = inner.watches.iter().collect();
        entries.sort_by_key(|(id, _)| **id);
        entries.into_iter().map(|(_, w)| w.path.clone()).collect()
    }

    /// Release every watch and close the registry. Returns how many watches
    /// were released; later calls release nothing.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<ActiveWatch> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.watches.drain().map(|(_, w)| w).collect()
        };
        let released = drained.len();
        // Watchers are dropped outside the lock.
        drop(drained);
        if released > 0 {
            tracing::info!(released, "released filesystem watches");
        }
        released
    }

    fn release(&self, id: u64) {
        let removed = self.lock().watches.remove(&id);
        if let Some(watch) = removed {
            tracing::debug!(id, path = %watch.path.display(), "watch released");
        }
    }
}

/// Keeps one registered watch alive.
pub struct WatchGuard {
    id: u64,
    registry: SharedRegistry,
}

impl std::fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchGuard").field("id", &self.id).finish()
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_watcher() -> RecommendedWatcher {
        notify::recommended_watcher(|_res: notify::Result<notify::Event>| {}).expect("test")
    }

    #[test]
    fn dropping_guard_releases_watch() {
        let registry = WatchRegistry::shared();
        let guard = registry
            .register(Path::new("/tmp/a.jsonl"), idle_watcher())
            .expect("test");
        assert_eq!(registry.active(), 1);

        drop(guard);
        assert_eq!(registry.active(), 0);
    }

    #[test]
    fn watched_paths_follow_registration_order() {
        let registry = WatchRegistry::shared();
        let _a = registry.register(Path::new("/tmp/a.jsonl"), idle_watcher()).expect("test");
        let _b = registry.register(Path::new("/tmp/b.jsonl"), idle_watcher()).expect("test");
        assert_eq!(
            registry.watched_paths(),
            vec![PathBuf::from("/tmp/a.jsonl"), PathBuf::from("/tmp/b.jsonl")]
        );
    }

    #[test]
    fn shutdown_releases_all_once() {
        let registry = WatchRegistry::shared();
        let first = registry.register(Path::new("/tmp/a.jsonl"), idle_watcher()).expect("test");
        let _second = registry.register(Path::new("/tmp/b.jsonl"), idle_watcher()).expect("test");

        assert_eq!(registry.shutdown(), 2);
        assert_eq!(registry.active(), 0);
        assert_eq!(registry.shutdown(), 0);

        // A guard outliving shutdown drops cleanly.
        drop(first);
        assert_eq!(registry.active(), 0);
    }

    #[test]
    fn register_after_shutdown_is_refused() {
        let registry = WatchRegistry::shared();
        registry.shutdown();
        let result = registry.register(Path::new("/tmp/a.jsonl"), idle_watcher());
        assert!(matches!(result, Err(LiveError::RegistryClosed)));
    }
}
