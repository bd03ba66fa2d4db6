//! storage::factory
//!
//! Process-wide registry of shared storage instances.
//!
//! # Architecture
//!
//! Request handlers come and go; the repositories they read do not. The
//! factory maps a control-directory path to one shared [`Storage`] so
//! concurrent callers reuse the same revision cache and pipes. Instances
//! are weakly held by default: when the last caller releases its handle
//! the storage tears down. A caller can opt into strong retention so a
//! canonical long-lived instance survives idle periods, and a revision
//! cache can be registered for hand-over to the *next* instance built for
//! a path, so cache state survives instance churn from short-lived
//! callers.
//!
//! # Lifecycle
//!
//! Populated on first use; an entry leaves the registry when no holder
//! remains (dead `Weak`) or on explicit [`StorageFactory::forget`] when a
//! repository is deregistered. The state is explicit and documented here,
//! not an ambient singleton scattered across modules.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::{Storage, StorageError};
use crate::cache::RevCache;
use crate::config::StorageConfig;

#[derive(Default)]
struct Registry {
    /// All live instances, by control-directory path.
    instances: HashMap<PathBuf, Weak<Storage>>,
    /// Strong retentions added by `weak = false` callers.
    retained: HashMap<PathBuf, Arc<Storage>>,
    /// Snapshots registered for the next instance built per path.
    saved_caches: HashMap<PathBuf, Arc<RevCache>>,
}

fn registry() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(Mutex::default)
}

/// Factory for shared [`Storage`] instances.
pub struct StorageFactory;

impl StorageFactory {
    /// Fetch the shared storage for `config.git_dir`, constructing it on
    /// first use.
    ///
    /// `weak = true` is lookup-only ownership: the caller's `Arc` is the
    /// only thing keeping the instance alive. `weak = false` additionally
    /// retains the instance in the registry until a later `weak = true`
    /// call for the same path removes that retention.
    ///
    /// # Errors
    ///
    /// Construction errors (bad control directory, unusable executable)
    /// propagate from [`Storage::new`]; they are never cached.
    pub fn get_or_create(config: StorageConfig, weak: bool) -> Result<Arc<Storage>, StorageError> {
        let path = config.git_dir.clone();
        let mut reg = registry().lock();

        let existing = reg.instances.get(&path).and_then(Weak::upgrade);
        let storage = match existing {
            Some(storage) => storage,
            None => {
                let snapshot = reg.saved_caches.remove(&path);
                let storage = Arc::new(Storage::with_initial_cache(config, snapshot)?);
                reg.instances.insert(path.clone(), Arc::downgrade(&storage));
                debug!(path = %path.display(), "constructed shared storage");
                storage
            }
        };

        if weak {
            reg.retained.remove(&path);
        } else {
            reg.retained.insert(path.clone(), storage.clone());
        }
        Ok(storage)
    }

    /// Register a revision-cache snapshot to attach to the next storage
    /// built for `path`.
    ///
    /// The snapshot is immutable, so hand-over shares the allocation; the
    /// registration is consumed by the next construction.
    pub fn save_cache(path: &Path, cache: Arc<RevCache>) {
        registry().lock().saved_caches.insert(path.to_path_buf(), cache);
    }

    /// Drop all registry state for a path (repository deregistered).
    ///
    /// Callers still holding the instance keep it alive; the registry just
    /// stops handing it out.
    pub fn forget(path: &Path) {
        // The removed retention may be the last handle; its teardown
        // re-enters the registry (cache hand-over), so it must drop
        // outside the lock.
        let retained = {
            let mut reg = registry().lock();
            reg.instances.remove(path);
            reg.saved_caches.remove(path);
            reg.retained.remove(path)
        };
        drop(retained);
    }

    /// Number of live (upgradable) instances, for diagnostics.
    pub fn live_count() -> usize {
        let mut reg = registry().lock();
        reg.instances.retain(|_, weak| weak.strong_count() > 0);
        reg.instances.len()
    }
}
