//! Snapshot sources: remote service, local disk cache, and the adapter that
//! flattens structured documents.

pub mod compatible;
pub mod local;
pub mod remote;

use apollo_core::{ConfigSourceType, Properties, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::warn;

pub use compatible::PropertiesCompatibleRepository;
pub use local::LocalFileConfigRepository;
pub use remote::RemoteConfigRepository;

/// Notified synchronously whenever a repository's snapshot changes.
pub trait RepositoryChangeListener: Send + Sync {
    fn on_repository_change(&self, namespace: &str, snapshot: Arc<Properties>);
}

#[async_trait]
pub trait ConfigRepository: Send + Sync {
    fn namespace(&self) -> &str;

    /// Best available snapshot, `None` when nothing was ever loaded.
    fn config(&self) -> Option<Arc<Properties>>;

    fn source_type(&self) -> ConfigSourceType;

    /// Listeners are held weakly; a dropped listener is skipped.
    fn add_change_listener(&self, listener: Weak<dyn RepositoryChangeListener>);

    fn remove_change_listener(&self, listener: &Arc<dyn RepositoryChangeListener>) -> bool;

    /// Re-reads the underlying source and notifies listeners on a change.
    async fn sync(&self) -> Result<()>;

    /// Stops background work owned by the repository.
    fn shutdown(&self) {}
}

fn address<T: ?Sized>(ptr: *const T) -> usize {
    ptr as *const () as usize
}

/// Listener list shared by the repository implementations.
#[derive(Default)]
pub(crate) struct RepositoryListeners {
    listeners: RwLock<Vec<Weak<dyn RepositoryChangeListener>>>,
}

impl RepositoryListeners {
    pub(crate) fn add(&self, listener: Weak<dyn RepositoryChangeListener>) {
        let mut listeners = self.listeners.write();
        listeners.retain(|l| l.strong_count() > 0);
        let id = address(listener.as_ptr());
        if !listeners.iter().any(|l| address(l.as_ptr()) == id) {
            listeners.push(listener);
        }
    }

    pub(crate) fn remove(&self, listener: &Arc<dyn RepositoryChangeListener>) -> bool {
        let id = address(Arc::as_ptr(listener));
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| address(l.as_ptr()) != id);
        listeners.len() != before
    }

    /// Calls every live listener in registration order. A panicking
    /// listener is logged and skipped.
    pub(crate) fn fire(&self, namespace: &str, snapshot: Arc<Properties>) {
        let live: Vec<Arc<dyn RepositoryChangeListener>> = self
            .listeners
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();

        for listener in live {
            let snapshot = snapshot.clone();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                listener.on_repository_change(namespace, snapshot)
            }));
            if outcome.is_err() {
                warn!(namespace = %namespace, "Repository change listener panicked");
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners
            .read()
            .iter()
            .filter(|l| l.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;

    /// Records every snapshot it is notified with.
    #[derive(Default)]
    pub(crate) struct RecordingListener {
        pub(crate) snapshots: Mutex<Vec<Arc<Properties>>>,
    }

    impl RepositoryChangeListener for RecordingListener {
        fn on_repository_change(&self, _namespace: &str, snapshot: Arc<Properties>) {
            self.snapshots.lock().push(snapshot);
        }
    }

    impl RecordingListener {
        pub(crate) fn attach(repository: &dyn ConfigRepository) -> Arc<Self> {
            let listener = Arc::new(Self::default());
            let as_dyn: Arc<dyn RepositoryChangeListener> = listener.clone();
            repository.add_change_listener(Arc::downgrade(&as_dyn));
            listener
        }

        pub(crate) fn count(&self) -> usize {
            self.snapshots.lock().len()
        }

        pub(crate) fn last(&self) -> Option<Arc<Properties>> {
            self.snapshots.lock().last().cloned()
        }
    }
}
