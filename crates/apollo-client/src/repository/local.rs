use apollo_core::{ConfigSourceType, Properties, Result};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::{ConfigRepository, RepositoryChangeListener, RepositoryListeners};
use crate::parser::properties;

/// Namespace snapshot stored as a properties file on local disk.
///
/// One file per (app id, cluster, namespace). Each write goes to its own
/// temporary file that is then renamed over the cache, so a crash mid-write
/// leaves the previous cache intact.
pub struct LocalFileConfigRepository {
    app_id: String,
    cluster: String,
    namespace: String,
    path: PathBuf,
    ordered: bool,
    snapshot: ArcSwapOption<Properties>,
    /// Serializes writes and holds the newest generation on disk.
    written_generation: Mutex<u64>,
    listeners: RepositoryListeners,
}

impl LocalFileConfigRepository {
    /// Opens the cache for a namespace and loads it when present.
    pub fn new(
        app_id: impl Into<String>,
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        cache_dir: impl AsRef<Path>,
        ordered: bool,
    ) -> Self {
        let app_id = app_id.into();
        let cluster = cluster.into();
        let namespace = namespace.into();
        let path = cache_file_path(cache_dir.as_ref(), &app_id, &cluster, &namespace);

        let snapshot = read_cache(&path, ordered).map(Arc::new);
        debug!(
            app_id = %app_id,
            namespace = %namespace,
            path = %path.display(),
            loaded = snapshot.is_some(),
            "Opened local config cache"
        );

        Self {
            app_id,
            cluster,
            namespace,
            path,
            ordered,
            snapshot: ArcSwapOption::new(snapshot),
            written_generation: Mutex::new(0),
            listeners: RepositoryListeners::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `snapshot` to the cache file and adopts it as the local view.
    pub fn persist(&self, snapshot: &Properties) -> Result<()> {
        let _written = self.written_generation.lock();
        self.write(snapshot)
    }

    /// Writes `snapshot` unless a later generation is already on disk.
    /// Background writers may finish out of order; this keeps the newest.
    pub fn persist_generation(&self, snapshot: &Properties, generation: u64) -> Result<bool> {
        let mut written = self.written_generation.lock();
        if generation <= *written {
            debug!(
                namespace = %self.namespace,
                generation,
                written = *written,
                "Skipping stale config cache write"
            );
            return Ok(false);
        }
        self.write(snapshot)?;
        *written = generation;
        Ok(true)
    }

    fn write(&self, snapshot: &Properties) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let mut body = format!(
            "# Config cache for {}+{}+{}\n# Written {}\n",
            self.app_id,
            self.cluster,
            self.namespace,
            Utc::now().to_rfc3339()
        );
        body.push_str(&properties::render(snapshot));

        // Dropping an unpersisted temp file removes it.
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(body.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;

        self.snapshot.store(Some(Arc::new(snapshot.clone())));
        debug!(namespace = %self.namespace, path = %self.path.display(), "Persisted config cache");
        Ok(())
    }

    /// Re-reads the cache file and notifies listeners when it changed.
    pub fn reload(&self) -> bool {
        let Some(loaded) = read_cache(&self.path, self.ordered) else {
            return false;
        };
        let previous = self.snapshot.load_full();
        if previous.as_deref() == Some(&loaded) {
            return false;
        }

        let loaded = Arc::new(loaded);
        self.snapshot.store(Some(loaded.clone()));
        info!(namespace = %self.namespace, "Local config cache changed");
        self.listeners.fire(&self.namespace, loaded);
        true
    }
}

#[async_trait]
impl ConfigRepository for LocalFileConfigRepository {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn config(&self) -> Option<Arc<Properties>> {
        self.snapshot.load_full()
    }

    fn source_type(&self) -> ConfigSourceType {
        if self.snapshot.load().is_some() {
            ConfigSourceType::Local
        } else {
            ConfigSourceType::None
        }
    }

    fn add_change_listener(&self, listener: Weak<dyn RepositoryChangeListener>) {
        self.listeners.add(listener);
    }

    fn remove_change_listener(&self, listener: &Arc<dyn RepositoryChangeListener>) -> bool {
        self.listeners.remove(listener)
    }

    async fn sync(&self) -> Result<()> {
        self.reload();
        Ok(())
    }
}

pub fn cache_file_path(cache_dir: &Path, app_id: &str, cluster: &str, namespace: &str) -> PathBuf {
    cache_dir.join(format!("{}+{}+{}.properties", app_id, cluster, namespace))
}

/// Missing file is a normal state; unreadable files are logged and treated
/// the same way so the fallback chain continues.
fn read_cache(path: &Path, ordered: bool) -> Option<Properties> {
    match fs::read_to_string(path) {
        Ok(content) => Some(properties::parse(&content, ordered)),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read local config cache");
            None
        }
    }
}
