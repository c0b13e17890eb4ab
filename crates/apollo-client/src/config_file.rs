//! Whole-document view of a namespace.

use apollo_core::namespace::CONFIG_FILE_CONTENT_KEY;
use apollo_core::{
    ApolloError, ConfigFileChangeEvent, ConfigFileFormat, ConfigSourceType, Properties,
    PropertyChangeType, Result,
};
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::executor::WorkerPool;
use crate::listener::{ConfigFileChangeListener, InterestedKeys, ListenerRegistry};
use crate::parser::{parser_for, properties};
use crate::repository::{ConfigRepository, RepositoryChangeListener};

/// Namespace read as raw text, e.g. `application.yaml` or `logback.xml`.
pub struct ConfigFile {
    app_id: String,
    namespace: String,
    format: ConfigFileFormat,
    ordered: bool,
    repository: Arc<dyn ConfigRepository>,
    content: ArcSwapOption<String>,
    update_lock: Mutex<()>,
    listeners: ListenerRegistry<ConfigFileChangeEvent>,
}

impl ConfigFile {
    pub fn new(
        app_id: impl Into<String>,
        namespace: impl Into<String>,
        format: ConfigFileFormat,
        ordered: bool,
        repository: Arc<dyn ConfigRepository>,
        pool: Arc<WorkerPool>,
    ) -> Arc<Self> {
        let namespace = namespace.into();
        let file = Arc::new(Self {
            app_id: app_id.into(),
            listeners: ListenerRegistry::new(namespace.clone(), pool),
            namespace,
            format,
            ordered,
            repository: repository.clone(),
            content: ArcSwapOption::empty(),
            update_lock: Mutex::new(()),
        });

        let listener: Arc<dyn RepositoryChangeListener> = file.clone();
        repository.add_change_listener(Arc::downgrade(&listener));

        {
            let _guard = file.update_lock.lock();
            let initial = repository.config().and_then(|s| file.extract(&s));
            file.content.store(initial.map(Arc::new));
        }
        file
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn format(&self) -> ConfigFileFormat {
        self.format
    }

    pub fn content(&self) -> Option<String> {
        self.content.load().as_deref().cloned()
    }

    pub fn has_content(&self) -> bool {
        self.content.load().as_deref().is_some_and(|c| !c.is_empty())
    }

    /// Flattened key/value view. Only properties, YAML and JSON documents
    /// can be flattened.
    pub fn as_properties(&self) -> Result<Properties> {
        if !self.format.is_properties_compatible() {
            return Err(ApolloError::Unsupported(format!(
                "{} namespace {} cannot be read as properties",
                self.format, self.namespace
            )));
        }
        if self.format == ConfigFileFormat::Properties {
            return Ok(self
                .repository
                .config()
                .map(|s| (*s).clone())
                .unwrap_or_else(|| Properties::with_order(self.ordered)));
        }

        let content = self.content();
        parser_for(self.format).parse(content.as_deref().unwrap_or_default(), self.ordered)
    }

    pub fn source_type(&self) -> ConfigSourceType {
        self.repository.source_type()
    }

    pub fn add_change_listener(&self, listener: Arc<ConfigFileChangeListener>) -> bool {
        self.listeners.add(listener, InterestedKeys::all())
    }

    pub fn remove_change_listener(&self, listener: &Arc<ConfigFileChangeListener>) -> bool {
        self.listeners.remove(listener)
    }

    fn extract(&self, snapshot: &Properties) -> Option<String> {
        match self.format {
            ConfigFileFormat::Properties if snapshot.is_empty() => None,
            ConfigFileFormat::Properties => Some(properties::render(snapshot)),
            _ => snapshot.get(CONFIG_FILE_CONTENT_KEY).map(str::to_string),
        }
    }
}

impl RepositoryChangeListener for ConfigFile {
    fn on_repository_change(&self, _namespace: &str, snapshot: Arc<Properties>) {
        let _guard = self.update_lock.lock();
        let next = self.extract(&snapshot);
        let previous = self.content();
        if previous == next {
            return;
        }

        let change_type = match (&previous, &next) {
            (None, _) => PropertyChangeType::Added,
            (_, None) => PropertyChangeType::Deleted,
            _ => PropertyChangeType::Modified,
        };
        self.content.store(next.clone().map(Arc::new));
        debug!(namespace = %self.namespace, change = ?change_type, "Config file changed");

        self.listeners.fire(ConfigFileChangeEvent {
            namespace: self.namespace.clone(),
            old_value: previous,
            new_value: next,
            change_type,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::LocalFileConfigRepository;
    use std::time::Duration;
    use tempfile::TempDir;

    fn raw(content: &str) -> Properties {
        let mut p = Properties::new();
        p.insert(CONFIG_FILE_CONTENT_KEY, content);
        p
    }

    #[tokio::test]
    async fn test_yaml_file_content_and_flattening() {
        let dir = TempDir::new().unwrap();
        let local = Arc::new(LocalFileConfigRepository::new(
            "app",
            "default",
            "application.yaml",
            dir.path(),
            false,
        ));
        local.persist(&raw("a:\n  b: 1\n")).unwrap();
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let file = ConfigFile::new("app", "application.yaml", ConfigFileFormat::Yaml, false, local.clone(), pool);

        assert!(file.has_content());
        assert_eq!(file.content().as_deref(), Some("a:\n  b: 1\n"));
        assert_eq!(file.as_properties().unwrap().get("a.b"), Some("1"));
        assert_eq!(file.source_type(), ConfigSourceType::Local);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: Arc<ConfigFileChangeListener> =
            Arc::new(move |e: &ConfigFileChangeEvent| sink.lock().push(e.clone()));
        file.add_change_listener(listener);

        file.on_repository_change("application.yaml", Arc::new(raw("a:\n  b: 2\n")));
        file.on_repository_change("application.yaml", Arc::new(raw("a:\n  b: 2\n")));
        file.on_repository_change("application.yaml", Arc::new(Properties::new()));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].change_type, PropertyChangeType::Modified);
        assert_eq!(seen[0].new_value.as_deref(), Some("a:\n  b: 2\n"));
        assert_eq!(seen[1].change_type, PropertyChangeType::Deleted);
        assert!(!file.has_content());
    }

    #[tokio::test]
    async fn test_xml_cannot_be_flattened() {
        let dir = TempDir::new().unwrap();
        let local = Arc::new(LocalFileConfigRepository::new("app", "default", "logback.xml", dir.path(), false));
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let file = ConfigFile::new("app", "logback.xml", ConfigFileFormat::Xml, false, local, pool);

        assert!(file.content().is_none());
        assert!(matches!(file.as_properties(), Err(ApolloError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_properties_file_renders_snapshot() {
        let dir = TempDir::new().unwrap();
        let local = Arc::new(LocalFileConfigRepository::new(
            "app",
            "default",
            "application",
            dir.path(),
            false,
        ));
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let file = ConfigFile::new("app", "application", ConfigFileFormat::Properties, false, local, pool);
        assert!(!file.has_content());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        file.add_change_listener(Arc::new(move |e: &ConfigFileChangeEvent| sink.lock().push(e.change_type)));

        let mut snapshot = Properties::new();
        snapshot.insert("k", "v");
        file.on_repository_change("application", Arc::new(snapshot));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(file.content().unwrap().contains("k=v"));
        assert_eq!(*seen.lock(), vec![PropertyChangeType::Added]);
    }
}
