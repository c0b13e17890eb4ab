use apollo_core::namespace::CONFIG_FILE_CONTENT_KEY;
use apollo_core::{ConfigFileFormat, ConfigSourceType, Properties, Result};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tracing::warn;

use super::{ConfigRepository, RepositoryChangeListener, RepositoryListeners};
use crate::parser::parser_for;

/// Exposes a YAML or JSON document namespace as flat key/value pairs by
/// parsing the `content` entry of an upstream repository.
pub struct PropertiesCompatibleRepository {
    namespace: String,
    format: ConfigFileFormat,
    ordered: bool,
    upstream: Arc<dyn ConfigRepository>,
    snapshot: ArcSwapOption<Properties>,
    listeners: RepositoryListeners,
}

impl PropertiesCompatibleRepository {
    pub fn new(
        upstream: Arc<dyn ConfigRepository>,
        format: ConfigFileFormat,
        ordered: bool,
    ) -> Arc<Self> {
        let repository = Arc::new(Self {
            namespace: upstream.namespace().to_string(),
            format,
            ordered,
            upstream: upstream.clone(),
            snapshot: ArcSwapOption::empty(),
            listeners: RepositoryListeners::default(),
        });

        let listener: Arc<dyn RepositoryChangeListener> = repository.clone();
        upstream.add_change_listener(Arc::downgrade(&listener));
        if let Some(current) = upstream.config() {
            repository.snapshot.store(repository.flatten(&current).map(Arc::new));
        }
        repository
    }

    /// Parse failures keep the previous view.
    fn flatten(&self, raw: &Properties) -> Option<Properties> {
        let content = raw.get(CONFIG_FILE_CONTENT_KEY).unwrap_or_default();
        match parser_for(self.format).parse(content, self.ordered) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, "Failed to flatten document namespace");
                None
            }
        }
    }
}

impl RepositoryChangeListener for PropertiesCompatibleRepository {
    fn on_repository_change(&self, _namespace: &str, snapshot: Arc<Properties>) {
        let Some(parsed) = self.flatten(&snapshot) else {
            return;
        };
        if self.snapshot.load().as_deref() == Some(&parsed) {
            return;
        }
        let parsed = Arc::new(parsed);
        self.snapshot.store(Some(parsed.clone()));
        self.listeners.fire(&self.namespace, parsed);
    }
}

#[async_trait]
impl ConfigRepository for PropertiesCompatibleRepository {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn config(&self) -> Option<Arc<Properties>> {
        self.snapshot.load_full()
    }

    fn source_type(&self) -> ConfigSourceType {
        self.upstream.source_type()
    }

    fn add_change_listener(&self, listener: Weak<dyn RepositoryChangeListener>) {
        self.listeners.add(listener);
    }

    fn remove_change_listener(&self, listener: &Arc<dyn RepositoryChangeListener>) -> bool {
        self.listeners.remove(listener)
    }

    async fn sync(&self) -> Result<()> {
        self.upstream.sync().await
    }
}
