//! Process-wide registry of namespace views and their repositories.

use apollo_config::{ClientSettings, NotificationMode};
use apollo_core::namespace::{normalize_namespace, validate_app_id, validate_namespace, DEFAULT_NAMESPACE};
use apollo_core::{ApolloError, ConfigFileFormat, HttpTransport, NamespaceKey, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::DefaultConfig;
use crate::config_file::ConfigFile;
use crate::context::ClientContext;
use crate::repository::{
    ConfigRepository, LocalFileConfigRepository, PropertiesCompatibleRepository,
    RemoteConfigRepository,
};
use crate::transport::ReqwestTransport;

/// Per-key construction slot. Concurrent first callers for one key await
/// the same initialization; other keys are never blocked.
type Slot<T> = Arc<OnceCell<Arc<T>>>;

/// Entry point of the client.
///
/// Hands out one [`DefaultConfig`] per (app id, namespace) and one
/// [`ConfigFile`] per (app id, namespace, format), all sharing a single
/// repository per namespace. Must be created inside a tokio runtime.
pub struct ConfigManager {
    context: ClientContext,
    configs: DashMap<NamespaceKey, Slot<DefaultConfig>>,
    config_files: DashMap<NamespaceKey, Slot<ConfigFile>>,
    repositories: DashMap<NamespaceKey, Arc<OnceCell<Arc<dyn ConfigRepository>>>>,
    closed: AtomicBool,
}

impl ConfigManager {
    /// Builds a manager talking HTTP through reqwest.
    pub fn new(settings: ClientSettings) -> Result<Self> {
        check_settings(&settings)?;
        let transport = Arc::new(ReqwestTransport::new(&settings.timeouts)?);
        Self::with_transport(settings, transport)
    }

    /// Builds a manager over a caller-supplied transport.
    pub fn with_transport(settings: ClientSettings, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        check_settings(&settings)?;
        let context = ClientContext::new(settings, transport)?;
        if !context.settings.offline {
            context.locator.start_periodic_refresh(&context.pool);
        }

        info!(
            app_id = %context.settings.app_id,
            cluster = %context.settings.cluster,
            offline = context.settings.offline,
            "Config manager started"
        );

        Ok(Self {
            context,
            configs: DashMap::new(),
            config_files: DashMap::new(),
            repositories: DashMap::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.context.settings
    }

    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    /// The `application` namespace of the configured app.
    pub async fn app_config(&self) -> Result<Arc<DefaultConfig>> {
        self.config(DEFAULT_NAMESPACE).await
    }

    pub async fn config(&self, namespace: &str) -> Result<Arc<DefaultConfig>> {
        let app_id = self.context.settings.app_id.clone();
        self.config_for(&app_id, namespace).await
    }

    /// Config of `namespace` owned by `app_id`, which may differ from the
    /// configured app. The first call for a key performs the initial fetch.
    pub async fn config_for(&self, app_id: &str, namespace: &str) -> Result<Arc<DefaultConfig>> {
        self.ensure_open()?;
        validate_app_id(app_id)?;
        validate_namespace(namespace)?;

        let namespace = normalize_namespace(namespace);
        let key = NamespaceKey::new(app_id, namespace);
        let slot = self.configs.entry(key).or_default().clone();

        let config = slot
            .get_or_try_init(|| async move {
                let raw = self.repository(app_id, namespace).await?;
                let format = ConfigFileFormat::from_namespace(namespace);
                let repository: Arc<dyn ConfigRepository> =
                    if format.is_properties_compatible() && format != ConfigFileFormat::Properties {
                        PropertiesCompatibleRepository::new(
                            raw,
                            format,
                            self.context.settings.properties_ordered,
                        ) as Arc<dyn ConfigRepository>
                    } else {
                        raw
                    };
                Ok::<_, ApolloError>(DefaultConfig::new(
                    app_id,
                    namespace,
                    repository,
                    self.context.pool.clone(),
                ))
            })
            .await?;
        Ok(config.clone())
    }

    pub async fn config_file(&self, namespace: &str, format: ConfigFileFormat) -> Result<Arc<ConfigFile>> {
        let app_id = self.context.settings.app_id.clone();
        self.config_file_for(&app_id, namespace, format).await
    }

    /// Document view of `<namespace>.<extension>`.
    pub async fn config_file_for(
        &self,
        app_id: &str,
        namespace: &str,
        format: ConfigFileFormat,
    ) -> Result<Arc<ConfigFile>> {
        self.ensure_open()?;
        validate_app_id(app_id)?;
        validate_namespace(namespace)?;

        let file_namespace = file_namespace(namespace, format);
        let key = NamespaceKey::new(app_id, file_namespace.as_str());
        let slot = self.config_files.entry(key).or_default().clone();

        let file = slot
            .get_or_try_init(|| async move {
                let repository = self
                    .repository(app_id, normalize_namespace(&file_namespace))
                    .await?;
                Ok::<_, ApolloError>(ConfigFile::new(
                    app_id,
                    file_namespace.as_str(),
                    format,
                    self.context.settings.properties_ordered,
                    repository,
                    self.context.pool.clone(),
                ))
            })
            .await?;
        Ok(file.clone())
    }

    async fn repository(&self, app_id: &str, namespace: &str) -> Result<Arc<dyn ConfigRepository>> {
        let key = NamespaceKey::new(app_id, namespace);
        let slot = self.repositories.entry(key).or_default().clone();

        let repository = slot
            .get_or_try_init(|| async move {
                self.ensure_open()?;
                let settings = &self.context.settings;
                let local = Arc::new(LocalFileConfigRepository::new(
                    app_id,
                    settings.cluster.as_str(),
                    namespace,
                    settings.resolved_cache_dir(),
                    settings.properties_ordered,
                ));

                if settings.offline {
                    debug!(app_id = %app_id, namespace = %namespace, "Offline, using local cache only");
                    return Ok::<_, ApolloError>(local as Arc<dyn ConfigRepository>);
                }
                let remote = RemoteConfigRepository::new(self.context.clone(), app_id, namespace, local).await;
                Ok(remote as Arc<dyn ConfigRepository>)
            })
            .await?;
        Ok(repository.clone())
    }

    /// Drops every cached config, file and repository and forgets all
    /// notification cursors. The next lookup fetches from scratch.
    pub fn reset(&self) {
        for entry in self.repositories.iter() {
            if let Some(repository) = entry.value().get() {
                repository.shutdown();
            }
        }
        self.configs.clear();
        self.config_files.clear();
        self.repositories.clear();
        self.context.long_poll.reset();
        info!("Config manager reset");
    }

    /// Stops all background work. Idempotent; later lookups fail with
    /// [`ApolloError::Shutdown`] while existing configs keep serving their
    /// last snapshot.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for entry in self.repositories.iter() {
            if let Some(repository) = entry.value().get() {
                repository.shutdown();
            }
        }
        self.context.long_poll.stop();
        self.context.locator.shutdown();
        info!("Config manager shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_shutdown() {
            Err(ApolloError::Shutdown)
        } else {
            Ok(())
        }
    }
}

impl Drop for ConfigManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn check_settings(settings: &ClientSettings) -> Result<()> {
    settings.validate()?;
    if settings.notification_mode == NotificationMode::ServerPush {
        return Err(ApolloError::Unsupported(
            "server push notifications are not implemented, use long_poll".into(),
        ));
    }
    Ok(())
}

fn file_namespace(namespace: &str, format: ConfigFileFormat) -> String {
    let suffix = format!(".{}", format.extension());
    let lower = namespace.to_ascii_lowercase();
    if lower.ends_with(&suffix) && lower.len() > suffix.len() {
        namespace.to_string()
    } else {
        format!("{}{}", namespace, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_namespace() {
        assert_eq!(file_namespace("application", ConfigFileFormat::Yaml), "application.yaml");
        assert_eq!(file_namespace("logback.XML", ConfigFileFormat::Xml), "logback.XML");
        assert_eq!(file_namespace("application", ConfigFileFormat::Properties), "application.properties");
    }

    fn offline(dir: &TempDir) -> ClientSettings {
        ClientSettings::new("someAppId")
            .with_offline(true)
            .with_cache_dir(dir.path())
    }

    #[tokio::test]
    async fn test_server_push_is_rejected() {
        let dir = TempDir::new().unwrap();
        let settings = offline(&dir).with_notification_mode(NotificationMode::ServerPush);
        assert!(matches!(ConfigManager::new(settings), Err(ApolloError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_invalid_namespace_is_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(offline(&dir)).unwrap();
        assert!(matches!(manager.config("bad namespace").await, Err(ApolloError::InvalidNamespace(_))));
        assert!(matches!(manager.config("").await, Err(ApolloError::InvalidNamespace(_))));
    }

    #[tokio::test]
    async fn test_single_instance_per_key() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(ConfigManager::new(offline(&dir)).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.config("application").await.unwrap() })
            })
            .collect();
        let mut configs = Vec::new();
        for handle in handles {
            configs.push(handle.await.unwrap());
        }

        assert!(configs.iter().all(|c| Arc::ptr_eq(c, &configs[0])));
        let suffixed = manager.config("application.properties").await.unwrap();
        assert!(Arc::ptr_eq(&suffixed, &configs[0]));

        manager.reset();
        let fresh = manager.app_config().await.unwrap();
        assert!(!Arc::ptr_eq(&fresh, &configs[0]));
    }

    #[tokio::test]
    async fn test_lookups_fail_after_shutdown() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(offline(&dir)).unwrap();
        manager.shutdown();
        manager.shutdown();
        assert!(matches!(manager.app_config().await, Err(ApolloError::Shutdown)));
    }
}
