use apollo_core::{
    ApolloConfig, ApolloError, ConfigSourceType, HttpRequest, Properties, Result, ServiceDto,
};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ConfigRepository, LocalFileConfigRepository, RepositoryChangeListener, RepositoryListeners};
use crate::context::ClientContext;
use crate::long_poll::LongPollNotifiable;

/// Namespace snapshot fetched from the config service.
///
/// Falls back to the local cache until a fetch succeeds; every successful
/// fetch is written back to that cache in the background. Each applied
/// snapshot carries a generation so a slow write never replaces a newer one.
pub struct RemoteConfigRepository {
    app_id: String,
    cluster: String,
    namespace: String,
    context: ClientContext,
    fallback: Arc<LocalFileConfigRepository>,
    snapshot: ArcSwapOption<Properties>,
    generation: AtomicU64,
    release_key: Mutex<Option<String>>,
    preferred_service: Mutex<Option<ServiceDto>>,
    sync_lock: tokio::sync::Mutex<()>,
    listeners: RepositoryListeners,
    cancel: CancellationToken,
}

impl RemoteConfigRepository {
    /// Performs the initial fetch, then registers for long polling and
    /// periodic refresh. A failed initial fetch is logged and the local
    /// cache serves reads until a later fetch succeeds.
    pub async fn new(
        context: ClientContext,
        app_id: impl Into<String>,
        namespace: impl Into<String>,
        fallback: Arc<LocalFileConfigRepository>,
    ) -> Arc<Self> {
        let app_id = app_id.into();
        let namespace = namespace.into();
        let cluster = context.settings.cluster.clone();

        let repository = Arc::new(Self {
            app_id,
            cluster,
            namespace,
            context,
            fallback,
            snapshot: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
            release_key: Mutex::new(None),
            preferred_service: Mutex::new(None),
            sync_lock: tokio::sync::Mutex::new(()),
            listeners: RepositoryListeners::default(),
            cancel: CancellationToken::new(),
        });

        if let Err(e) = repository.sync().await {
            warn!(
                app_id = %repository.app_id,
                namespace = %repository.namespace,
                error = %e,
                cached = repository.fallback.config().is_some(),
                "Initial config fetch failed, using local cache"
            );
        }

        let notifiable: Arc<dyn LongPollNotifiable> = repository.clone();
        repository.context.long_poll.submit(
            &repository.app_id,
            &repository.cluster,
            &repository.namespace,
            Arc::downgrade(&notifiable),
        );
        repository.spawn_periodic_refresh();

        repository
    }

    fn spawn_periodic_refresh(self: &Arc<Self>) {
        let interval = self.context.settings.refresh.refresh_interval();
        if interval.is_zero() {
            return;
        }

        let repository = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        self.context.pool.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(repository) = repository.upgrade() else { break };
                        debug!(namespace = %repository.namespace, "Periodic config refresh");
                        if let Err(e) = repository.sync().await {
                            warn!(namespace = %repository.namespace, error = %e, "Periodic config refresh failed");
                        }
                    }
                }
            }
        });
    }

    /// Tries every endpoint, for up to `max_fetch_attempts` rounds.
    /// `Ok(None)` means the server reported no change.
    async fn fetch(&self) -> Result<Option<ApolloConfig>> {
        let settings = &self.context.settings;
        let attempts = settings.retry.max_fetch_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let mut services = self.context.locator.config_services().await;
            let preferred = self.preferred_service.lock().take();
            if let Some(preferred) = preferred {
                services.retain(|s| s != &preferred);
                services.insert(0, preferred);
            }
            if services.is_empty() {
                last_error = Some(ApolloError::NoConfigServices(format!(
                    "no config service available for {}",
                    self.app_id
                )));
            }

            for service in services {
                let url = self.config_url(&service)?;
                let request = HttpRequest::get(url.clone(), settings.timeouts.read_timeout());

                let error = match self.context.transport.get(request).await {
                    Ok(response) if response.is_not_modified() => {
                        debug!(namespace = %self.namespace, "Config not modified");
                        return Ok(None);
                    }
                    Ok(response) if response.is_ok() => {
                        match serde_json::from_str::<ApolloConfig>(&response.body) {
                            Ok(config) => return Ok(Some(config)),
                            Err(e) => ApolloError::from(e),
                        }
                    }
                    Ok(response) => ApolloError::StatusCode {
                        status: response.status,
                        url: url.clone(),
                    },
                    Err(e) => e,
                };

                warn!(
                    app_id = %self.app_id,
                    namespace = %self.namespace,
                    url = %url,
                    attempt,
                    error = %error,
                    "Config fetch failed"
                );
                self.context.locator.report_failure(&service);
                last_error = Some(error);
            }

            if attempt < attempts {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(ApolloError::Shutdown),
                    _ = tokio::time::sleep(settings.retry.on_error_retry_interval()) => {}
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ApolloError::NoConfigServices(self.app_id.clone())))
    }

    fn config_url(&self, service: &ServiceDto) -> Result<String> {
        let settings = &self.context.settings;
        let mut url = Url::parse(service.base_url()).map_err(|e| {
            ApolloError::ConfigError(format!("Invalid config service url {}: {}", service.homepage_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| ApolloError::ConfigError(format!("Invalid config service url {}", service.homepage_url)))?
            .pop_if_empty()
            .extend([
                "configs",
                self.app_id.as_str(),
                self.cluster.as_str(),
                self.namespace.as_str(),
            ]);

        let release_key = self.release_key.lock().clone();
        let mut pairs: Vec<(&str, &str)> = Vec::new();
        if let Some(key) = release_key.as_deref() {
            pairs.push(("releaseKey", key));
        }
        if let Some(dc) = settings.data_center.as_deref() {
            pairs.push(("dataCenter", dc));
        }
        if let Some(ip) = settings.ip.as_deref() {
            pairs.push(("ip", ip));
        }
        if let Some(label) = settings.label.as_deref() {
            pairs.push(("label", label));
        }
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url.to_string())
    }

    fn apply(&self, config: ApolloConfig) {
        let fetched = config.to_properties(self.context.settings.properties_ordered);
        *self.release_key.lock() = config.release_key;

        let previous = self.snapshot.load_full();
        if previous.as_deref() == Some(&fetched) {
            debug!(namespace = %self.namespace, "Fetched config unchanged");
            return;
        }

        let snapshot = Arc::new(fetched);
        self.snapshot.store(Some(snapshot.clone()));
        info!(
            app_id = %self.app_id,
            namespace = %self.namespace,
            keys = snapshot.len(),
            "Loaded remote config"
        );

        // Called under `sync_lock`, so generations follow fetch order.
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cache = self.fallback.clone();
        let to_persist = snapshot.clone();
        let namespace = self.namespace.clone();
        self.context.pool.spawn_blocking_job("persist-config-cache", move || {
            if let Err(e) = cache.persist_generation(&to_persist, generation) {
                warn!(namespace = %namespace, error = %e, "Failed to write local config cache");
            }
        });

        self.listeners.fire(&self.namespace, snapshot);
    }

    pub fn release_key(&self) -> Option<String> {
        self.release_key.lock().clone()
    }

    pub fn local_cache(&self) -> &Arc<LocalFileConfigRepository> {
        &self.fallback
    }
}

#[async_trait]
impl ConfigRepository for RemoteConfigRepository {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn config(&self) -> Option<Arc<Properties>> {
        self.snapshot.load_full().or_else(|| self.fallback.config())
    }

    fn source_type(&self) -> ConfigSourceType {
        if self.snapshot.load().is_some() {
            ConfigSourceType::Remote
        } else {
            self.fallback.source_type()
        }
    }

    fn add_change_listener(&self, listener: Weak<dyn RepositoryChangeListener>) {
        self.listeners.add(listener);
    }

    fn remove_change_listener(&self, listener: &Arc<dyn RepositoryChangeListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Fetches and applies the latest config. Concurrent calls are
    /// serialized so snapshots are exposed in fetch order.
    async fn sync(&self) -> Result<()> {
        let _guard = self.sync_lock.lock().await;
        if self.cancel.is_cancelled() {
            return Err(ApolloError::Shutdown);
        }
        if let Some(config) = self.fetch().await? {
            self.apply(config);
        }
        Ok(())
    }

    fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl LongPollNotifiable for RemoteConfigRepository {
    fn on_long_poll_notified(self: Arc<Self>, service: ServiceDto) {
        *self.preferred_service.lock() = Some(service);
        let pool = self.context.pool.clone();
        pool.spawn(async move {
            if let Err(e) = self.sync().await {
                warn!(namespace = %self.namespace, error = %e, "Config refresh after notification failed");
            }
        });
    }
}
