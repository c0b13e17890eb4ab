//! Resolution and caching of config service endpoints.

use apollo_config::ClientSettings;
use apollo_core::{ApolloError, HttpRequest, HttpTransport, Result, ServiceDto};
use arc_swap::ArcSwap;
use reqwest::Url;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::executor::WorkerPool;

/// Keeps the list of reachable config services.
///
/// Static `config_service_urls` bypass discovery. Otherwise the list comes
/// from the meta server and is refreshed periodically and after a caller
/// reports a failed endpoint. Callers get the list rotated one position per
/// call so load spreads across instances.
pub struct ConfigServiceLocator {
    settings: Arc<ClientSettings>,
    transport: Arc<dyn HttpTransport>,
    services: ArcSwap<Vec<ServiceDto>>,
    next: AtomicUsize,
    stale: AtomicBool,
    refresh_lock: Mutex<()>,
    cancel: CancellationToken,
}

impl ConfigServiceLocator {
    pub fn new(settings: Arc<ClientSettings>, transport: Arc<dyn HttpTransport>) -> Self {
        let static_services: Vec<ServiceDto> = settings
            .config_service_urls
            .iter()
            .map(ServiceDto::from_url)
            .collect();

        Self {
            settings,
            transport,
            services: ArcSwap::from_pointee(static_services),
            next: AtomicUsize::new(0),
            stale: AtomicBool::new(false),
            refresh_lock: Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    fn is_static(&self) -> bool {
        !self.settings.config_service_urls.is_empty()
    }

    /// Endpoints to try, in order. Discovers on first use and after a
    /// reported failure.
    pub async fn config_services(&self) -> Vec<ServiceDto> {
        if !self.is_static() && (self.services.load().is_empty() || self.stale.load(Ordering::Acquire)) {
            if let Err(e) = self.refresh_if_needed().await {
                warn!(error = %e, "Config service discovery failed");
            }
        }

        let services = self.services.load_full();
        if services.is_empty() {
            return Vec::new();
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed) % services.len();
        services[start..]
            .iter()
            .chain(services[..start].iter())
            .cloned()
            .collect()
    }

    /// Marks the cached list as suspect so the next lookup re-discovers.
    pub fn report_failure(&self, service: &ServiceDto) {
        debug!(service = %service.homepage_url, "Config service reported as failed");
        if !self.is_static() {
            self.stale.store(true, Ordering::Release);
        }
    }

    async fn refresh_if_needed(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        if !self.services.load().is_empty() && !self.stale.load(Ordering::Acquire) {
            return Ok(());
        }
        self.discover().await
    }

    /// Forces a discovery round.
    pub async fn refresh(&self) -> Result<()> {
        if self.is_static() {
            return Ok(());
        }
        let _guard = self.refresh_lock.lock().await;
        self.discover().await
    }

    async fn discover(&self) -> Result<()> {
        let meta = self.settings.meta_server.as_deref().ok_or_else(|| {
            ApolloError::NoConfigServices("no meta server configured".to_string())
        })?;
        let meta_urls: Vec<&str> = meta.split(',').map(str::trim).filter(|u| !u.is_empty()).collect();

        let attempts = self.settings.retry.max_fetch_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            for meta_url in &meta_urls {
                match self.query_meta(meta_url).await {
                    Ok(services) if !services.is_empty() => {
                        info!(count = services.len(), meta = %meta_url, "Discovered config services");
                        self.services.store(Arc::new(services));
                        self.stale.store(false, Ordering::Release);
                        return Ok(());
                    }
                    Ok(_) => {
                        last_error = Some(ApolloError::NoConfigServices(format!(
                            "meta server {} returned no config services",
                            meta_url
                        )));
                    }
                    Err(e) => {
                        warn!(meta = %meta_url, attempt, error = %e, "Meta server query failed");
                        last_error = Some(e);
                    }
                }
            }

            if attempt < attempts {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(ApolloError::Shutdown),
                    _ = tokio::time::sleep(self.settings.retry.on_error_retry_interval()) => {}
                }
            }
        }

        // Fall back to the meta server itself, which also serves configs in
        // single-node deployments.
        if self.services.load().is_empty() {
            let fallback: Vec<ServiceDto> = meta_urls.iter().map(|u| ServiceDto::from_url(*u)).collect();
            warn!(meta = %meta, "Using meta server as config service");
            self.services.store(Arc::new(fallback));
        }
        self.stale.store(false, Ordering::Release);

        Err(last_error.unwrap_or_else(|| {
            ApolloError::NoConfigServices(format!("no meta server reachable at {}", meta))
        }))
    }

    async fn query_meta(&self, meta_url: &str) -> Result<Vec<ServiceDto>> {
        let url = self.discovery_url(meta_url)?;
        let request = HttpRequest::get(url.clone(), self.settings.timeouts.read_timeout());
        let response = self.transport.get(request).await?;

        if !response.is_ok() {
            return Err(ApolloError::StatusCode {
                status: response.status,
                url,
            });
        }
        Ok(serde_json::from_str(&response.body)?)
    }

    fn discovery_url(&self, meta_url: &str) -> Result<String> {
        let mut url = Url::parse(meta_url.trim_end_matches('/'))
            .map_err(|e| ApolloError::ConfigError(format!("Invalid meta server url {}: {}", meta_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| ApolloError::ConfigError(format!("Invalid meta server url {}", meta_url)))?
            .pop_if_empty()
            .extend(["services", "config"]);

        let mut pairs = vec![("appId", self.settings.app_id.as_str())];
        if let Some(ip) = self.settings.ip.as_deref() {
            pairs.push(("ip", ip));
        }
        url.query_pairs_mut().extend_pairs(pairs);
        Ok(url.to_string())
    }

    /// Re-discovers on `discovery_refresh_interval` until shut down.
    pub fn start_periodic_refresh(self: &Arc<Self>, pool: &WorkerPool) {
        let interval = self.settings.refresh.discovery_refresh_interval();
        if self.is_static() || interval.is_zero() {
            return;
        }

        let locator = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        pool.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(locator) = locator.upgrade() else { break };
                        if let Err(e) = locator.refresh().await {
                            warn!(error = %e, "Periodic config service discovery failed");
                        }
                    }
                }
            }
            debug!("Config service discovery refresh stopped");
        });
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
