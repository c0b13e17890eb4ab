#![allow(dead_code)]

use apollo_client::ConfigChangeListener;
use apollo_config::ClientSettings;
use apollo_core::ConfigChangeEvent;
use apollo_mockserver::MockConfigService;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const APP_ID: &str = "someAppId";

/// Settings tuned for fast tests against the mock service.
pub fn settings(cache: &TempDir, server: &MockConfigService) -> ClientSettings {
    let mut settings = ClientSettings::new(APP_ID)
        .with_config_service_urls([server.base_url()])
        .with_cache_dir(cache.path());
    settings.refresh.long_poll_initial_delay_ms = 0;
    settings.timeouts.long_poll_timeout_ms = 500;
    settings.retry.on_error_retry_interval_ms = 10;
    settings.retry.long_poll_backoff.initial_delay_ms = 10;
    settings.retry.long_poll_backoff.max_delay_ms = 50;
    settings
}

/// Polls `condition` until it holds or five seconds pass.
pub async fn eventually<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

pub async fn quiet_period() {
    tokio::time::sleep(Duration::from_millis(400)).await;
}

/// Listener that keeps every event it receives.
pub fn recorder() -> (Arc<ConfigChangeListener>, Arc<Mutex<Vec<ConfigChangeEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let listener: Arc<ConfigChangeListener> =
        Arc::new(move |event: &ConfigChangeEvent| sink.lock().push(event.clone()));
    (listener, events)
}

pub async fn with_timeout<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("timed out")
}
