//! In-process stand-in for the config service.
//!
//! [`MockConfigService`] implements [`HttpTransport`], so a client built with
//! it as transport talks to in-memory state instead of the network. It
//! answers discovery, config fetches (honoring `releaseKey`) and
//! `/notifications/v2` long polls, which block until a requested namespace
//! advances or the request timeout elapses.

use apollo_core::namespace::CONFIG_FILE_CONTENT_KEY;
use apollo_core::{
    ApolloConfig, ApolloConfigNotification, ApolloError, HttpRequest, HttpResponse, HttpTransport,
    Result, ServiceDto,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "http://mock-config-service";

type Key = (String, String);

fn key(app_id: &str, namespace: &str) -> Key {
    (app_id.to_string(), namespace.to_string())
}

#[derive(Default)]
struct Namespace {
    published: Map<String, Value>,
    current: Map<String, Value>,
    release_key: String,
    notification_id: Option<i64>,
}

#[derive(Default)]
struct State {
    namespaces: HashMap<Key, Namespace>,
    releases: u64,
    forced_status: Option<u16>,
    unreachable: bool,
    requests: Vec<String>,
    fetches: HashMap<Key, usize>,
}

impl State {
    fn next_release(&mut self) -> String {
        self.releases += 1;
        format!("release-{}", self.releases)
    }

    /// Records a content change: new release key, next notification id.
    fn bump(&mut self, k: &Key) {
        let release = self.next_release();
        let ns = self.namespaces.entry(k.clone()).or_default();
        ns.release_key = release;
        ns.notification_id = Some(ns.notification_id.unwrap_or(0) + 1);
    }
}

pub struct MockConfigService {
    base_url: String,
    state: Mutex<State>,
    changed: Notify,
}

impl Default for MockConfigService {
    fn default() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }
}

impl MockConfigService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            state: Mutex::new(State::default()),
            changed: Notify::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Publishes a full namespace. Does not advance its notification id, so
    /// clients only see it on their next fetch.
    pub fn set_configs<I, K, V>(&self, app_id: &str, namespace: &str, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let configurations: Map<String, Value> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), Value::String(v.into())))
            .collect();
        let mut state = self.state.lock();
        let release = state.next_release();
        let ns = state.namespaces.entry(key(app_id, namespace)).or_default();
        ns.published = configurations.clone();
        ns.current = configurations;
        ns.release_key = release;
    }

    /// Publishes a document namespace such as `application.yaml`.
    pub fn set_content(&self, app_id: &str, namespace: &str, content: &str) {
        self.set_configs(app_id, namespace, [(CONFIG_FILE_CONTENT_KEY, content)]);
    }

    pub fn add_or_modify_property(&self, app_id: &str, namespace: &str, key_name: &str, value: &str) {
        let k = key(app_id, namespace);
        {
            let mut state = self.state.lock();
            state
                .namespaces
                .entry(k.clone())
                .or_default()
                .current
                .insert(key_name.to_string(), Value::String(value.to_string()));
            state.bump(&k);
        }
        self.changed.notify_waiters();
    }

    /// Replaces a document namespace's content and notifies pollers.
    pub fn modify_content(&self, app_id: &str, namespace: &str, content: &str) {
        self.add_or_modify_property(app_id, namespace, CONFIG_FILE_CONTENT_KEY, content);
    }

    pub fn delete_property(&self, app_id: &str, namespace: &str, key_name: &str) {
        let k = key(app_id, namespace);
        {
            let mut state = self.state.lock();
            let removed = state
                .namespaces
                .get_mut(&k)
                .and_then(|ns| ns.current.remove(key_name))
                .is_some();
            if !removed {
                return;
            }
            state.bump(&k);
        }
        self.changed.notify_waiters();
    }

    /// Drops every change made since the last [`set_configs`](Self::set_configs).
    pub fn reset_overridden_properties(&self, app_id: &str, namespace: &str) {
        let k = key(app_id, namespace);
        {
            let mut state = self.state.lock();
            let Some(ns) = state.namespaces.get_mut(&k) else {
                return;
            };
            if ns.current == ns.published {
                return;
            }
            ns.current = ns.published.clone();
            state.bump(&k);
        }
        self.changed.notify_waiters();
    }

    /// Sets a namespace's notification id without touching its content.
    pub fn publish(&self, app_id: &str, namespace: &str, notification_id: i64) {
        self.state
            .lock()
            .namespaces
            .entry(key(app_id, namespace))
            .or_default()
            .notification_id = Some(notification_id);
        self.changed.notify_waiters();
    }

    /// Answers every config fetch with `status` until recovered.
    pub fn fail_configs(&self, status: u16) {
        self.state.lock().forced_status = Some(status);
    }

    pub fn recover_configs(&self) {
        self.state.lock().forced_status = None;
    }

    /// Fails every request at the transport level, like a refused connection.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// URLs of every request received so far.
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }

    /// Number of config fetch requests for a namespace, 304s included.
    pub fn config_fetch_count(&self, app_id: &str, namespace: &str) -> usize {
        self.state
            .lock()
            .fetches
            .get(&key(app_id, namespace))
            .copied()
            .unwrap_or(0)
    }

    pub fn notification_id(&self, app_id: &str, namespace: &str) -> Option<i64> {
        self.state
            .lock()
            .namespaces
            .get(&key(app_id, namespace))
            .and_then(|ns| ns.notification_id)
    }

    fn services(&self) -> Result<HttpResponse> {
        let services = vec![ServiceDto {
            app_name: "APOLLO-CONFIGSERVICE".to_string(),
            instance_id: "mock".to_string(),
            homepage_url: format!("{}/", self.base_url),
        }];
        Ok(HttpResponse::ok(serde_json::to_string(&services)?))
    }

    fn config(&self, url: &Url, app_id: &str, cluster: &str, namespace: &str) -> Result<HttpResponse> {
        let client_release = query(url, "releaseKey");
        let k = key(app_id, namespace);
        let mut state = self.state.lock();
        *state.fetches.entry(k.clone()).or_default() += 1;

        if let Some(status) = state.forced_status {
            return Ok(HttpResponse::new(status, ""));
        }
        let Some(ns) = state.namespaces.get(&k) else {
            return Ok(HttpResponse::new(404, ""));
        };
        if client_release.as_deref() == Some(ns.release_key.as_str()) {
            return Ok(HttpResponse::not_modified());
        }

        let body = ApolloConfig {
            app_id: app_id.to_string(),
            cluster: cluster.to_string(),
            namespace_name: namespace.to_string(),
            configurations: ns.current.clone(),
            release_key: Some(ns.release_key.clone()),
        };
        Ok(HttpResponse::ok(serde_json::to_string(&body)?))
    }

    /// Notifications whose server id is ahead of the client's.
    fn advanced(&self, app_id: &str, requested: &[ApolloConfigNotification]) -> Vec<ApolloConfigNotification> {
        let state = self.state.lock();
        requested
            .iter()
            .filter_map(|n| {
                let server_id = state
                    .namespaces
                    .get(&key(app_id, &n.namespace_name))
                    .and_then(|ns| ns.notification_id)?;
                (server_id > n.notification_id)
                    .then(|| ApolloConfigNotification::new(n.namespace_name.clone(), server_id))
            })
            .collect()
    }

    async fn notifications(&self, url: &Url, request: &HttpRequest) -> Result<HttpResponse> {
        let app_id = query(url, "appId").unwrap_or_default();
        let requested: Vec<ApolloConfigNotification> =
            serde_json::from_str(&query(url, "notifications").unwrap_or_else(|| "[]".to_string()))?;
        let deadline = tokio::time::Instant::now() + request.timeout;

        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let advanced = self.advanced(&app_id, &requested);
            if !advanced.is_empty() {
                return Ok(HttpResponse::ok(serde_json::to_string(&advanced)?));
            }

            tokio::select! {
                _ = &mut changed => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(HttpResponse::not_modified()),
            }
        }
    }
}

fn query(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

#[async_trait]
impl HttpTransport for MockConfigService {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!(url = %request.url, "Mock config service request");
        {
            let mut state = self.state.lock();
            state.requests.push(request.url.clone());
            if state.unreachable {
                return Err(ApolloError::Transport {
                    url: request.url.clone(),
                    message: "connection refused".to_string(),
                });
            }
        }

        let url = Url::parse(&request.url).map_err(|e| ApolloError::Transport {
            url: request.url.clone(),
            message: e.to_string(),
        })?;
        let segments: Vec<String> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

        match segments.as_slice() {
            ["services", "config"] => self.services(),
            ["configs", app_id, cluster, namespace] => self.config(&url, app_id, cluster, namespace),
            ["notifications", "v2"] => self.notifications(&url, &request).await,
            _ => Ok(HttpResponse::new(404, "")),
        }
    }
}
