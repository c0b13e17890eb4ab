//! Long-poll notification loop, one task per (app id, cluster) group.

use apollo_config::ClientSettings;
use apollo_core::namespace::normalize_namespace;
use apollo_core::{
    ApolloConfigNotification, ApolloError, HttpRequest, HttpTransport, Result, ServiceDto,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use reqwest::Url;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::executor::WorkerPool;
use crate::locator::ConfigServiceLocator;

/// Initial cursor: the client has not seen any notification yet.
pub const INITIAL_NOTIFICATION_ID: i64 = -1;

/// Something that re-fetches its namespace when the server reports a change.
pub trait LongPollNotifiable: Send + Sync {
    /// `service` is the endpoint that delivered the notification.
    fn on_long_poll_notified(self: Arc<Self>, service: ServiceDto);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub app_id: String,
    pub cluster: String,
}

impl GroupKey {
    pub fn new(app_id: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            cluster: cluster.into(),
        }
    }
}

/// Namespaces and cursors polled together in one request.
struct PollGroup {
    key: GroupKey,
    cancel: CancellationToken,
    namespaces: DashMap<String, Vec<Weak<dyn LongPollNotifiable>>>,
    cursors: DashMap<String, i64>,
}

impl PollGroup {
    fn new(key: GroupKey, cancel: CancellationToken) -> Self {
        Self {
            key,
            cancel,
            namespaces: DashMap::new(),
            cursors: DashMap::new(),
        }
    }

    /// Lock order is `namespaces` then `cursors`, matching [`Self::forget_if_dead`].
    fn register(&self, namespace: &str, repository: Weak<dyn LongPollNotifiable>) {
        let mut entry = self.namespaces.entry(namespace.to_string()).or_default();
        entry.retain(|r| r.strong_count() > 0);
        entry.push(repository);
        self.cursors
            .entry(namespace.to_string())
            .or_insert(INITIAL_NOTIFICATION_ID);
    }

    /// Drops a namespace and its cursor once every repository for it is gone.
    fn forget_if_dead(&self, namespace: &str) -> bool {
        self.namespaces
            .remove_if(namespace, |name, repos| {
                let dead = repos.iter().all(|r| r.strong_count() == 0);
                if dead {
                    self.cursors.remove(name);
                }
                dead
            })
            .is_some()
    }

    fn snapshot_cursors(&self) -> Vec<ApolloConfigNotification> {
        let mut notifications: Vec<ApolloConfigNotification> = self
            .cursors
            .iter()
            .map(|entry| ApolloConfigNotification::new(entry.key().clone(), *entry.value()))
            .collect();
        notifications.sort_by(|a, b| a.namespace_name.cmp(&b.namespace_name));
        notifications
    }

    /// Advances cursors from a 200 response and triggers the matching
    /// repositories. Ids that do not move a cursor forward are ignored.
    fn apply(&self, notifications: Vec<ApolloConfigNotification>, service: &ServiceDto) -> usize {
        let mut triggered = 0;

        for notification in notifications {
            if self.cancel.is_cancelled() {
                break;
            }

            let name = if self.cursors.contains_key(&notification.namespace_name) {
                notification.namespace_name
            } else {
                normalize_namespace(&notification.namespace_name).to_string()
            };

            let advanced = match self.cursors.get_mut(&name) {
                Some(mut cursor) if notification.notification_id > *cursor => {
                    *cursor = notification.notification_id;
                    true
                }
                _ => false,
            };
            if !advanced {
                debug!(
                    app_id = %self.key.app_id,
                    namespace = %name,
                    id = notification.notification_id,
                    "Ignoring stale notification"
                );
                continue;
            }

            let targets: Vec<Arc<dyn LongPollNotifiable>> = self
                .namespaces
                .get(&name)
                .map(|entry| entry.iter().filter_map(Weak::upgrade).collect())
                .unwrap_or_default();

            if targets.is_empty() {
                debug!(app_id = %self.key.app_id, namespace = %name, "No live repository for notification");
                self.forget_if_dead(&name);
                continue;
            }

            info!(
                app_id = %self.key.app_id,
                cluster = %self.key.cluster,
                namespace = %name,
                id = notification.notification_id,
                "Config change notified"
            );
            for target in targets {
                target.on_long_poll_notified(service.clone());
                triggered += 1;
            }
        }

        triggered
    }
}

enum PollOutcome {
    Notified(Vec<ApolloConfigNotification>),
    NotModified,
}

/// Shared state handed to every group task.
#[derive(Clone)]
struct Poller {
    settings: Arc<ClientSettings>,
    transport: Arc<dyn HttpTransport>,
    locator: Arc<ConfigServiceLocator>,
}

impl Poller {
    async fn run(self, group: Arc<PollGroup>) {
        let initial = self.settings.refresh.long_poll_initial_delay();
        tokio::select! {
            _ = group.cancel.cancelled() => return,
            _ = tokio::time::sleep(initial) => {}
        }

        let backoff = self.settings.retry.long_poll_backoff.clone();
        let mut delay = backoff.initial_delay();
        let mut last_service: Option<ServiceDto> = None;

        info!(app_id = %group.key.app_id, cluster = %group.key.cluster, "Long polling started");

        while !group.cancel.is_cancelled() {
            let service = match last_service.take() {
                Some(service) => Some(service),
                None => self.locator.config_services().await.into_iter().next(),
            };
            let Some(service) = service else {
                warn!(app_id = %group.key.app_id, retry_in = ?delay, "No config service for long polling");
                if !self.pause(&group, delay).await {
                    break;
                }
                delay = backoff.next_delay(delay);
                continue;
            };

            let outcome = tokio::select! {
                _ = group.cancel.cancelled() => break,
                outcome = self.poll_once(&group, &service) => outcome,
            };

            match outcome {
                Ok(PollOutcome::Notified(notifications)) => {
                    group.apply(notifications, &service);
                    last_service = Some(service);
                    delay = backoff.initial_delay();
                }
                Ok(PollOutcome::NotModified) => {
                    debug!(app_id = %group.key.app_id, "Long poll timed out without changes");
                    delay = backoff.initial_delay();
                }
                Err(e) => {
                    warn!(
                        app_id = %group.key.app_id,
                        cluster = %group.key.cluster,
                        error = %e,
                        retry_in = ?delay,
                        "Long poll failed"
                    );
                    self.locator.report_failure(&service);
                    if !self.pause(&group, delay).await {
                        break;
                    }
                    delay = backoff.next_delay(delay);
                }
            }
        }

        info!(app_id = %group.key.app_id, cluster = %group.key.cluster, "Long polling stopped");
    }

    /// Sleeps unless the group is cancelled first. Returns false on cancel.
    async fn pause(&self, group: &PollGroup, delay: Duration) -> bool {
        tokio::select! {
            _ = group.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn poll_once(&self, group: &PollGroup, service: &ServiceDto) -> Result<PollOutcome> {
        let url = self.notifications_url(group, service)?;
        let request = HttpRequest::get(url.clone(), self.settings.timeouts.long_poll_timeout());
        let response = self.transport.get(request).await?;

        if response.is_not_modified() {
            return Ok(PollOutcome::NotModified);
        }
        if !response.is_ok() {
            return Err(ApolloError::StatusCode {
                status: response.status,
                url,
            });
        }
        let notifications: Vec<ApolloConfigNotification> = serde_json::from_str(&response.body)?;
        Ok(PollOutcome::Notified(notifications))
    }

    fn notifications_url(&self, group: &PollGroup, service: &ServiceDto) -> Result<String> {
        let mut url = Url::parse(service.base_url()).map_err(|e| {
            ApolloError::ConfigError(format!("Invalid config service url {}: {}", service.homepage_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| ApolloError::ConfigError(format!("Invalid config service url {}", service.homepage_url)))?
            .pop_if_empty()
            .extend(["notifications", "v2"]);

        let cursors = serde_json::to_string(&group.snapshot_cursors())?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("cluster", &group.key.cluster)
                .append_pair("appId", &group.key.app_id)
                .append_pair("notifications", &cursors);
            if let Some(dc) = self.settings.data_center.as_deref() {
                query.append_pair("dataCenter", dc);
            }
            if let Some(ip) = self.settings.ip.as_deref() {
                query.append_pair("ip", ip);
            }
        }
        Ok(url.to_string())
    }
}

/// Process-wide long-poll service.
///
/// Groups start lazily on the first namespace submitted for them. A newly
/// submitted namespace joins the group's next poll cycle without disturbing
/// the request in flight.
pub struct RemoteConfigLongPollService {
    poller: Poller,
    pool: Arc<WorkerPool>,
    groups: DashMap<GroupKey, Arc<PollGroup>>,
    root: parking_lot::Mutex<CancellationToken>,
}

impl RemoteConfigLongPollService {
    pub fn new(
        settings: Arc<ClientSettings>,
        transport: Arc<dyn HttpTransport>,
        locator: Arc<ConfigServiceLocator>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            poller: Poller {
                settings,
                transport,
                locator,
            },
            pool,
            groups: DashMap::new(),
            root: parking_lot::Mutex::new(CancellationToken::new()),
        }
    }

    /// Registers `repository` for change notifications on `namespace`.
    /// Returns false when the service has been stopped.
    pub fn submit(
        &self,
        app_id: &str,
        cluster: &str,
        namespace: &str,
        repository: Weak<dyn LongPollNotifiable>,
    ) -> bool {
        let root = self.root.lock();
        if root.is_cancelled() {
            debug!(app_id = %app_id, namespace = %namespace, "Long poll service stopped, ignoring submit");
            return false;
        }

        // The root lock is held until the namespace is registered so a
        // concurrent reset cannot leave it in a cancelled group.
        let key = GroupKey::new(app_id, cluster);
        let group = match self.groups.entry(key.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let group = Arc::new(PollGroup::new(key, root.child_token()));
                entry.insert(group.clone());
                self.pool.spawn(self.poller.clone().run(group.clone()));
                group
            }
        };

        group.register(namespace, repository);
        true
    }

    /// Stops every group. Idempotent; in-flight polls are abandoned.
    pub fn stop(&self) {
        let root = self.root.lock();
        root.cancel();
        for group in self.groups.iter() {
            group.cancel.cancel();
        }
        info!("Long poll service stopped");
    }

    /// Stops one group, leaving others running.
    pub fn stop_group(&self, app_id: &str, cluster: &str) -> bool {
        match self.groups.remove(&GroupKey::new(app_id, cluster)) {
            Some((_, group)) => {
                group.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stops everything and forgets all groups and cursors. Later submits
    /// start fresh groups.
    pub fn reset(&self) {
        let mut root = self.root.lock();
        std::mem::replace(&mut *root, CancellationToken::new()).cancel();
        self.groups.clear();
        debug!("Long poll service reset");
    }

    pub fn cursor(&self, app_id: &str, cluster: &str, namespace: &str) -> Option<i64> {
        let group = self.groups.get(&GroupKey::new(app_id, cluster))?;
        let cursor = group.cursors.get(namespace).map(|c| *c);
        cursor
    }

    pub fn is_polling(&self, app_id: &str, cluster: &str) -> bool {
        self.groups
            .get(&GroupKey::new(app_id, cluster))
            .map(|g| !g.cancel.is_cancelled())
            .unwrap_or(false)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

impl Drop for RemoteConfigLongPollService {
    fn drop(&mut self) {
        self.root.get_mut().cancel();
    }
}
