//! Application-facing key/value view of one namespace.

use apollo_core::diff::calculate_changes;
use apollo_core::{ConfigChangeEvent, ConfigSourceType, Properties};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::executor::WorkerPool;
use crate::listener::{ConfigChangeListener, InterestedKeys, ListenerRegistry};
use crate::repository::{ConfigRepository, RepositoryChangeListener};

/// Current snapshot of a namespace plus its change listeners.
///
/// Reads never touch the network or disk: they look at the last snapshot
/// applied from the backing repository. Every applied snapshot is diffed
/// against the previous one and the resulting event is queued for each
/// interested listener.
pub struct DefaultConfig {
    app_id: String,
    namespace: String,
    repository: Arc<dyn ConfigRepository>,
    snapshot: ArcSwap<Properties>,
    source: Mutex<ConfigSourceType>,
    update_lock: Mutex<()>,
    listeners: ListenerRegistry<ConfigChangeEvent>,
}

impl DefaultConfig {
    pub fn new(
        app_id: impl Into<String>,
        namespace: impl Into<String>,
        repository: Arc<dyn ConfigRepository>,
        pool: Arc<WorkerPool>,
    ) -> Arc<Self> {
        let namespace = namespace.into();
        let config = Arc::new(Self {
            app_id: app_id.into(),
            listeners: ListenerRegistry::new(namespace.clone(), pool),
            namespace,
            repository: repository.clone(),
            snapshot: ArcSwap::from_pointee(Properties::new()),
            source: Mutex::new(ConfigSourceType::None),
            update_lock: Mutex::new(()),
        });

        let listener: Arc<dyn RepositoryChangeListener> = config.clone();
        repository.add_change_listener(Arc::downgrade(&listener));

        {
            let _guard = config.update_lock.lock();
            if let Some(initial) = repository.config() {
                config.snapshot.store(initial);
            }
            *config.source.lock() = repository.source_type();
        }
        config
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Value of `key` in the current snapshot, or `default` when absent.
    pub fn get_property(&self, key: &str, default: Option<&str>) -> Option<String> {
        self.snapshot
            .load()
            .get(key)
            .or(default)
            .map(str::to_string)
    }

    pub fn get_property_names(&self) -> Vec<String> {
        self.snapshot.load().property_names()
    }

    /// Parses the value of `key`; a missing or unparsable value yields
    /// `default`.
    pub fn get_property_as<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr,
        T::Err: Display,
    {
        let snapshot = self.snapshot.load();
        let Some(raw) = snapshot.get(key) else {
            return default;
        };
        match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    namespace = %self.namespace,
                    key = %key,
                    value = %raw,
                    error = %e,
                    "Config value has the wrong type, using default"
                );
                default
            }
        }
    }

    pub fn get_int_property(&self, key: &str, default: i32) -> i32 {
        self.get_property_as(key, default)
    }

    pub fn get_long_property(&self, key: &str, default: i64) -> i64 {
        self.get_property_as(key, default)
    }

    pub fn get_float_property(&self, key: &str, default: f32) -> f32 {
        self.get_property_as(key, default)
    }

    pub fn get_double_property(&self, key: &str, default: f64) -> f64 {
        self.get_property_as(key, default)
    }

    /// Accepts `true`/`false` in any case.
    pub fn get_bool_property(&self, key: &str, default: bool) -> bool {
        let snapshot = self.snapshot.load();
        match snapshot.get(key).map(str::trim) {
            None => default,
            Some(v) if v.eq_ignore_ascii_case("true") => true,
            Some(v) if v.eq_ignore_ascii_case("false") => false,
            Some(v) => {
                warn!(namespace = %self.namespace, key = %key, value = %v, "Config value is not a boolean, using default");
                default
            }
        }
    }

    pub fn get_array_property(&self, key: &str, delimiter: &str, default: Vec<String>) -> Vec<String> {
        match self.snapshot.load().get(key) {
            Some(raw) if !delimiter.is_empty() => raw.split(delimiter).map(str::to_string).collect(),
            Some(raw) => vec![raw.to_string()],
            None => default,
        }
    }

    pub fn source_type(&self) -> ConfigSourceType {
        *self.source.lock()
    }

    /// Listens to changes of every key. Returns false when the listener was
    /// already registered, in which case its interest is reset to all keys.
    pub fn add_change_listener(&self, listener: Arc<ConfigChangeListener>) -> bool {
        self.listeners.add(listener, InterestedKeys::all())
    }

    pub fn add_change_listener_with_keys<I, S>(&self, listener: Arc<ConfigChangeListener>, keys: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.listeners.add(listener, InterestedKeys::keys(keys))
    }

    pub fn add_change_listener_with_prefixes<I, S, P, Q>(
        &self,
        listener: Arc<ConfigChangeListener>,
        keys: I,
        prefixes: P,
    ) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        P: IntoIterator<Item = Q>,
        Q: Into<String>,
    {
        self.listeners
            .add(listener, InterestedKeys::keys(keys).with_prefixes(prefixes))
    }

    pub fn remove_change_listener(&self, listener: &Arc<ConfigChangeListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Queues `event` for every interested listener. Empty events are
    /// dropped. Returns the number of deliveries scheduled.
    pub fn fire_config_change(&self, event: ConfigChangeEvent) -> usize {
        if event.is_empty() {
            return 0;
        }
        self.listeners.fire(event)
    }

    /// Replaces the snapshot as if the repository had produced it, running
    /// the same diff and notification path as a real refresh.
    pub fn apply_snapshot(&self, snapshot: Properties) -> usize {
        self.update(Arc::new(snapshot))
    }

    fn update(&self, next: Arc<Properties>) -> usize {
        let _guard = self.update_lock.lock();
        let previous = self.snapshot.load_full();
        *self.source.lock() = self.repository.source_type();
        if *previous == *next {
            return 0;
        }

        let changes = calculate_changes(&self.app_id, &self.namespace, &previous, &next);
        self.snapshot.store(next);
        debug!(
            app_id = %self.app_id,
            namespace = %self.namespace,
            changes = changes.len(),
            "Applied new config snapshot"
        );

        // Enqueued under the update lock so events leave in snapshot order.
        self.fire_config_change(ConfigChangeEvent::new(&self.app_id, &self.namespace, changes))
    }
}

impl RepositoryChangeListener for DefaultConfig {
    fn on_repository_change(&self, _namespace: &str, snapshot: Arc<Properties>) {
        self.update(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::LocalFileConfigRepository;
    use apollo_core::PropertyChangeType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Counter {
        #[allow(dead_code)]
        name: &'static str,
        calls: AtomicUsize,
        last: Mutex<Option<ConfigChangeEvent>>,
    }

    impl Counter {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl crate::listener::ChangeListener<ConfigChangeEvent> for Counter {
        fn on_change(&self, event: &ConfigChangeEvent) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock() = Some(event.clone());
        }
    }

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs.iter().copied().collect()
    }

    fn config_over(dir: &TempDir, initial: Option<&[(&str, &str)]>) -> Arc<DefaultConfig> {
        let local = LocalFileConfigRepository::new("app", "default", "application", dir.path(), false);
        if let Some(pairs) = initial {
            local.persist(&props(pairs)).unwrap();
        }
        let pool = Arc::new(WorkerPool::new(4).unwrap());
        DefaultConfig::new("app", "application", Arc::new(local), pool)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_reads_with_defaults() {
        let dir = TempDir::new().unwrap();
        let config = config_over(
            &dir,
            Some(&[
                ("someKey", "someValue"),
                ("port", "8080"),
                ("bad", "eighty"),
                ("flag", "TRUE"),
                ("ratio", "0.5"),
                ("hosts", "a,b,c"),
            ]),
        );

        assert_eq!(config.get_property("someKey", None).as_deref(), Some("someValue"));
        assert_eq!(config.get_property("missing", Some("dflt")).as_deref(), Some("dflt"));
        assert_eq!(config.get_property("missing", None), None);
        assert_eq!(config.get_int_property("port", 1), 8080);
        assert_eq!(config.get_long_property("bad", 7), 7);
        assert!(config.get_bool_property("flag", false));
        assert_eq!(config.get_double_property("ratio", 0.0), 0.5);
        assert_eq!(config.get_array_property("hosts", ",", vec![]), vec!["a", "b", "c"]);
        assert_eq!(config.get_array_property("none", ",", vec!["x".into()]), vec!["x"]);
        assert_eq!(config.source_type(), ConfigSourceType::Local);

        let mut names = config.get_property_names();
        names.sort();
        assert_eq!(names.len(), 6);
        assert_eq!(names[0], "bad");
    }

    #[tokio::test]
    async fn test_empty_repository_serves_defaults() {
        let dir = TempDir::new().unwrap();
        let config = config_over(&dir, None);

        assert_eq!(config.get_property("k", Some("d")).as_deref(), Some("d"));
        assert!(config.get_property_names().is_empty());
        assert_eq!(config.source_type(), ConfigSourceType::None);
    }

    #[tokio::test]
    async fn test_identical_snapshot_fires_nothing() {
        let dir = TempDir::new().unwrap();
        let config = config_over(&dir, Some(&[("k", "v")]));
        let listener = Counter::new("X");
        config.add_change_listener(listener.clone());

        assert_eq!(config.apply_snapshot(props(&[("k", "v")])), 0);
        settle().await;
        assert_eq!(listener.calls(), 0);
    }

    #[tokio::test]
    async fn test_value_equal_listeners_are_tracked_by_identity() {
        let dir = TempDir::new().unwrap();
        let config = config_over(&dir, None);
        let a = Counter::new("X");
        let b = Counter::new("X");
        let b_dyn: Arc<ConfigChangeListener> = b.clone();

        config.add_change_listener_with_keys(a.clone(), ["k"]);
        config.add_change_listener_with_keys(b_dyn.clone(), ["k"]);

        assert_eq!(config.apply_snapshot(props(&[("k", "1")])), 2);
        settle().await;
        assert_eq!((a.calls(), b.calls()), (1, 1));

        assert!(config.remove_change_listener(&b_dyn));
        assert_eq!(config.apply_snapshot(props(&[("k", "2")])), 1);
        settle().await;
        assert_eq!((a.calls(), b.calls()), (2, 1));
    }

    #[tokio::test]
    async fn test_interested_keys_filter_events() {
        let dir = TempDir::new().unwrap();
        let config = config_over(&dir, Some(&[("k1", "a"), ("k2", "a")]));
        let listener = Counter::new("k1 only");
        config.add_change_listener_with_keys(listener.clone(), ["k1"]);

        config.apply_snapshot(props(&[("k1", "a"), ("k2", "b")]));
        settle().await;
        assert_eq!(listener.calls(), 0);

        config.apply_snapshot(props(&[("k1", "b"), ("k2", "c"), ("k3", "new")]));
        settle().await;
        assert_eq!(listener.calls(), 1);

        let event = listener.last.lock().clone().unwrap();
        assert_eq!(event.changed_keys().len(), 3);
        let change = event.get_change("k1").unwrap();
        assert_eq!(change.change_type, PropertyChangeType::Modified);
        assert_eq!(change.old_value.as_deref(), Some("a"));
        assert_eq!(change.new_value.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_prefix_interest() {
        let dir = TempDir::new().unwrap();
        let config = config_over(&dir, None);
        let listener = Counter::new("db");
        config.add_change_listener_with_prefixes(listener.clone(), Vec::<String>::new(), ["db."]);

        config.apply_snapshot(props(&[("cache.size", "1")]));
        config.apply_snapshot(props(&[("cache.size", "1"), ("db.url", "x")]));
        settle().await;
        assert_eq!(listener.calls(), 1);
    }

    #[tokio::test]
    async fn test_repository_reload_flows_into_config() {
        let dir = TempDir::new().unwrap();
        let local = Arc::new(LocalFileConfigRepository::new(
            "app",
            "default",
            "application",
            dir.path(),
            false,
        ));
        local.persist(&props(&[("k", "v1")])).unwrap();
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let config = DefaultConfig::new("app", "application", local.clone(), pool);
        let listener = Counter::new("X");
        config.add_change_listener(listener.clone());

        // Another writer replaces the file; reload picks it up.
        let other = LocalFileConfigRepository::new("app", "default", "application", dir.path(), false);
        other.persist(&props(&[("k", "v2")])).unwrap();
        assert!(local.reload());

        settle().await;
        assert_eq!(config.get_property("k", None).as_deref(), Some("v2"));
        assert_eq!(listener.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_event_is_not_delivered() {
        let dir = TempDir::new().unwrap();
        let config = config_over(&dir, None);
        let listener = Counter::new("X");
        config.add_change_listener(listener.clone());

        assert_eq!(
            config.fire_config_change(ConfigChangeEvent::new("app", "application", Vec::new())),
            0
        );
        settle().await;
        assert_eq!(listener.calls(), 0);
    }
}
