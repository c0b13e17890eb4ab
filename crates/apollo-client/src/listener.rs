//! Identity-keyed listener registry with per-listener asynchronous delivery.

use apollo_core::{ConfigChangeEvent, ConfigFileChangeEvent};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::executor::WorkerPool;

/// Receives change events. Implemented for any `Fn(&E)` closure.
pub trait ChangeListener<E>: Send + Sync + 'static {
    fn on_change(&self, event: &E);
}

impl<E, F> ChangeListener<E> for F
where
    F: Fn(&E) + Send + Sync + 'static,
{
    fn on_change(&self, event: &E) {
        self(event)
    }
}

pub type ConfigChangeListener = dyn ChangeListener<ConfigChangeEvent>;
pub type ConfigFileChangeListener = dyn ChangeListener<ConfigFileChangeEvent>;

/// Keys a listener cares about. Empty means every key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterestedKeys {
    keys: HashSet<String>,
    prefixes: Vec<String>,
}

impl InterestedKeys {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            prefixes: Vec::new(),
        }
    }

    pub fn with_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefixes.extend(prefixes.into_iter().map(Into::into));
        self
    }

    pub fn is_all(&self) -> bool {
        self.keys.is_empty() && self.prefixes.is_empty()
    }

    pub fn matches(&self, key: &str) -> bool {
        self.is_all()
            || self.keys.contains(key)
            || self.prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }
}

/// Events that can be filtered against a listener's interest.
pub trait ListenerEvent: Send + Sync + 'static {
    fn concerns(&self, interest: &InterestedKeys) -> bool;
}

impl ListenerEvent for ConfigChangeEvent {
    fn concerns(&self, interest: &InterestedKeys) -> bool {
        interest.is_all() || self.changes().any(|c| interest.matches(&c.property_name))
    }
}

impl ListenerEvent for ConfigFileChangeEvent {
    fn concerns(&self, _interest: &InterestedKeys) -> bool {
        true
    }
}

struct Registration<E> {
    listener: Arc<dyn ChangeListener<E>>,
    interest: InterestedKeys,
    queue: mpsc::UnboundedSender<Arc<E>>,
}

/// Listener table for one namespace.
///
/// Entries are keyed by the address of the listener allocation, so two
/// listeners that compare equal by value still get separate registrations.
/// Every registration owns a queue drained by its own task: a fire only
/// enqueues, delivery to one listener is in fire order, and a slow or
/// panicking listener never holds up another.
pub struct ListenerRegistry<E: ListenerEvent> {
    namespace: String,
    pool: Arc<WorkerPool>,
    entries: RwLock<HashMap<usize, Registration<E>>>,
}

fn identity<T: ?Sized>(listener: &Arc<T>) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}

impl<E: ListenerEvent> ListenerRegistry<E> {
    pub fn new(namespace: impl Into<String>, pool: Arc<WorkerPool>) -> Self {
        Self {
            namespace: namespace.into(),
            pool,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `listener`, or replaces its interest if it is already
    /// registered. Returns true for a new registration.
    pub fn add(&self, listener: Arc<dyn ChangeListener<E>>, interest: InterestedKeys) -> bool {
        let id = identity(&listener);
        let mut entries = self.entries.write();

        if let Some(existing) = entries.get_mut(&id) {
            existing.interest = interest;
            return false;
        }

        let (queue, rx) = mpsc::unbounded_channel();
        self.pool.spawn(deliver_loop(
            self.namespace.clone(),
            listener.clone(),
            rx,
            self.pool.clone(),
        ));
        entries.insert(
            id,
            Registration {
                listener,
                interest,
                queue,
            },
        );
        true
    }

    pub fn remove(&self, listener: &Arc<dyn ChangeListener<E>>) -> bool {
        self.entries.write().remove(&identity(listener)).is_some()
    }

    pub fn contains(&self, listener: &Arc<dyn ChangeListener<E>>) -> bool {
        self.entries.read().contains_key(&identity(listener))
    }

    /// Queues one delivery of `event` for every interested listener and
    /// returns how many were scheduled.
    pub fn fire(&self, event: E) -> usize {
        let event = Arc::new(event);
        let entries = self.entries.read();

        let mut scheduled = 0;
        for registration in entries.values() {
            if !event.concerns(&registration.interest) {
                continue;
            }
            if registration.queue.send(event.clone()).is_ok() {
                scheduled += 1;
            }
        }

        debug!(
            namespace = %self.namespace,
            listeners = entries.len(),
            scheduled,
            "Dispatched change event"
        );
        scheduled
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn listeners(&self) -> Vec<Arc<dyn ChangeListener<E>>> {
        self.entries
            .read()
            .values()
            .map(|r| r.listener.clone())
            .collect()
    }
}

async fn deliver_loop<E: ListenerEvent>(
    namespace: String,
    listener: Arc<dyn ChangeListener<E>>,
    mut rx: mpsc::UnboundedReceiver<Arc<E>>,
    pool: Arc<WorkerPool>,
) {
    while let Some(event) = rx.recv().await {
        let listener = listener.clone();
        if let Err(e) = pool.run_blocking(move || listener.on_change(&event)).await {
            warn!(namespace = %namespace, error = %e, "Change listener failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apollo_core::{ConfigChange, PropertyChangeType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct NamedListener {
        #[allow(dead_code)]
        name: &'static str,
        calls: AtomicUsize,
    }

    impl NamedListener {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl ChangeListener<ConfigChangeEvent> for NamedListener {
        fn on_change(&self, _event: &ConfigChangeEvent) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn event(keys: &[&str]) -> ConfigChangeEvent {
        ConfigChangeEvent::new(
            "app",
            "application",
            keys.iter().map(|k| {
                ConfigChange::new(
                    "app",
                    "application",
                    *k,
                    None,
                    Some("v".to_string()),
                    PropertyChangeType::Added,
                )
            }),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[test]
    fn test_interest_matching() {
        let interest = InterestedKeys::keys(["k1"]).with_prefixes(["db."]);
        assert!(interest.matches("k1"));
        assert!(interest.matches("db.url"));
        assert!(!interest.matches("k2"));
        assert!(InterestedKeys::all().matches("anything"));
    }

    #[tokio::test]
    async fn test_value_equal_listeners_are_independent() {
        let registry = ListenerRegistry::new("application", Arc::new(WorkerPool::new(4).unwrap()));
        let a = NamedListener::new("X");
        let b = NamedListener::new("X");
        let a_dyn: Arc<ConfigChangeListener> = a.clone();
        let b_dyn: Arc<ConfigChangeListener> = b.clone();

        assert!(registry.add(a_dyn.clone(), InterestedKeys::keys(["k"])));
        assert!(registry.add(b_dyn.clone(), InterestedKeys::keys(["k"])));
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.fire(event(&["k"])), 2);
        settle().await;
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);

        assert!(registry.remove(&b_dyn));
        assert!(!registry.remove(&b_dyn));
        assert_eq!(registry.fire(event(&["k"])), 1);
        settle().await;
        assert_eq!(a.calls.load(Ordering::SeqCst), 2);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_re_adding_updates_interest() {
        let registry = ListenerRegistry::new("application", Arc::new(WorkerPool::new(4).unwrap()));
        let listener = NamedListener::new("only");
        let listener_dyn: Arc<ConfigChangeListener> = listener.clone();

        assert!(registry.add(listener_dyn.clone(), InterestedKeys::keys(["k1"])));
        assert!(!registry.add(listener_dyn.clone(), InterestedKeys::keys(["k2"])));
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.fire(event(&["k1"])), 0);
        assert_eq!(registry.fire(event(&["k2", "k3"])), 1);
        settle().await;
        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_block_others() {
        let registry = ListenerRegistry::new("application", Arc::new(WorkerPool::new(4).unwrap()));
        let healthy = NamedListener::new("healthy");
        let panicking: Arc<ConfigChangeListener> =
            Arc::new(|_: &ConfigChangeEvent| panic!("listener bug"));

        registry.add(panicking, InterestedKeys::all());
        registry.add(healthy.clone(), InterestedKeys::all());

        registry.fire(event(&["a"]));
        registry.fire(event(&["b"]));
        settle().await;

        assert_eq!(healthy.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_delivery_preserves_fire_order() {
        let registry = ListenerRegistry::new("application", Arc::new(WorkerPool::new(4).unwrap()));
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: Arc<ConfigChangeListener> = Arc::new(move |e: &ConfigChangeEvent| {
            let mut keys: Vec<String> = e.changed_keys().into_iter().map(str::to_string).collect();
            keys.sort();
            sink.lock().push(keys.join(","));
        });
        registry.add(listener, InterestedKeys::all());

        for i in 0..20 {
            registry.fire(event(&[format!("k{:02}", i).as_str()]));
        }
        settle().await;

        let expected: Vec<String> = (0..20).map(|i| format!("k{:02}", i)).collect();
        assert_eq!(*seen.lock(), expected);
    }
}
