use apollo_config::ClientSettings;
use apollo_core::HttpTransport;
use std::sync::Arc;

use crate::executor::WorkerPool;
use crate::locator::ConfigServiceLocator;
use crate::long_poll::RemoteConfigLongPollService;

/// Collaborators shared by every namespace of one client.
#[derive(Clone)]
pub struct ClientContext {
    pub settings: Arc<ClientSettings>,
    pub transport: Arc<dyn HttpTransport>,
    pub locator: Arc<ConfigServiceLocator>,
    pub long_poll: Arc<RemoteConfigLongPollService>,
    pub pool: Arc<WorkerPool>,
}

impl ClientContext {
    /// Wires the locator, long-poll service and worker pool around a
    /// transport. Must be called inside a tokio runtime.
    pub fn new(
        settings: ClientSettings,
        transport: Arc<dyn HttpTransport>,
    ) -> apollo_core::Result<Self> {
        let settings = Arc::new(settings);
        let pool = Arc::new(WorkerPool::new(settings.dispatch_workers)?);
        let locator = Arc::new(ConfigServiceLocator::new(settings.clone(), transport.clone()));
        let long_poll = Arc::new(RemoteConfigLongPollService::new(
            settings.clone(),
            transport.clone(),
            locator.clone(),
            pool.clone(),
        ));

        Ok(Self {
            settings,
            transport,
            locator,
            long_poll,
            pool,
        })
    }
}
