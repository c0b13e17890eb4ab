//! Client for a distributed configuration service.
//!
//! ```no_run
//! use apollo::{ClientSettings, ConfigManager};
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! apollo::init_logging(false)?;
//! let settings = ClientSettings::new("someAppId").with_meta_server("http://localhost:8080");
//! let manager = ConfigManager::new(settings)?;
//!
//! let config = manager.app_config().await?;
//! let timeout = config.get_int_property("timeout", 100);
//! config.add_change_listener(Arc::new(|event: &apollo::ConfigChangeEvent| {
//!     for key in event.changed_keys() {
//!         println!("{} changed", key);
//!     }
//! }));
//! # let _ = timeout;
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub use apollo_client::{
    ChangeListener, ConfigChangeListener, ConfigFile, ConfigFileChangeListener, ConfigManager,
    ConfigRepository, DefaultConfig, InterestedKeys, ReqwestTransport,
};
pub use apollo_config::{ClientSettings, NotificationMode};
pub use apollo_core::{
    ApolloError, ConfigChange, ConfigChangeEvent, ConfigFileChangeEvent, ConfigFileFormat,
    ConfigSourceType, HttpRequest, HttpResponse, HttpTransport, Properties, PropertyChangeType,
    Result as ApolloResult,
};

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `info` (or `debug` when `verbose`).
pub fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_installs_once() {
        assert!(init_logging(true).is_ok());
        assert!(init_logging(false).is_err());
    }
}
