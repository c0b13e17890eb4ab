pub mod config;
pub mod config_file;
pub mod context;
pub mod executor;
pub mod listener;
pub mod locator;
pub mod long_poll;
pub mod manager;
pub mod parser;
pub mod repository;
pub mod transport;

pub use config::DefaultConfig;
pub use config_file::ConfigFile;
pub use context::ClientContext;
pub use executor::WorkerPool;
pub use listener::{
    ChangeListener, ConfigChangeListener, ConfigFileChangeListener, InterestedKeys, ListenerRegistry,
};
pub use locator::ConfigServiceLocator;
pub use long_poll::{LongPollNotifiable, RemoteConfigLongPollService};
pub use manager::ConfigManager;
pub use parser::{parser_for, ConfigFileParser};
pub use repository::{
    ConfigRepository, LocalFileConfigRepository, PropertiesCompatibleRepository,
    RemoteConfigRepository, RepositoryChangeListener,
};
pub use transport::ReqwestTransport;
