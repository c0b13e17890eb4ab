use thiserror::Error;

pub mod diff;
pub mod dto;
pub mod http;
pub mod model;
pub mod namespace;
pub mod properties;

pub use diff::calculate_changes;
pub use dto::{ApolloConfig, ApolloConfigNotification, ServiceDto};
pub use http::{HttpRequest, HttpResponse, HttpTransport};
pub use model::{
    ConfigChange, ConfigChangeEvent, ConfigFileChangeEvent, ConfigFileFormat, ConfigSourceType,
    PropertyChangeType,
};
pub use namespace::NamespaceKey;
pub use properties::Properties;

#[derive(Error, Debug)]
pub enum ApolloError {
    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("Unexpected status code {status} from {url}")]
    StatusCode { status: u16, url: String },

    #[error("No available config service: {0}")]
    NoConfigServices(String),

    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to parse {format} content: {message}")]
    Parse { format: String, message: String },

    #[error("Client has been shut down")]
    Shutdown,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl ApolloError {
    /// Failures that a later attempt against the same or another endpoint may fix.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApolloError::Transport { .. }
                | ApolloError::StatusCode { .. }
                | ApolloError::NoConfigServices(_)
        )
    }

    pub fn parse(format: impl Into<String>, message: impl ToString) -> Self {
        ApolloError::Parse {
            format: format.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ApolloError>;
