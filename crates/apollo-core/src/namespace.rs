use once_cell::sync::Lazy;
use regex::Regex;

use crate::{ApolloError, Result};

pub const DEFAULT_NAMESPACE: &str = "application";
pub const DEFAULT_CLUSTER: &str = "default";

/// Key under which whole-document namespaces carry their raw text.
pub const CONFIG_FILE_CONTENT_KEY: &str = "content";

static NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Za-z_.-]+$").expect("Invalid regex pattern"));

const PROPERTIES_SUFFIX: &str = ".properties";

/// Identity of a namespace within one process: the owning app id and the
/// (normalized) namespace name. The cluster is ambient client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespaceKey {
    pub app_id: String,
    pub namespace: String,
}

impl NamespaceKey {
    pub fn new(app_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            namespace: namespace.into(),
        }
    }
}

impl std::fmt::Display for NamespaceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.app_id, self.namespace)
    }
}

pub fn validate_namespace(namespace: &str) -> Result<()> {
    if NAME_REGEX.is_match(namespace) {
        Ok(())
    } else {
        Err(ApolloError::InvalidNamespace(format!(
            "'{}' must be non-empty and contain only [0-9A-Za-z_.-]",
            namespace
        )))
    }
}

pub fn validate_app_id(app_id: &str) -> Result<()> {
    if NAME_REGEX.is_match(app_id) {
        Ok(())
    } else {
        Err(ApolloError::InvalidNamespace(format!(
            "app id '{}' must be non-empty and contain only [0-9A-Za-z_.-]",
            app_id
        )))
    }
}

/// Strips a trailing `.properties` (any case) so both spellings share state.
pub fn normalize_namespace(namespace: &str) -> &str {
    let len = namespace.len();
    if len > PROPERTIES_SUFFIX.len()
        && namespace.is_char_boundary(len - PROPERTIES_SUFFIX.len())
        && namespace[len - PROPERTIES_SUFFIX.len()..].eq_ignore_ascii_case(PROPERTIES_SUFFIX)
    {
        &namespace[..len - PROPERTIES_SUFFIX.len()]
    } else {
        namespace
    }
}
