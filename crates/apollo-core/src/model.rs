use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::ApolloError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PropertyChangeType {
    Added,
    Modified,
    Deleted,
}

/// Where the currently exposed snapshot of a namespace came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSourceType {
    Remote,
    Local,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    pub app_id: String,
    pub namespace: String,
    pub property_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub change_type: PropertyChangeType,
}

impl ConfigChange {
    pub fn new(
        app_id: impl Into<String>,
        namespace: impl Into<String>,
        property_name: impl Into<String>,
        old_value: Option<String>,
        new_value: Option<String>,
        change_type: PropertyChangeType,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            namespace: namespace.into(),
            property_name: property_name.into(),
            old_value,
            new_value,
            change_type,
        }
    }
}

/// Immutable set of key changes for one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChangeEvent {
    app_id: String,
    namespace: String,
    changes: HashMap<String, ConfigChange>,
}

impl ConfigChangeEvent {
    pub fn new(
        app_id: impl Into<String>,
        namespace: impl Into<String>,
        changes: impl IntoIterator<Item = ConfigChange>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            namespace: namespace.into(),
            changes: changes
                .into_iter()
                .map(|c| (c.property_name.clone(), c))
                .collect(),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn changed_keys(&self) -> HashSet<&str> {
        self.changes.keys().map(String::as_str).collect()
    }

    pub fn get_change(&self, key: &str) -> Option<&ConfigChange> {
        self.changes.get(key)
    }

    pub fn is_changed(&self, key: &str) -> bool {
        self.changes.contains_key(key)
    }

    pub fn changes(&self) -> impl Iterator<Item = &ConfigChange> {
        self.changes.values()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Change of a whole-document namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFileChangeEvent {
    pub namespace: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub change_type: PropertyChangeType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFileFormat {
    Properties,
    Xml,
    Json,
    Yml,
    Yaml,
    Txt,
}

impl ConfigFileFormat {
    pub const ALL: [ConfigFileFormat; 6] = [
        ConfigFileFormat::Properties,
        ConfigFileFormat::Xml,
        ConfigFileFormat::Json,
        ConfigFileFormat::Yml,
        ConfigFileFormat::Yaml,
        ConfigFileFormat::Txt,
    ];

    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFileFormat::Properties => "properties",
            ConfigFileFormat::Xml => "xml",
            ConfigFileFormat::Json => "json",
            ConfigFileFormat::Yml => "yml",
            ConfigFileFormat::Yaml => "yaml",
            ConfigFileFormat::Txt => "txt",
        }
    }

    /// Formats whose content can be flattened into key/value pairs.
    pub fn is_properties_compatible(&self) -> bool {
        matches!(
            self,
            ConfigFileFormat::Properties
                | ConfigFileFormat::Yml
                | ConfigFileFormat::Yaml
                | ConfigFileFormat::Json
        )
    }

    /// Detects the format from a namespace name suffix, defaulting to properties.
    pub fn from_namespace(namespace: &str) -> Self {
        let lower = namespace.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| lower.ends_with(&format!(".{}", f.extension())))
            .unwrap_or(ConfigFileFormat::Properties)
    }
}

impl fmt::Display for ConfigFileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ConfigFileFormat {
    type Err = ApolloError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.extension() == lower)
            .ok_or_else(|| ApolloError::Unsupported(format!("config file format '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_detection() {
        assert_eq!(ConfigFileFormat::from_namespace("application.yaml"), ConfigFileFormat::Yaml);
        assert_eq!(ConfigFileFormat::from_namespace("datasources.XML"), ConfigFileFormat::Xml);
        assert_eq!(ConfigFileFormat::from_namespace("application"), ConfigFileFormat::Properties);
        assert_eq!("YML".parse::<ConfigFileFormat>().unwrap(), ConfigFileFormat::Yml);
        assert!("toml".parse::<ConfigFileFormat>().is_err());
    }

    #[test]
    fn test_event_accessors() {
        let event = ConfigChangeEvent::new(
            "someAppId",
            "application",
            vec![ConfigChange::new(
                "someAppId",
                "application",
                "timeout",
                Some("1".into()),
                Some("2".into()),
                PropertyChangeType::Modified,
            )],
        );

        assert_eq!(event.changed_keys(), HashSet::from(["timeout"]));
        assert!(event.is_changed("timeout"));
        assert_eq!(event.get_change("timeout").unwrap().new_value.as_deref(), Some("2"));
        assert!(event.get_change("other").is_none());
    }
}
