//! Wire types exchanged with the config service.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::properties::Properties;

/// Body of `GET /configs/{appId}/{cluster}/{namespace}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApolloConfig {
    pub app_id: String,
    pub cluster: String,
    pub namespace_name: String,
    #[serde(default)]
    pub configurations: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_key: Option<String>,
}

impl ApolloConfig {
    pub fn new(
        app_id: impl Into<String>,
        cluster: impl Into<String>,
        namespace_name: impl Into<String>,
        release_key: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            cluster: cluster.into(),
            namespace_name: namespace_name.into(),
            configurations: Map::new(),
            release_key: Some(release_key.into()),
        }
    }

    pub fn with_configurations<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.configurations = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), Value::String(v.into())))
            .collect();
        self
    }

    /// Flattens the configurations into a snapshot, keeping server order when `ordered`.
    pub fn to_properties(&self, ordered: bool) -> Properties {
        let mut properties = Properties::with_order(ordered);
        for (key, value) in &self.configurations {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            properties.insert(key.clone(), value);
        }
        properties
    }
}

/// One entry of the long-poll cursor exchanged with `/notifications/v2`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApolloConfigNotification {
    pub namespace_name: String,
    pub notification_id: i64,
}

impl ApolloConfigNotification {
    pub fn new(namespace_name: impl Into<String>, notification_id: i64) -> Self {
        Self {
            namespace_name: namespace_name.into(),
            notification_id,
        }
    }
}

/// A config service instance returned by meta discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDto {
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub instance_id: String,
    pub homepage_url: String,
}

impl ServiceDto {
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            app_name: "apollo-configservice".to_string(),
            instance_id: url.clone(),
            homepage_url: url,
        }
    }

    pub fn base_url(&self) -> &str {
        self.homepage_url.trim_end_matches('/')
    }
}
