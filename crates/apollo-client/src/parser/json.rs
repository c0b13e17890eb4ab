use apollo_core::{ApolloError, ConfigFileFormat, Properties, Result};
use serde_json::Value;

use super::{join_key, ConfigFileParser};

pub struct JsonParser;

impl ConfigFileParser for JsonParser {
    fn format(&self) -> ConfigFileFormat {
        ConfigFileFormat::Json
    }

    fn parse(&self, content: &str, ordered: bool) -> Result<Properties> {
        let mut properties = Properties::with_order(ordered);
        if content.trim().is_empty() {
            return Ok(properties);
        }

        let document: Value = serde_json::from_str(content).map_err(|e| ApolloError::parse("json", e))?;
        match &document {
            Value::Object(_) => flatten("", &document, &mut properties),
            Value::Null => {}
            _ => return Err(ApolloError::parse("json", "top level must be an object")),
        }
        Ok(properties)
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut Properties) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten(&join_key(prefix, key), child, out);
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                flatten(&format!("{}[{}]", prefix, idx), child, out);
            }
        }
        Value::Null => {
            out.insert(prefix, "");
        }
        Value::String(s) => {
            out.insert(prefix, s.as_str());
        }
        other => {
            out.insert(prefix, other.to_string());
        }
    }
}
