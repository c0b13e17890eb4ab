use apollo_core::{ApolloError, ConfigFileFormat, Properties, Result};
use serde_yaml::Value;

use super::{join_key, ConfigFileParser};

pub struct YamlParser(pub ConfigFileFormat);

impl ConfigFileParser for YamlParser {
    fn format(&self) -> ConfigFileFormat {
        self.0
    }

    fn parse(&self, content: &str, ordered: bool) -> Result<Properties> {
        let mut properties = Properties::with_order(ordered);
        if content.trim().is_empty() {
            return Ok(properties);
        }

        let document: Value =
            serde_yaml::from_str(content).map_err(|e| ApolloError::parse(self.0.extension(), e))?;
        match document {
            Value::Null => {}
            Value::Mapping(_) => flatten("", &document, &mut properties),
            other => {
                return Err(ApolloError::parse(
                    self.0.extension(),
                    format!("top level must be a mapping, found {}", type_name(&other)),
                ))
            }
        }
        Ok(properties)
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut Properties) {
    match value {
        Value::Mapping(map) => {
            for (key, child) in map {
                let Some(segment) = scalar_to_string(key) else {
                    continue;
                };
                flatten(&join_key(prefix, &segment), child, out);
            }
        }
        Value::Sequence(items) => {
            for (idx, child) in items.iter().enumerate() {
                flatten(&format!("{}[{}]", prefix, idx), child, out);
            }
        }
        Value::Tagged(tagged) => flatten(prefix, &tagged.value, out),
        scalar => {
            out.insert(prefix, scalar_to_string(scalar).unwrap_or_default());
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flattens_nested_document() {
        let yaml = r#"
server:
  port: 8080
  enabled: true
  hosts:
    - alpha
    - beta
datasource:
  url: jdbc:mysql://localhost/db
  password: ~
"#;
        let props = YamlParser(ConfigFileFormat::Yaml).parse(yaml, true).unwrap();

        assert_eq!(props.get("server.port"), Some("8080"));
        assert_eq!(props.get("server.enabled"), Some("true"));
        assert_eq!(props.get("server.hosts[0]"), Some("alpha"));
        assert_eq!(props.get("server.hosts[1]"), Some("beta"));
        assert_eq!(props.get("datasource.url"), Some("jdbc:mysql://localhost/db"));
        assert_eq!(props.get("datasource.password"), Some(""));
        assert_eq!(
            props.property_names(),
            vec![
                "server.port",
                "server.enabled",
                "server.hosts[0]",
                "server.hosts[1]",
                "datasource.url",
                "datasource.password"
            ]
        );
    }

    #[test]
    fn test_rejects_malformed_and_scalar_documents() {
        let parser = YamlParser(ConfigFileFormat::Yml);
        assert!(matches!(
            parser.parse("key: [unclosed", false),
            Err(ApolloError::Parse { .. })
        ));
        assert!(parser.parse("just a string", false).is_err());
        assert!(parser.parse("   \n", false).unwrap().is_empty());
    }
}
