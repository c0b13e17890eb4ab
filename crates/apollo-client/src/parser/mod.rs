//! Converters from raw namespace content to flat snapshots.

pub mod json;
pub mod plain;
pub mod properties;
pub mod yaml;

use apollo_core::{ConfigFileFormat, Properties, Result};

pub use json::JsonParser;
pub use plain::PlainParser;
pub use yaml::YamlParser;

pub trait ConfigFileParser: Send + Sync {
    fn format(&self) -> ConfigFileFormat;

    /// Flattens `content` into a snapshot; `ordered` keeps document order.
    fn parse(&self, content: &str, ordered: bool) -> Result<Properties>;
}

pub struct PropertiesParser;

impl ConfigFileParser for PropertiesParser {
    fn format(&self) -> ConfigFileFormat {
        ConfigFileFormat::Properties
    }

    fn parse(&self, content: &str, ordered: bool) -> Result<Properties> {
        Ok(properties::parse(content, ordered))
    }
}

static PROPERTIES: PropertiesParser = PropertiesParser;
static YAML: YamlParser = YamlParser(ConfigFileFormat::Yaml);
static YML: YamlParser = YamlParser(ConfigFileFormat::Yml);
static JSON: JsonParser = JsonParser;
static XML: PlainParser = PlainParser(ConfigFileFormat::Xml);
static TXT: PlainParser = PlainParser(ConfigFileFormat::Txt);

pub fn parser_for(format: ConfigFileFormat) -> &'static dyn ConfigFileParser {
    match format {
        ConfigFileFormat::Properties => &PROPERTIES,
        ConfigFileFormat::Yaml => &YAML,
        ConfigFileFormat::Yml => &YML,
        ConfigFileFormat::Json => &JSON,
        ConfigFileFormat::Xml => &XML,
        ConfigFileFormat::Txt => &TXT,
    }
}

/// Shared by the structured parsers: nested maps become dotted keys and
/// sequences become `key[index]`.
pub(crate) fn join_key(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", prefix, segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_for_every_format() {
        for format in ConfigFileFormat::ALL {
            assert_eq!(parser_for(format).format(), format);
        }
    }
}
