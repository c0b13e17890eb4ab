use apollo_core::namespace::CONFIG_FILE_CONTENT_KEY;
use apollo_core::{ConfigFileFormat, Properties, Result};

use super::ConfigFileParser;

/// Passthrough for opaque documents (XML, plain text): the whole content is
/// kept under the `content` key.
pub struct PlainParser(pub ConfigFileFormat);

impl ConfigFileParser for PlainParser {
    fn format(&self) -> ConfigFileFormat {
        self.0
    }

    fn parse(&self, content: &str, ordered: bool) -> Result<Properties> {
        let mut properties = Properties::with_order(ordered);
        properties.insert(CONFIG_FILE_CONTENT_KEY, content);
        Ok(properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xml_is_not_interpreted() {
        let xml = "<beans><bean id=\"a\"/></beans>";
        let props = PlainParser(ConfigFileFormat::Xml).parse(xml, false).unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(props.get("content"), Some(xml));
    }
}
