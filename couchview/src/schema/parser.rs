use crate::error::Result;
use super::types::ConnectorDefinition;
use std::path::Path;

/// Parse a couchview.yaml file into a ConnectorDefinition
pub fn parse_definition(path: &Path) -> Result<ConnectorDefinition> {
    let content = std::fs::read_to_string(path)?;
    parse_definition_str(&content)
}

/// Parse a definition YAML string into a ConnectorDefinition
pub fn parse_definition_str(content: &str) -> Result<ConnectorDefinition> {
    let definition: ConnectorDefinition = serde_yaml::from_str(content)?;
    Ok(definition)
}
