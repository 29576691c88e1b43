use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::settings::Settings;

/// Name of the revision property appended to every registered model.
pub const REVISION_PROPERTY: &str = "_rev";

/// Top-level definition parsed from couchview.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorDefinition {
    pub datasource: Settings,
    #[serde(default)]
    pub models: HashMap<String, ModelDefinition>,
}

impl ConnectorDefinition {
    /// Models with their `name` filled in from the mapping key, sorted by name.
    pub fn model_definitions(&self) -> Vec<ModelDefinition> {
        let mut models: Vec<ModelDefinition> = self
            .models
            .iter()
            .map(|(name, def)| ModelDefinition {
                name: name.clone(),
                properties: def.properties.clone(),
            })
            .collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        models
    }
}

/// Definition of a single model stored in the shared database
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDefinition>,
}

impl ModelDefinition {
    pub fn new(name: &str) -> Self {
        ModelDefinition {
            name: name.to_string(),
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style property declaration.
    pub fn property(mut self, name: &str, kind: PropertyType, index: bool) -> Self {
        self.properties.insert(
            name.to_string(),
            PropertyDefinition {
                kind,
                index,
            },
        );
        self
    }

    pub fn kind_of(&self, property: &str) -> Option<&PropertyType> {
        self.properties.get(property).map(|p| &p.kind)
    }

    pub fn is_indexed(&self, property: &str) -> bool {
        self.properties.get(property).map(|p| p.index).unwrap_or(false)
    }

    /// Indexed properties in name order.
    pub fn indexed_properties(&self) -> impl Iterator<Item = &str> {
        self.properties
            .iter()
            .filter(|(_, p)| p.index)
            .map(|(name, _)| name.as_str())
    }

    /// Append the revision property so optimistic-concurrency writes are always possible.
    pub fn with_revision(mut self) -> Self {
        self.properties
            .entry(REVISION_PROPERTY.to_string())
            .or_insert(PropertyDefinition {
                kind: PropertyType::String,
                index: false,
            });
        self
    }
}

/// Definition of a single model property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    #[serde(rename = "type")]
    pub kind: PropertyType,
    #[serde(default)]
    pub index: bool,
}

/// Property type enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    String,
    Number,
    Boolean,
    Date,
    Object,
    Array,
    Any,
    #[serde(untagged)]
    Custom(std::string::String),
}
