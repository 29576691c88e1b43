use crate::document::MODEL_TAG;
use crate::error::{CouchError, Result};
use crate::schema::ModelDefinition;
use crate::settings::RawView;
use crate::store::DocumentStore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Design document holding the catch-all view shared by every model.
pub const CATCH_ALL_DESIGN: &str = "loopback";
/// View emitting the model tag of every tagged document.
pub const CATCH_ALL_VIEW: &str = "by_model";

const DESIGN_PREFIX: &str = "loopback_";
const VIEW_PREFIX: &str = "by_";
const DESIGN_ID_PREFIX: &str = "_design/";

/// Design document name holding a model's index views.
pub fn design_name(model: &str) -> String {
    format!("{DESIGN_PREFIX}{model}")
}

/// View name for an indexed property.
pub fn view_name(property: &str) -> String {
    format!("{VIEW_PREFIX}{property}")
}

/// Document id of a design document.
pub fn design_id(design: &str) -> String {
    format!("{DESIGN_ID_PREFIX}{design}")
}

/// The map functions the connector generates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapFunction {
    /// Emit the model tag of every tagged document.
    ByModel,
    /// Emit a property value for documents of one model where the value is truthy.
    ByProperty { model: String, property: String },
}

impl MapFunction {
    /// JavaScript source stored in the design document.
    pub fn to_source(&self) -> String {
        match self {
            MapFunction::ByModel => format!(
                "function (doc) {{ if (doc.{MODEL_TAG}) return emit(doc.{MODEL_TAG}, null); }}"
            ),
            MapFunction::ByProperty { model, property } => format!(
                "function (doc) {{ if (doc.{MODEL_TAG} === '{model}' && doc.{property}) return emit(doc.{property}, null); }}"
            ),
        }
    }

    /// Recognize a source produced by [`to_source`](Self::to_source).
    pub fn parse(source: &str) -> Option<Self> {
        static BY_MODEL: OnceLock<Regex> = OnceLock::new();
        static BY_PROPERTY: OnceLock<Regex> = OnceLock::new();

        let by_model = BY_MODEL.get_or_init(|| {
            Regex::new(r"^function \(doc\) \{ if \(doc\.(\w+)\) return emit\(doc\.(\w+), null\); \}$")
                .expect("valid regex")
        });
        let by_property = BY_PROPERTY.get_or_init(|| {
            Regex::new(
                r"^function \(doc\) \{ if \(doc\.(\w+) === '([^']*)' && doc\.(\w+)\) return emit\(doc\.(\w+), null\); \}$",
            )
            .expect("valid regex")
        });

        let source = source.trim();
        if let Some(caps) = by_property.captures(source) {
            if &caps[1] == MODEL_TAG && caps[3] == caps[4] {
                return Some(MapFunction::ByProperty {
                    model: caps[2].to_string(),
                    property: caps[3].to_string(),
                });
            }
            return None;
        }
        if let Some(caps) = by_model.captures(source) {
            if &caps[1] == MODEL_TAG && &caps[2] == MODEL_TAG {
                return Some(MapFunction::ByModel);
            }
        }
        None
    }
}

/// A single view definition inside a design document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDefinition {
    pub map: String,
}

/// The view set of a design document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignDocument {
    pub views: BTreeMap<String, ViewDefinition>,
}

impl DesignDocument {
    /// The catch-all design registered at connector startup.
    pub fn catch_all() -> Self {
        let mut views = BTreeMap::new();
        views.insert(
            CATCH_ALL_VIEW.to_string(),
            ViewDefinition {
                map: MapFunction::ByModel.to_source(),
            },
        );
        DesignDocument { views }
    }

    /// One view per indexed property. `None` if the model has no indexed properties.
    pub fn for_model(model: &ModelDefinition) -> Option<Self> {
        let views: BTreeMap<String, ViewDefinition> = model
            .indexed_properties()
            .map(|property| {
                let map = MapFunction::ByProperty {
                    model: model.name.clone(),
                    property: property.to_string(),
                };
                (
                    view_name(property),
                    ViewDefinition {
                        map: map.to_source(),
                    },
                )
            })
            .collect();

        if views.is_empty() {
            None
        } else {
            Some(DesignDocument { views })
        }
    }

    /// Full document value as written to the store.
    pub fn to_document(&self, design: &str, rev: Option<&str>) -> Result<Value> {
        let mut doc = Map::new();
        doc.insert("_id".into(), Value::String(design_id(design)));
        if let Some(rev) = rev {
            doc.insert("_rev".into(), Value::String(rev.to_string()));
        }
        doc.insert("views".into(), serde_json::to_value(&self.views)?);
        Ok(Value::Object(doc))
    }
}

/// What [`ensure_design_document`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesignOutcome {
    Created { rev: String },
    Updated { rev: String },
    Unchanged,
}

/// Make sure `_design/<design>` holds exactly `desired` views.
///
/// The document is only written when its view set differs from what is
/// stored, so unchanged indexes are never rebuilt. Fetch errors other than
/// not-found are returned (and logged).
pub async fn ensure_design_document<S: DocumentStore>(
    admin: &S,
    design: &str,
    desired: &DesignDocument,
) -> Result<DesignOutcome> {
    let id = design_id(design);

    let existing = match admin.get(&id).await {
        Ok(doc) => Some(doc),
        Err(CouchError::NotFound { .. }) => None,
        Err(e) => {
            log::error!("Failed to fetch design document {id}: {e}");
            return Err(e);
        }
    };

    let (doc, created) = match existing {
        None => (desired.to_document(design, None)?, true),
        Some(mut stored) => {
            let stored_views = stored.get("views").cloned().unwrap_or(Value::Null);
            let current: Option<BTreeMap<String, ViewDefinition>> =
                serde_json::from_value(stored_views).ok();

            if current.as_ref() == Some(&desired.views) {
                log::debug!("Design document {id} unchanged");
                return Ok(DesignOutcome::Unchanged);
            }

            // Keep any other design fields, replace only the views
            if let Some(obj) = stored.as_object_mut() {
                obj.insert("views".into(), serde_json::to_value(&desired.views)?);
            }
            (stored, false)
        }
    };

    let ack = admin.insert(doc).await.map_err(|e| {
        log::error!("Failed to write design document {id}: {e}");
        e
    })?;

    log::debug!(
        "Design document {id} {} at {}",
        if created { "created" } else { "updated" },
        ack.rev
    );

    Ok(if created {
        DesignOutcome::Created { rev: ack.rev }
    } else {
        DesignOutcome::Updated { rev: ack.rev }
    })
}

/// Views explicitly exposed for raw querying, owned by the connector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawViews {
    views: Vec<RawView>,
}

impl RawViews {
    pub fn new(views: Vec<RawView>) -> Self {
        RawViews { views }
    }

    pub fn is_available(&self, ddoc: &str, name: &str) -> bool {
        self.views.iter().any(|v| v.ddoc == ddoc && v.name == name)
    }

}
