//! Connector - the record-oriented surface the ORM calls into.
//!
//! Reads go through the reader handle, writes through the writer handle and
//! design documents through the admin handle.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::document::{from_storage, to_storage, Record, DELETED_FIELD, ID_FIELD, REV_FIELD};
use crate::error::{CouchError, Result};
use crate::query::{plan, reconcile, Filter, Plan, Where};
use crate::schema::{ConnectorDefinition, ModelDefinition};
use crate::settings::{ResolvedSettings, Settings};
use crate::store::{BulkResult, DocumentStore, StoreHandles, ViewParams, WriteAck};
use crate::view::{
    design_name, ensure_design_document, DesignDocument, DesignOutcome, RawViews,
    CATCH_ALL_DESIGN,
};

/// Expands a nested-relation include expression over a page of records.
pub trait RelationIncluder: Send + Sync {
    fn include<'a>(
        &'a self,
        model: &'a str,
        records: Vec<Record>,
        include: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Record>>> + Send + 'a>>;
}

/// A registered model.
#[derive(Clone)]
pub struct ModelDescriptor {
    pub definition: ModelDefinition,
    includer: Option<Arc<dyn RelationIncluder>>,
}

impl std::fmt::Debug for ModelDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelDescriptor")
            .field("definition", &self.definition)
            .field("includer", &self.includer.is_some())
            .finish()
    }
}

/// Static facts the ORM reads about this connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectorMetadata {
    pub types: Vec<&'static str>,
    pub default_id_type: &'static str,
    pub is_relational: bool,
}

/// Result of a single-document save.
#[derive(Debug, Clone, PartialEq)]
pub struct Saved {
    pub id: String,
    pub rev: String,
    /// The caller's record carrying the new revision.
    pub record: Record,
}

/// Index values for a raw view query.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ViewKeys {
    #[default]
    None,
    One(Value),
    Many(Vec<Value>),
    /// Inclusive key range; an open end is unbounded.
    Range {
        start: Option<Value>,
        end: Option<Value>,
    },
}

impl ViewKeys {
    fn to_params(&self) -> ViewParams {
        match self {
            ViewKeys::None => ViewParams::default(),
            ViewKeys::One(key) => ViewParams {
                keys: Some(vec![key.clone()]),
                ..Default::default()
            },
            ViewKeys::Many(keys) => ViewParams {
                keys: Some(keys.clone()),
                ..Default::default()
            },
            ViewKeys::Range { start, end } => ViewParams {
                startkey: start.clone(),
                endkey: end.clone(),
                ..Default::default()
            },
        }
    }
}

/// A string or number is one key and an array is a key list. An object
/// carrying `key`, `keys` or `startkey`/`endkey` is read as view parameters;
/// any other object is a single complex key.
impl From<Option<Value>> for ViewKeys {
    fn from(value: Option<Value>) -> Self {
        match value {
            None | Some(Value::Null) => ViewKeys::None,
            Some(Value::Array(keys)) => ViewKeys::Many(keys),
            Some(Value::Object(mut obj)) => {
                if let Some(Value::Array(keys)) = obj.get("keys") {
                    return ViewKeys::Many(keys.clone());
                }
                if let Some(key) = obj.get("key") {
                    return ViewKeys::One(key.clone());
                }
                if obj.contains_key("startkey") || obj.contains_key("endkey") {
                    return ViewKeys::Range {
                        start: obj.remove("startkey"),
                        end: obj.remove("endkey"),
                    };
                }
                ViewKeys::One(Value::Object(obj))
            }
            Some(key) => ViewKeys::One(key),
        }
    }
}

pub struct Connector<S> {
    settings: ResolvedSettings,
    handles: StoreHandles<S>,
    models: HashMap<String, ModelDescriptor>,
    raw_views: RawViews,
}

impl<S: DocumentStore> Connector<S> {
    /// Resolve settings and make sure the catch-all view exists.
    ///
    /// The connector is only returned once the catch-all design document
    /// is in place, so no query can run ahead of it.
    pub async fn connect(settings: &Settings, handles: StoreHandles<S>) -> Result<Self> {
        let settings = settings.resolve()?;
        let outcome =
            ensure_design_document(&handles.admin, CATCH_ALL_DESIGN, &DesignDocument::catch_all())
                .await?;
        log::debug!("Connected to {} ({outcome:?})", settings.database);

        Ok(Connector {
            raw_views: RawViews::new(settings.views.clone()),
            settings,
            handles,
            models: HashMap::new(),
        })
    }

    /// Connect and register every model of a definition file.
    pub async fn from_definition(definition: &ConnectorDefinition, handles: StoreHandles<S>) -> Result<Self> {
        let mut connector = Self::connect(&definition.datasource, handles).await?;
        for model in definition.model_definitions() {
            connector.define(model).await?;
        }
        Ok(connector)
    }

    pub fn settings(&self) -> &ResolvedSettings {
        &self.settings
    }

    pub fn metadata(&self) -> ConnectorMetadata {
        ConnectorMetadata {
            types: vec!["db", "nosql", "couchdb"],
            default_id_type: "String",
            is_relational: false,
        }
    }

    /// Register a model and make sure its index views exist.
    ///
    /// A `_rev` property is added to every model. Models without indexed
    /// properties get no design document and return `None`.
    pub async fn define(&mut self, definition: ModelDefinition) -> Result<Option<DesignOutcome>> {
        if definition.name.is_empty() {
            return Err(CouchError::Config("Model name must not be empty".into()));
        }
        let definition = definition.with_revision();

        let outcome = match DesignDocument::for_model(&definition) {
            Some(design) => Some(
                ensure_design_document(&self.handles.admin, &design_name(&definition.name), &design)
                    .await?,
            ),
            None => None,
        };

        log::debug!("Defined model {}", definition.name);
        // Re-registering a model keeps its includer
        let includer = self
            .models
            .get(&definition.name)
            .and_then(|existing| existing.includer.clone());
        self.models.insert(
            definition.name.clone(),
            ModelDescriptor {
                definition,
                includer,
            },
        );
        Ok(outcome)
    }

    /// Attach the include expander used for `filter.include` on `model`.
    pub fn set_includer(&mut self, model: &str, includer: Arc<dyn RelationIncluder>) -> Result<()> {
        let descriptor = self
            .models
            .get_mut(model)
            .ok_or_else(|| CouchError::UnknownModel(model.to_string()))?;
        descriptor.includer = Some(includer);
        Ok(())
    }

    pub fn model(&self, name: &str) -> Result<&ModelDescriptor> {
        self.models
            .get(name)
            .ok_or_else(|| CouchError::UnknownModel(name.to_string()))
    }

    /// The plan `all` would execute for `filter`.
    pub fn plan(&self, model: &str, filter: &Filter) -> Result<Plan> {
        Ok(plan(&self.model(model)?.definition, filter))
    }

    // ── Writes ──────────────────────────────────────────────────────

    pub async fn create(&self, model: &str, record: Record) -> Result<Saved> {
        self.save(model, record).await
    }

    /// Insert or overwrite a single document.
    pub async fn save(&self, model: &str, mut record: Record) -> Result<Saved> {
        record.strip_deleted();
        if record.is_empty() {
            return Err(CouchError::EmptyDocument);
        }
        let descriptor = self.model(model)?;
        log::debug!("save {model} {:?}", record.id);

        let doc = to_storage(&descriptor.definition, &record)?;
        let ack = self.handles.writer.insert(doc).await?;

        record.rev = Some(ack.rev.clone());
        Ok(Saved {
            id: ack.id,
            rev: ack.rev,
            record,
        })
    }

    pub async fn update_or_create(&self, model: &str, record: Record) -> Result<Record> {
        let saved = self.save(model, record).await?;
        let mut record = saved.record;
        record.id = Some(saved.id);
        record.rev = Some(saved.rev);
        Ok(record)
    }

    /// Merge `attributes` into every matching record and write them back in one bulk request.
    ///
    /// Matching documents are written with the revisions they were read at;
    /// a concurrent change shows up as a per-document conflict in the results.
    pub async fn update(&self, model: &str, clause: &Where, attributes: &Map<String, Value>) -> Result<Vec<BulkResult>> {
        let descriptor = self.model(model)?;
        let attributes = without_deleted(attributes);
        log::debug!("update {model} where {clause:?}");

        let records = self.all(model, &Filter::with_where(clause.clone())).await?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let docs = records
            .into_iter()
            .map(|mut record| {
                record.merge(&attributes);
                to_storage(&descriptor.definition, &record)
            })
            .collect::<Result<Vec<_>>>()?;

        self.handles.writer.bulk(docs).await
    }

    /// Fetch, merge and save one document. Returns the merged record with its new revision.
    pub async fn update_attributes(&self, model: &str, id: &str, attributes: &Map<String, Value>) -> Result<Record> {
        let descriptor = self.model(model)?;
        log::debug!("update_attributes {model}/{id}");

        let doc = self.handles.reader.get(id).await?;
        let mut record = from_storage(&descriptor.definition, Some(doc))?
            .ok_or_else(|| CouchError::NotFound { id: id.to_string() })?;
        record.merge(&without_deleted(attributes));

        let saved = self.save(model, record).await?;
        let mut record = saved.record;
        record.id = Some(saved.id);
        Ok(record)
    }

    /// Soft-delete every matching document in one bulk request.
    pub async fn destroy_all(&self, model: &str, clause: &Where) -> Result<Vec<BulkResult>> {
        log::debug!("destroy_all {model} where {clause:?}");
        let records = self.all(model, &Filter::with_where(clause.clone())).await?;

        let stubs: Vec<Value> = records
            .into_iter()
            .filter_map(|record| match (record.id, record.rev) {
                (Some(id), Some(rev)) => Some(json!({ ID_FIELD: id, REV_FIELD: rev, DELETED_FIELD: true })),
                (id, _) => {
                    log::warn!("Skipping record without id or revision: {id:?}");
                    None
                }
            })
            .collect();
        if stubs.is_empty() {
            return Ok(Vec::new());
        }

        self.handles.writer.bulk(stubs).await
    }

    /// Delete one document at its current revision.
    pub async fn destroy(&self, model: &str, id: &str) -> Result<WriteAck> {
        log::debug!("destroy {model}/{id}");
        let rev = self.handles.reader.head(id).await?;
        self.handles.writer.destroy(id, &rev).await
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Any failure of the existence check, not only not-found, reads as `false`.
    pub async fn exists(&self, model: &str, id: &str) -> bool {
        match self.handles.reader.head(id).await {
            Ok(_) => true,
            Err(e) => {
                log::debug!("exists {model}/{id}: {e}");
                false
            }
        }
    }

    pub async fn count(&self, model: &str, clause: &Where) -> Result<usize> {
        let records = self.all(model, &Filter::with_where(clause.clone())).await?;
        Ok(records.len())
    }

    /// Answer a filter: point lookup or view query, then reconciliation and includes.
    pub async fn all(&self, model: &str, filter: &Filter) -> Result<Vec<Record>> {
        let descriptor = self.model(model)?;

        let records = match plan(&descriptor.definition, filter) {
            Plan::Lookup { id } => {
                log::debug!("all {model}: lookup {id}");
                self.find_by_id(model, &id).await?
            }
            Plan::View(view_plan) => {
                log::debug!(
                    "all {model}: {}/{} {:?}",
                    view_plan.design,
                    view_plan.view,
                    view_plan.params
                );
                let response = self
                    .handles
                    .reader
                    .view(&view_plan.design, &view_plan.view, &view_plan.params)
                    .await?;
                reconcile(&descriptor.definition, response.rows, &view_plan)?
            }
        };

        match &filter.include {
            Some(include) => {
                let includer = descriptor.includer.as_ref().ok_or_else(|| {
                    CouchError::Include(format!("No relation includer registered for {model}"))
                })?;
                includer.include(model, records, include).await
            }
            None => Ok(records),
        }
    }

    /// Point lookup. A missing document yields an empty list.
    pub async fn find_by_id(&self, model: &str, id: &str) -> Result<Vec<Record>> {
        let descriptor = self.model(model)?;
        log::debug!("find_by_id {model}/{id}");

        match self.handles.reader.get(id).await {
            Ok(doc) => Ok(from_storage(&descriptor.definition, Some(doc))?
                .into_iter()
                .collect()),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Query a configured raw view. Row values are decoded as `model` records.
    ///
    /// `ddoc` defaults to the database name. Rows whose value is not a
    /// document (a view emitting scalars, say) are skipped.
    pub async fn query_view(&self, model: &str, ddoc: Option<&str>, view: &str, keys: ViewKeys) -> Result<Vec<Record>> {
        let descriptor = self.model(model)?;
        let ddoc = ddoc.unwrap_or(&self.settings.database);

        if !self.raw_views.is_available(ddoc, view) {
            return Err(CouchError::ViewUnavailable {
                ddoc: ddoc.to_string(),
                view: view.to_string(),
            });
        }
        log::debug!("query_view {ddoc}/{view} {keys:?}");

        let response = self.handles.reader.view(ddoc, view, &keys.to_params()).await?;
        let mut records = Vec::with_capacity(response.rows.len());
        for row in response.rows {
            match row.value {
                Value::Object(_) => {
                    if let Some(record) = from_storage(&descriptor.definition, Some(row.value))? {
                        records.push(record);
                    }
                }
                Value::Null => {}
                other => log::warn!(
                    "View row {} of {ddoc}/{view} carries a non-document value {other}, skipping",
                    row.id.as_deref().unwrap_or("<unknown>")
                ),
            }
        }
        Ok(records)
    }
}

fn without_deleted(attributes: &Map<String, Value>) -> Map<String, Value> {
    attributes
        .iter()
        .filter(|(key, _)| key.as_str() != DELETED_FIELD)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
