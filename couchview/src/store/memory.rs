//! MemoryStore - in-memory CouchDB emulation for testing and offline use.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};

use super::{BulkResult, DocumentStore, ViewParams, ViewResponse, ViewRow, WriteAck};
use crate::document::{DELETED_FIELD, ID_FIELD, MODEL_TAG, REV_FIELD};
use crate::error::{CouchError, Result};
use crate::query::is_truthy;
use crate::view::{design_id, MapFunction};

/// A native map function: `doc -> [(key, value)]`.
pub type NativeMap = Arc<dyn Fn(&Value) -> Vec<(Value, Value)> + Send + Sync>;

/// A request the store received, recorded in order.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Get { id: String },
    Head { id: String },
    Insert { id: Option<String> },
    Bulk { ids: Vec<Option<String>> },
    Destroy { id: String, rev: String },
    View { design: String, view: String, params: ViewParams },
}

struct StoredDoc {
    seq: u64,
    rev: String,
    body: Map<String, Value>,
    deleted: bool,
}

#[derive(Default)]
struct MemoryState {
    docs: BTreeMap<String, StoredDoc>,
    native_views: HashMap<(String, String), NativeMap>,
    calls: Vec<StoreCall>,
    fail_next: Option<String>,
}

/// In-memory document store with CouchDB revision and view semantics.
///
/// Views are answered either from a registered native map function or by
/// interpreting the map sources the connector generates. Clone-friendly via Arc.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a native map function answering `design/view`.
    pub fn with_view<F>(self, design: &str, view: &str, map: F) -> Self
    where
        F: Fn(&Value) -> Vec<(Value, Value)> + Send + Sync + 'static,
    {
        if let Ok(mut state) = self.state.write() {
            state
                .native_views
                .insert((design.to_string(), view.to_string()), Arc::new(map));
        }
        self
    }

    /// Make the next request fail with a transport error.
    pub fn fail_next(&self, message: &str) {
        if let Ok(mut state) = self.state.write() {
            state.fail_next = Some(message.to_string());
        }
    }

    /// Requests received so far.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.state
            .read()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut state) = self.state.write() {
            state.calls.clear();
        }
    }

    /// Number of live (non-deleted, non-design) documents.
    pub fn document_count(&self) -> usize {
        self.state
            .read()
            .map(|state| {
                state
                    .docs
                    .iter()
                    .filter(|(id, d)| !d.deleted && !id.starts_with("_design/"))
                    .count()
            })
            .unwrap_or(0)
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| CouchError::Transport("lock poisoned".into()))
    }

    /// Record the call and consume an injected failure, if any.
    fn begin(&self, call: StoreCall) -> Result<std::sync::RwLockWriteGuard<'_, MemoryState>> {
        let mut state = self.write_state()?;
        state.calls.push(call);
        if let Some(message) = state.fail_next.take() {
            return Err(CouchError::Transport(message));
        }
        Ok(state)
    }

    fn get_sync(&self, id: &str) -> Result<Value> {
        let state = self.begin(StoreCall::Get { id: id.to_string() })?;
        match state.docs.get(id) {
            Some(doc) if !doc.deleted => Ok(with_meta(id, doc)),
            _ => Err(CouchError::NotFound { id: id.to_string() }),
        }
    }

    fn head_sync(&self, id: &str) -> Result<String> {
        let state = self.begin(StoreCall::Head { id: id.to_string() })?;
        match state.docs.get(id) {
            Some(doc) if !doc.deleted => Ok(doc.rev.clone()),
            _ => Err(CouchError::NotFound { id: id.to_string() }),
        }
    }

    fn insert_sync(&self, doc: Value) -> Result<WriteAck> {
        let id = doc.get(ID_FIELD).and_then(Value::as_str).map(str::to_string);
        let mut state = self.begin(StoreCall::Insert { id })?;
        write_doc(&mut state, doc)
    }

    fn bulk_sync(&self, docs: Vec<Value>) -> Result<Vec<BulkResult>> {
        let ids = docs
            .iter()
            .map(|d| d.get(ID_FIELD).and_then(Value::as_str).map(str::to_string))
            .collect();
        let mut state = self.begin(StoreCall::Bulk { ids })?;

        let mut results = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = doc
                .get(ID_FIELD)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            match write_doc(&mut state, doc) {
                Ok(ack) => results.push(BulkResult {
                    id: ack.id,
                    rev: Some(ack.rev),
                    error: None,
                    reason: None,
                }),
                Err(e) => {
                    let error = match &e {
                        CouchError::Conflict { .. } => "conflict",
                        CouchError::NotFound { .. } => "not_found",
                        _ => "bad_request",
                    };
                    results.push(BulkResult {
                        id,
                        rev: None,
                        error: Some(error.to_string()),
                        reason: Some(e.to_string()),
                    });
                }
            }
        }
        Ok(results)
    }

    fn destroy_sync(&self, id: &str, rev: &str) -> Result<WriteAck> {
        let mut state = self.begin(StoreCall::Destroy {
            id: id.to_string(),
            rev: rev.to_string(),
        })?;
        let doc = match state.docs.get_mut(id) {
            Some(doc) if !doc.deleted => doc,
            _ => return Err(CouchError::NotFound { id: id.to_string() }),
        };
        if doc.rev != rev {
            return Err(CouchError::Conflict { id: id.to_string() });
        }
        doc.seq += 1;
        doc.rev = next_rev(doc.seq);
        doc.deleted = true;
        doc.body.clear();
        Ok(WriteAck {
            id: id.to_string(),
            rev: doc.rev.clone(),
        })
    }

    fn view_sync(&self, design: &str, view: &str, params: &ViewParams) -> Result<ViewResponse> {
        let state = self.begin(StoreCall::View {
            design: design.to_string(),
            view: view.to_string(),
            params: params.clone(),
        })?;

        let native = state
            .native_views
            .get(&(design.to_string(), view.to_string()))
            .cloned();
        let map: NativeMap = match native {
            Some(map) => map,
            None => interpret_view(&state, design, view)?,
        };

        // Emit every live document, then order rows by key and doc id
        let mut emitted: Vec<(Value, Value, String, Value)> = Vec::new();
        for (id, doc) in &state.docs {
            if doc.deleted || id.starts_with("_design/") {
                continue;
            }
            let full = with_meta(id, doc);
            for (key, value) in map(&full) {
                emitted.push((key, value, id.clone(), full.clone()));
            }
        }
        emitted.sort_by(|a, b| collate(&a.0, &b.0).then_with(|| a.2.cmp(&b.2)));

        let selected: Vec<&(Value, Value, String, Value)> = if let Some(keys) = &params.keys {
            keys.iter()
                .flat_map(|k| {
                    emitted
                        .iter()
                        .filter(move |row| collate(&row.0, k) == Ordering::Equal)
                })
                .collect()
        } else if let Some(key) = &params.key {
            emitted
                .iter()
                .filter(|row| collate(&row.0, key) == Ordering::Equal)
                .collect()
        } else {
            emitted.iter().collect()
        };

        let in_range = |key: &Value| {
            let above = params
                .startkey
                .as_ref()
                .map_or(true, |start| collate(key, start) != Ordering::Less);
            let below = params
                .endkey
                .as_ref()
                .map_or(true, |end| collate(key, end) != Ordering::Greater);
            above && below
        };

        let rows = selected
            .into_iter()
            .filter(|row| in_range(&row.0))
            .skip(params.skip.unwrap_or(0))
            .take(params.limit.unwrap_or(usize::MAX))
            .map(|(key, value, id, doc)| ViewRow {
                id: Some(id.clone()),
                key: key.clone(),
                value: value.clone(),
                doc: params.include_docs.then(|| doc.clone()),
            })
            .collect();

        Ok(ViewResponse { rows })
    }
}

impl DocumentStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Value> {
        self.get_sync(id)
    }

    async fn head(&self, id: &str) -> Result<String> {
        self.head_sync(id)
    }

    async fn insert(&self, doc: Value) -> Result<WriteAck> {
        self.insert_sync(doc)
    }

    async fn bulk(&self, docs: Vec<Value>) -> Result<Vec<BulkResult>> {
        self.bulk_sync(docs)
    }

    async fn destroy(&self, id: &str, rev: &str) -> Result<WriteAck> {
        self.destroy_sync(id, rev)
    }

    async fn view(&self, design: &str, view: &str, params: &ViewParams) -> Result<ViewResponse> {
        self.view_sync(design, view, params)
    }
}

/// Apply one document write with CouchDB revision rules.
fn write_doc(state: &mut MemoryState, doc: Value) -> Result<WriteAck> {
    let mut body = match doc {
        Value::Object(map) => map,
        _ => return Err(CouchError::Other("Document must be a JSON object".into())),
    };

    let id = match body.remove(ID_FIELD) {
        Some(Value::String(id)) => id,
        Some(other) => return Err(CouchError::Other(format!("Invalid document id: {other}"))),
        None => uuid::Uuid::new_v4().simple().to_string(),
    };
    let rev = body.remove(REV_FIELD).and_then(|r| r.as_str().map(str::to_string));
    let deleting = body
        .remove(DELETED_FIELD)
        .and_then(|d| d.as_bool())
        .unwrap_or(false);

    let current = state.docs.get(&id).map(|d| (d.deleted, d.seq, d.rev.clone()));
    let seq = match current {
        Some((false, seq, current_rev)) => {
            if rev.as_deref() != Some(current_rev.as_str()) {
                return Err(CouchError::Conflict { id });
            }
            seq + 1
        }
        // Recreating over a tombstone, or a brand new document, takes no revision
        Some((true, seq, _)) if rev.is_none() && !deleting => seq + 1,
        None if rev.is_none() && !deleting => 1,
        Some((true, _, _)) => return Err(CouchError::Conflict { id }),
        None => return Err(CouchError::NotFound { id }),
    };

    let rev = next_rev(seq);
    state.docs.insert(
        id.clone(),
        StoredDoc {
            seq,
            rev: rev.clone(),
            body: if deleting { Map::new() } else { body },
            deleted: deleting,
        },
    );
    Ok(WriteAck { id, rev })
}

/// Resolve a stored design document's view into a map function.
fn interpret_view(state: &MemoryState, design: &str, view: &str) -> Result<NativeMap> {
    let not_found = || CouchError::NotFound {
        id: format!("{}/_view/{view}", design_id(design)),
    };
    let design_doc = state
        .docs
        .get(&design_id(design))
        .filter(|d| !d.deleted)
        .ok_or_else(not_found)?;
    let source = design_doc
        .body
        .get("views")
        .and_then(|v| v.get(view))
        .and_then(|v| v.get("map"))
        .and_then(Value::as_str)
        .ok_or_else(not_found)?;

    let map: NativeMap = match MapFunction::parse(source) {
        Some(MapFunction::ByModel) => Arc::new(|doc: &Value| match doc.get(MODEL_TAG) {
            Some(tag) if is_truthy(tag) => vec![(tag.clone(), Value::Null)],
            _ => Vec::new(),
        }),
        Some(MapFunction::ByProperty { model, property }) => Arc::new(move |doc: &Value| {
            let tagged = doc.get(MODEL_TAG).and_then(Value::as_str) == Some(model.as_str());
            match doc.get(&property) {
                Some(value) if tagged && is_truthy(value) => vec![(value.clone(), Value::Null)],
                _ => Vec::new(),
            }
        }),
        None => {
            return Err(CouchError::Other(format!(
                "Unsupported map function in {}/{view}",
                design_id(design)
            )))
        }
    };
    Ok(map)
}

fn with_meta(id: &str, doc: &StoredDoc) -> Value {
    let mut full = Map::new();
    full.insert(ID_FIELD.into(), Value::String(id.to_string()));
    full.insert(REV_FIELD.into(), Value::String(doc.rev.clone()));
    for (k, v) in &doc.body {
        full.insert(k.clone(), v.clone());
    }
    Value::Object(full)
}

fn next_rev(seq: u64) -> String {
    format!("{seq}-{}", uuid::Uuid::new_v4().simple())
}

/// View key collation: null < false < true < numbers < strings < arrays < objects.
fn collate(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(false) => 1,
            Value::Bool(true) => 2,
            Value::Number(_) => 3,
            Value::String(_) => 4,
            Value::Array(_) => 5,
            Value::Object(_) => 6,
        }
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = collate(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::{ensure_design_document, DesignDocument, CATCH_ALL_DESIGN, CATCH_ALL_VIEW};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_get_head() {
        let store = MemoryStore::new();
        let ack = store.insert(json!({ "_id": "a", "n": 1 })).await.unwrap();
        assert_eq!(ack.id, "a");
        assert!(ack.rev.starts_with("1-"));

        let doc = store.get("a").await.unwrap();
        assert_eq!(doc["n"], json!(1));
        assert_eq!(doc["_rev"], json!(ack.rev));
        assert_eq!(store.head("a").await.unwrap(), ack.rev);
    }

    #[tokio::test]
    async fn test_insert_without_id_assigns_one() {
        let store = MemoryStore::new();
        let ack = store.insert(json!({ "n": 1 })).await.unwrap();
        assert_eq!(ack.id.len(), 32);
        assert!(store.get(&ack.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_revision_conflicts() {
        let store = MemoryStore::new();
        let first = store.insert(json!({ "_id": "a" })).await.unwrap();
        let second = store
            .insert(json!({ "_id": "a", "_rev": first.rev, "n": 2 }))
            .await
            .unwrap();
        assert!(second.rev.starts_with("2-"));

        let stale = store.insert(json!({ "_id": "a", "_rev": first.rev })).await;
        assert!(matches!(stale, Err(CouchError::Conflict { .. })));
        let missing_rev = store.insert(json!({ "_id": "a" })).await;
        assert!(matches!(missing_rev, Err(CouchError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_destroy_requires_current_revision() {
        let store = MemoryStore::new();
        let first = store.insert(json!({ "_id": "a" })).await.unwrap();
        let second = store
            .insert(json!({ "_id": "a", "_rev": first.rev }))
            .await
            .unwrap();

        let stale = store.destroy("a", &first.rev).await;
        assert!(matches!(stale, Err(CouchError::Conflict { .. })));

        store.destroy("a", &second.rev).await.unwrap();
        assert!(matches!(store.get("a").await, Err(CouchError::NotFound { .. })));
        assert!(matches!(store.head("a").await, Err(CouchError::NotFound { .. })));

        // A deleted id can be recreated without a revision
        let again = store.insert(json!({ "_id": "a" })).await.unwrap();
        assert!(again.rev.starts_with("4-"));
    }

    #[tokio::test]
    async fn test_bulk_reports_per_document_errors() {
        let store = MemoryStore::new();
        let a = store.insert(json!({ "_id": "a" })).await.unwrap();
        store.insert(json!({ "_id": "b" })).await.unwrap();

        let results = store
            .bulk(vec![
                json!({ "_id": "a", "_rev": a.rev, "_deleted": true }),
                json!({ "_id": "b", "_rev": "1-stale" }),
            ])
            .await
            .unwrap();
        assert!(results[0].is_ok());
        assert_eq!(results[1].error.as_deref(), Some("conflict"));
        assert_eq!(store.document_count(), 1);
    }

    #[tokio::test]
    async fn test_generated_views() {
        let store = MemoryStore::new();
        ensure_design_document(&store, CATCH_ALL_DESIGN, &DesignDocument::catch_all())
            .await
            .unwrap();
        store.insert(json!({ "_id": "w2", "loopbackModel": "Widget" })).await.unwrap();
        store.insert(json!({ "_id": "w1", "loopbackModel": "Widget" })).await.unwrap();
        store.insert(json!({ "_id": "g1", "loopbackModel": "Gadget" })).await.unwrap();
        store.insert(json!({ "_id": "loose" })).await.unwrap();

        let params = ViewParams {
            keys: Some(vec![json!("Widget")]),
            include_docs: true,
            ..Default::default()
        };
        let response = store.view(CATCH_ALL_DESIGN, CATCH_ALL_VIEW, &params).await.unwrap();
        let ids: Vec<&str> = response.rows.iter().filter_map(|r| r.id.as_deref()).collect();
        assert_eq!(ids, vec!["w1", "w2"]);
        assert_eq!(response.rows[0].doc.as_ref().unwrap()["_id"], json!("w1"));

        let all = store
            .view(CATCH_ALL_DESIGN, CATCH_ALL_VIEW, &ViewParams::default())
            .await
            .unwrap();
        assert_eq!(all.rows.len(), 3);
        assert!(all.rows[0].doc.is_none());
    }

    #[tokio::test]
    async fn test_native_view_with_keys_skip_limit() {
        let store = MemoryStore::new().with_view("reports", "by_total", |doc| {
            match doc.get("total") {
                Some(total) => vec![(total.clone(), doc.clone())],
                None => Vec::new(),
            }
        });
        for (id, total) in [("a", 3), ("b", 1), ("c", 2), ("d", 2)] {
            store.insert(json!({ "_id": id, "total": total })).await.unwrap();
        }

        let params = ViewParams {
            skip: Some(1),
            limit: Some(2),
            ..Default::default()
        };
        let response = store.view("reports", "by_total", &params).await.unwrap();
        let keys: Vec<&Value> = response.rows.iter().map(|r| &r.key).collect();
        assert_eq!(keys, vec![&json!(2), &json!(2)]);

        let params = ViewParams {
            keys: Some(vec![json!(3), json!(1)]),
            ..Default::default()
        };
        let response = store.view("reports", "by_total", &params).await.unwrap();
        let ids: Vec<&str> = response.rows.iter().filter_map(|r| r.id.as_deref()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_native_view_key_range_is_inclusive() {
        let store = MemoryStore::new().with_view("reports", "by_total", |doc| {
            match doc.get("total") {
                Some(total) => vec![(total.clone(), Value::Null)],
                None => Vec::new(),
            }
        });
        for (id, total) in [("a", 3), ("b", 1), ("c", 2), ("d", 5), ("e", 6)] {
            store.insert(json!({ "_id": id, "total": total })).await.unwrap();
        }

        let params = ViewParams {
            startkey: Some(json!(2)),
            endkey: Some(json!(5)),
            ..Default::default()
        };
        let response = store.view("reports", "by_total", &params).await.unwrap();
        let ids: Vec<&str> = response.rows.iter().filter_map(|r| r.id.as_deref()).collect();
        assert_eq!(ids, vec!["c", "a", "d"]);

        let params = ViewParams {
            startkey: Some(json!(5)),
            ..Default::default()
        };
        let response = store.view("reports", "by_total", &params).await.unwrap();
        assert_eq!(response.rows.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_view_is_not_found() {
        let store = MemoryStore::new();
        let result = store.view("nope", "by_x", &ViewParams::default()).await;
        assert!(matches!(result, Err(CouchError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_fail_next_is_consumed_once() {
        let store = MemoryStore::new();
        store.fail_next("boom");
        assert!(matches!(store.head("a").await, Err(CouchError::Transport(_))));
        assert!(matches!(store.head("a").await, Err(CouchError::NotFound { .. })));
        assert_eq!(store.calls().len(), 2);
    }

    #[test]
    fn test_collation() {
        assert_eq!(collate(&json!(1), &json!(1.0)), Ordering::Equal);
        assert_eq!(collate(&json!(null), &json!(false)), Ordering::Less);
        assert_eq!(collate(&json!(10), &json!("1")), Ordering::Less);
        assert_eq!(collate(&json!(["a", 2]), &json!(["a", 10])), Ordering::Less);
    }
}
