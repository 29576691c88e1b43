//! DocumentStore - the minimal CouchDB capability the connector consumes.
//!
//! Transport, authentication and timeouts belong to the implementation.
//! [`MemoryStore`] emulates the subset of CouchDB the connector relies on.

mod memory;

pub use memory::{MemoryStore, NativeMap, StoreCall};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;

/// Response to a single-document write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAck {
    pub id: String,
    pub rev: String,
}

/// Per-document outcome of a bulk write. Failures are reported here, not raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResult {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BulkResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// View query parameters, serialized with CouchDB's parameter names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Value>,
    /// Lowest key of an inclusive key range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startkey: Option<Value>,
    /// Highest key of an inclusive key range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endkey: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub include_docs: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewResponse {
    pub rows: Vec<ViewRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub key: Value,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
}

/// The document-store operations used by the connector.
///
/// Every method completes exactly once with a result or an error.
/// `get`, `head` and `destroy` report a missing document as
/// [`CouchError::NotFound`](crate::CouchError::NotFound); writes naming a
/// stale revision report [`CouchError::Conflict`](crate::CouchError::Conflict).
pub trait DocumentStore: Send + Sync {
    /// Fetch a document by id.
    fn get(&self, id: &str) -> impl Future<Output = Result<Value>> + Send;

    /// Existence check returning the current revision.
    fn head(&self, id: &str) -> impl Future<Output = Result<String>> + Send;

    /// Write a single document. A document carrying `_id` and `_rev` updates that revision.
    fn insert(&self, doc: Value) -> impl Future<Output = Result<WriteAck>> + Send;

    /// Write many documents in one request.
    fn bulk(&self, docs: Vec<Value>) -> impl Future<Output = Result<Vec<BulkResult>>> + Send;

    /// Delete a document at an exact revision.
    fn destroy(&self, id: &str, rev: &str) -> impl Future<Output = Result<WriteAck>> + Send;

    /// Query `_design/<design>/_view/<view>`.
    fn view(
        &self,
        design: &str,
        view: &str,
        params: &ViewParams,
    ) -> impl Future<Output = Result<ViewResponse>> + Send;
}

/// The three store handles a connector talks through: reads, writes and design documents.
#[derive(Debug, Clone)]
pub struct StoreHandles<S> {
    pub reader: S,
    pub writer: S,
    pub admin: S,
}

impl<S: Clone> StoreHandles<S> {
    /// Use one store for every role.
    pub fn shared(store: S) -> Self {
        StoreHandles {
            reader: store.clone(),
            writer: store.clone(),
            admin: store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_view_params_serialize_with_couch_names() {
        let params = ViewParams {
            keys: Some(vec![json!("Widget")]),
            skip: Some(5),
            include_docs: true,
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            json!({ "keys": ["Widget"], "skip": 5, "include_docs": true })
        );
    }

    #[test]
    fn test_view_params_omit_defaults() {
        assert_eq!(serde_json::to_value(ViewParams::default()).unwrap(), json!({}));
    }

    #[test]
    fn test_view_params_range_names() {
        let params = ViewParams {
            startkey: Some(json!(1)),
            endkey: Some(json!(5)),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            json!({ "startkey": 1, "endkey": 5 })
        );
    }

    #[test]
    fn test_bulk_result_parses_error_rows() {
        let row: BulkResult =
            serde_json::from_value(json!({ "id": "a", "error": "conflict", "reason": "Document update conflict." }))
                .unwrap();
        assert!(!row.is_ok());
        assert_eq!(row.rev, None);
    }
}
