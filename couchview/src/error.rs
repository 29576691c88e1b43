use thiserror::Error;

#[derive(Error, Debug)]
pub enum CouchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Document not found: {id}")]
    NotFound { id: String },

    #[error("Document update conflict: {id}")]
    Conflict { id: String },

    #[error("Cannot create an empty document in the database")]
    EmptyDocument,

    #[error("Model not registered with the connector: {0}")]
    UnknownModel(String),

    #[error("The requested view is not available in the datasource: {ddoc}/{view}")]
    ViewUnavailable { ddoc: String, view: String },

    #[error("Include error: {0}")]
    Include(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl CouchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CouchError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, CouchError>;
