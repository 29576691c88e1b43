pub mod connector;
pub mod document;
pub mod error;
pub mod query;
pub mod schema;
pub mod settings;
pub mod store;
pub mod view;

pub use connector::{Connector, ConnectorMetadata, RelationIncluder, Saved, ViewKeys};
pub use document::Record;
pub use error::{CouchError, Result};
pub use query::{Filter, Plan, Where};
pub use schema::{parse_definition, ConnectorDefinition, ModelDefinition, PropertyType};
pub use settings::{ResolvedSettings, Settings};
pub use store::{DocumentStore, MemoryStore, StoreHandles};
