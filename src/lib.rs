pub mod codec;
pub mod config;
pub mod decode;
pub mod error;
pub mod index;
pub mod query;
pub mod record;
pub mod schema;
pub mod source;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use index::{ColumnLayout, RegionReader, TabixReader};
pub use query::{Query, QueryState};
pub use record::{FieldSet, FieldValue, Record};
pub use schema::{FieldDefinition, Number, Schema, SchemaGuard, SchemaRef, ValueKind};
pub use source::{Source, SourceOptions};
pub use types::{FileKind, Region};
