pub mod build;
pub mod header;
pub mod types;

pub use build::{build_schema, infer_schema_from_csv};
pub use header::{read_header, HeaderError};
pub use types::{Field, FieldType, Schema};
