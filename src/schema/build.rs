// src/schema/build.rs

use std::path::Path;
use tracing::debug;

use super::{read_header, Field, HeaderError, Schema};

/// Map each header column, in order, to a text field.
///
/// Empty headers give an empty schema and duplicate names are kept as-is.
pub fn build_schema(columns: &[String]) -> Schema {
    Schema {
        fields: columns.iter().map(Field::text).collect(),
    }
}

/// Read the header row of `path` and build its schema.
pub fn infer_schema_from_csv(path: &Path, delimiter: u8) -> Result<Schema, HeaderError> {
    let header = read_header(path, delimiter)?;
    let schema = build_schema(&header);
    debug!(file = %path.display(), fields = schema.len(), "built schema from header");
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fields_are_index_aligned() {
        let header = names(&["id", "name", "amount", "", "Note With Spaces"]);
        let schema = build_schema(&header);

        assert_eq!(schema.len(), header.len());
        for (i, field) in schema.fields.iter().enumerate() {
            assert_eq!(field.name, header[i]);
            assert_eq!(field.ty, FieldType::Text);
        }
    }

    #[test]
    fn test_same_header_same_schema() {
        let header = names(&["x", "y"]);
        assert_eq!(build_schema(&header), build_schema(&header));
    }

    #[test]
    fn test_empty_header_gives_empty_schema() {
        let schema = build_schema(&[]);
        assert!(schema.is_empty());
    }

    #[test]
    fn test_duplicates_not_renamed() {
        let schema = build_schema(&names(&["a", "a"]));
        assert_eq!(schema.fields, vec![Field::text("a"), Field::text("a")]);
    }

    #[test]
    fn test_infer_from_csv() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(b"id,name,amount\n1,Alice,10\n2,Bob,20\n")
            .unwrap();

        let schema = infer_schema_from_csv(tmp.path(), b',').unwrap();
        assert_eq!(
            schema.fields,
            vec![
                Field::text("id"),
                Field::text("name"),
                Field::text("amount")
            ]
        );
    }

    #[test]
    fn test_infer_from_empty_file_fails() {
        let tmp = NamedTempFile::new().unwrap();
        let err = infer_schema_from_csv(tmp.path(), b',').unwrap_err();
        assert!(matches!(err, HeaderError::Empty { .. }));
    }
}
