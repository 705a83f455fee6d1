// src/schema/header.rs

use csv::{ReaderBuilder, StringRecord};
use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse header row of {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{} has no header row", path.display())]
    Empty { path: PathBuf },
}

/// Read the first record of a delimited file and return its fields as column names.
///
/// Only the first record is parsed; the handle is closed when this returns.
pub fn read_header(path: &Path, delimiter: u8) -> Result<Vec<String>, HeaderError> {
    let file = File::open(path).map_err(|source| HeaderError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(file);

    let mut record = StringRecord::new();
    match rdr.read_record(&mut record) {
        Ok(true) => {
            let columns: Vec<String> = record.iter().map(String::from).collect();
            debug!(file = %path.display(), columns = columns.len(), "read header row");
            Ok(columns)
        }
        Ok(false) => Err(HeaderError::Empty {
            path: path.to_path_buf(),
        }),
        Err(source) => Err(HeaderError::Parse {
            path: path.to_path_buf(),
            source,
        }),
    }
}
