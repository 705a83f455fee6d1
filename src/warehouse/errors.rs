use std::{io, path::PathBuf, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("Failed to use service account key {}: {source}", path.display())]
    Credentials {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Transport, token or decoding failure inside the BigQuery client.
    #[error(transparent)]
    Client(#[from] google_bigquery2::Error),

    #[error("Warehouse API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Load job response carried no job reference")]
    MissingJobReference,

    #[error("Failed to open {} for upload: {source}", path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Job {job_id} failed: {reason}: {message}")]
    JobFailed {
        job_id: String,
        reason: String,
        message: String,
        details: Vec<String>,
    },

    #[error("Job {job_id} still running after {waited:?}")]
    Timeout { job_id: String, waited: Duration },
}

pub type Result<T, E = WarehouseError> = std::result::Result<T, E>;
