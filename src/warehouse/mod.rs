//! Warehouse collaborator: dataset/table creation and CSV load jobs.
pub mod bigquery;
pub mod errors;

use google_bigquery2::api;
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path, time::Duration};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

pub use bigquery::BigQueryClient;
pub use errors::{Result, WarehouseError};

use crate::schema::Schema;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct DatasetRef {
    pub project_id: String,
    pub dataset_id: String,
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.project_id, self.dataset_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableRef {
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            table_id: table_id.into(),
        }
    }

    pub fn dataset(&self) -> DatasetRef {
        DatasetRef {
            project_id: self.project_id.clone(),
            dataset_id: self.dataset_id.clone(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct JobRef {
    pub project_id: String,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Outcome of an idempotent create call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Creation {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WriteDisposition {
    /// Append rows to whatever the table already holds.
    Append,
    /// Replace the table's rows.
    Truncate,
    /// Fail unless the table is empty.
    Empty,
}

impl WriteDisposition {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            WriteDisposition::Append => "WRITE_APPEND",
            WriteDisposition::Truncate => "WRITE_TRUNCATE",
            WriteDisposition::Empty => "WRITE_EMPTY",
        }
    }
}

/// Load-job settings for a CSV source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub delimiter: u8,
    pub skip_leading_rows: u32,
    pub write_disposition: WriteDisposition,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            skip_leading_rows: 1,
            write_disposition: WriteDisposition::Append,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Done,
}

impl JobState {
    /// Unknown states are treated as still running.
    pub fn from_api(state: &str) -> Self {
        match state {
            "DONE" => JobState::Done,
            "PENDING" => JobState::Pending,
            _ => JobState::Running,
        }
    }
}

/// One entry of a job's `errorResult` / `errors`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobError {
    pub reason: String,
    pub location: Option<String>,
    pub message: String,
}

impl From<api::ErrorProto> for JobError {
    fn from(proto: api::ErrorProto) -> Self {
        Self {
            reason: proto.reason.unwrap_or_default(),
            location: proto.location,
            message: proto.message.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    pub error_result: Option<JobError>,
    pub errors: Vec<JobError>,
    pub output_rows: Option<u64>,
}

impl JobStatus {
    pub fn is_done(&self) -> bool {
        self.state == JobState::Done
    }

    /// A finished job with an `errorResult` becomes `JobFailed`.
    pub fn into_result(self, job: &JobRef) -> Result<JobStatus> {
        match &self.error_result {
            Some(err) => Err(WarehouseError::JobFailed {
                job_id: job.job_id.clone(),
                reason: err.reason.clone(),
                message: err.message.clone(),
                details: self.errors.iter().map(|e| e.message.clone()).collect(),
            }),
            None => Ok(self),
        }
    }
}

impl From<api::Job> for JobStatus {
    fn from(job: api::Job) -> Self {
        let output_rows = job
            .statistics
            .and_then(|s| s.load)
            .and_then(|l| l.output_rows)
            .and_then(|rows| u64::try_from(rows).ok());
        let status = job.status.unwrap_or_default();
        Self {
            state: JobState::from_api(status.state.as_deref().unwrap_or_default()),
            error_result: status.error_result.map(JobError::from),
            errors: status
                .errors
                .unwrap_or_default()
                .into_iter()
                .map(JobError::from)
                .collect(),
            output_rows,
        }
    }
}

/// The warehouse operations a CSV load needs.
///
/// `ensure_*` calls treat an existing resource as success and report it
/// through [`Creation::AlreadyExists`].
#[allow(async_fn_in_trait)]
pub trait Warehouse {
    async fn ensure_dataset(&self, dataset: &DatasetRef) -> Result<Creation>;

    async fn ensure_table(&self, table: &TableRef, schema: &Schema) -> Result<Creation>;

    async fn submit_load(
        &self,
        table: &TableRef,
        source: &Path,
        options: &LoadOptions,
    ) -> Result<JobRef>;

    async fn job_status(&self, job: &JobRef) -> Result<JobStatus>;
}

/// Poll `job` until it is done, sleeping `poll_interval` between polls.
pub async fn wait_for_job<W: Warehouse>(
    warehouse: &W,
    job: &JobRef,
    poll_interval: Duration,
    timeout: Option<Duration>,
) -> Result<JobStatus> {
    let start = Instant::now();
    let mut polls: u32 = 0;
    loop {
        let status = warehouse.job_status(job).await?;
        polls += 1;
        if status.is_done() {
            info!(job_id = %job.job_id, polls, elapsed = ?start.elapsed(), "job done");
            return status.into_result(job);
        }

        let waited = start.elapsed();
        if let Some(limit) = timeout {
            if waited >= limit {
                return Err(WarehouseError::Timeout {
                    job_id: job.job_id.clone(),
                    waited,
                });
            }
        }
        debug!(job_id = %job.job_id, state = ?status.state, polls, "job not done yet");
        sleep(poll_interval).await;
    }
}
