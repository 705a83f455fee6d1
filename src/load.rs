// src/load.rs

use anyhow::{Context, Result};
use tokio::{task, time::Instant};
use tracing::info;

use crate::{
    config::LoadConfig,
    schema::{infer_schema_from_csv, Schema},
    warehouse::{wait_for_job, Creation, JobRef, Warehouse},
};

/// What a finished load did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub dataset: Creation,
    pub table: Creation,
    pub schema: Schema,
    pub job: JobRef,
    pub output_rows: Option<u64>,
}

/// Header → schema → dataset → table → load job → wait.
///
/// The first failure aborts the run. An existing dataset or table is not a failure.
pub async fn run_load<W: Warehouse>(warehouse: &W, cfg: &LoadConfig) -> Result<LoadSummary> {
    let start = Instant::now();

    // ─── 1) header row → schema ──────────────────────────────────────
    let schema = task::spawn_blocking({
        let path = cfg.csv_path.clone();
        let delimiter = cfg.options.delimiter;
        move || infer_schema_from_csv(&path, delimiter)
    })
    .await
    .context("schema task panicked")?
    .with_context(|| format!("inferring schema from {}", cfg.csv_path.display()))?;
    info!(
        fields = schema.len(),
        columns = ?schema.names().collect::<Vec<_>>(),
        "schema inferred"
    );

    // ─── 2) dataset ──────────────────────────────────────────────────
    let dataset_ref = cfg.table.dataset();
    let dataset = warehouse
        .ensure_dataset(&dataset_ref)
        .await
        .with_context(|| format!("creating dataset {}", dataset_ref))?;
    log_creation("dataset", &dataset_ref, dataset);

    // ─── 3) table ────────────────────────────────────────────────────
    let table = warehouse
        .ensure_table(&cfg.table, &schema)
        .await
        .with_context(|| format!("creating table {}", cfg.table))?;
    log_creation("table", &cfg.table, table);

    // ─── 4) load job ─────────────────────────────────────────────────
    let job = warehouse
        .submit_load(&cfg.table, &cfg.csv_path, &cfg.options)
        .await
        .with_context(|| format!("loading {} into {}", cfg.csv_path.display(), cfg.table))?;
    info!(job_id = %job.job_id, "load job running");

    let status = wait_for_job(warehouse, &job, cfg.poll_interval, cfg.wait_timeout)
        .await
        .with_context(|| format!("waiting for job {}", job.job_id))?;

    info!(
        table = %cfg.table,
        rows = ?status.output_rows,
        elapsed = ?start.elapsed(),
        "data imported"
    );

    Ok(LoadSummary {
        dataset,
        table,
        schema,
        job,
        output_rows: status.output_rows,
    })
}

fn log_creation(kind: &str, name: &dyn std::fmt::Display, creation: Creation) {
    match creation {
        Creation::Created => info!(kind, name = %name, "created"),
        Creation::AlreadyExists => info!(kind, name = %name, "already exists, reusing"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        schema::{Field, HeaderError},
        warehouse::{
            DatasetRef, JobError, JobState, JobStatus, LoadOptions, TableRef,
            WarehouseError,
        },
    };
    use std::{
        io::Write,
        path::{Path, PathBuf},
        sync::Mutex,
        time::Duration,
    };
    use tempfile::{tempdir, NamedTempFile};
    use tracing_subscriber::{fmt, EnvFilter};

    fn init_logging() {
        let _ = fmt()
            .with_env_filter(EnvFilter::new("debug"))
            .with_test_writer()
            .try_init();
    }

    /// In-memory warehouse that records every call.
    struct FakeWarehouse {
        calls: Mutex<Vec<String>>,
        existing_dataset: bool,
        existing_table: bool,
        dataset_denied: bool,
        running_polls: Mutex<u32>,
        job_error: Option<JobError>,
    }

    impl FakeWarehouse {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                existing_dataset: false,
                existing_table: false,
                dataset_denied: false,
                running_polls: Mutex::new(2),
                job_error: None,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl Warehouse for FakeWarehouse {
        async fn ensure_dataset(&self, dataset: &DatasetRef) -> crate::warehouse::Result<Creation> {
            self.record(format!("dataset {}", dataset));
            if self.dataset_denied {
                return Err(WarehouseError::Api {
                    status: 403,
                    message: "Access Denied".into(),
                });
            }
            Ok(if self.existing_dataset {
                Creation::AlreadyExists
            } else {
                Creation::Created
            })
        }

        async fn ensure_table(
            &self,
            table: &TableRef,
            schema: &Schema,
        ) -> crate::warehouse::Result<Creation> {
            let cols: Vec<&str> = schema.names().collect();
            self.record(format!("table {} {}", table, cols.join("|")));
            Ok(if self.existing_table {
                Creation::AlreadyExists
            } else {
                Creation::Created
            })
        }

        async fn submit_load(
            &self,
            table: &TableRef,
            source: &Path,
            options: &LoadOptions,
        ) -> crate::warehouse::Result<JobRef> {
            assert!(source.exists());
            self.record(format!(
                "load {} skip={}",
                table, options.skip_leading_rows
            ));
            Ok(JobRef {
                project_id: table.project_id.clone(),
                job_id: "job_1".into(),
                location: None,
            })
        }

        async fn job_status(&self, job: &JobRef) -> crate::warehouse::Result<JobStatus> {
            self.record(format!("status {}", job.job_id));
            let mut remaining = self.running_polls.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(JobStatus {
                    state: JobState::Running,
                    error_result: None,
                    errors: Vec::new(),
                    output_rows: None,
                });
            }
            Ok(JobStatus {
                state: JobState::Done,
                error_result: self.job_error.clone(),
                errors: self.job_error.iter().cloned().collect(),
                output_rows: self.job_error.is_none().then_some(2),
            })
        }
    }

    fn config(csv_path: PathBuf) -> LoadConfig {
        LoadConfig {
            table: TableRef::new("p", "d", "t"),
            csv_path,
            credentials: PathBuf::from("key.json"),
            endpoint: url::Url::parse("http://localhost").unwrap(),
            location: None,
            options: LoadOptions::default(),
            poll_interval: Duration::from_millis(1),
            wait_timeout: Some(Duration::from_secs(5)),
        }
    }

    fn sample_csv() -> NamedTempFile {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(b"id,name,amount\n1,Alice,10\n2,Bob,20\n")
            .unwrap();
        tmp.flush().unwrap();
        tmp
    }

    #[tokio::test]
    async fn test_full_run_in_order() -> Result<()> {
        init_logging();
        let csv = sample_csv();
        let wh = FakeWarehouse::new();

        let summary = run_load(&wh, &config(csv.path().to_path_buf())).await?;

        assert_eq!(summary.dataset, Creation::Created);
        assert_eq!(summary.table, Creation::Created);
        assert_eq!(
            summary.schema.fields,
            vec![
                Field::text("id"),
                Field::text("name"),
                Field::text("amount")
            ]
        );
        assert_eq!(summary.job.job_id, "job_1");
        assert_eq!(summary.output_rows, Some(2));
        assert_eq!(
            wh.calls(),
            vec![
                "dataset p.d",
                "table p.d.t id|name|amount",
                "load p.d.t skip=1",
                "status job_1",
                "status job_1",
                "status job_1",
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_existing_dataset_and_table_are_reused() -> Result<()> {
        let csv = sample_csv();
        let wh = FakeWarehouse {
            existing_dataset: true,
            existing_table: true,
            ..FakeWarehouse::new()
        };

        let summary = run_load(&wh, &config(csv.path().to_path_buf())).await?;

        assert_eq!(summary.dataset, Creation::AlreadyExists);
        assert_eq!(summary.table, Creation::AlreadyExists);
        assert_eq!(summary.output_rows, Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_stops_before_warehouse() {
        let dir = tempdir().unwrap();
        let wh = FakeWarehouse::new();

        let err = run_load(&wh, &config(dir.path().join("nope.csv")))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<HeaderError>(),
            Some(HeaderError::Open { .. })
        ));
        assert!(wh.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_file_stops_before_warehouse() {
        let csv = NamedTempFile::new().unwrap();
        let wh = FakeWarehouse::new();

        let err = run_load(&wh, &config(csv.path().to_path_buf()))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<HeaderError>(),
            Some(HeaderError::Empty { .. })
        ));
        assert!(wh.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dataset_failure_aborts() {
        let csv = sample_csv();
        let wh = FakeWarehouse {
            dataset_denied: true,
            ..FakeWarehouse::new()
        };

        let err = run_load(&wh, &config(csv.path().to_path_buf()))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("creating dataset p.d"));
        assert!(matches!(
            err.downcast_ref::<WarehouseError>(),
            Some(WarehouseError::Api { status: 403, .. })
        ));
        assert_eq!(wh.calls(), vec!["dataset p.d"]);
    }

    #[tokio::test]
    async fn test_failed_job_reports_detail() {
        let csv = sample_csv();
        let wh = FakeWarehouse {
            job_error: Some(JobError {
                reason: "invalid".into(),
                location: None,
                message: "Could not parse 'abc' as INT64".into(),
            }),
            ..FakeWarehouse::new()
        };

        let err = run_load(&wh, &config(csv.path().to_path_buf()))
            .await
            .unwrap_err();

        match err.downcast_ref::<WarehouseError>() {
            Some(WarehouseError::JobFailed { job_id, message, .. }) => {
                assert_eq!(job_id, "job_1");
                assert!(message.contains("abc"));
            }
            other => panic!("expected JobFailed, got {:?}", other),
        }
    }
}
