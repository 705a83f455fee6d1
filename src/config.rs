// src/config.rs

use anyhow::{bail, Result};
use clap::Parser;
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::warehouse::{bigquery::DEFAULT_ENDPOINT, LoadOptions, TableRef, WriteDisposition};

/// Command-line args: target table, CSV source and credentials
#[derive(Parser, Debug)]
#[command(name = "bqload", version, about = "Load a CSV file into a BigQuery table")]
pub struct Args {
    /// Project that owns the dataset and runs the load job
    #[arg(long, env = "GOOGLE_CLOUD_PROJECT")]
    pub project: String,

    /// Dataset to create if absent
    #[arg(long, env = "BQLOAD_DATASET")]
    pub dataset: String,

    /// Table to create if absent
    #[arg(long, env = "BQLOAD_TABLE")]
    pub table: String,

    /// CSV file whose first line names the columns
    #[arg(long = "csv", env = "BQLOAD_CSV")]
    pub csv_path: PathBuf,

    /// Service account key file
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    pub credentials: PathBuf,

    /// Location for the dataset and job, e.g. US or EU
    #[arg(long, env = "BQLOAD_LOCATION")]
    pub location: Option<String>,

    /// API base URL
    #[arg(long, env = "BQLOAD_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: Url,

    /// Field delimiter, a single ASCII character
    #[arg(long, env = "BQLOAD_DELIMITER", default_value_t = ',')]
    pub delimiter: char,

    /// Leading rows the load job skips; 1 skips the header
    #[arg(long, default_value_t = 1)]
    pub skip_leading_rows: u32,

    #[arg(long, value_enum, default_value_t = WriteDisposition::Append)]
    pub write_disposition: WriteDisposition,

    /// Delay between job status polls
    #[arg(long, default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Give up waiting for the job after this many seconds
    #[arg(long)]
    pub wait_timeout_secs: Option<u64>,

    /// Fallback filter directive when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Validated settings for one load run.
#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub table: TableRef,
    pub csv_path: PathBuf,
    pub credentials: PathBuf,
    pub endpoint: Url,
    pub location: Option<String>,
    pub options: LoadOptions,
    pub poll_interval: Duration,
    pub wait_timeout: Option<Duration>,
}

impl Args {
    pub fn into_config(self) -> Result<LoadConfig> {
        for (what, value) in [
            ("project", &self.project),
            ("dataset", &self.dataset),
            ("table", &self.table),
        ] {
            if value.trim().is_empty() {
                bail!("{} must not be empty", what);
            }
        }

        if !self.delimiter.is_ascii() || matches!(self.delimiter, '"' | '\n' | '\r') {
            bail!(
                "delimiter {:?} is not usable; expected one ASCII character other than quote or a line break",
                self.delimiter
            );
        }
        if self.poll_interval_ms == 0 {
            bail!("poll interval must be positive");
        }

        Ok(LoadConfig {
            table: TableRef::new(self.project, self.dataset, self.table),
            csv_path: self.csv_path,
            credentials: self.credentials,
            endpoint: self.endpoint,
            location: self.location,
            options: LoadOptions {
                delimiter: self.delimiter as u8,
                skip_leading_rows: self.skip_leading_rows,
                write_disposition: self.write_disposition,
            },
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            wait_timeout: self.wait_timeout_secs.map(Duration::from_secs),
        })
    }
}
