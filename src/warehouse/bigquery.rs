// src/warehouse/bigquery.rs

use chrono::Utc;
use google_bigquery2::{
    api,
    client::GetToken,
    hyper::{self, client::HttpConnector},
    hyper_rustls::{HttpsConnector, HttpsConnectorBuilder},
    Bigquery,
};
use std::{fs::File, path::Path};
use tracing::{debug, info, instrument};
use url::Url;
use yup_oauth2::ServiceAccountAuthenticator;

use super::{
    Creation, DatasetRef, JobRef, JobStatus, LoadOptions, Result, TableRef, Warehouse,
    WarehouseError,
};
use crate::schema::Schema;

// Convenience type alias.
type Connector = HttpsConnector<HttpConnector>;

pub const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com";

/// BigQuery v2 client on top of the generated `google-bigquery2` hub.
pub struct BigQueryClient {
    hub: Bigquery<Connector>,
    /// Location for new datasets and jobs; `None` lets the service decide.
    location: Option<String>,
}

impl BigQueryClient {
    /// Build a client from the service account key at `key_path`.
    ///
    /// The service account needs 'BigQuery Data Editor' and 'BigQuery Job
    /// User' on the target project.
    pub async fn from_service_account_file(key_path: &Path, endpoint: &Url) -> Result<Self> {
        let key = yup_oauth2::read_service_account_key(key_path)
            .await
            .map_err(|source| WarehouseError::Credentials {
                path: key_path.to_path_buf(),
                source,
            })?;
        let auth = ServiceAccountAuthenticator::builder(key)
            .build()
            .await
            .map_err(|source| WarehouseError::Credentials {
                path: key_path.to_path_buf(),
                source,
            })?;
        Ok(Self::with_auth(auth, endpoint))
    }

    /// Build a client around any token source, e.g. a fixed bearer `String`.
    pub fn with_auth<A: GetToken + 'static>(auth: A, endpoint: &Url) -> Self {
        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let mut hub = Bigquery::new(hyper::Client::builder().build(connector), auth);

        let mut root = endpoint.to_string();
        if !root.ends_with('/') {
            root.push('/');
        }
        hub.base_url(format!("{}bigquery/v2/", root));
        hub.root_url(root);

        Self {
            hub,
            location: None,
        }
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    /// Delete a dataset, optionally with every table in it. Missing datasets are ignored.
    #[instrument(level = "debug", skip_all, fields(dataset = %dataset, delete_contents = delete_contents))]
    pub async fn delete_dataset(&self, dataset: &DatasetRef, delete_contents: bool) -> Result<()> {
        let result = self
            .hub
            .datasets()
            .delete(&dataset.project_id, &dataset.dataset_id)
            .delete_contents(delete_contents)
            .doit()
            .await;
        match result {
            Ok(_) => {
                info!(dataset = %dataset, "dataset deleted");
                Ok(())
            }
            Err(err) if error_status(&err) == Some(404) => Ok(()),
            Err(err) => Err(api_error(err).await),
        }
    }
}

impl Warehouse for BigQueryClient {
    #[instrument(level = "debug", skip_all, fields(dataset = %dataset))]
    async fn ensure_dataset(&self, dataset: &DatasetRef) -> Result<Creation> {
        let request = api::Dataset {
            dataset_reference: Some(api::DatasetReference {
                project_id: Some(dataset.project_id.clone()),
                dataset_id: Some(dataset.dataset_id.clone()),
                ..Default::default()
            }),
            location: self.location.clone(),
            ..Default::default()
        };
        let result = self
            .hub
            .datasets()
            .insert(request, &dataset.project_id)
            .doit()
            .await;
        creation_from(result).await
    }

    #[instrument(level = "debug", skip_all, fields(table = %table, fields = schema.len()))]
    async fn ensure_table(&self, table: &TableRef, schema: &Schema) -> Result<Creation> {
        let result = self
            .hub
            .tables()
            .insert(table_resource(table, schema), &table.project_id, &table.dataset_id)
            .doit()
            .await;
        creation_from(result).await
    }

    /// Start a load job through a resumable upload session carrying the file.
    #[instrument(level = "debug", skip_all, fields(table = %table, source = %source.display()))]
    async fn submit_load(
        &self,
        table: &TableRef,
        source: &Path,
        options: &LoadOptions,
    ) -> Result<JobRef> {
        let source_err = |e| WarehouseError::Source {
            path: source.to_path_buf(),
            source: e,
        };
        let file = File::open(source).map_err(source_err)?;
        let len = file.metadata().map_err(source_err)?.len();

        let job_id = new_job_id();
        debug!(job_id = %job_id, bytes = len, "opening upload session");
        let result = self
            .hub
            .jobs()
            .insert(
                load_job(table, options, &job_id, self.location.clone()),
                &table.project_id,
            )
            .upload_resumable(file, mime::APPLICATION_OCTET_STREAM)
            .await;
        let (_, job) = match result {
            Ok(ok) => ok,
            Err(err) => return Err(api_error(err).await),
        };

        let reference = job
            .job_reference
            .ok_or(WarehouseError::MissingJobReference)?;
        let job = JobRef {
            project_id: reference
                .project_id
                .unwrap_or_else(|| table.project_id.clone()),
            job_id: reference.job_id.ok_or(WarehouseError::MissingJobReference)?,
            location: reference.location.or_else(|| self.location.clone()),
        };
        info!(job_id = %job.job_id, bytes = len, "uploaded source, load job submitted");
        Ok(job)
    }

    #[instrument(level = "debug", skip_all, fields(job_id = %job.job_id))]
    async fn job_status(&self, job: &JobRef) -> Result<JobStatus> {
        let mut call = self.hub.jobs().get(&job.project_id, &job.job_id);
        if let Some(location) = &job.location {
            call = call.location(location);
        }
        match call.doit().await {
            Ok((_, job)) => Ok(JobStatus::from(job)),
            Err(err) => Err(api_error(err).await),
        }
    }
}

/// Map the outcome of an insert call onto the idempotent-creation contract.
///
/// Success is `Created`, 409 Conflict is `AlreadyExists`, anything else is an error.
async fn creation_from<T>(result: google_bigquery2::Result<T>) -> Result<Creation> {
    match result {
        Ok(_) => Ok(Creation::Created),
        Err(err) if error_status(&err) == Some(409) => Ok(Creation::AlreadyExists),
        Err(err) => Err(api_error(err).await),
    }
}

fn envelope_code(body: &serde_json::Value) -> Option<u16> {
    body.pointer("/error/code")
        .and_then(serde_json::Value::as_u64)
        .and_then(|code| u16::try_from(code).ok())
}

/// HTTP status behind a failed call, when the server answered at all.
fn error_status(err: &google_bigquery2::Error) -> Option<u16> {
    match err {
        google_bigquery2::Error::BadRequest(body) => envelope_code(body),
        google_bigquery2::Error::Failure(resp) => Some(resp.status().as_u16()),
        _ => None,
    }
}

/// Turn a server answer into `Api`, keeping the raw body when it is not an error envelope.
async fn api_error(err: google_bigquery2::Error) -> WarehouseError {
    match err {
        google_bigquery2::Error::BadRequest(body) => WarehouseError::Api {
            status: envelope_code(&body).unwrap_or_default(),
            message: body
                .pointer("/error/message")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string()),
        },
        google_bigquery2::Error::Failure(resp) => {
            let status = resp.status().as_u16();
            let message = match hyper::body::to_bytes(resp.into_body()).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => e.to_string(),
            };
            WarehouseError::Api { status, message }
        }
        other => WarehouseError::Client(other),
    }
}

fn new_job_id() -> String {
    format!("bqload_{}", Utc::now().format("%Y%m%d_%H%M%S_%6f"))
}

fn table_reference(table: &TableRef) -> api::TableReference {
    api::TableReference {
        project_id: Some(table.project_id.clone()),
        dataset_id: Some(table.dataset_id.clone()),
        table_id: Some(table.table_id.clone()),
        ..Default::default()
    }
}

fn table_resource(table: &TableRef, schema: &Schema) -> api::Table {
    let fields = schema
        .fields
        .iter()
        .map(|field| api::TableFieldSchema {
            name: Some(field.name.clone()),
            type_: Some(field.ty.as_str().to_string()),
            ..Default::default()
        })
        .collect();
    api::Table {
        table_reference: Some(table_reference(table)),
        schema: Some(api::TableSchema {
            fields: Some(fields),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn load_job(
    table: &TableRef,
    options: &LoadOptions,
    job_id: &str,
    location: Option<String>,
) -> api::Job {
    let load = api::JobConfigurationLoad {
        destination_table: Some(table_reference(table)),
        source_format: Some("CSV".into()),
        field_delimiter: Some(char::from(options.delimiter).to_string()),
        skip_leading_rows: Some(i32::try_from(options.skip_leading_rows).unwrap_or(i32::MAX)),
        write_disposition: Some(options.write_disposition.as_api_str().into()),
        // the table is created before the job runs
        create_disposition: Some("CREATE_NEVER".into()),
        ..Default::default()
    };
    api::Job {
        job_reference: Some(api::JobReference {
            project_id: Some(table.project_id.clone()),
            job_id: Some(job_id.to_string()),
            location,
            ..Default::default()
        }),
        configuration: Some(api::JobConfiguration {
            load: Some(load),
            ..Default::default()
        }),
        ..Default::default()
    }
}
