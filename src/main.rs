use anyhow::{Context, Result};
use bqload::{
    config::Args,
    load::run_load,
    warehouse::{BigQueryClient, Creation},
};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_target(false)
        .init();
    info!("startup");

    // ─── 2) configuration ────────────────────────────────────────────
    let cfg = args.into_config()?;
    info!(
        table = %cfg.table,
        csv = %cfg.csv_path.display(),
        endpoint = %cfg.endpoint,
        location = ?cfg.location,
        "configuration"
    );

    // ─── 3) warehouse client ─────────────────────────────────────────
    let client = BigQueryClient::from_service_account_file(&cfg.credentials, &cfg.endpoint)
        .await
        .context("authenticating to BigQuery")?
        .with_location(cfg.location.clone());

    // ─── 4) load ─────────────────────────────────────────────────────
    match run_load(&client, &cfg).await {
        Ok(summary) => {
            info!(
                job_id = %summary.job.job_id,
                dataset_created = summary.dataset == Creation::Created,
                table_created = summary.table == Creation::Created,
                rows = ?summary.output_rows,
                "Data imported successfully!"
            );
            Ok(())
        }
        Err(e) => {
            error!("load failed: {:#}", e);
            Err(e)
        }
    }
}
