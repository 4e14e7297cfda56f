// src/main.rs

mod adp_client;
mod cascade_client;
mod config;
mod export;
mod google_cloud;
mod hierarchy;
mod payroll;
mod report;
mod report_tests;
mod token;

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::adp_client::{AdpClient, AdpCredentials, AdpError};
use crate::cascade_client::{CascadeClient, CascadeCredentials, CascadeError};
use crate::config::AppConfig;
use crate::export::ExportError;
use crate::google_cloud::{GoogleCloudClient, GoogleCloudError};
use crate::hierarchy::HierarchyIndex;
use crate::report::{ReportError, ReportPeriod};

#[derive(Parser, Debug)]
#[command(
    name = "hr-recon",
    version,
    about = "Monthly HR reports and payroll reconciliation from Cascade and ADP"
)]
struct Cli {
    /// Reporting period as YYYY-MM. Defaults to the previous calendar month.
    #[arg(long)]
    month: Option<ReportPeriod>,

    /// Where report files are written. Overrides OUTPUT_DIR.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Keep report files local even when a report bucket is configured.
    #[arg(long)]
    skip_upload: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Headcount snapshot of every employee with hierarchy and payroll.
    Headcount,
    /// Leavers in the period, with age, service and line manager.
    Leavers,
    /// Cross-check of ADP-processed employees against the ADP workers feed.
    Reconcile,
    /// All three reports from one set of fetches.
    All,
}

impl Command {
    fn wants_headcount(&self) -> bool {
        matches!(self, Command::Headcount | Command::All)
    }

    fn wants_leavers(&self) -> bool {
        matches!(self, Command::Leavers | Command::All)
    }

    fn wants_reconciliation(&self) -> bool {
        matches!(self, Command::Reconcile | Command::All)
    }
}

// --- Error Handling ---

#[derive(Error, Debug)]
enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] envy::Error),

    #[error("Google Cloud error: {0}")]
    Google(#[from] GoogleCloudError),

    #[error("Cascade API error: {0}")]
    Cascade(#[from] CascadeError),

    #[error("ADP API error: {0}")]
    Adp(#[from] AdpError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("IO error: {source} ({context})")]
    Io {
        source: std::io::Error,
        context: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("Failed to load configuration from environment")?;

    run(cli, config).await.context("hr-recon run failed")?;
    Ok(())
}

async fn run(cli: Cli, config: AppConfig) -> Result<(), AppError> {
    let period = cli
        .month
        .unwrap_or_else(|| ReportPeriod::previous_month(Utc::now().date_naive()));
    let output_dir = cli.output_dir.unwrap_or_else(|| config.output_dir.clone());
    info!(
        "Reporting period {} ({} to {})",
        period.label(),
        period.first_day(),
        period.last_day()
    );

    let google = GoogleCloudClient::discover(config.gcp_project_id.clone()).await?;

    let cascade_credentials: CascadeCredentials =
        google.fetch_secret_json(&config.cascade_secret_name).await?;
    let cascade = CascadeClient::new(cascade_credentials)?;

    let employees = cascade.fetch_employees().await?;
    let jobs = cascade.fetch_jobs().await?;
    let nodes = cascade.fetch_hierarchy().await?;
    let index = HierarchyIndex::build(nodes);
    info!(
        "Fetched {} employees, {} jobs, {} hierarchy nodes",
        employees.len(),
        jobs.len(),
        index.len()
    );

    let mut outputs: Vec<PathBuf> = Vec::new();

    if cli.command.wants_headcount() {
        let rows = report::build_headcount(&employees, &jobs, &index)?;
        let path = output_dir.join(export::report_file_name("headcount", &period.label()));
        export::write_csv(&path, &rows)?;
        outputs.push(path);
    }

    if cli.command.wants_leavers() {
        let leavers = cascade
            .fetch_leavers(period.first_day(), period.last_day())
            .await?;
        let rows = report::build_leavers(&leavers, &employees, &jobs, &index, &cascade).await?;
        let path = output_dir.join(export::report_file_name("leavers", &period.label()));
        export::write_csv(&path, &rows)?;
        outputs.push(path);
    }

    if cli.command.wants_reconciliation() {
        let adp_credentials: AdpCredentials =
            google.fetch_secret_json(&config.adp_secret_name).await?;
        let adp = AdpClient::new(adp_credentials)?;
        let adp_workers = adp.fetch_workers().await?;
        let rows = report::build_adp_reconciliation(&employees, &jobs, &index, &adp_workers);
        let path = output_dir.join(export::report_file_name(
            "adp_reconciliation",
            &period.label(),
        ));
        export::write_csv(&path, &rows)?;
        outputs.push(path);
    }

    match (&config.report_bucket, cli.skip_upload) {
        (Some(bucket), false) => {
            for path in &outputs {
                upload_report(&google, bucket, path).await?;
            }
        }
        (Some(_), true) => info!("Upload skipped (--skip-upload)"),
        (None, _) => info!("No report bucket configured, files kept locally"),
    }

    info!("Run complete: {} report file(s)", outputs.len());
    Ok(())
}

async fn upload_report(
    google: &GoogleCloudClient,
    bucket: &str,
    path: &Path,
) -> Result<(), AppError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| AppError::Io {
        source,
        context: path.display().to_string(),
    })?;
    let object = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "report.csv".to_string());
    google
        .upload_object(bucket, &object, bytes, "text/csv")
        .await?;
    Ok(())
}
