use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tabular_etl::{
    cli::{Cli, Commands},
    config::{JobConfig, LogLevel},
    credentials::read_credentials,
    database::{close_connection, list_tables, open_connection},
    pipeline::Pipeline,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // The job file is read before logging starts so its log level applies.
    let job = cli.command.job_file().map(JobConfig::from_file);
    let job_level = job.as_ref().and_then(|j| j.as_ref().ok()).map(JobConfig::log_level);
    init_logging(cli.log_level.or(job_level).unwrap_or_default());

    match run(cli.command, job).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(
    command: Commands,
    job: Option<tabular_etl::Result<JobConfig>>,
) -> anyhow::Result<ExitCode> {
    let job = job.transpose().context("Failed to read job file")?;

    match (command, job) {
        (Commands::Run { .. }, Some(job)) => {
            // Pipeline failures are logged where they happen.
            let Ok(report) = Pipeline::new(job).run().await else {
                return Ok(ExitCode::FAILURE);
            };
            for issue in &report.issues {
                warn!("Cleaning issue: {}", issue);
            }
            info!(
                "Job completed: {} rows extracted, {} rows loaded into '{}' in {:.2}s",
                report.extracted_rows,
                report.load.rows_written,
                report.load.table,
                report.total_time.as_secs_f64()
            );
        }
        (Commands::Preview { rows, .. }, Some(job)) => {
            let Ok(preview) = Pipeline::new(job).preview(rows).await else {
                return Ok(ExitCode::FAILURE);
            };
            println!("Schema ({} rows after cleaning):", preview.total_rows);
            for column in &preview.schema.columns {
                let nullable = if column.nullable { "NULL" } else { "NOT NULL" };
                println!("  {:<24} {:<10} {}", column.name, column.data_type, nullable);
            }
            println!("\nData Preview ({} rows):", preview.records.len());
            println!(
                "{}",
                serde_json::to_string_pretty(&preview.records.to_json_rows())?
            );
        }
        (Commands::ListTables { credentials }, _) => {
            let credentials = read_credentials(&credentials).with_context(|| {
                format!("Failed to read credentials from {}", credentials.display())
            })?;
            let mut handle = open_connection(&credentials).await?;
            let tables = list_tables(&handle).await;
            close_connection(&mut handle).await;
            for table in tables? {
                println!("{}", table);
            }
        }
        (Commands::GenerateDefaultJob, _) => {
            print!("{}", JobConfig::default_yaml());
        }
        (Commands::Run { .. } | Commands::Preview { .. }, None) => {
            anyhow::bail!("no job file given");
        }
    }

    Ok(ExitCode::SUCCESS)
}
