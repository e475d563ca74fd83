use crate::config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tabular-etl")]
#[command(about = "Extract tabular records, clean them and load them into a database table")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level: info, warn, error (overrides the job file; RUST_LOG wins over both)
    #[arg(long, global = true)]
    pub log_level: Option<LogLevel>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a job from a YAML job file
    Run {
        /// Path to the YAML job file
        job_file: PathBuf,
    },
    /// Extract and clean without loading; print the first rows as JSON
    Preview {
        /// Path to the YAML job file
        job_file: PathBuf,

        /// Number of rows to print
        #[arg(long, default_value = "10")]
        rows: usize,
    },
    /// List the tables in the database a credential file points to
    ListTables {
        /// Path to the YAML credential file
        credentials: PathBuf,
    },
    /// Print an example job file to STDOUT
    GenerateDefaultJob,
}

impl Commands {
    pub fn job_file(&self) -> Option<&PathBuf> {
        match self {
            Commands::Run { job_file } | Commands::Preview { job_file, .. } => Some(job_file),
            Commands::ListTables { .. } | Commands::GenerateDefaultJob => None,
        }
    }
}
