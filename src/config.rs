use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{
    cleaner::CleaningProfile,
    extract::SourceDescriptor,
    loader::DEFAULT_BATCH_SIZE,
    EtlError, Result,
};

pub const JOB_VERSION: u32 = 1;

/// A job document: where records come from, how they are cleaned and which
/// table they replace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub version: u32,
    pub source: SourceDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleaning: Option<CleaningProfile>,
    pub destination: DestinationConfig,
    #[serde(default)]
    pub options: OptionsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub credentials: PathBuf,
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OptionsConfig {
    pub batch_size: Option<usize>,
    pub log_level: Option<LogLevel>,
    pub progress: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_filter())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = &'static str;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err("Invalid log level. Valid values: info, warn, error"),
        }
    }
}

impl JobConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EtlError::NotFound(format!(
                "Job file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Expands `${VAR}` placeholders, parses and validates a job document.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content)?;
        let job: JobConfig = serde_yaml::from_str(&content)?;
        job.validate()?;
        Ok(job)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != JOB_VERSION {
            return Err(EtlError::Configuration(format!(
                "Unsupported job version {} (expected {})",
                self.version, JOB_VERSION
            )));
        }
        if self.destination.table.trim().is_empty() {
            return Err(EtlError::Configuration(
                "destination.table must not be empty".to_string(),
            ));
        }
        if self.options.batch_size == Some(0) {
            return Err(EtlError::Configuration(
                "options.batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The configured cleaning rules, or the default profile for the source.
    pub fn cleaning_profile(&self) -> CleaningProfile {
        self.cleaning
            .clone()
            .unwrap_or_else(|| CleaningProfile::for_source(self.source.kind()))
    }

    pub fn batch_size(&self) -> usize {
        self.options.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }

    pub fn log_level(&self) -> LogLevel {
        self.options.log_level.unwrap_or_default()
    }

    pub fn show_progress(&self) -> bool {
        self.options.progress.unwrap_or(false)
    }

    pub fn default_yaml() -> &'static str {
        DEFAULT_JOB_YAML
    }
}

const DEFAULT_JOB_YAML: &str = r#"version: 1

source:
  kind: file            # file | endpoint | object_store | relational
  path: data/users.csv
  # kind: endpoint
  # url: https://api.example.com/products
  # kind: object_store
  # bucket: raw-exports
  # key: stores/2024.csv
  # kind: relational
  # credentials: source_creds.yaml
  # query: SELECT * FROM users

# Optional. Defaults depend on the source kind.
cleaning:
  deduplicate: true
  drop_incomplete: false
  date_mode: per_value  # per_value | whole_column
  columns:
    - name: date_of_birth
      role: date
    - name: id
      role: identifier

destination:
  credentials: db_creds.yaml
  table: dim_users

options:
  batch_size: 1000
  log_level: info       # info | warn | error
  progress: true
"#;

/// Replaces `${VAR_NAME}` patterns with values from the environment.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let env_var_pattern = Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| EtlError::Configuration(format!("Invalid placeholder pattern: {}", e)))?;
    let mut result = input.to_string();

    for caps in env_var_pattern.captures_iter(input) {
        if let Some(var_name) = caps.get(1) {
            let var_name_str = var_name.as_str();
            let env_value = std::env::var(var_name_str).map_err(|_| {
                EtlError::Configuration(format!(
                    "Environment variable '{}' not found",
                    var_name_str
                ))
            })?;

            let pattern = format!("${{{}}}", var_name_str);
            result = result.replace(&pattern, &env_value);
        }
    }

    Ok(result)
}
