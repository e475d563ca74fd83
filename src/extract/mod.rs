pub mod bucket;
pub mod endpoint;
pub mod file;
pub mod relational;

pub use bucket::{extract_from_object_store, extract_from_store};
pub use endpoint::extract_from_endpoint;
pub use file::extract_from_file;
pub use relational::{extract_from_relational, read_table};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

use crate::{credentials::read_credentials, schema::RecordSet, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    File,
    Endpoint,
    ObjectStore,
    Relational,
}

/// Where a run pulls its records from. Built once from the job file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceDescriptor {
    File { path: PathBuf },
    Endpoint { url: String },
    ObjectStore { bucket: String, key: String },
    Relational { credentials: PathBuf, query: String },
}

impl SourceDescriptor {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceDescriptor::File { .. } => SourceKind::File,
            SourceDescriptor::Endpoint { .. } => SourceKind::Endpoint,
            SourceDescriptor::ObjectStore { .. } => SourceKind::ObjectStore,
            SourceDescriptor::Relational { .. } => SourceKind::Relational,
        }
    }
}

impl std::fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceDescriptor::File { path } => write!(f, "file {}", path.display()),
            SourceDescriptor::Endpoint { url } => write!(f, "endpoint {}", url),
            SourceDescriptor::ObjectStore { bucket, key } => {
                write!(f, "object s3://{}/{}", bucket, key)
            }
            SourceDescriptor::Relational { credentials, .. } => {
                write!(f, "query via {}", credentials.display())
            }
        }
    }
}

/// Extracts records from whichever source the descriptor names.
pub async fn extract(source: &SourceDescriptor) -> Result<RecordSet> {
    info!("→ Extracting from {}", source);

    let records = match source {
        SourceDescriptor::File { path } => extract_from_file(path)?,
        SourceDescriptor::Endpoint { url } => extract_from_endpoint(url).await?,
        SourceDescriptor::ObjectStore { bucket, key } => {
            extract_from_object_store(bucket, key).await?
        }
        SourceDescriptor::Relational { credentials, query } => {
            let credentials = read_credentials(credentials)?;
            extract_from_relational(&credentials, query).await?
        }
    };

    info!(
        "→ {} rows, {} columns extracted",
        records.len(),
        records.columns().len()
    );
    Ok(records)
}
