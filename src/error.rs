use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum EtlError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

pub type Result<T> = std::result::Result<T, EtlError>;

/// Coarse classification callers can branch on without matching every
/// wrapped library error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Parse,
    Connection,
    ValidationGap,
    Configuration,
}

impl EtlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EtlError::NotFound(_) => ErrorKind::NotFound,
            EtlError::Parse(_) | EtlError::Json(_) | EtlError::Yaml(_) => ErrorKind::Parse,
            EtlError::Connection(_) => ErrorKind::Connection,
            EtlError::Validation(_) => ErrorKind::ValidationGap,
            EtlError::Configuration(_) => ErrorKind::Configuration,
            EtlError::Io(e) => io_kind(e),
            EtlError::Csv(e) => match e.kind() {
                csv::ErrorKind::Io(io) => io_kind(io),
                _ => ErrorKind::Parse,
            },
            EtlError::Database(e) => match e {
                sqlx::Error::RowNotFound => ErrorKind::NotFound,
                sqlx::Error::ColumnNotFound(_) => ErrorKind::ValidationGap,
                sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => ErrorKind::Parse,
                sqlx::Error::Configuration(_) => ErrorKind::Configuration,
                // 42P01: undefined_table
                sqlx::Error::Database(db) if db.code().as_deref() == Some("42P01") => {
                    ErrorKind::NotFound
                }
                _ => ErrorKind::Connection,
            },
            EtlError::Http(e) => {
                if e.status() == Some(reqwest::StatusCode::NOT_FOUND) {
                    ErrorKind::NotFound
                } else if e.is_decode() {
                    ErrorKind::Parse
                } else {
                    ErrorKind::Connection
                }
            }
            EtlError::ObjectStore(e) => match e {
                object_store::Error::NotFound { .. } => ErrorKind::NotFound,
                _ => ErrorKind::Connection,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

fn io_kind(err: &std::io::Error) -> ErrorKind {
    match err.kind() {
        std::io::ErrorKind::NotFound => ErrorKind::NotFound,
        std::io::ErrorKind::InvalidData => ErrorKind::Parse,
        _ => ErrorKind::Connection,
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "not found"),
            ErrorKind::Parse => write!(f, "parse error"),
            ErrorKind::Connection => write!(f, "connection error"),
            ErrorKind::ValidationGap => write!(f, "validation gap"),
            ErrorKind::Configuration => write!(f, "configuration error"),
        }
    }
}
