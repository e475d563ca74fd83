pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::{
    credentials::Credentials,
    schema::{RecordSet, Row, Schema},
    EtlError, Result,
};

/// One open destination database. Implementations own a single-connection
/// pool.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Base tables in the default schema, sorted by name.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Column names of `table` in declaration order.
    async fn table_columns(&self, table: &str) -> Result<Vec<String>>;

    /// Runs a query and collects every row. The columns are known even when
    /// no row matches.
    async fn fetch_all(&self, query: &str) -> Result<RecordSet>;

    /// Drops `table` if present and creates it from `schema`.
    async fn recreate_table(&self, table: &str, schema: &Schema) -> Result<()>;

    /// Inserts rows whose values line up with `schema.columns`. Returns the
    /// number of rows written.
    async fn insert_rows(&self, table: &str, schema: &Schema, rows: &[Row]) -> Result<u64>;

    /// Most rows that fit into one multi-row INSERT for `columns` columns.
    fn max_rows_per_statement(&self, columns: usize) -> usize;

    async fn close(&self);
}

/// An open (or closed) destination connection. Closing is idempotent and
/// every operation on a closed handle is a connection error.
pub struct ConnectionHandle {
    backend: Option<Box<dyn Backend>>,
    label: String,
}

impl ConnectionHandle {
    pub fn new(backend: Box<dyn Backend>, label: impl Into<String>) -> Self {
        Self {
            backend: Some(backend),
            label: label.into(),
        }
    }

    pub fn closed(label: impl Into<String>) -> Self {
        Self {
            backend: None,
            label: label.into(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn backend(&self) -> Result<&dyn Backend> {
        self.backend.as_deref().ok_or_else(|| {
            EtlError::Connection(format!("connection handle for {} is closed", self.label))
        })
    }

    pub async fn close(&mut self) {
        if let Some(backend) = self.backend.take() {
            backend.close().await;
            info!("Closed connection to {}", self.label);
        } else {
            debug!("Connection to {} already closed", self.label);
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("label", &self.label)
            .field("open", &self.is_open())
            .finish()
    }
}

pub async fn open_connection(credentials: &Credentials) -> Result<ConnectionHandle> {
    let label = credentials.describe();
    info!("Connecting to {} database {}", credentials.engine(), label);

    let backend: Box<dyn Backend> = match credentials {
        Credentials::Sqlite { path } => Box::new(sqlite::SqliteBackend::connect(path).await?),
        Credentials::Postgres { .. } => {
            let url = credentials.connection_url()?;
            Box::new(postgres::PostgresBackend::connect(&url, &label).await?)
        }
    };

    Ok(ConnectionHandle::new(backend, label))
}

pub async fn list_tables(handle: &ConnectionHandle) -> Result<Vec<String>> {
    handle.backend()?.list_tables().await
}

pub async fn close_connection(handle: &mut ConnectionHandle) {
    handle.close().await;
}

/// Double-quotes an identifier, doubling any embedded quotes. Both
/// supported engines accept this form.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("order"), "\"order\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[tokio::test]
    async fn test_closed_handle_is_a_connection_error() {
        let handle = ConnectionHandle::closed("sqlite:test.db");
        assert!(!handle.is_open());
        let err = list_tables(&handle).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let credentials = Credentials::Sqlite {
            path: dir.path().join("close.db"),
        };
        let mut handle = open_connection(&credentials).await.unwrap();
        assert!(handle.is_open());

        close_connection(&mut handle).await;
        close_connection(&mut handle).await;
        assert!(!handle.is_open());
        assert!(list_tables(&handle).await.is_err());
    }

    #[tokio::test]
    async fn test_open_unreachable_postgres_fails() {
        let credentials = Credentials::Postgres {
            user: "etl".to_string(),
            password: "secret".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1,
            database: "warehouse".to_string(),
        };
        let err = open_connection(&credentials).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(!err.to_string().contains("secret"));
    }
}
