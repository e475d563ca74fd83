use tracing::{info, warn};

use crate::{
    credentials::Credentials,
    database::{close_connection, list_tables, open_connection, quote_ident, ConnectionHandle},
    schema::RecordSet,
    EtlError, Result,
};

/// Opens a connection, runs `query` and closes the connection again whether
/// or not the query succeeded.
pub async fn extract_from_relational(credentials: &Credentials, query: &str) -> Result<RecordSet> {
    let mut handle = open_connection(credentials).await?;
    info!("Running query against {}", handle.label());

    let result = match handle.backend() {
        Ok(backend) => backend.fetch_all(query).await,
        Err(e) => Err(e),
    };
    close_connection(&mut handle).await;

    if let Err(e) = &result {
        warn!("Query against {} failed: {}", credentials.describe(), e);
    }
    result
}

/// Reads every row of `table`. An empty table still reports its columns.
pub async fn read_table(handle: &ConnectionHandle, table: &str) -> Result<RecordSet> {
    let tables = list_tables(handle).await?;
    if !tables.iter().any(|t| t == table) {
        return Err(EtlError::NotFound(format!(
            "Table '{}' does not exist in {}",
            table,
            handle.label()
        )));
    }

    let backend = handle.backend()?;
    let records = backend
        .fetch_all(&format!("SELECT * FROM {}", quote_ident(table)))
        .await?;

    if records.is_empty() {
        return Ok(RecordSet::new(backend.table_columns(table).await?));
    }
    Ok(records)
}
