use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{
    query::Query,
    sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Column, Executor, Row as SqlxRow, SqlitePool, TypeInfo, ValueRef,
};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{quote_ident, Backend};
use crate::{
    schema::{DataType, RecordSet, Row, Schema, Value},
    EtlError, Result,
};

/// SQLite accepts 999 bound variables per statement.
const MAX_VARIABLES: usize = 900;

pub struct SqliteBackend {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteBackend {
    /// Opens the database file, creating it and its parent directory when
    /// missing.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    EtlError::Connection(format!(
                        "Failed to create directory for SQLite database '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                EtlError::Connection(format!(
                    "Failed to connect to SQLite database '{}': {}. Check file path and permissions.",
                    path.display(),
                    e
                ))
            })?;

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn column_type(data_type: DataType) -> &'static str {
        match data_type {
            DataType::Integer => "INTEGER",
            DataType::Float => "REAL",
            DataType::Boolean => "BOOLEAN",
            DataType::Date => "DATE",
            DataType::Timestamp => "DATETIME",
            DataType::String | DataType::Null => "TEXT",
        }
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(EtlError::from))
            .collect()
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(table)))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(EtlError::from))
            .collect()
    }

    async fn fetch_all(&self, query: &str) -> Result<RecordSet> {
        let rows = sqlx::query(query).fetch_all(&self.pool).await?;

        // An empty result still has a shape; describe the query for it.
        let columns = match rows.first() {
            Some(first) => first.columns().iter().map(|c| c.name().to_string()).collect(),
            None => self
                .pool
                .describe(query)
                .await?
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
        };

        let mut records = RecordSet::new(columns);
        for row in &rows {
            let values = (0..row.len())
                .map(|index| decode_value(row, index))
                .collect::<Result<Row>>()?;
            records.push_row(values)?;
        }

        Ok(records)
    }

    async fn recreate_table(&self, table: &str, schema: &Schema) -> Result<()> {
        let table = quote_ident(table);
        let column_definitions: Vec<String> = schema
            .columns
            .iter()
            .map(|col| {
                let nullable = if col.nullable { "" } else { " NOT NULL" };
                format!(
                    "{} {}{}",
                    quote_ident(&col.name),
                    Self::column_type(col.data_type),
                    nullable
                )
            })
            .collect();

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(&self.pool)
            .await?;

        let create_sql = format!("CREATE TABLE {} ({})", table, column_definitions.join(", "));
        debug!("{}", create_sql);
        sqlx::query(&create_sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_rows(&self, table: &str, schema: &Schema, rows: &[Row]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let quoted_columns: Vec<String> = schema.columns.iter().map(|c| quote_ident(&c.name)).collect();
        let placeholders_per_row = vec!["?"; schema.columns.len()].join(", ");
        let mut total_written = 0;

        for chunk in rows.chunks(self.max_rows_per_statement(schema.columns.len())) {
            let value_groups: Vec<String> = (0..chunk.len())
                .map(|_| format!("({})", placeholders_per_row))
                .collect();

            let insert_sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                quote_ident(table),
                quoted_columns.join(", "),
                value_groups.join(", ")
            );

            let mut query = sqlx::query(&insert_sql);
            for row in chunk {
                for (value, column) in row.iter().zip(&schema.columns) {
                    query = bind_value(query, value.coerce_to(column.data_type), column.data_type);
                }
            }

            let result = query.execute(&self.pool).await?;
            total_written += result.rows_affected();
        }

        Ok(total_written)
    }

    fn max_rows_per_statement(&self, columns: usize) -> usize {
        (MAX_VARIABLES / columns.max(1)).max(1)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: Value,
    data_type: DataType,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::String(s) => query.bind(s),
        Value::Integer(i) => query.bind(i),
        Value::Float(f) => query.bind(f),
        Value::Boolean(b) => query.bind(b),
        Value::Date(d) => query.bind(d),
        Value::Timestamp(t) => query.bind(t),
        Value::Null => match data_type {
            DataType::Integer => query.bind(None::<i64>),
            DataType::Float => query.bind(None::<f64>),
            DataType::Boolean => query.bind(None::<bool>),
            DataType::Date => query.bind(None::<NaiveDate>),
            DataType::Timestamp => query.bind(None::<DateTime<Utc>>),
            DataType::String | DataType::Null => query.bind(None::<String>),
        },
    }
}

/// Declared column types drive decoding so that dates and booleans come back
/// typed; anything else follows the stored value's class.
fn decode_value(row: &SqliteRow, index: usize) -> Result<Value> {
    let declared = row.column(index).type_info().name().to_uppercase();

    let value = match declared.as_str() {
        "DATE" => row.try_get::<Option<NaiveDate>, _>(index)?.map(Value::Date),
        "DATETIME" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(Value::Timestamp),
        "BOOLEAN" => row.try_get::<Option<bool>, _>(index)?.map(Value::Boolean),
        _ => return decode_stored_value(row, index),
    };

    Ok(value.unwrap_or(Value::Null))
}

fn decode_stored_value(row: &SqliteRow, index: usize) -> Result<Value> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage = raw.type_info().name().to_string();

    match storage.as_str() {
        "INTEGER" => Ok(Value::Integer(row.try_get(index)?)),
        "REAL" => Ok(Value::Float(row.try_get(index)?)),
        "TEXT" => Ok(Value::String(row.try_get(index)?)),
        other => Err(EtlError::Parse(format!(
            "Unsupported SQLite value of type {} in column '{}'",
            other,
            row.column(index).name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaInferer;

    async fn backend() -> (tempfile::TempDir, SqliteBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::connect(&dir.path().join("nested/test.db"))
            .await
            .unwrap();
        (dir, backend)
    }

    fn sample() -> RecordSet {
        RecordSet::with_rows(
            vec!["id".into(), "name".into(), "joined".into(), "active".into()],
            vec![
                vec![
                    Value::Integer(1),
                    "Alice".into(),
                    Value::Date(NaiveDate::from_ymd_opt(2020, 5, 17).unwrap()),
                    Value::Boolean(true),
                ],
                vec![Value::Integer(2), Value::Null, Value::Null, Value::Boolean(false)],
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_connect_creates_parent_directory() {
        let (dir, backend) = backend().await;
        assert!(dir.path().join("nested").is_dir());
        assert!(backend.path().ends_with("test.db"));
        assert!(backend.list_tables().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recreate_insert_and_fetch() {
        let (_dir, backend) = backend().await;
        let records = sample();
        let schema = SchemaInferer::infer(&records);

        backend.recreate_table("users", &schema).await.unwrap();
        let written = backend.insert_rows("users", &schema, records.rows()).await.unwrap();
        assert_eq!(written, 2);

        let fetched = backend.fetch_all("SELECT * FROM \"users\" ORDER BY id").await.unwrap();
        assert_eq!(fetched, records);
        assert_eq!(backend.list_tables().await.unwrap(), vec!["users".to_string()]);
        assert_eq!(
            backend.table_columns("users").await.unwrap(),
            vec!["id", "name", "joined", "active"]
        );
    }

    #[tokio::test]
    async fn test_recreate_replaces_existing_table() {
        let (_dir, backend) = backend().await;
        let records = sample();
        let schema = SchemaInferer::infer(&records);

        backend.recreate_table("users", &schema).await.unwrap();
        backend.insert_rows("users", &schema, records.rows()).await.unwrap();
        backend.recreate_table("users", &schema).await.unwrap();

        let fetched = backend.fetch_all("SELECT * FROM \"users\"").await.unwrap();
        assert!(fetched.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_with_no_matching_rows_keeps_columns() {
        let (_dir, backend) = backend().await;
        let records = sample();
        let schema = SchemaInferer::infer(&records);
        backend.recreate_table("users", &schema).await.unwrap();
        backend.insert_rows("users", &schema, records.rows()).await.unwrap();

        let fetched = backend
            .fetch_all("SELECT id, name AS full_name FROM \"users\" WHERE id > 100")
            .await
            .unwrap();
        assert!(fetched.is_empty());
        assert_eq!(fetched.columns(), &["id".to_string(), "full_name".to_string()]);
    }

    #[tokio::test]
    async fn test_insert_is_chunked() {
        let (_dir, backend) = backend().await;
        let rows: Vec<Row> = (0..1000).map(|i| vec![Value::Integer(i), Value::Float(i as f64)]).collect();
        let records = RecordSet::with_rows(vec!["a".into(), "b".into()], rows).unwrap();
        let schema = SchemaInferer::infer(&records);

        assert_eq!(backend.max_rows_per_statement(2), 450);
        backend.recreate_table("wide", &schema).await.unwrap();
        let written = backend.insert_rows("wide", &schema, records.rows()).await.unwrap();
        assert_eq!(written, 1000);
    }
}
