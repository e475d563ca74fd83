use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sqlx::{
    postgres::{types::PgInterval, PgArguments, PgConnectOptions, PgPoolOptions, PgRow, Postgres},
    query::Query,
    Column, Executor, PgPool, Row as SqlxRow, TypeInfo,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::{quote_ident, Backend};
use crate::{
    schema::{DataType, RecordSet, Row, Schema, Value},
    EtlError, Result,
};

/// Bind parameters are addressed with a 16-bit index.
const MAX_PARAMETERS: usize = 65_535;

pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// `label` names the server in errors; it must not carry the password.
    pub async fn connect(url: &str, label: &str) -> Result<Self> {
        let options = PgConnectOptions::from_str(url).map_err(|e| {
            EtlError::Connection(format!("Invalid PostgreSQL connection for {}: {}", label, e))
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| {
                EtlError::Connection(format!("Failed to connect to PostgreSQL at {}: {}", label, e))
            })?;

        Ok(Self { pool })
    }

    fn column_type(data_type: DataType) -> &'static str {
        match data_type {
            DataType::Integer => "BIGINT",
            DataType::Float => "DOUBLE PRECISION",
            DataType::Boolean => "BOOLEAN",
            DataType::Date => "DATE",
            DataType::Timestamp => "TIMESTAMPTZ",
            DataType::String | DataType::Null => "TEXT",
        }
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(EtlError::from))
            .collect()
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(EtlError::from))
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

        let width = schema.columns.len();
        let quoted_columns: Vec<String> = schema.columns.iter().map(|c| quote_ident(&c.name)).collect();
        let mut total_written = 0;

        for chunk in rows.chunks(self.max_rows_per_statement(width)) {
            let value_groups: Vec<String> = (0..chunk.len())
                .map(|row_index| {
                    let placeholders: Vec<String> = (1..=width)
                        .map(|col_index| format!("${}", row_index * width + col_index))
                        .collect();
                    format!("({})", placeholders.join(", "))
                })
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
        (MAX_PARAMETERS / columns.max(1)).max(1)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: Value,
    data_type: DataType,
) -> Query<'q, Postgres, PgArguments> {
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

fn decode_value(row: &PgRow, index: usize) -> Result<Value> {
    let column = row.column(index);
    let type_name = column.type_info().name().to_uppercase();

    let value = match type_name.as_str() {
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(index)?.map(Value::String)
        }
        "INT2" => row
            .try_get::<Option<i16>, _>(index)?
            .map(|v| Value::Integer(v.into())),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)?
            .map(|v| Value::Integer(v.into())),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::Integer),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)?
            .map(|v| Value::Float(v.into())),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(Value::Float),
        "NUMERIC" => match row.try_get::<Option<Decimal>, _>(index)? {
            Some(d) => Some(match d.to_f64() {
                Some(f) => Value::Float(f),
                None => Value::String(d.to_string()),
            }),
            None => None,
        },
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::Boolean),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(index)?.map(Value::Date),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(|dt| Value::Timestamp(DateTime::from_naive_utc_and_offset(dt, Utc))),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(Value::Timestamp),
        "TIME" => row
            .try_get::<Option<NaiveTime>, _>(index)?
            .map(|t| Value::String(t.to_string())),
        "INTERVAL" => row
            .try_get::<Option<PgInterval>, _>(index)?
            .map(|interval| Value::String(interval_text(&interval))),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)?
            .map(|bytes| Value::String(bytea_text(&bytes))),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(index)?
            .map(|u| Value::String(u.to_string())),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(index)?
            .map(|json| Value::from_json(&json)),
        other => {
            return Err(EtlError::Parse(format!(
                "Unsupported PostgreSQL type {} in column '{}'",
                other,
                column.name()
            )))
        }
    };

    Ok(value.unwrap_or(Value::Null))
}

/// Postgres' own hex output form, `\x` followed by two digits per byte.
fn bytea_text(bytes: &[u8]) -> String {
    format!("\\x{}", hex::encode(bytes))
}

/// ISO 8601 duration, e.g. `P1M2DT3.5S`.
fn interval_text(interval: &PgInterval) -> String {
    let sign = if interval.microseconds < 0 { "-" } else { "" };
    let micros = interval.microseconds.unsigned_abs();
    let whole = micros / 1_000_000;
    let fraction = micros % 1_000_000;

    let seconds = if fraction == 0 {
        whole.to_string()
    } else {
        let digits = format!("{:06}", fraction);
        format!("{}.{}", whole, digits.trim_end_matches('0'))
    };

    format!("P{}M{}DT{}{}S", interval.months, interval.days, sign, seconds)
}
