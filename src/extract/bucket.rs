use object_store::{aws::AmazonS3Builder, path::Path, ObjectStore};
use tracing::info;

use crate::{
    schema::{RecordSet, Row, Value},
    EtlError, Result,
};

pub const FIELD_DELIMITER: char = ',';

/// Fetches `key` from an S3 bucket configured from the standard `AWS_*`
/// environment variables.
pub async fn extract_from_object_store(bucket: &str, key: &str) -> Result<RecordSet> {
    let store = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .build()
        .map_err(|e| {
            EtlError::Connection(format!(
                "Failed to configure S3 client for bucket '{}': {}",
                bucket, e
            ))
        })?;

    extract_from_store(&store, key).await
}

/// Reads an object as headerless, comma-delimited lines. Columns are
/// positional and named `"0"`, `"1"`, ...
pub async fn extract_from_store(store: &dyn ObjectStore, key: &str) -> Result<RecordSet> {
    let location = Path::from(key);
    info!("Fetching object {}", location);

    let bytes = store.get(&location).await?.bytes().await?;
    let text = std::str::from_utf8(&bytes)
        .map_err(|e| EtlError::Parse(format!("object '{}' is not valid UTF-8: {}", key, e)))?;

    let records = records_from_lines(text)?;
    info!("Read {} rows from object {}", records.len(), location);
    Ok(records)
}

/// Short lines are padded with `Null` up to the widest line.
pub fn records_from_lines(text: &str) -> Result<RecordSet> {
    let mut lines: Vec<Row> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.split(FIELD_DELIMITER).map(Value::from_field).collect())
        .collect();

    let width = lines.iter().map(Vec::len).max().unwrap_or(0);
    let columns = (0..width).map(|i| i.to_string()).collect();

    for row in &mut lines {
        row.resize(width, Value::Null);
    }
    RecordSet::with_rows(columns, lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use object_store::{memory::InMemory, PutPayload};

    #[test]
    fn test_records_from_lines_positional_columns() {
        let records = records_from_lines("data1,10\ndata2\n\ndata3,30,x\n").unwrap();
        assert_eq!(records.columns(), &["0", "1", "2"].map(String::from));
        assert_eq!(records.len(), 3);
        assert_eq!(records.get(0, "0"), Some(&Value::from("data1")));
        assert_eq!(records.get(0, "1"), Some(&Value::Integer(10)));
        assert_eq!(records.get(1, "1"), Some(&Value::Null));
        assert_eq!(records.get(2, "2"), Some(&Value::from("x")));
    }

    #[test]
    fn test_records_from_empty_text() {
        let records = records_from_lines("").unwrap();
        assert!(records.is_empty());
        assert!(records.columns().is_empty());
    }

    #[test]
    fn test_ragged_lines_are_padded_to_widest() {
        let records = records_from_lines("a\nb,c,d,e\nf,g\n").unwrap();
        assert_eq!(records.columns().len(), 4);
        assert!(records.rows().iter().all(|row| row.len() == 4));
        assert_eq!(records.get(0, "3"), Some(&Value::Null));
        assert_eq!(records.get(1, "3"), Some(&Value::from("e")));
        assert_eq!(records.get(2, "1"), Some(&Value::from("g")));
    }

    #[tokio::test]
    async fn test_extract_from_store() {
        let store = InMemory::new();
        let location = Path::from("exports/stores.csv");
        store
            .put(&location, PutPayload::from(b"s1,Leeds,1\ns2,York,\n".to_vec()))
            .await
            .unwrap();

        let records = extract_from_store(&store, "exports/stores.csv").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records.get(1, "1"), Some(&Value::from("York")));
        assert_eq!(records.get(1, "2"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let store = InMemory::new();
        let err = extract_from_store(&store, "missing.csv").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
