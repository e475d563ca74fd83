use csv::ReaderBuilder;
use std::path::Path;
use tracing::{debug, info};

use crate::{
    schema::{RecordSet, Row, Value},
    EtlError, Result,
};

/// Reads a comma-delimited file whose first line is the header. Rows shorter
/// than the header are padded with nulls; longer rows are rejected.
pub fn extract_from_file<P: AsRef<Path>>(path: P) -> Result<RecordSet> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(EtlError::NotFound(format!(
            "CSV file not found: {}",
            path.display()
        )));
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    debug!("CSV headers for {}: {:?}", path.display(), headers);

    let mut records = RecordSet::new(headers);
    let width = records.columns().len();

    for result in reader.records() {
        let record = result?;
        if record.len() > width {
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            return Err(EtlError::Parse(format!(
                "{} line {}: expected {} fields, found {}",
                path.display(),
                line,
                width,
                record.len()
            )));
        }

        let mut row: Row = record.iter().map(Value::from_field).collect();
        row.resize(width, Value::Null);
        records.push_row(row)?;
    }

    info!("Read {} rows from {}", records.len(), path.display());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_reads_header_and_rows() {
        let file = csv_file("id,name,score\n1,Alice,9.5\n2,Bob,\n");
        let records = extract_from_file(file.path()).unwrap();

        assert_eq!(records.columns(), &["id", "name", "score"].map(String::from));
        assert_eq!(records.len(), 2);
        assert_eq!(records.get(0, "id"), Some(&Value::Integer(1)));
        assert_eq!(records.get(0, "name"), Some(&Value::from("Alice")));
        assert_eq!(records.get(0, "score"), Some(&Value::Float(9.5)));
        assert_eq!(records.get(1, "score"), Some(&Value::Null));
    }

    #[test]
    fn test_dates_stay_text() {
        let file = csv_file("joined\n2024-02-29\n");
        let records = extract_from_file(file.path()).unwrap();
        assert_eq!(records.get(0, "joined"), Some(&Value::from("2024-02-29")));
    }

    #[test]
    fn test_short_rows_are_padded() {
        let file = csv_file("a,b,c\n1,2\n");
        let records = extract_from_file(file.path()).unwrap();
        assert_eq!(records.rows()[0], vec![Value::Integer(1), Value::Integer(2), Value::Null]);
    }

    #[test]
    fn test_long_rows_are_rejected() {
        let file = csv_file("a,b\n1,2,3\n");
        let err = extract_from_file(file.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = extract_from_file("/no/such/dir/input.csv").unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("/no/such/dir/input.csv"));
    }

    #[test]
    fn test_header_only_file_has_columns_and_no_rows() {
        let file = csv_file("id,name\n");
        let records = extract_from_file(file.path()).unwrap();
        assert_eq!(records.columns().len(), 2);
        assert!(records.is_empty());
    }
}
