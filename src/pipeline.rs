use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::{
    cleaner::{CleanIssue, CleanStats, Cleaner},
    config::JobConfig,
    credentials::read_credentials,
    database::{close_connection, open_connection},
    extract::extract,
    loader::{LoadStats, Loader},
    schema::{RecordSet, Schema, SchemaInferer},
    Result,
};

/// Runs one job: extract, clean, load, in that order, each stage awaited
/// before the next starts.
pub struct Pipeline {
    job: JobConfig,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub extracted_rows: usize,
    pub clean: CleanStats,
    pub issues: Vec<CleanIssue>,
    pub load: LoadStats,
    pub total_time: Duration,
}

#[derive(Debug, Clone)]
pub struct Preview {
    /// The first rows of the cleaned set.
    pub records: RecordSet,
    /// Schema inferred from the whole cleaned set.
    pub schema: Schema,
    pub total_rows: usize,
    pub issues: Vec<CleanIssue>,
}

struct Cleaned {
    extracted_rows: usize,
    records: RecordSet,
    issues: Vec<CleanIssue>,
    stats: CleanStats,
}

impl Pipeline {
    pub fn new(job: JobConfig) -> Self {
        Self { job }
    }

    pub async fn run(&self) -> Result<PipelineReport> {
        match self.execute().await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!("Pipeline failed ({}): {}", e.kind(), e);
                Err(e)
            }
        }
    }

    /// Extracts and cleans without touching the destination.
    pub async fn preview(&self, rows: usize) -> Result<Preview> {
        let cleaned = match self.extract_and_clean().await {
            Ok(cleaned) => cleaned,
            Err(e) => {
                error!("Preview failed ({}): {}", e.kind(), e);
                return Err(e);
            }
        };

        let schema = SchemaInferer::infer(&cleaned.records);
        let total_rows = cleaned.records.len();
        let columns = cleaned.records.columns().to_vec();
        let head = cleaned.records.into_rows().into_iter().take(rows).collect();

        Ok(Preview {
            records: RecordSet::with_rows(columns, head)?,
            schema,
            total_rows,
            issues: cleaned.issues,
        })
    }

    async fn execute(&self) -> Result<PipelineReport> {
        let start_time = Instant::now();
        let destination = &self.job.destination;

        // Credentials are read up front so a bad document fails before any
        // extraction work.
        info!(
            "→ Reading destination credentials from {}",
            destination.credentials.display()
        );
        let credentials = read_credentials(&destination.credentials)?;

        let cleaned = self.extract_and_clean().await?;

        let loader = Loader::new()
            .with_batch_size(self.job.batch_size())
            .with_progress(self.job.show_progress());

        info!("→ Connecting to {}", credentials.describe());
        let mut handle = open_connection(&credentials).await?;
        let result = loader
            .load(&handle, &destination.table, &cleaned.records)
            .await;
        close_connection(&mut handle).await;
        let load = result?;

        let total_time = start_time.elapsed();
        info!("→ Done in {:.1}s", total_time.as_secs_f64());

        Ok(PipelineReport {
            extracted_rows: cleaned.extracted_rows,
            clean: cleaned.stats,
            issues: cleaned.issues,
            load,
            total_time,
        })
    }

    async fn extract_and_clean(&self) -> Result<Cleaned> {
        let records = extract(&self.job.source).await?;
        let extracted_rows = records.len();

        let profile = self.job.cleaning_profile();
        info!("→ Cleaning {} rows", extracted_rows);
        let outcome = Cleaner::apply(&profile, records);

        Ok(Cleaned {
            extracted_rows,
            records: outcome.records,
            issues: outcome.issues,
            stats: outcome.stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        credentials::Credentials,
        database::list_tables,
        extract::read_table,
        schema::Value,
        loader::load,
        ErrorKind,
    };
    use std::fs;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(csv: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join("users.csv"), csv).unwrap();
            fs::write(
                dir.path().join("creds.yaml"),
                format!(
                    "RDS_ENGINE: sqlite\nRDS_DATABASE: {}\n",
                    dir.path().join("out.db").display()
                ),
            )
            .unwrap();
            Self { dir }
        }

        fn job(&self, extra: &str) -> JobConfig {
            let source = format!(
                "  kind: file\n  path: {}\n",
                self.dir.path().join("users.csv").display()
            );
            self.job_from(&source, extra)
        }

        fn job_from(&self, source: &str, extra: &str) -> JobConfig {
            let yaml = format!(
                "version: 1\nsource:\n{}destination:\n  credentials: {}\n  table: users\n{}",
                source,
                self.dir.path().join("creds.yaml").display(),
                extra
            );
            JobConfig::from_yaml_str(&yaml).unwrap()
        }

        fn credentials(&self) -> Credentials {
            Credentials::Sqlite {
                path: self.dir.path().join("out.db"),
            }
        }
    }

    const USERS: &str = "id,name,date_of_birth\n1,Ada,1990-12-10\n2,Grace,1986-12-09\n2,Grace,1986-12-09\n,,\n";

    #[tokio::test]
    async fn test_run_loads_cleaned_rows() {
        let fixture = Fixture::new(USERS);
        let report = Pipeline::new(fixture.job("")).run().await.unwrap();

        assert_eq!(report.extracted_rows, 4);
        assert_eq!(report.clean.duplicates_dropped, 1);
        assert_eq!(report.clean.null_rows_dropped, 1);
        assert_eq!(report.load.rows_written, 2);

        let handle = open_connection(&fixture.credentials()).await.unwrap();
        assert_eq!(list_tables(&handle).await.unwrap(), vec!["users".to_string()]);
        let stored = read_table(&handle, "users").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored.get(0, "date_of_birth"), Some(&Value::from("1990-12-10")));
    }

    #[tokio::test]
    async fn test_run_with_cleaning_rules_converts_dates() {
        let fixture = Fixture::new(USERS);
        let job = fixture.job(
            "cleaning:\n  deduplicate: true\n  columns:\n    - name: date_of_birth\n      role: date\n",
        );
        Pipeline::new(job).run().await.unwrap();

        let handle = open_connection(&fixture.credentials()).await.unwrap();
        let stored = read_table(&handle, "users").await.unwrap();
        assert!(matches!(stored.get(0, "date_of_birth"), Some(Value::Date(_))));
    }

    #[tokio::test]
    async fn test_run_fails_on_missing_source() {
        let fixture = Fixture::new(USERS);
        fs::remove_file(fixture.dir.path().join("users.csv")).unwrap();

        let err = Pipeline::new(fixture.job("")).run().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!fixture.dir.path().join("out.db").exists());
    }

    #[tokio::test]
    async fn test_preview_does_not_load() {
        let fixture = Fixture::new(USERS);
        let preview = Pipeline::new(fixture.job("")).preview(1).await.unwrap();

        assert_eq!(preview.total_rows, 2);
        assert_eq!(preview.records.len(), 1);
        assert_eq!(preview.schema.columns.len(), 3);
        assert!(!fixture.dir.path().join("out.db").exists());
    }

    #[tokio::test]
    async fn test_empty_query_replaces_destination_with_empty_table() {
        let fixture = Fixture::new(USERS);
        Pipeline::new(fixture.job("")).run().await.unwrap();

        let source_db = fixture.dir.path().join("source.db");
        let source_credentials = Credentials::Sqlite { path: source_db.clone() };
        let people = RecordSet::with_rows(
            vec!["id".into(), "name".into()],
            vec![vec![Value::Integer(1), "Ada".into()]],
        )
        .unwrap();
        let mut handle = open_connection(&source_credentials).await.unwrap();
        load(&handle, "people", &people).await.unwrap();
        close_connection(&mut handle).await;

        let source_creds = fixture.dir.path().join("source.yaml");
        fs::write(
            &source_creds,
            format!("RDS_ENGINE: sqlite\nRDS_DATABASE: {}\n", source_db.display()),
        )
        .unwrap();
        let source = format!(
            "  kind: relational\n  credentials: {}\n  query: SELECT id, name FROM people WHERE id > 100\n",
            source_creds.display()
        );

        let report = Pipeline::new(fixture.job_from(&source, "")).run().await.unwrap();
        assert_eq!(report.extracted_rows, 0);
        assert_eq!(report.load.rows_written, 0);
        assert_eq!(report.load.columns, 2);

        let handle = open_connection(&fixture.credentials()).await.unwrap();
        let stored = read_table(&handle, "users").await.unwrap();
        assert!(stored.is_empty());
        assert_eq!(stored.columns(), &["id".to_string(), "name".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_endpoint_leaves_destination_untouched() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 2\r\nConnection: close\r\n\r\n[]";
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        let fixture = Fixture::new(USERS);
        Pipeline::new(fixture.job("")).run().await.unwrap();

        let source = format!("  kind: endpoint\n  url: http://{}/users\n", addr);
        let report = Pipeline::new(fixture.job_from(&source, "")).run().await.unwrap();
        assert_eq!(report.extracted_rows, 0);
        assert_eq!(report.load.rows_written, 0);
        assert_eq!(report.load.columns, 0);

        let handle = open_connection(&fixture.credentials()).await.unwrap();
        assert_eq!(read_table(&handle, "users").await.unwrap().len(), 2);
    }
}
