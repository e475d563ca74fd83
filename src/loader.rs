use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::{
    credentials::Credentials,
    database::{close_connection, open_connection, ConnectionHandle},
    schema::{RecordSet, SchemaInferer},
    EtlError, Result,
};

pub const DEFAULT_BATCH_SIZE: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadStats {
    pub table: String,
    pub rows_written: u64,
    pub columns: usize,
    pub batches: usize,
    pub elapsed: Duration,
}

/// Writes record sets to a destination table with replace semantics: the
/// table is dropped, recreated from the inferred schema and filled in
/// batches.
#[derive(Debug, Clone)]
pub struct Loader {
    batch_size: usize,
    show_progress: bool,
}

impl Default for Loader {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            show_progress: false,
        }
    }
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    /// A batch size of zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn load(
        &self,
        handle: &ConnectionHandle,
        table: &str,
        records: &RecordSet,
    ) -> Result<LoadStats> {
        if table.trim().is_empty() {
            return Err(EtlError::Validation(
                "destination table name must not be empty".to_string(),
            ));
        }
        if records.columns().is_empty() {
            if !records.is_empty() {
                return Err(EtlError::Validation(format!(
                    "nothing to load into '{}': the record set has no columns",
                    table
                )));
            }
            // No shape to create a table from; the destination is left as is.
            warn!("Source produced no columns and no rows; '{}' left unchanged", table);
            return Ok(LoadStats {
                table: table.to_string(),
                rows_written: 0,
                columns: 0,
                batches: 0,
                elapsed: Duration::ZERO,
            });
        }

        let backend = handle.backend()?;
        let start = Instant::now();
        let schema = SchemaInferer::infer(records);
        debug!("Inferred schema for '{}': {:?}", table, schema.columns);

        info!("→ Replacing table '{}' in {}", table, handle.label());
        backend.recreate_table(table, &schema).await?;

        let progress_bar = self.progress_bar(records.len() as u64);
        let mut rows_written = 0;
        let mut batches = 0;

        for batch in records.rows().chunks(self.batch_size) {
            rows_written += backend.insert_rows(table, &schema, batch).await?;
            batches += 1;
            progress_bar.set_position(rows_written);
            debug!("Batch {} written ({} rows so far)", batches, rows_written);
        }
        progress_bar.finish_and_clear();

        let stats = LoadStats {
            table: table.to_string(),
            rows_written,
            columns: schema.columns.len(),
            batches,
            elapsed: start.elapsed(),
        };

        info!(
            "→ Loaded {} rows into '{}' in {:.2}s",
            stats.rows_written,
            stats.table,
            stats.elapsed.as_secs_f64()
        );
        Ok(stats)
    }

    /// Opens a connection for the load and always closes it afterwards.
    pub async fn load_with_credentials(
        &self,
        credentials: &Credentials,
        table: &str,
        records: &RecordSet,
    ) -> Result<LoadStats> {
        let mut handle = open_connection(credentials).await?;
        let result = self.load(&handle, table, records).await;
        close_connection(&mut handle).await;
        result
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress || len == 0 {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(len);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{bar:40.cyan/blue} {percent}% ({pos}/{len}) {msg}")
        {
            pb.set_style(style.progress_chars("█▇▆▅▄▃▂▁  "));
        }
        pb
    }
}

/// Replaces `table` with `records` using the default batch size.
pub async fn load(handle: &ConnectionHandle, table: &str, records: &RecordSet) -> Result<LoadStats> {
    Loader::default().load(handle, table, records).await
}

pub async fn load_with_credentials(
    credentials: &Credentials,
    table: &str,
    records: &RecordSet,
) -> Result<LoadStats> {
    Loader::default()
        .load_with_credentials(credentials, table, records)
        .await
}
