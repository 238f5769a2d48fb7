//! Source records: text passages identified by a row ID.
//!
//! Records normally come from a SQLite dump of Wikipedia with a `text`
//! column, but we also accept pre-exported JSON, JSONL and CSV files with
//! `rowid` and `text` fields.

use std::sync::LazyLock;

use futures::{StreamExt as _, stream};
use regex::Regex;
use rusqlite::Connection;
use schemars::JsonSchema;

use crate::{
    async_utils::{
        BoxedStream,
        io::{read_json, read_jsonl},
    },
    prelude::*,
};

/// A single source text passage.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
pub struct Record {
    /// The row ID in the source table.
    #[serde(alias = "row_id")]
    pub rowid: i64,

    /// The full text of the passage.
    pub text: String,
}

/// The on-disk format of a record source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceFormat {
    /// A SQLite database.
    Sqlite,
    /// A JSON array of records.
    Json,
    /// One JSON record per line.
    Jsonl,
    /// A CSV file with `rowid` and `text` columns.
    Csv,
}

impl SourceFormat {
    /// Guess the format of a source from its file extension. Anything we don't
    /// recognize is assumed to be a SQLite database.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "json" => SourceFormat::Json,
            "jsonl" => SourceFormat::Jsonl,
            "csv" => SourceFormat::Csv,
            _ => SourceFormat::Sqlite,
        }
    }
}

/// Where to read records from, and how many.
#[derive(Clone, Debug)]
pub struct RecordSource {
    /// Path to the database or export file.
    pub path: PathBuf,

    /// Table to read from, for SQLite sources.
    pub table: String,

    /// Number of records to skip.
    pub offset: usize,

    /// Maximum number of records to read.
    pub limit: Option<usize>,
}

/// SQLite table names we're willing to interpolate into a query.
static TABLE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("failed to compile regex")
});

impl RecordSource {
    /// Read all our records, in source order.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    pub async fn read_all(&self) -> Result<Vec<Record>> {
        let format = SourceFormat::from_path(&self.path);
        debug!(?format, "Reading records");
        let records = match format {
            SourceFormat::Sqlite => {
                let source = self.clone();
                return tokio::task::spawn_blocking(move || source.read_sqlite())
                    .await
                    .context("could not join SQLite reader")?;
            }
            SourceFormat::Json => read_json::<Vec<Record>>(&self.path).await?,
            SourceFormat::Jsonl => read_jsonl::<Record>(&self.path).await?,
            SourceFormat::Csv => {
                let path = self.path.clone();
                tokio::task::spawn_blocking(move || read_csv(&path))
                    .await
                    .context("could not join CSV reader")??
            }
        };
        Ok(self.apply_window(records))
    }

    /// Read our records as a stream.
    pub async fn read_stream(&self) -> Result<BoxedStream<Result<Record>>> {
        let records = self.read_all().await?;
        info!(count = records.len(), "Read records from {:?}", self.path);
        Ok(stream::iter(records.into_iter().map(Ok)).boxed())
    }

    /// Apply `offset` and `limit` to records read from a file.
    fn apply_window(&self, records: Vec<Record>) -> Vec<Record> {
        let iter = records.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }

    /// Read records from SQLite. This blocks.
    fn read_sqlite(&self) -> Result<Vec<Record>> {
        if !TABLE_NAME_RE.is_match(&self.table) {
            return Err(anyhow!("Invalid SQLite table name: {:?}", self.table));
        }
        if !self.path.is_file() {
            return Err(anyhow!("SQLite database not found: {:?}", self.path));
        }
        let conn = Connection::open(&self.path)
            .with_context(|| format!("Failed to open SQLite database {:?}", self.path))?;

        // SQLite treats a negative LIMIT as "no limit".
        let limit = self
            .limit
            .map(|limit| i64::try_from(limit).unwrap_or(i64::MAX))
            .unwrap_or(-1);
        let offset = i64::try_from(self.offset).unwrap_or(i64::MAX);
        let query = format!(
            "SELECT rowid, text FROM {} ORDER BY rowid LIMIT ?1 OFFSET ?2",
            self.table
        );
        let mut stmt = conn
            .prepare(&query)
            .with_context(|| format!("Failed to query table {:?}", self.table))?;
        let rows = stmt
            .query_map([limit, offset], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?))
            })
            .with_context(|| format!("Failed to query table {:?}", self.table))?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to read rows from {:?}", self.table))?;

        // Dumps occasionally have rows with no text. There's nothing to render.
        Ok(rows
            .into_iter()
            .filter_map(|(rowid, text)| match text {
                Some(text) => Some(Record { rowid, text }),
                None => {
                    warn!(rowid, "Skipping row with NULL text in {:?}", self.table);
                    None
                }
            })
            .collect())
    }
}

/// Read records from a CSV file. This blocks.
fn read_csv(path: &Path) -> Result<Vec<Record>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {:?}", path))?;
    rdr.deserialize::<Record>()
        .enumerate()
        .map(|(idx, record)| {
            record.with_context(|| {
                format!("Failed to read CSV record {} from {:?}", idx + 1, path)
            })
        })
        .collect()
}
