//! Command-line entry points.

use clap::Args;

use crate::{prelude::*, records::RecordSource};

pub mod generate;
pub mod plot;
pub mod schema;

/// Options for choosing which source records to process.
#[derive(Debug, Clone, Args)]
pub struct RecordOpts {
    /// Where to read records from. Files ending in `.json`, `.jsonl` or `.csv`
    /// are read as exports with `rowid` and `text` fields. Anything else is
    /// opened as a SQLite database.
    #[clap(long, default_value = "wikipedia_en_20231101.sqlite")]
    pub source: PathBuf,

    /// The SQLite table to read from.
    #[clap(long, default_value = "wikipedia_en_20231101")]
    pub table: String,

    /// Process at most N records.
    #[clap(long, default_value = "5")]
    pub limit: usize,

    /// Process every record, ignoring `--limit`.
    #[clap(long)]
    pub no_limit: bool,

    /// Skip the first N records.
    #[clap(long, default_value = "0")]
    pub offset: usize,
}

impl RecordOpts {
    /// Build a [`RecordSource`] from our options.
    pub fn to_source(&self) -> RecordSource {
        RecordSource {
            path: self.source.clone(),
            table: self.table.clone(),
            offset: self.offset,
            limit: (!self.no_limit).then_some(self.limit),
        }
    }
}
