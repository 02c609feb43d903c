// ⚠️ Ingest Errors - Failure taxonomy for the load pipeline
// Row-level problems are counted in the LoadReport, never raised here;
// these variants are the unrecoverable cases.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("could not read file: no strategy decoded any row (attempted: {})", .attempts.join(", "))]
    Unreadable { attempts: Vec<String> },

    #[error("missing required columns {missing:?}; columns present: {present:?}")]
    MissingColumns {
        missing: Vec<String>,
        present: Vec<String>,
    },

    #[error("file read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv parse failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("database failure: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type IngestResult<T> = Result<T, IngestError>;
