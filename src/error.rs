use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Everything that can go wrong between reading a script and relaunching its jobs
///
/// Structural script errors, user code errors and bad scope values are fatal for the whole batch.
/// Registry errors are operator errors: point the tool at a valid run and try again.
#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed submission block at line {line}: {reason}")]
    MalformedSubmissionBlock { line: usize, reason: String },

    #[error("scope value for key '{key}' is not JSON serializable: {reason}")]
    ScopeSerialization { key: String, reason: String },

    #[error("scope has no key '{0}'")]
    ScopeKey(String),

    #[error("error in submission code at line {line}: {message}")]
    SubmissionCode { line: usize, message: String },

    #[error("no run record found at {}", .0.display())]
    RunRecordNotFound(PathBuf),

    #[error("run record at {} is corrupt: {reason}", .path.display())]
    RunRecordCorrupt { path: PathBuf, reason: String },

    #[error("deadline {deadline} exceeded (now {now})")]
    DeadlineExceeded {
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("invalid schedule: {0}")]
    Schedule(String),

    #[error("transfer file {} does not exist", .0.display())]
    TransferFile(PathBuf),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("template error: {0}")]
    Template(#[from] tinytemplate::error::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Attach the offending path to an I/O error
pub(crate) trait IoContext<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
