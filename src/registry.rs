//! Run directories and the JSON records inside them
//!
//! A run directory is written once, by one submission, and read many times afterwards:
//!
//! ```text
//! <root>/<name>_<YYYYmmdd_HHMMSS>/
//!     run.json            run record
//!     jobs/<id>.json      one job record per job
//!     job_segment.<ext>   job code, line aligned with the script
//!     <id>.scope.json     frozen scope
//!     <id>.sh             job wrapper
//!     inputs/             staged local transfer files
//! ```

use std::path::{Path, PathBuf};

/// Job and run record types
pub mod record;
/// Create run directories and write records into them
pub mod write;
/// Load and validate a run
pub mod read;
/// Embedded JSON schema for the records
pub mod schema;

pub use read::{list_runs, load, LoadedRun};
pub use record::{JobRecord, JobRef, RunRecord};

/// File name of the run record inside a run directory
pub const RUN_RECORD_FILE: &str = "run.json";
/// Directory holding the job records
pub const JOBS_DIR: &str = "jobs";
/// Directory holding staged transfer files
pub const INPUTS_DIR: &str = "inputs";

/// Parent directory of all run directories
#[derive(Debug, Clone)]
pub struct RunRegistry {
    root: PathBuf,
}

impl RunRegistry {
    pub fn new(root: impl Into<PathBuf>) -> RunRegistry {
        RunRegistry { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// A freshly created run directory
#[derive(Debug, Clone)]
pub struct RunDir {
    path: PathBuf,
}

impl RunDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn job_record_path(&self, id: &str) -> PathBuf {
        self.path.join(JOBS_DIR).join(format!("{id}.json"))
    }

    pub fn inputs_dir(&self) -> PathBuf {
        self.path.join(INPUTS_DIR)
    }
}
