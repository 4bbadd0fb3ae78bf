use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;

use crate::error::{IoContext, Result};
use crate::registry::{JobRecord, RunDir, RunRecord, RunRegistry, JOBS_DIR, RUN_RECORD_FILE};

impl RunRegistry {
    /// Create `<root>/<name>_<timestamp>`, adding `_1`, `_2`… until the name is unused
    pub fn create_run(&self, name: &str, now: DateTime<Utc>) -> Result<RunDir> {
        fs::create_dir_all(&self.root).at(&self.root)?;
        let base = format!("{}_{}", name, now.format("%Y%m%d_%H%M%S"));
        let mut attempt = 0usize;
        loop {
            let dir_name = match attempt {
                0 => base.clone(),
                n => format!("{base}_{n}"),
            };
            let candidate = self.root.join(&dir_name);
            match fs::create_dir(&candidate) {
                Ok(()) => {
                    let path = fs::canonicalize(&candidate).at(&candidate)?;
                    fs::create_dir(path.join(JOBS_DIR)).at(path.join(JOBS_DIR))?;
                    info!("Created run directory {}", path.display());
                    return Ok(RunDir { path });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(err) => return Err(err).at(candidate),
            }
        }
    }
}

impl RunDir {
    pub fn write_job(&self, record: &JobRecord) -> Result<()> {
        let path = self.job_record_path(&record.id);
        info!("Writing job record to {}", path.display());
        write_new_json(&path, record)
    }

    pub fn write_run(&self, record: &RunRecord) -> Result<()> {
        let path = self.path.join(RUN_RECORD_FILE);
        info!("Writing run record to {}", path.display());
        write_new_json(&path, record)
    }

    /// Remove a run that could not be completed
    pub fn discard(self) {
        warn!("Removing incomplete run directory {}", self.path.display());
        if let Err(err) = fs::remove_dir_all(&self.path) {
            warn!("Can't remove {}: {err}", self.path.display());
        }
    }
}

/// Records are immutable: refuse to replace an existing file
fn write_new_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut content = serde_json::to_string_pretty(value)?;
    content.push('\n');
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .at(path)?;
    file.write_all(content.as_bytes()).at(path)
}
