use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::JobHandle;
use crate::scope::Scope;

/// Points at the job a resubmitted job replaces
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct JobRef {
    pub run_dir: PathBuf,
    pub id: String,
}

/// One job, as written to `jobs/<id>.json`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub source_script: PathBuf,
    pub scope: Scope,
    /// Staged local paths and remote URIs, in declaration order
    pub transfer_files: Vec<String>,
    pub package_installs: Vec<String>,
    pub scheduler_overrides: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub wrapper_path: PathBuf,
    pub scope_path: PathBuf,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub submitted_at: DateTime<Utc>,
    /// Scheduler handle, `None` for dry runs and jobs the scheduler never accepted
    pub handle: Option<JobHandle>,
    pub replaces: Option<JobRef>,
}

/// One submission batch, as written to `run.json`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RunRecord {
    pub run_dir: PathBuf,
    pub source_script: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Job ids in submission order
    pub jobs: Vec<String>,
    /// Job code with the submission block blanked out
    pub job_segment: PathBuf,
    pub interpreter: String,
    pub delay_seconds: Option<f64>,
    pub allowed_lateness_seconds: Option<f64>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub dry: bool,
    pub resubmission_of: Option<PathBuf>,
}
