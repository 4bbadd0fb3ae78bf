//! The cluster scheduler, seen only through submit and status calls

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Command line bridge to HTCondor
pub mod condor;

pub use condor::CondorScheduler;

/// Where the scheduler put a job: `cluster.proc`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub cluster: u64,
    pub proc: u32,
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.cluster, self.proc)
    }
}

impl FromStr for JobHandle {
    type Err = Error;

    fn from_str(s: &str) -> Result<JobHandle> {
        let invalid = || Error::Scheduler(format!("invalid job handle '{s}'"));
        let (cluster, proc) = s.trim().split_once('.').unwrap_or((s.trim(), "0"));
        Ok(JobHandle {
            cluster: cluster.parse().map_err(|_| invalid())?,
            proc: proc.parse().map_err(|_| invalid())?,
        })
    }
}

impl Serialize for JobHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for JobHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Last state the scheduler knows for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Unknown,
}

/// Everything the scheduler needs to launch one job
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescription {
    pub id: String,
    pub run_dir: PathBuf,
    pub wrapper_path: PathBuf,
    /// Staged local files shipped with the job
    pub input_files: Vec<PathBuf>,
    /// Batch-wide attributes, overridden key by key by `overrides`
    pub attributes: BTreeMap<String, String>,
    pub overrides: BTreeMap<String, String>,
}

impl JobDescription {
    /// Defaults, then batch attributes, then job overrides
    pub fn merged_attributes(&self, defaults: BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut merged = defaults;
        merged.extend(self.attributes.clone());
        merged.extend(self.overrides.clone());
        merged
    }
}

pub trait Scheduler {
    fn submit(&self, job: &JobDescription) -> Result<JobHandle>;

    /// Never fails: a scheduler that cannot be asked reports `Unknown`
    fn query_status(&self, handle: &JobHandle) -> SchedulerStatus;
}
