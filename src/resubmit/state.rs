use std::fmt;
use std::fs;
use std::path::Path;

use clap::ValueEnum;
use log::debug;

use crate::registry::JobRecord;
use crate::scheduler::{Scheduler, SchedulerStatus};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum JobState {
    /// Never handed to the scheduler
    Idle,
    Queued,
    Running,
    Completed,
    Failed,
    /// Nobody can tell; never treated as failed
    Unknown,
}

impl JobState {
    pub const ALL: [JobState; 6] = [
        JobState::Idle,
        JobState::Queued,
        JobState::Running,
        JobState::Completed,
        JobState::Failed,
        JobState::Unknown,
    ];
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JobState::Idle => write!(f, "idle"),
            JobState::Queued => write!(f, "queued"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Exit code the wrapper left behind, if it finished
pub fn completion_marker(run_dir: &Path, id: &str) -> Option<i32> {
    let path = run_dir.join(format!("exitcode_{id}.txt"));
    let text = fs::read_to_string(&path).ok()?;
    let code = text.trim().parse().ok();
    debug!("Completion marker {} holds {:?}", path.display(), code);
    code
}

fn from_marker(code: Option<i32>) -> Option<JobState> {
    code.map(|code| match code {
        0 => JobState::Completed,
        _ => JobState::Failed,
    })
}

/// Combine what the scheduler says with what the job left on disk
pub fn classify(record: &JobRecord, run_dir: &Path, scheduler: &dyn Scheduler) -> JobState {
    let Some(handle) = &record.handle else {
        return JobState::Idle;
    };
    let marker = || from_marker(completion_marker(run_dir, &record.id));
    match scheduler.query_status(handle) {
        SchedulerStatus::Queued => JobState::Queued,
        SchedulerStatus::Running => JobState::Running,
        SchedulerStatus::Failed => JobState::Failed,
        SchedulerStatus::Completed => marker().unwrap_or(JobState::Completed),
        SchedulerStatus::Unknown => marker().unwrap_or(JobState::Unknown),
    }
}
