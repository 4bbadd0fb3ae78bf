//! Classify the jobs of an earlier run and relaunch a chosen subset
//!
//! Status comes from two places: the scheduler, which forgets jobs after a while, and the
//! completion marker each wrapper writes next to its records. A job neither of them knows about is
//! `Unknown`, which is never selected as failed by accident.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;

use chrono::Utc;
use log::info;

use crate::config::Config;
use crate::error::{IoContext, Result};
use crate::materialize;
use crate::materialize::schedule::ScheduleRequest;
use crate::registry::{JobRecord, LoadedRun, RunRegistry};
use crate::scheduler::Scheduler;
use crate::submit::{self, RunPlan};

/// Job states and how they are derived
pub mod state;

pub use state::{classify, JobState};

/// A loaded run with the current state of each of its jobs
pub struct Resubmission {
    pub run: LoadedRun,
    /// Parallel to `run.jobs`
    pub states: Vec<JobState>,
}

/// Jobs picked for relaunch, borrowed from the run they belong to
pub struct Selection<'r> {
    pub run: &'r LoadedRun,
    pub jobs: Vec<&'r JobRecord>,
}

impl<'r> Selection<'r> {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl Resubmission {
    /// Ask the scheduler about every job of the run
    pub fn build(run: LoadedRun, scheduler: &dyn Scheduler) -> Resubmission {
        let states = run
            .jobs
            .iter()
            .map(|job| classify(job, &run.dir, scheduler))
            .collect();
        Resubmission { run, states }
    }

    /// Number of jobs per state, every state included
    pub fn summary(&self) -> BTreeMap<JobState, usize> {
        let mut counts: BTreeMap<JobState, usize> = JobState::ALL.iter().map(|state| (*state, 0)).collect();
        for state in &self.states {
            *counts.entry(*state).or_default() += 1;
        }
        counts
    }

    pub fn select(&self, state: JobState) -> Selection<'_> {
        let jobs = self
            .run
            .jobs
            .iter()
            .zip(&self.states)
            .filter(|(_, job_state)| **job_state == state)
            .map(|(job, _)| job)
            .collect();
        Selection { run: &self.run, jobs }
    }
}

impl fmt::Display for Resubmission {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{:<8} {:<10} {:<12} scope", "id", "state", "handle")?;
        for (job, state) in self.run.jobs.iter().zip(&self.states) {
            let handle = job
                .handle
                .map(|handle| handle.to_string())
                .unwrap_or_else(|| "-".to_string());
            let scope = serde_json::to_string(&job.scope).unwrap_or_default();
            writeln!(f, "{:<8} {:<10} {:<12} {}", job.id, state.to_string(), handle, scope)?;
        }
        let summary: Vec<String> = self
            .summary()
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(state, count)| format!("{count} {state}"))
            .collect();
        write!(f, "{} job(s): {}", self.states.len(), summary.join(", "))
    }
}

/// Relaunch the selected jobs into a new, linked run
///
/// Nothing happens for an empty selection or when `confirm` declines; `confirm` receives the
/// number of jobs and is asked before any directory is created or scheduler called.
pub fn resubmit(
    selection: &Selection,
    registry: &RunRegistry,
    scheduler: &dyn Scheduler,
    config: &Config,
    dry: bool,
    confirm: impl FnOnce(usize) -> bool,
) -> Result<Option<LoadedRun>> {
    if selection.is_empty() {
        info!("No jobs selected, nothing to resubmit");
        return Ok(None);
    }
    if !confirm(selection.len()) {
        info!("Resubmission of {} job(s) declined", selection.len());
        return Ok(None);
    }

    let old = selection.run;
    let segment_path = match old.record.job_segment.file_name() {
        Some(name) if old.dir.join(name).is_file() => old.dir.join(name),
        _ => old.record.job_segment.clone(),
    };
    let aligned_segment = fs::read_to_string(&segment_path).at(&segment_path)?;
    let plans = materialize::replan(&selection.jobs, &old.dir)?;

    let run_plan = RunPlan {
        name: format!("{}_resubmit", submit::run_name(&old.record.source_script)),
        source_script: &old.record.source_script,
        aligned_segment,
        interpreter: old.record.interpreter.clone(),
        request: ScheduleRequest {
            delay: old.record.delay_seconds,
            allowed_lateness: old.record.allowed_lateness_seconds,
        },
        resubmission_of: Some(old.dir.clone()),
    };
    info!("Resubmitting {} job(s) from {}", plans.len(), old.dir.display());
    let run = submit::launch(registry, run_plan, &plans, config, scheduler, dry, Utc::now())?;
    Ok(Some(run))
}
