//! Run the first job of a script on this machine
//!
//! Local mode evaluates the submission block only up to the first `submit()` call, materializes
//! that single job into a scratch directory and executes its wrapper directly, so the job sees
//! exactly what it would see on a worker.

use std::path::Path;
use std::process::Command;

use chrono::Utc;
use log::{info, warn};

use crate::config::Config;
use crate::error::{Error, IoContext, Result};
use crate::materialize::schedule::Readiness;
use crate::materialize::{self, Materializer};
use crate::registry::RunRegistry;
use crate::sandbox::{Mode, Sandbox};
use crate::script;
use crate::submit::{read_script, run_name};

/// Outcome of a local run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRun {
    pub exit_code: i32,
    /// Scope the job ran with, as JSON
    pub scope: String,
}

pub fn run_local(script_path: &Path, config: &Config) -> Result<LocalRun> {
    let (source_script, text) = read_script(script_path)?;
    let segments = script::extract(&text, &config.delimiters)?;
    let enumeration = Sandbox::new(Mode::Local).run(&segments)?;
    let script_dir = source_script.parent().unwrap_or(Path::new("."));
    let plans = materialize::plan(&enumeration.variants, script_dir)?;

    let now = Utc::now();
    let schedule = enumeration.schedule.resolve(now)?;
    match schedule.check(now)? {
        Readiness::Proceed => {}
        Readiness::Wait(wait) => info!("Job will wait {}s for its scheduled start", wait.num_seconds()),
    }

    let scratch = tempfile::Builder::new()
        .prefix("kuljetin_local_")
        .tempdir()
        .at(std::env::temp_dir())?;
    let run = RunRegistry::new(scratch.path()).create_run(&run_name(&source_script), now)?;
    let interpreter = segments.job.interpreter().unwrap_or(&config.interpreter);
    let materializer = Materializer::new(config, &run, &source_script, interpreter);
    let job_segment = materializer.write_job_segment(&segments.job.aligned())?;
    let jobs = materializer.materialize(&plans, &job_segment, &schedule, now)?;
    let job = jobs
        .first()
        .ok_or_else(|| Error::Config("local run produced no job".to_string()))?;

    let mut cmd = Command::new("bash");
    cmd.arg(&job.wrapper_path)
        .env("KULJETIN_BATCHMODE", "0")
        .env("KULJETIN_OUTPUT_DIR", run.path());
    info!("Running job {} locally", job.id);
    info!("{:?}", &cmd);
    let status = cmd.status().at(&job.wrapper_path)?;
    let exit_code = status.code().unwrap_or(-1);
    if !status.success() {
        warn!("Job {} exited with {}", job.id, exit_code);
    }
    Ok(LocalRun {
        exit_code,
        scope: serde_json::to_string(&job.scope)?,
    })
}
