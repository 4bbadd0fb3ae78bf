//! The submission path: script to run directory to scheduler

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{error, info, warn};

use crate::config::Config;
use crate::error::{Error, IoContext, Result};
use crate::materialize::schedule::{Schedule, ScheduleRequest};
use crate::materialize::stage::is_remote;
use crate::materialize::{self, JobPlan, Materializer};
use crate::registry::{JobRecord, LoadedRun, RunDir, RunRecord, RunRegistry};
use crate::sandbox::{Mode, Sandbox};
use crate::scheduler::{JobDescription, Scheduler};
use crate::script;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Write the run directory but never call the scheduler
    pub dry: bool,
    /// Keep only the first N variants
    pub njobsmax: Option<usize>,
}

/// Canonical script path and its text
pub(crate) fn read_script(path: &Path) -> Result<(PathBuf, String)> {
    let path = fs::canonicalize(path).at(path)?;
    info!("Reading script {}", path.display());
    let text = fs::read_to_string(&path).at(&path)?;
    Ok((path, text))
}

/// Run name derived from the script file name
pub(crate) fn run_name(script: &Path) -> String {
    script
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "run".to_string())
}

/// Scheduler view of a materialized job
pub(crate) fn describe(record: &JobRecord, run_dir: &Path, job_segment: &Path, config: &Config) -> JobDescription {
    let mut input_files = vec![record.scope_path.clone(), job_segment.to_path_buf()];
    input_files.extend(
        record
            .transfer_files
            .iter()
            .filter(|entry| !is_remote(entry))
            .map(PathBuf::from),
    );
    JobDescription {
        id: record.id.clone(),
        run_dir: run_dir.to_path_buf(),
        wrapper_path: record.wrapper_path.clone(),
        input_files,
        attributes: config.scheduler_attributes.clone(),
        overrides: record.scheduler_overrides.clone(),
    }
}

/// Hand every job to the scheduler in order, stopping at the first refusal
///
/// Jobs after a failure keep no handle, so they show up as `Idle` and can be resubmitted.
pub(crate) fn submit_jobs(
    records: &mut [JobRecord],
    run_dir: &Path,
    job_segment: &Path,
    scheduler: &dyn Scheduler,
    config: &Config,
) -> Result<()> {
    let total = records.len();
    for (index, record) in records.iter_mut().enumerate() {
        let description = describe(record, run_dir, job_segment, config);
        match scheduler.submit(&description) {
            Ok(handle) => record.handle = Some(handle),
            Err(err) => {
                error!(
                    "Submission of job {} failed, {} job(s) left unsubmitted",
                    record.id,
                    total - index
                );
                return Err(err);
            }
        }
    }
    Ok(())
}

/// What a new run needs besides its jobs
pub(crate) struct RunPlan<'a> {
    pub name: String,
    pub source_script: &'a Path,
    pub aligned_segment: String,
    pub interpreter: String,
    pub request: ScheduleRequest,
    pub resubmission_of: Option<PathBuf>,
}

/// Create a run directory, materialize the plans into it, submit, then write every record
///
/// Materialization is all or nothing: on error the new directory is removed. A scheduler error
/// still leaves complete records behind before it is returned.
pub(crate) fn launch(
    registry: &RunRegistry,
    run_plan: RunPlan,
    plans: &[JobPlan],
    config: &Config,
    scheduler: &dyn Scheduler,
    dry: bool,
    now: DateTime<Utc>,
) -> Result<LoadedRun> {
    let schedule = run_plan.request.resolve(now)?;
    let run = registry.create_run(&run_plan.name, now)?;

    let materialized = materialize_into(&run, &run_plan, plans, config, &schedule, now);
    let (job_segment, mut jobs) = match materialized {
        Ok(done) => done,
        Err(err) => {
            run.discard();
            return Err(err);
        }
    };

    let submitted = if dry {
        info!("Dry run: {} job(s) not submitted", jobs.len());
        Ok(())
    } else {
        submit_jobs(&mut jobs, run.path(), &job_segment, scheduler, config)
    };

    let record = RunRecord {
        run_dir: run.path().to_path_buf(),
        source_script: run_plan.source_script.to_path_buf(),
        created_at: now,
        jobs: jobs.iter().map(|job| job.id.clone()).collect(),
        job_segment,
        interpreter: run_plan.interpreter,
        delay_seconds: run_plan.request.delay,
        allowed_lateness_seconds: run_plan.request.allowed_lateness,
        scheduled_start: schedule.start,
        deadline: schedule.deadline,
        dry,
        resubmission_of: run_plan.resubmission_of,
    };
    for job in &jobs {
        run.write_job(job)?;
    }
    run.write_run(&record)?;
    submitted?;

    Ok(LoadedRun {
        dir: run.path().to_path_buf(),
        record,
        jobs,
    })
}

fn materialize_into(
    run: &RunDir,
    run_plan: &RunPlan,
    plans: &[JobPlan],
    config: &Config,
    schedule: &Schedule,
    now: DateTime<Utc>,
) -> Result<(PathBuf, Vec<JobRecord>)> {
    let materializer = Materializer::new(config, run, run_plan.source_script, &run_plan.interpreter);
    let job_segment = materializer.write_job_segment(&run_plan.aligned_segment)?;
    let jobs = materializer.materialize(plans, &job_segment, schedule, now)?;
    Ok((job_segment, jobs))
}

/// Submit every job a script declares
pub fn submit_script(
    script_path: &Path,
    config: &Config,
    scheduler: &dyn Scheduler,
    options: SubmitOptions,
) -> Result<LoadedRun> {
    let (source_script, text) = read_script(script_path)?;
    let segments = script::extract(&text, &config.delimiters)?;
    let mut enumeration = Sandbox::new(Mode::Batch).run(&segments)?;

    if let Some(max) = options.njobsmax {
        if enumeration.variants.len() > max {
            warn!(
                "Submitting only {max} of {} job(s) (--njobsmax)",
                enumeration.variants.len()
            );
            enumeration.variants.truncate(max);
        }
    }
    if enumeration.variants.is_empty() {
        return Err(Error::Config("nothing to submit, --njobsmax is 0".to_string()));
    }

    let script_dir = source_script.parent().unwrap_or(Path::new("."));
    let plans = materialize::plan(&enumeration.variants, script_dir)?;

    let run_plan = RunPlan {
        name: run_name(&source_script),
        source_script: &source_script,
        aligned_segment: segments.job.aligned(),
        interpreter: segments
            .job
            .interpreter()
            .unwrap_or(&config.interpreter)
            .to_string(),
        request: enumeration.schedule,
        resubmission_of: None,
    };
    let registry = RunRegistry::new(&config.run_root);
    let run = launch(&registry, run_plan, &plans, config, scheduler, options.dry, Utc::now())?;
    info!("Run {} holds {} job(s)", run.dir.display(), run.jobs.len());
    Ok(run)
}
