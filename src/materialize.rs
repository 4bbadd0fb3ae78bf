//! Turn recorded variants into job units on disk
//!
//! Materializing happens in two steps. [`plan`] freezes every scope and resolves every transfer
//! file without touching the disk, so a bad variant stops the batch before a single file exists.
//! [`Materializer::materialize`] then writes scopes, staged inputs and wrappers into a run
//! directory and returns the job records.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::config::Config;
use crate::error::{IoContext, Result};
use crate::registry::{JobRecord, JobRef, RunDir};
use crate::sandbox::Variant;
use crate::scope::Scope;

/// Start time and deadline of a batch
pub mod schedule;
/// Stage transfer files into the run directory
pub mod stage;
/// Render job wrapper scripts
pub mod wrapper;

use schedule::Schedule;
use stage::{Stager, TransferFile};
use wrapper::WrapperSpec;

/// A variant with its scope frozen and transfer files resolved
#[derive(Debug, Clone, PartialEq)]
pub struct JobPlan {
    pub scope: Scope,
    pub transfer_files: Vec<TransferFile>,
    pub packages: Vec<String>,
    pub overrides: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub replaces: Option<JobRef>,
}

/// Freeze and resolve every variant, failing on the first bad one
///
/// Local transfer paths are relative to `script_dir`.
pub fn plan(variants: &[Variant], script_dir: &Path) -> Result<Vec<JobPlan>> {
    variants
        .iter()
        .map(|variant| {
            let scope = Scope::freeze(variant.draft.iter().map(|(key, value)| (key.as_str(), value)))?;
            let transfer_files = variant
                .transfer_files
                .iter()
                .map(|entry| TransferFile::resolve(entry, script_dir))
                .collect::<Result<Vec<_>>>()?;
            Ok(JobPlan {
                scope,
                transfer_files,
                packages: variant.packages.clone(),
                overrides: variant.overrides.clone(),
                env: variant.env.clone(),
                replaces: None,
            })
        })
        .collect()
}

/// Rebuild plans from existing job records, each pointing back at the job it replaces
///
/// Scopes are already frozen. Staged inputs of the old run are staged again into the new one,
/// looked up under `old_run_dir` even if the run was moved since it was written.
pub fn replan(records: &[&JobRecord], old_run_dir: &Path) -> Result<Vec<JobPlan>> {
    records
        .iter()
        .map(|record| {
            let recorded_dir = record.scope_path.parent();
            let transfer_files = record
                .transfer_files
                .iter()
                .map(|entry| {
                    let entry = relocate(entry, recorded_dir, old_run_dir);
                    TransferFile::resolve(&entry, old_run_dir)
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(JobPlan {
                scope: record.scope.clone(),
                transfer_files,
                packages: record.package_installs.clone(),
                overrides: record.scheduler_overrides.clone(),
                env: record.env.clone(),
                replaces: Some(JobRef {
                    run_dir: old_run_dir.to_path_buf(),
                    id: record.id.clone(),
                }),
            })
        })
        .collect()
}

/// Point a path recorded under `recorded_dir` at the same file under `run_dir`
fn relocate(entry: &str, recorded_dir: Option<&Path>, run_dir: &Path) -> String {
    match recorded_dir.and_then(|dir| Path::new(entry).strip_prefix(dir).ok()) {
        Some(relative) => run_dir.join(relative).display().to_string(),
        None => entry.to_string(),
    }
}

/// Zero-padded ordinal, at least three digits and wide enough for the whole batch
pub fn job_id(index: usize, total: usize) -> String {
    let digits = total.saturating_sub(1).to_string().len();
    format!("{:0width$}", index, width = digits.max(3))
}

/// Writes the job units of one run
pub struct Materializer<'a> {
    config: &'a Config,
    run: &'a RunDir,
    source_script: &'a Path,
    interpreter: &'a str,
}

impl<'a> Materializer<'a> {
    pub fn new(config: &'a Config, run: &'a RunDir, source_script: &'a Path, interpreter: &'a str) -> Self {
        Materializer {
            config,
            run,
            source_script,
            interpreter,
        }
    }

    /// Path of the job segment file, keeping the script's extension
    pub fn job_segment_path(&self) -> PathBuf {
        let name = match self.source_script.extension() {
            Some(ext) => format!("job_segment.{}", ext.to_string_lossy()),
            None => "job_segment".to_string(),
        };
        self.run.path().join(name)
    }

    /// Write the line-aligned job segment shared by every job of the run
    pub fn write_job_segment(&self, aligned: &str) -> Result<PathBuf> {
        let path = self.job_segment_path();
        info!("Writing job segment to {}", path.display());
        fs::write(&path, aligned).at(&path)?;
        Ok(path)
    }

    /// Write scope, staged inputs and wrapper for every plan, in order
    ///
    /// All jobs share `schedule`. Records come back without scheduler handles.
    pub fn materialize(
        &self,
        plans: &[JobPlan],
        job_segment: &Path,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobRecord>> {
        warn_duplicates(plans);
        let mut stager = Stager::new(self.run.inputs_dir());
        let mut records = Vec::with_capacity(plans.len());

        for (index, plan) in plans.iter().enumerate() {
            let id = job_id(index, plans.len());
            let transfer_files = plan
                .transfer_files
                .iter()
                .map(|file| stager.stage(file))
                .collect::<Result<Vec<_>>>()?;

            let scope_path = self.run.path().join(format!("{id}.scope.json"));
            info!("Writing scope to {}", scope_path.display());
            fs::write(&scope_path, plan.scope.to_json_pretty()?).at(&scope_path)?;

            let remote_files = plan
                .transfer_files
                .iter()
                .filter_map(|file| match file {
                    TransferFile::Remote(uri) => Some(uri.as_str()),
                    TransferFile::Local(_) => None,
                })
                .collect();
            let spec = WrapperSpec {
                id: &id,
                source_script: self.source_script,
                scope_path: &scope_path,
                job_segment,
                interpreter: self.interpreter,
                env: &plan.env,
                remote_files,
                packages: &plan.packages,
                schedule: *schedule,
                install_command: &self.config.install_command,
                fetch_command: &self.config.fetch_command,
            };
            let wrapper_path = wrapper::write(&self.run.path().join(format!("{id}.sh")), &wrapper::render(&spec)?)?;

            records.push(JobRecord {
                id,
                source_script: self.source_script.to_path_buf(),
                scope: plan.scope.clone(),
                transfer_files,
                package_installs: plan.packages.clone(),
                scheduler_overrides: plan.overrides.clone(),
                env: plan.env.clone(),
                wrapper_path,
                scope_path,
                scheduled_start: schedule.start,
                deadline: schedule.deadline,
                submitted_at: now,
                handle: None,
                replaces: plan.replaces.clone(),
            });
        }
        info!("Materialized {} job(s) in {}", records.len(), self.run.path().display());
        Ok(records)
    }
}

/// Identical scopes are allowed, but usually a mistake in the submission code
fn warn_duplicates(plans: &[JobPlan]) {
    let mut seen: HashSet<&Scope> = HashSet::new();
    for (index, plan) in plans.iter().enumerate() {
        if !plan.scope.is_empty() && !seen.insert(&plan.scope) {
            warn!(
                "Job {} has the same scope as an earlier job",
                job_id(index, plans.len())
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::error::Error;
    use crate::lang::Value;
    use crate::registry::RunRegistry;

    fn variant(pairs: &[(&str, Value)]) -> Variant {
        Variant {
            draft: pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            ..Variant::default()
        }
    }

    #[test]
    fn ids_are_zero_padded() {
        assert_eq!(job_id(0, 1), "000");
        assert_eq!(job_id(7, 10), "007");
        assert_eq!(job_id(999, 1000), "999");
        assert_eq!(job_id(12, 1001), "0012");
    }

    #[test]
    fn plan_rejects_unserializable_scope() {
        let variants = vec![
            variant(&[("x", Value::Int(1))]),
            variant(&[("ok", Value::Int(2)), ("bad", Value::Float(f64::NAN))]),
        ];
        match plan(&variants, Path::new(".")) {
            Err(Error::ScopeSerialization { key, .. }) => assert_eq!(key, "bad"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn writes_scopes_and_wrappers() {
        let root = tempfile::tempdir().unwrap();
        let script_dir = tempfile::tempdir().unwrap();
        fs::write(script_dir.path().join("lookup.csv"), "a,b\n").unwrap();

        let mut second = variant(&[("x", Value::Int(2))]);
        second.transfer_files = vec!["lookup.csv".into(), "root://host//remote.root".into()];
        second.packages = vec!["numpy".into()];
        let plans = plan(&[variant(&[("x", Value::Int(1))]), second], script_dir.path()).unwrap();

        let config = Config::default();
        let run = RunRegistry::new(root.path()).create_run("demo", Utc::now()).unwrap();
        let script = script_dir.path().join("demo.sh");
        let materializer = Materializer::new(&config, &run, &script, "bash");
        let segment = materializer.write_job_segment("\n\necho hi\n").unwrap();
        assert!(segment.ends_with("job_segment.sh"));

        let records = materializer
            .materialize(&plans, &segment, &Schedule::default(), Utc::now())
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id, "001");
        assert_eq!(records[1].scope.get("x").unwrap(), &json!(2));

        let scope_text = fs::read_to_string(&records[0].scope_path).unwrap();
        assert_eq!(serde_json::from_str::<serde_json::Value>(&scope_text).unwrap(), json!({"x": 1}));

        assert!(records[1].transfer_files[0].ends_with("inputs/lookup.csv"));
        assert_eq!(records[1].transfer_files[1], "root://host//remote.root");
        let wrapper = fs::read_to_string(&records[1].wrapper_path).unwrap();
        assert!(wrapper.contains("numpy"));
        assert!(wrapper.contains("root://host//remote.root"));
    }

    #[test]
    fn replan_follows_a_moved_run() {
        let root = tempfile::tempdir().unwrap();
        let script_dir = tempfile::tempdir().unwrap();
        fs::write(script_dir.path().join("lookup.csv"), "a,b\n").unwrap();

        let mut staged = variant(&[("x", Value::Int(1))]);
        staged.transfer_files = vec!["lookup.csv".into(), "root://host//remote.root".into()];
        let plans = plan(&[staged], script_dir.path()).unwrap();

        let config = Config::default();
        let run = RunRegistry::new(root.path()).create_run("moved", Utc::now()).unwrap();
        let materializer = Materializer::new(&config, &run, Path::new("/work/moved.sh"), "bash");
        let segment = materializer.write_job_segment("echo\n").unwrap();
        let records = materializer
            .materialize(&plans, &segment, &Schedule::default(), Utc::now())
            .unwrap();

        let moved = root.path().join("elsewhere");
        fs::rename(run.path(), &moved).unwrap();

        let replanned = replan(&[&records[0]], &moved).unwrap();
        assert_eq!(
            replanned[0].transfer_files,
            vec![
                TransferFile::Local(moved.join("inputs").join("lookup.csv")),
                TransferFile::Remote("root://host//remote.root".into()),
            ]
        );
        assert_eq!(replanned[0].replaces.as_ref().unwrap().run_dir, moved);
    }
}
