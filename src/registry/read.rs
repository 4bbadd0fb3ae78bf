use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, IoContext, Result};
use crate::registry::schema::{self, Schemas};
use crate::registry::{JobRecord, RunRecord, JOBS_DIR, RUN_RECORD_FILE};

/// A run record with all of its job records
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedRun {
    /// Where the run was found, which may differ from `record.run_dir` if it was moved
    pub dir: PathBuf,
    pub record: RunRecord,
    pub jobs: Vec<JobRecord>,
}

impl LoadedRun {
    pub fn job(&self, id: &str) -> Option<&JobRecord> {
        self.jobs.iter().find(|job| job.id == id)
    }
}

/// Find the run directory for `run.json`, a job record, or the directory itself
fn run_dir_of(path: &Path) -> PathBuf {
    if path.is_dir() {
        return path.to_path_buf();
    }
    let parent = path.parent().unwrap_or(Path::new(".")).to_path_buf();
    match parent.file_name() {
        Some(name) if name == JOBS_DIR && !parent.join(RUN_RECORD_FILE).exists() => {
            parent.parent().unwrap_or(Path::new(".")).to_path_buf()
        }
        _ => parent,
    }
}

/// Load a run from any path inside it
///
/// A missing run is `RunRecordNotFound`. Anything that is there but can't be trusted, including a
/// job record the run lists but that is absent, is `RunRecordCorrupt`.
pub fn load(path: &Path) -> Result<LoadedRun> {
    if !path.exists() {
        return Err(Error::RunRecordNotFound(path.to_path_buf()));
    }
    let dir = run_dir_of(path);
    let run_path = dir.join(RUN_RECORD_FILE);
    if !run_path.is_file() {
        return Err(Error::RunRecordNotFound(run_path));
    }

    let schemas = Schemas::load().map_err(|reason| Error::RunRecordCorrupt {
        path: run_path.clone(),
        reason,
    })?;
    let record: RunRecord = read_record(&run_path, &schemas.run)?;

    let mut jobs = Vec::with_capacity(record.jobs.len());
    for id in &record.jobs {
        let job_path = dir.join(JOBS_DIR).join(format!("{id}.json"));
        if !job_path.is_file() {
            return Err(corrupt(&run_path, format!("job record {id} is missing")));
        }
        let job: JobRecord = read_record(&job_path, &schemas.job)?;
        if &job.id != id {
            return Err(corrupt(&job_path, format!("expected job {id}, found {}", job.id)));
        }
        jobs.push(job);
    }
    info!("Loaded run {} with {} job(s)", dir.display(), jobs.len());
    Ok(LoadedRun { dir, record, jobs })
}

/// Run directories under `root` that hold a readable run record, newest first
pub fn list_runs(root: &Path) -> Result<Vec<(PathBuf, RunRecord)>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(Error::RunRecordNotFound(root.to_path_buf()))
        }
        Err(err) => return Err(err).at(root),
    };
    let schemas = Schemas::load().map_err(|reason| corrupt(root, reason))?;

    let mut runs = vec![];
    for entry in entries {
        let dir = entry.at(root)?.path();
        let run_path = dir.join(RUN_RECORD_FILE);
        if !run_path.is_file() {
            continue;
        }
        match read_record::<RunRecord>(&run_path, &schemas.run) {
            Ok(record) => runs.push((dir, record)),
            Err(err) => warn!("Skipping {}: {err}", dir.display()),
        }
    }
    runs.sort_by(|(_, a), (_, b)| b.created_at.cmp(&a.created_at));
    Ok(runs)
}

fn corrupt(path: &Path, reason: impl Into<String>) -> Error {
    Error::RunRecordCorrupt {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Read, parse untyped, validate, then deserialise into the typed record
fn read_record<T: DeserializeOwned>(path: &Path, compiled_schema: &jsonschema::JSONSchema) -> Result<T> {
    let json = parse_untyped_json(path)?;
    schema::validate(compiled_schema, &json).map_err(|reason| {
        warn!("{} fails validation", path.display());
        corrupt(path, reason)
    })?;
    serde_json::from_value::<T>(json).map_err(|err| corrupt(path, err.to_string()))
}

fn parse_untyped_json(path: &Path) -> Result<Value> {
    let json_string = fs::read_to_string(path).map_err(|err| {
        warn!("Can't read record at path {}: {}", path.display(), err);
        corrupt(path, format!("unreadable: {err}"))
    })?;
    serde_json::from_str::<Value>(&json_string).map_err(|err| corrupt(path, format!("invalid JSON: {err}")))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::registry::RunRegistry;
    use crate::scope::Scope;

    fn job(run: &Path, id: &str) -> JobRecord {
        let value = json!(id);
        JobRecord {
            id: id.to_string(),
            source_script: "/work/demo.sh".into(),
            scope: Scope::freeze([("id", &value)]).unwrap(),
            transfer_files: vec!["root://eos/data.root".into()],
            package_installs: vec![],
            scheduler_overrides: BTreeMap::new(),
            env: BTreeMap::new(),
            wrapper_path: run.join(format!("{id}.sh")),
            scope_path: run.join(format!("{id}.scope.json")),
            scheduled_start: None,
            deadline: None,
            submitted_at: Utc::now(),
            handle: None,
            replaces: None,
        }
    }

    fn write_run(root: &Path, ids: &[&str]) -> PathBuf {
        let run = RunRegistry::new(root).create_run("demo", Utc::now()).unwrap();
        for id in ids {
            run.write_job(&job(run.path(), id)).unwrap();
        }
        run.write_run(&RunRecord {
            run_dir: run.path().to_path_buf(),
            source_script: "/work/demo.sh".into(),
            created_at: Utc::now(),
            jobs: ids.iter().map(|id| id.to_string()).collect(),
            job_segment: run.path().join("job_segment.sh"),
            interpreter: "bash".into(),
            delay_seconds: Some(10.0),
            allowed_lateness_seconds: None,
            scheduled_start: None,
            deadline: None,
            dry: true,
            resubmission_of: None,
        })
        .unwrap();
        run.path().to_path_buf()
    }

    #[test]
    fn loads_from_any_path_in_the_run() {
        let root = tempfile::tempdir().unwrap();
        let dir = write_run(root.path(), &["000", "001"]);

        for path in [dir.clone(), dir.join(RUN_RECORD_FILE), dir.join("jobs/001.json")] {
            let loaded = load(&path).unwrap();
            assert_eq!(loaded.dir, dir);
            assert_eq!(loaded.record.jobs, vec!["000", "001"]);
            let expected = job(&dir, "001");
            assert_eq!(loaded.jobs[1].scope, expected.scope);
            assert_eq!(loaded.jobs[1].transfer_files, expected.transfer_files);
            assert_eq!(loaded.job("000").map(|j| &j.wrapper_path), Some(&dir.join("000.sh")));
        }
    }

    #[test]
    fn missing_and_corrupt_are_distinguished() {
        let root = tempfile::tempdir().unwrap();
        assert!(matches!(
            load(&root.path().join("nowhere")),
            Err(Error::RunRecordNotFound(_))
        ));
        assert!(matches!(load(root.path()), Err(Error::RunRecordNotFound(_))));

        let dir = write_run(root.path(), &["000", "001"]);
        fs::remove_file(dir.join("jobs/001.json")).unwrap();
        assert!(matches!(load(&dir), Err(Error::RunRecordCorrupt { .. })));

        let other = tempfile::tempdir().unwrap();
        fs::write(other.path().join(RUN_RECORD_FILE), r#"{"run_dir": 3}"#).unwrap();
        match load(other.path()) {
            Err(Error::RunRecordCorrupt { reason, .. }) => assert!(reason.contains("run_dir")),
            result => panic!("unexpected {result:?}"),
        }

        fs::write(other.path().join(RUN_RECORD_FILE), "{ not json").unwrap();
        assert!(matches!(load(other.path()), Err(Error::RunRecordCorrupt { .. })));
    }

    #[test]
    fn lists_runs_newest_first() {
        let root = tempfile::tempdir().unwrap();
        let older = write_run(root.path(), &["000"]);
        let newer = write_run(root.path(), &[]);
        fs::create_dir(root.path().join("not_a_run")).unwrap();

        let runs = list_runs(root.path()).unwrap();
        let names: Vec<_> = runs.iter().map(|(dir, _)| dir.file_name().unwrap()).collect();
        assert_eq!(names.len(), 2);
        assert!(runs[0].1.created_at >= runs[1].1.created_at);
        assert!(names.contains(&older.file_name().unwrap()));
        assert!(names.contains(&newer.file_name().unwrap()));
    }
}
