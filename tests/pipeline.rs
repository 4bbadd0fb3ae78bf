use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;

use kuljetin::registry::{self, RunRegistry};
use kuljetin::resubmit::{resubmit, JobState, Resubmission};
use kuljetin::scheduler::{JobDescription, JobHandle, Scheduler, SchedulerStatus};
use kuljetin::submit::{submit_script, SubmitOptions};
use kuljetin::{Config, Error, Result};

/// Accepts the first `accept` jobs and refuses the rest
struct Scripted {
    accept: usize,
    submitted: RefCell<Vec<JobDescription>>,
}

impl Scripted {
    fn accepting(accept: usize) -> Self {
        Scripted {
            accept,
            submitted: RefCell::new(Vec::new()),
        }
    }
}

impl Scheduler for Scripted {
    fn submit(&self, job: &JobDescription) -> Result<JobHandle> {
        let mut submitted = self.submitted.borrow_mut();
        if submitted.len() >= self.accept {
            return Err(Error::Scheduler("queue is full".to_string()));
        }
        submitted.push(job.clone());
        Ok(JobHandle {
            cluster: 7000 + submitted.len() as u64,
            proc: 0,
        })
    }

    fn query_status(&self, _handle: &JobHandle) -> SchedulerStatus {
        SchedulerStatus::Queued
    }
}

struct Workspace {
    _dir: tempfile::TempDir,
    root: PathBuf,
    config: Config,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let config = Config {
            run_root: root.join("runs"),
            ..Config::default()
        };
        Workspace { _dir: dir, root, config }
    }

    fn script(&self, name: &str, text: &str) -> PathBuf {
        let path = self.root.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    fn run_count(&self) -> usize {
        match fs::read_dir(&self.config.run_root) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

fn scopes(run: &registry::LoadedRun) -> Vec<serde_json::Value> {
    run.jobs
        .iter()
        .map(|job| serde_json::to_value(&job.scope).unwrap())
        .collect()
}

#[test]
fn script_without_block_is_one_job_with_empty_scope() {
    let ws = Workspace::new();
    let script = ws.script("plain.sh", "#!/bin/bash\necho hello\n");
    let scheduler = Scripted::accepting(10);

    let run = submit_script(&script, &ws.config, &scheduler, SubmitOptions::default()).unwrap();

    assert_eq!(run.jobs.len(), 1);
    assert_eq!(scopes(&run), vec![json!({})]);
    assert_eq!(scheduler.submitted.borrow().len(), 1);
    let segment = fs::read_to_string(&run.record.job_segment).unwrap();
    assert_eq!(segment, "#!/bin/bash\necho hello\n");
}

#[test]
fn each_submit_call_becomes_one_job() {
    let ws = Workspace::new();
    let script = ws.script(
        "sweep.sh",
        "#!/bin/bash\n# submit:begin\nsubmit(x=1)\nsubmit(x=2)\n# submit:end\necho \"$1\"\n",
    );
    let scheduler = Scripted::accepting(10);

    let run = submit_script(&script, &ws.config, &scheduler, SubmitOptions::default()).unwrap();

    assert_eq!(scopes(&run), vec![json!({"x": 1}), json!({"x": 2})]);
    let ids: Vec<&str> = run.jobs.iter().map(|job| job.id.as_str()).collect();
    assert_eq!(ids, ["000", "001"]);
    assert!(run.jobs.iter().all(|job| job.handle.is_some()));

    // the block is blanked out, the job code keeps its line
    let segment = fs::read_to_string(&run.record.job_segment).unwrap();
    assert_eq!(segment.lines().nth(5), Some("echo \"$1\""));
    assert!(!segment.contains("submit(x=1)"));
}

#[test]
fn loop_submissions_keep_their_order() {
    let ws = Workspace::new();
    let script = ws.script(
        "loop.py",
        "# submit:begin\nfor m in [10, 20, 30] {\n  submit(mass=m, tag=\"m\" + str(m))\n}\n# submit:end\nprint('hi')\n",
    );

    let run = submit_script(&script, &ws.config, &Scripted::accepting(10), SubmitOptions::default()).unwrap();

    assert_eq!(
        scopes(&run),
        vec![
            json!({"mass": 10, "tag": "m10"}),
            json!({"mass": 20, "tag": "m20"}),
            json!({"mass": 30, "tag": "m30"}),
        ]
    );
    assert!(run.record.job_segment.ends_with("job_segment.py"));
}

#[test]
fn unserializable_scope_leaves_no_run_behind() {
    let ws = Workspace::new();
    let script = ws.script(
        "nan.sh",
        "# submit:begin\nsubmit(x=1)\nsubmit(y=float(\"nan\"))\n# submit:end\necho\n",
    );
    let scheduler = Scripted::accepting(10);

    match submit_script(&script, &ws.config, &scheduler, SubmitOptions::default()) {
        Err(Error::ScopeSerialization { key, .. }) => assert_eq!(key, "y"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(ws.run_count(), 0);
    assert!(scheduler.submitted.borrow().is_empty());
}

#[test]
fn malformed_block_submits_nothing() {
    let ws = Workspace::new();
    let script = ws.script("open.sh", "# submit:begin\nsubmit(x=1)\necho\n");
    let scheduler = Scripted::accepting(10);

    let err = submit_script(&script, &ws.config, &scheduler, SubmitOptions::default()).unwrap_err();

    assert!(matches!(err, Error::MalformedSubmissionBlock { line: 1, .. }));
    assert_eq!(ws.run_count(), 0);
    assert!(scheduler.submitted.borrow().is_empty());
}

#[test]
fn submission_code_errors_name_the_script_line() {
    let ws = Workspace::new();
    let script = ws.script(
        "broken.sh",
        "#!/bin/bash\n# submit:begin\nsubmit(x=1)\nsubmit(x=undefined_name)\n# submit:end\n",
    );

    let err = submit_script(&script, &ws.config, &Scripted::accepting(10), SubmitOptions::default()).unwrap_err();

    match err {
        Error::SubmissionCode { line, .. } => assert_eq!(line, 4),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(ws.run_count(), 0);
}

#[test]
fn dry_run_is_recorded_but_never_submitted() {
    let ws = Workspace::new();
    let script = ws.script("dry.sh", "# submit:begin\nsubmit(a=1)\nsubmit(a=2)\n# submit:end\n");
    let scheduler = Scripted::accepting(10);
    let options = SubmitOptions {
        dry: true,
        ..SubmitOptions::default()
    };

    let run = submit_script(&script, &ws.config, &scheduler, options).unwrap();

    assert!(scheduler.submitted.borrow().is_empty());
    let reloaded = registry::load(&run.dir).unwrap();
    assert!(reloaded.record.dry);
    assert_eq!(reloaded.jobs.len(), 2);
    assert!(reloaded.jobs.iter().all(|job| job.handle.is_none()));
}

#[test]
fn njobsmax_keeps_the_first_jobs() {
    let ws = Workspace::new();
    let script = ws.script("many.sh", "# submit:begin\nfor i in range(5) { submit(i=i) }\n# submit:end\n");
    let options = SubmitOptions {
        njobsmax: Some(2),
        ..SubmitOptions::default()
    };

    let run = submit_script(&script, &ws.config, &Scripted::accepting(10), options).unwrap();

    assert_eq!(scopes(&run), vec![json!({"i": 0}), json!({"i": 1})]);
}

#[test]
fn records_survive_a_round_trip() {
    let ws = Workspace::new();
    fs::write(ws.root.join("table.csv"), "1,2\n").unwrap();
    let script = ws.script(
        "full.sh",
        concat!(
            "# submit:begin\n",
            "file(\"table.csv\")\n",
            "pip(\"numpy\")\n",
            "htcondor(request_memory=\"2GB\")\n",
            "env(MODE=\"fast\")\n",
            "delay(60)\n",
            "allowed_lateness(3600)\n",
            "submit(run=1, cut=0.5, names=[\"a\", \"b\"], opts={\"deep\": true})\n",
            "# submit:end\n",
            "echo\n",
        ),
    );
    let scheduler = Scripted::accepting(10);

    let run = submit_script(&script, &ws.config, &scheduler, SubmitOptions::default()).unwrap();
    let reloaded = registry::load(&run.dir.join("run.json")).unwrap();

    assert_eq!(reloaded.record, run.record);
    assert_eq!(reloaded.jobs, run.jobs);
    let job = &reloaded.jobs[0];
    assert_eq!(
        serde_json::to_value(&job.scope).unwrap(),
        json!({"run": 1, "cut": 0.5, "names": ["a", "b"], "opts": {"deep": true}})
    );
    assert_eq!(job.package_installs, vec!["numpy".to_string()]);
    assert_eq!(job.scheduler_overrides["request_memory"], "2GB");
    assert_eq!(job.env["MODE"], "fast");
    assert!(job.transfer_files[0].ends_with("table.csv"));
    assert_eq!((job.scheduled_start.unwrap() - job.submitted_at).num_seconds(), 60);
    assert_eq!((job.deadline.unwrap() - job.submitted_at).num_seconds(), 3660);

    let submitted = scheduler.submitted.borrow();
    assert_eq!(submitted[0].overrides["request_memory"], "2GB");
    assert!(submitted[0]
        .input_files
        .iter()
        .any(|path| path.ends_with("inputs/table.csv")));

    // a job record alone is enough to find its run
    let via_job = registry::load(&run.dir.join("jobs").join("000.json")).unwrap();
    assert_eq!(via_job.dir, run.dir);
}

#[test]
fn scheduler_refusal_keeps_records_and_leaves_the_rest_idle() {
    let ws = Workspace::new();
    let script = ws.script("partial.sh", "# submit:begin\nfor i in range(3) { submit(i=i) }\n# submit:end\n");
    let scheduler = Scripted::accepting(1);

    let err = submit_script(&script, &ws.config, &scheduler, SubmitOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Scheduler(_)));

    let runs = registry::list_runs(&ws.config.run_root).unwrap();
    assert_eq!(runs.len(), 1);
    let loaded = registry::load(&runs[0].0).unwrap();
    let handles: Vec<bool> = loaded.jobs.iter().map(|job| job.handle.is_some()).collect();
    assert_eq!(handles, [true, false, false]);

    let resubmission = Resubmission::build(loaded, &scheduler);
    assert_eq!(resubmission.summary()[&JobState::Idle], 2);

    let idle = resubmission.select(JobState::Idle);
    let retry = Scripted::accepting(10);
    let registry = RunRegistry::new(&ws.config.run_root);
    let new_run = resubmit(&idle, &registry, &retry, &ws.config, false, |_| true)
        .unwrap()
        .unwrap();

    assert_eq!(scopes(&new_run), vec![json!({"i": 1}), json!({"i": 2})]);
    let replaced: Vec<&str> = new_run
        .jobs
        .iter()
        .map(|job| job.replaces.as_ref().unwrap().id.as_str())
        .collect();
    assert_eq!(replaced, ["001", "002"]);
    assert_eq!(registry::list_runs(&ws.config.run_root).unwrap().len(), 2);
}

#[test]
fn empty_failed_subset_creates_no_run() {
    let ws = Workspace::new();
    let script = ws.script("ok.sh", "# submit:begin\nsubmit(i=0)\n# submit:end\n");
    let scheduler = Scripted::accepting(10);
    let run = submit_script(&script, &ws.config, &scheduler, SubmitOptions::default()).unwrap();

    let resubmission = Resubmission::build(registry::load(&run.dir).unwrap(), &scheduler);
    let failed = resubmission.select(JobState::Failed);
    let registry = RunRegistry::new(&ws.config.run_root);
    let result = resubmit(&failed, &registry, &scheduler, &ws.config, false, |_| true).unwrap();

    assert!(result.is_none());
    assert_eq!(ws.run_count(), 1);
}

#[test]
fn loading_a_missing_run_is_reported() {
    let ws = Workspace::new();
    let err = registry::load(&ws.root.join("nowhere")).unwrap_err();
    assert!(matches!(err, Error::RunRecordNotFound(_)));
}

#[cfg(unix)]
mod wrappers {
    use std::process::Command;

    use super::*;

    fn run_wrapper(path: &Path, out_dir: &Path) -> i32 {
        Command::new("bash")
            .arg(path)
            .env("KULJETIN_OUTPUT_DIR", out_dir)
            .status()
            .unwrap()
            .code()
            .unwrap()
    }

    #[test]
    fn wrapper_runs_the_job_with_its_scope() {
        let ws = Workspace::new();
        let seen = ws.root.join("seen.json");
        let script = ws.script(
            "echo.sh",
            &format!(
                "#!/bin/bash\n# submit:begin\nsubmit(x=41)\n# submit:end\ncat \"$1\" > {}\nexit 2\n",
                seen.display()
            ),
        );
        let options = SubmitOptions {
            dry: true,
            ..SubmitOptions::default()
        };
        let run = submit_script(&script, &ws.config, &Scripted::accepting(10), options).unwrap();

        let code = run_wrapper(&run.jobs[0].wrapper_path, &run.dir);

        assert_eq!(code, 2);
        let scope: serde_json::Value = serde_json::from_str(&fs::read_to_string(&seen).unwrap()).unwrap();
        assert_eq!(scope, json!({"x": 41}));
        let marker = fs::read_to_string(run.dir.join("exitcode_000.txt")).unwrap();
        assert_eq!(marker.trim(), "2");
    }

    #[test]
    fn wrapper_past_its_deadline_does_not_run() {
        let ws = Workspace::new();
        let touched = ws.root.join("touched");
        let script = ws.script(
            "late.sh",
            &format!(
                "#!/bin/bash\n# submit:begin\nallowed_lateness(0)\nsubmit()\n# submit:end\ntouch {}\n",
                touched.display()
            ),
        );
        let options = SubmitOptions {
            dry: true,
            ..SubmitOptions::default()
        };
        let run = submit_script(&script, &ws.config, &Scripted::accepting(10), options).unwrap();

        let code = run_wrapper(&run.jobs[0].wrapper_path, &run.dir);

        assert_eq!(code, 124);
        assert!(!touched.exists());
        let marker = fs::read_to_string(run.dir.join("exitcode_000.txt")).unwrap();
        assert_eq!(marker.trim(), "124");
    }

    #[test]
    fn wrapper_inside_a_fractional_window_runs() {
        let ws = Workspace::new();
        let touched = ws.root.join("touched");
        let script = ws.script(
            "on_time.sh",
            &format!(
                "#!/bin/bash\n# submit:begin\nallowed_lateness(30.5)\nsubmit()\n# submit:end\ntouch {}\n",
                touched.display()
            ),
        );
        let options = SubmitOptions {
            dry: true,
            ..SubmitOptions::default()
        };
        let run = submit_script(&script, &ws.config, &Scripted::accepting(10), options).unwrap();

        assert_eq!(run_wrapper(&run.jobs[0].wrapper_path, &run.dir), 0);
        assert!(touched.exists());
    }
}
