use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info, warn};
use serde::Serialize;
use tinytemplate::TinyTemplate;

use crate::error::{Error, IoContext, Result};
use crate::scheduler::{JobDescription, JobHandle, Scheduler, SchedulerStatus};

/// Submits and queries jobs with the HTCondor command line tools
///
/// Commands are looked up on `PATH` unless a directory holding them is given.
#[derive(Debug, Clone, Default)]
pub struct CondorScheduler {
    bin_dir: Option<PathBuf>,
}

/// One `key = value` line of a submit description
#[derive(Serialize)]
struct Attribute {
    key: String,
    value: String,
}

/// Rendering context for the submit description
#[derive(Serialize)]
struct SubmitContext {
    id: String,
    executable: String,
    attributes: Vec<Attribute>,
}

impl CondorScheduler {
    pub fn new() -> CondorScheduler {
        CondorScheduler::default()
    }

    pub fn with_bin_dir(dir: impl Into<PathBuf>) -> CondorScheduler {
        CondorScheduler {
            bin_dir: Some(dir.into()),
        }
    }

    fn command(&self, name: &str) -> Command {
        match &self.bin_dir {
            Some(dir) => Command::new(dir.join(name)),
            None => Command::new(name),
        }
    }

    /// Run a query command, `None` if it failed or printed nothing
    fn query(&self, name: &str, handle: &JobHandle, extra: &[&str]) -> Option<String> {
        let mut cmd = self.command(name);
        cmd.arg(handle.to_string())
            .args(extra)
            .args(["-af", "JobStatus", "ExitCode"]);
        debug!("{:?}", &cmd);
        match cmd.output() {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                (!stdout.is_empty()).then_some(stdout)
            }
            Ok(output) => {
                warn!(
                    "{name} failed for {handle}: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                None
            }
            Err(err) => {
                warn!("Can't run {name}: {err}");
                None
            }
        }
    }
}

/// Attributes every job gets before batch and job settings are applied
pub fn default_attributes(job: &JobDescription) -> BTreeMap<String, String> {
    let mut attributes = BTreeMap::from([
        ("universe".to_string(), "vanilla".to_string()),
        ("initialdir".to_string(), job.run_dir.display().to_string()),
        ("output".to_string(), format!("out_{}.txt", job.id)),
        ("error".to_string(), format!("err_{}.txt", job.id)),
        ("log".to_string(), format!("log_{}.txt", job.id)),
        ("should_transfer_files".to_string(), "YES".to_string()),
        ("when_to_transfer_output".to_string(), "ON_EXIT".to_string()),
    ]);
    if !job.input_files.is_empty() {
        let files: Vec<String> = job
            .input_files
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        attributes.insert("transfer_input_files".to_string(), files.join(","));
    }
    if let Ok(proxy) = env::var("X509_USER_PROXY") {
        attributes.insert("x509userproxy".to_string(), proxy);
    }
    attributes
}

/// Render the submit description using TinyTemplate
pub fn render_submit_description(job: &JobDescription) -> Result<String> {
    /// included submit description template
    static SUBMIT: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/submit.jdl.txt"));
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&tinytemplate::format_unescaped);
    tt.add_template("submit", SUBMIT)?;

    let attributes = job
        .merged_attributes(default_attributes(job))
        .into_iter()
        .map(|(key, value)| Attribute { key, value })
        .collect();
    let context = SubmitContext {
        id: job.id.clone(),
        executable: job.wrapper_path.display().to_string(),
        attributes,
    };
    Ok(tt.render("submit", &context)?)
}

/// Cluster id from `condor_submit` output ("1 job(s) submitted to cluster 1234.")
fn parse_cluster(stdout: &str) -> Option<u64> {
    let (_, rest) = stdout.split_once("submitted to cluster")?;
    rest.trim().trim_end_matches('.').split_whitespace().next()?.trim_end_matches('.').parse().ok()
}

/// Map `JobStatus ExitCode` as printed by `-af`
fn parse_status(line: &str) -> SchedulerStatus {
    let mut fields = line.split_whitespace();
    let status = fields.next().and_then(|code| code.parse::<u32>().ok());
    let exit_code = fields.next().and_then(|code| code.parse::<i64>().ok());
    match status {
        Some(1) | Some(7) => SchedulerStatus::Queued,
        Some(2) | Some(6) => SchedulerStatus::Running,
        Some(3) | Some(5) => SchedulerStatus::Failed,
        Some(4) => match exit_code {
            Some(code) if code != 0 => SchedulerStatus::Failed,
            _ => SchedulerStatus::Completed,
        },
        _ => SchedulerStatus::Unknown,
    }
}

fn write_submit_description(path: &Path, content: &str) -> Result<()> {
    info!("Writing submit description to {}", path.display());
    fs::write(path, content).at(path)
}

impl Scheduler for CondorScheduler {
    fn submit(&self, job: &JobDescription) -> Result<JobHandle> {
        let description = render_submit_description(job)?;
        let jdl_path = job.run_dir.join(format!("{}.jdl", job.id));
        write_submit_description(&jdl_path, &description)?;

        let mut cmd = self.command("condor_submit");
        cmd.arg(&jdl_path);
        info!("Running condor_submit process");
        info!("{:?}", &cmd);
        let output = cmd
            .output()
            .map_err(|err| Error::Scheduler(format!("can't run condor_submit: {err}")))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            return Err(Error::Scheduler(format!(
                "condor_submit failed for job {}: {}",
                job.id,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let cluster = parse_cluster(&stdout).ok_or_else(|| {
            Error::Scheduler(format!("unexpected condor_submit output: {}", stdout.trim()))
        })?;
        let handle = JobHandle { cluster, proc: 0 };
        info!("HTCondor job handle for {}: {handle}", job.id);
        Ok(handle)
    }

    fn query_status(&self, handle: &JobHandle) -> SchedulerStatus {
        let line = self
            .query("condor_q", handle, &[])
            .or_else(|| self.query("condor_history", handle, &["-limit", "1"]));
        match line {
            Some(line) => parse_status(line.lines().next().unwrap_or_default()),
            None => SchedulerStatus::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(run_dir: &Path) -> JobDescription {
        JobDescription {
            id: "003".into(),
            run_dir: run_dir.to_path_buf(),
            wrapper_path: run_dir.join("003.sh"),
            input_files: vec![run_dir.join("003.scope.json"), run_dir.join("inputs/data.tar")],
            attributes: BTreeMap::new(),
            overrides: BTreeMap::from([("request_memory".into(), "2GB".into())]),
        }
    }

    #[test]
    fn renders_submit_description() {
        let description = render_submit_description(&job(Path::new("/runs/r1"))).unwrap();
        assert!(description.starts_with("# kuljetin job 003\nexecutable = /runs/r1/003.sh\n"));
        assert!(description.contains("request_memory = 2GB\n"));
        assert!(description.contains("universe = vanilla\n"));
        assert!(description.contains("output = out_003.txt\n"));
        assert!(description
            .contains("transfer_input_files = /runs/r1/003.scope.json,/runs/r1/inputs/data.tar\n"));
        assert!(description.trim_end().ends_with("queue 1"));
    }

    #[test]
    fn parses_condor_output() {
        assert_eq!(parse_cluster("Submitting job(s).\n1 job(s) submitted to cluster 4242.\n"), Some(4242));
        assert_eq!(parse_cluster("ERROR: no"), None);

        assert_eq!(parse_status("1 undefined"), SchedulerStatus::Queued);
        assert_eq!(parse_status("2 undefined"), SchedulerStatus::Running);
        assert_eq!(parse_status("5 undefined"), SchedulerStatus::Failed);
        assert_eq!(parse_status("4 0"), SchedulerStatus::Completed);
        assert_eq!(parse_status("4 1"), SchedulerStatus::Failed);
        assert_eq!(parse_status("garbage"), SchedulerStatus::Unknown);
    }

    #[cfg(unix)]
    #[test]
    fn submits_through_the_command_line() {
        use std::os::unix::fs::PermissionsExt;

        let bin = tempfile::tempdir().unwrap();
        let fake = bin.path().join("condor_submit");
        fs::write(&fake, "#!/bin/sh\necho 'Submitting job(s).'\necho '1 job(s) submitted to cluster 77.'\n").unwrap();
        fs::set_permissions(&fake, fs::Permissions::from_mode(0o755)).unwrap();

        let run = tempfile::tempdir().unwrap();
        let scheduler = CondorScheduler::with_bin_dir(bin.path());
        let handle = scheduler.submit(&job(run.path())).unwrap();
        assert_eq!(handle, JobHandle { cluster: 77, proc: 0 });
        assert!(run.path().join("003.jdl").exists());

        // no condor_q or condor_history in the fake bin dir
        assert_eq!(scheduler.query_status(&handle), SchedulerStatus::Unknown);
    }
}
