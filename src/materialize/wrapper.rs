use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::info;
use serde::Serialize;
use tinytemplate::TinyTemplate;

use crate::error::{IoContext, Result};
use crate::materialize::schedule::Schedule;

/// Everything the wrapper of one job needs to know
#[derive(Debug, Clone)]
pub struct WrapperSpec<'a> {
    pub id: &'a str,
    pub source_script: &'a Path,
    pub scope_path: &'a Path,
    pub job_segment: &'a Path,
    /// Command that runs the job segment, split by the shell
    pub interpreter: &'a str,
    pub env: &'a BTreeMap<String, String>,
    pub remote_files: Vec<&'a str>,
    pub packages: &'a [String],
    pub schedule: Schedule,
    pub install_command: &'a str,
    pub fetch_command: &'a str,
}

/// A job wrapper, written as rendered template sections in order
struct JobTemplate {
    header: Header,
    schedule: Option<ScheduleSection>,
    env: EnvVars,
    setup: Setup,
    run: Run,
}

impl JobTemplate {
    fn content(self) -> String {
        // order is important when writing the file
        let mut sections = vec![self.header.content];
        sections.extend(self.schedule.map(|section| section.content));
        sections.extend([self.env.content, self.setup.content, self.run.content]);
        sections.concat()
    }
}

/// Rendered header: locates the scope file and job segment, exports the job's identity
struct Header {
    content: String,
}

/// Rendered start time and deadline checks
///
/// Reaching the deadline exits 124 with a `DeadlineExceeded` message before any job code runs.
struct ScheduleSection {
    content: String,
}

/// Rendered environment variables declared with `env()`
struct EnvVars {
    content: String,
}

/// Rendered job-time setup: remote files fetched, packages installed
struct Setup {
    content: String,
}

/// Rendered job segment invocation and completion marker
struct Run {
    content: String,
}

/// Rendering context for header
#[derive(Serialize)]
struct HeaderContext {
    id: String,
    time_now: String,
    source_script: String,
    scope_name: String,
    scope_path: String,
    segment_name: String,
    segment_path: String,
}

/// Rendering context for the schedule checks
#[derive(Serialize)]
struct ScheduleContext {
    start: String,
    start_ms: i64,
    has_deadline: bool,
    deadline: String,
    deadline_ms: i64,
}

#[derive(Serialize)]
struct EnvVar {
    name: String,
    value: String,
}

/// Rendering context for environment variables
#[derive(Serialize)]
struct EnvVarContext {
    vars: Vec<EnvVar>,
}

/// Rendering context for setup
#[derive(Serialize)]
struct SetupContext {
    remote_files: Vec<String>,
    fetch_command: String,
    has_packages: bool,
    install_command: String,
    packages: String,
}

/// Rendering context for the run section
#[derive(Serialize)]
struct RunContext {
    interpreter: String,
}

/// Quote a value for a POSIX shell unless it is obviously safe
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

fn quoted_path(path: &Path) -> String {
    shell_quote(&path.display().to_string())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn template(name: &'static str, text: &'static str) -> Result<TinyTemplate<'static>> {
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&tinytemplate::format_unescaped);
    tt.add_template(name, text)?;
    Ok(tt)
}

/// Render the header using TinyTemplate
fn render_header(spec: &WrapperSpec) -> Result<Header> {
    /// included header template
    static HEADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/wrapper_header.txt"));
    let tt = template("header", HEADER)?;
    let context = HeaderContext {
        id: shell_quote(spec.id),
        time_now: Utc::now().to_rfc3339(),
        source_script: spec.source_script.display().to_string(),
        scope_name: shell_quote(&file_name(spec.scope_path)),
        scope_path: quoted_path(spec.scope_path),
        segment_name: shell_quote(&file_name(spec.job_segment)),
        segment_path: quoted_path(spec.job_segment),
    };
    Ok(Header { content: tt.render("header", &context)? })
}

/// Render the start and deadline checks, if the batch has a schedule
fn render_schedule(schedule: &Schedule) -> Result<Option<ScheduleSection>> {
    /// included schedule template
    static SCHEDULE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/wrapper_schedule.txt"));
    let Some(start) = schedule.start else {
        return Ok(None);
    };
    let tt = template("schedule", SCHEDULE)?;
    let context = ScheduleContext {
        start: start.to_rfc3339(),
        start_ms: start.timestamp_millis(),
        has_deadline: schedule.deadline.is_some(),
        deadline: schedule.deadline.map(|d| d.to_rfc3339()).unwrap_or_default(),
        deadline_ms: schedule.deadline.map(|d| d.timestamp_millis()).unwrap_or_default(),
    };
    Ok(Some(ScheduleSection { content: tt.render("schedule", &context)? }))
}

/// Render the environment variables using TinyTemplate
fn render_env(env: &BTreeMap<String, String>) -> Result<EnvVars> {
    /// included environment variables template
    static ENV_VARS: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/wrapper_env.txt"));
    let tt = template("env", ENV_VARS)?;
    let vars = env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: shell_quote(value),
        })
        .collect();
    Ok(EnvVars { content: tt.render("env", &EnvVarContext { vars })? })
}

/// Render the fetch and install commands using TinyTemplate
fn render_setup(spec: &WrapperSpec) -> Result<Setup> {
    /// included setup template
    static SETUP: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/wrapper_setup.txt"));
    let tt = template("setup", SETUP)?;
    let context = SetupContext {
        remote_files: spec.remote_files.iter().map(|uri| shell_quote(uri)).collect(),
        fetch_command: spec.fetch_command.to_string(),
        has_packages: !spec.packages.is_empty(),
        install_command: spec.install_command.to_string(),
        packages: spec
            .packages
            .iter()
            .map(|package| shell_quote(package))
            .collect::<Vec<_>>()
            .join(" "),
    };
    Ok(Setup { content: tt.render("setup", &context)? })
}

/// Render the job segment invocation using TinyTemplate
fn render_run(interpreter: &str) -> Result<Run> {
    /// included run template
    static RUN: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/wrapper_run.txt"));
    let tt = template("run", RUN)?;
    let context = RunContext {
        interpreter: interpreter.to_string(),
    };
    Ok(Run { content: tt.render("run", &context)? })
}

/// Render the complete wrapper script
pub fn render(spec: &WrapperSpec) -> Result<String> {
    let job = JobTemplate {
        header: render_header(spec)?,
        schedule: render_schedule(&spec.schedule)?,
        env: render_env(spec.env)?,
        setup: render_setup(spec)?,
        run: render_run(spec.interpreter)?,
    };
    Ok(job.content())
}

/// Write an executable wrapper
pub fn write(path: &Path, content: &str) -> Result<PathBuf> {
    info!("Writing job wrapper to {}", path.display());
    let mut file = fs::File::create(path).at(path)?;
    file.write_all(content.as_bytes()).at(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).at(path)?;
    }
    Ok(path.to_path_buf())
}
