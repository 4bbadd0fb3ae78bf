use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};

use kuljetin::config::Config;
use kuljetin::local::run_local;
use kuljetin::registry::{self, RunRegistry};
use kuljetin::resubmit::{resubmit, JobState, Resubmission};
use kuljetin::scheduler::CondorScheduler;
use kuljetin::submit::{submit_script, SubmitOptions};

#[derive(Parser)]
#[command(name = "kuljetin", version, about = "Submit scripts with embedded submission blocks to HTCondor")]
struct Args {
    #[command(subcommand)]
    command: Commands,
    /// More logging, repeat for debug output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Settings file, defaults to ./kuljetin.json when present
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Enumerate every job of a script and submit them
    Submit {
        script: PathBuf,
        /// Write the run directory without calling the scheduler
        #[arg(long)]
        dry: bool,
        /// Submit at most this many jobs
        #[arg(long)]
        njobsmax: Option<usize>,
        /// Parent directory for run directories, overrides the settings file
        #[arg(long)]
        run_root: Option<PathBuf>,
    },
    /// Run the first job of a script locally
    Run { script: PathBuf },
    /// Show the state of every job in a run
    Status {
        /// Run directory, run.json or a job record
        path: PathBuf,
        #[arg(long, value_enum)]
        state: Option<JobState>,
    },
    /// Relaunch the jobs of a run that are in one state
    Resubmit {
        path: PathBuf,
        #[arg(long, value_enum, default_value_t = JobState::Failed)]
        state: JobState,
        /// Don't ask for confirmation
        #[arg(short, long)]
        yes: bool,
        #[arg(long)]
        dry: bool,
    },
    /// List run directories, newest first
    Runs { root: Option<PathBuf> },
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Warn,
        (false, 1) => LevelFilter::Info,
        (false, _) => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

/// Ask on stdin, anything but y/yes declines
fn confirm(count: usize) -> bool {
    print!("Resubmit {count} job(s)? [y/N] ");
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let mut config = Config::load(args.config.as_deref()).context("Can't load settings")?;
    let scheduler = CondorScheduler::new();

    match args.command {
        Commands::Submit {
            script,
            dry,
            njobsmax,
            run_root,
        } => {
            if let Some(root) = run_root {
                config.run_root = root;
            }
            let options = SubmitOptions { dry, njobsmax };
            let run = submit_script(&script, &config, &scheduler, options)
                .with_context(|| format!("Submission of {} failed", script.display()))?;
            println!("{}", run.dir.display());
        }
        Commands::Run { script } => {
            let result = run_local(&script, &config)
                .with_context(|| format!("Local run of {} failed", script.display()))?;
            info!("Local job ran with scope {}", result.scope);
            return Ok(ExitCode::from(u8::try_from(result.exit_code).unwrap_or(1)));
        }
        Commands::Status { path, state } => {
            let loaded = registry::load(&path).with_context(|| format!("Can't load run at {}", path.display()))?;
            let resubmission = Resubmission::build(loaded, &scheduler);
            match state {
                Some(state) => {
                    for job in resubmission.select(state).jobs {
                        println!("{}", job.id);
                    }
                }
                None => println!("{resubmission}"),
            }
        }
        Commands::Resubmit {
            path,
            state,
            yes,
            dry,
        } => {
            let loaded = registry::load(&path).with_context(|| format!("Can't load run at {}", path.display()))?;
            let resubmission = Resubmission::build(loaded, &scheduler);
            let selection = resubmission.select(state);
            let registry = RunRegistry::new(&config.run_root);
            let new_run = resubmit(&selection, &registry, &scheduler, &config, dry, |count| yes || confirm(count))
                .context("Resubmission failed")?;
            match new_run {
                Some(run) => println!("{}", run.dir.display()),
                None => println!("Nothing resubmitted ({} job(s) {state})", selection.len()),
            }
        }
        Commands::Runs { root } => {
            let root = root.unwrap_or_else(|| config.run_root.clone());
            let runs = registry::list_runs(&root).with_context(|| format!("Can't list runs in {}", root.display()))?;
            for (dir, record) in runs {
                let dry = if record.dry { " (dry)" } else { "" };
                println!("{}  {} job(s){}  {}", record.created_at.format("%Y-%m-%d %H:%M:%S"), record.jobs.len(), dry, dir.display());
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);
    info!("terve! starting up :)");
    run(args)
}
