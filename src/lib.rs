//! kuljetin turns a script with an embedded submission block into batch jobs
//!
//! A script carries two kinds of code. The submission block runs once, at submission time, and
//! declares jobs with `submit()`. Everything else is the job itself and runs once per declared job
//! with that job's frozen parameters.

/// Error taxonomy shared by every module
pub mod error;
/// Settings file and defaults
pub mod config;
/// Split scripts into submission and job segments
pub mod script;
/// Frozen per-job parameters
pub mod scope;
/// The small language submission blocks are written in
pub mod lang;
/// Evaluate submission code against recording capabilities
pub mod sandbox;
/// Write scopes, staged inputs and job wrappers
pub mod materialize;
/// Run directories and their JSON records
pub mod registry;
/// Submit to and query the batch scheduler
pub mod scheduler;
/// Classify jobs of a run and relaunch a subset
pub mod resubmit;
/// Script to scheduler
pub mod submit;
/// Run the first job on this machine
pub mod local;

pub use config::Config;
pub use error::{Error, Result};
