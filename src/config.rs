//! Tool settings, read from JSON and overridden by command line flags

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Error, IoContext, Result};

/// Name of the settings file picked up from the working directory
pub const DEFAULT_CONFIG_FILE: &str = "kuljetin.json";

/// Literal lines that open and close the submission block of a script
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Delimiters {
    pub start: String,
    pub end: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Delimiters {
            start: "# submit:begin".to_string(),
            end: "# submit:end".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub delimiters: Delimiters,
    /// Directory that receives one timestamped run directory per submission
    pub run_root: PathBuf,
    /// Runs the job segment when the script has no shebang line
    pub interpreter: String,
    /// Job-time command that installs requested packages, packages are appended as arguments
    pub install_command: String,
    /// Job-time command that copies a remote URI into the job's working directory
    pub fetch_command: String,
    /// Scheduler attributes added to every job, job overrides win
    pub scheduler_attributes: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            delimiters: Delimiters::default(),
            run_root: PathBuf::from("."),
            interpreter: "bash".to_string(),
            install_command: "python3 -m pip install --user --no-cache-dir".to_string(),
            fetch_command: "xrdcp -f".to_string(),
            scheduler_attributes: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Read settings from an explicit file, or from `kuljetin.json` in the working directory if
    /// one exists, falling back to defaults
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Config::default());
                }
                default
            }
        };
        info!("Reading configuration from {}", path.display());
        let content = fs::read_to_string(&path).at(&path)?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| Error::Config(format!("{}: {}", path.display(), err)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let Delimiters { start, end } = &self.delimiters;
        if start.trim().is_empty() || end.trim().is_empty() {
            return Err(Error::Config("delimiters must not be blank".to_string()));
        }
        if start.trim() == end.trim() {
            return Err(Error::Config(
                "start and end delimiters must differ".to_string(),
            ));
        }
        if self.interpreter.trim().is_empty() {
            return Err(Error::Config("interpreter must not be blank".to_string()));
        }
        Ok(())
    }
}
