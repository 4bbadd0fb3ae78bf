use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use url::Url;

use crate::error::{Error, IoContext, Result};

/// A declared transfer file, resolved but not yet staged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferFile {
    /// Fetched by the job itself at start
    Remote(String),
    /// Copied into the run directory
    Local(PathBuf),
}

/// True for URIs with a real scheme; `C:\data` and plain paths are local
pub fn is_remote(entry: &str) -> bool {
    match Url::parse(entry) {
        Ok(url) => url.scheme().len() > 1 && url.scheme() != "file",
        Err(_) => false,
    }
}

impl TransferFile {
    /// Resolve a declared entry; relative local paths are taken from `base`
    pub fn resolve(entry: &str, base: &Path) -> Result<TransferFile> {
        if is_remote(entry) {
            return Ok(TransferFile::Remote(entry.to_string()));
        }
        let path = match Url::parse(entry) {
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map_err(|_| Error::TransferFile(PathBuf::from(entry)))?,
            _ => base.join(entry),
        };
        if !path.is_file() {
            return Err(Error::TransferFile(path));
        }
        Ok(TransferFile::Local(path))
    }
}

/// Copies local transfer files into a run's `inputs/` directory
///
/// The same source is copied once however many jobs declare it. Different sources with the same
/// file name get `_1`, `_2`… suffixes.
pub struct Stager {
    inputs_dir: PathBuf,
    staged: HashMap<PathBuf, PathBuf>,
    names: HashSet<String>,
}

impl Stager {
    pub fn new(inputs_dir: impl Into<PathBuf>) -> Stager {
        Stager {
            inputs_dir: inputs_dir.into(),
            staged: HashMap::new(),
            names: HashSet::new(),
        }
    }

    /// Stage one file, returning what the job record lists for it
    pub fn stage(&mut self, file: &TransferFile) -> Result<String> {
        let source = match file {
            TransferFile::Remote(uri) => {
                debug!("Leaving {uri} to be fetched at job start");
                return Ok(uri.clone());
            }
            TransferFile::Local(path) => path,
        };
        let key = fs::canonicalize(source).at(source)?;
        if let Some(dest) = self.staged.get(&key) {
            return Ok(dest.display().to_string());
        }

        fs::create_dir_all(&self.inputs_dir).at(&self.inputs_dir)?;
        let name = self.unique_name(&key);
        let dest = self.inputs_dir.join(&name);
        info!("Staging {} to {}", key.display(), dest.display());
        fs::copy(&key, &dest).at(&dest)?;
        self.names.insert(name);
        self.staged.insert(key, dest.clone());
        Ok(dest.display().to_string())
    }

    fn unique_name(&self, source: &Path) -> String {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "input".to_string());
        if !self.names.contains(&name) {
            return name;
        }
        let (stem, ext) = match name.split_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
            _ => (name.clone(), String::new()),
        };
        (1..)
            .map(|n| format!("{stem}_{n}{ext}"))
            .find(|candidate| !self.names.contains(candidate))
            .unwrap_or(name)
    }
}
