use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use directories::BaseDirs;
use tempfile::Builder;

use crate::config::{ClientSettings, RunSettings};
use crate::domain::Compartment;
use crate::error::PeelError;

pub const LOG_FILE: &str = "log.txt";
pub const PLOTS_DIR: &str = "plots";

#[derive(Debug, Clone)]
pub struct Store {
    output_root: Utf8PathBuf,
    cache_root: Utf8PathBuf,
}

impl Store {
    pub fn new(output_root: &Utf8Path) -> Result<Self, PeelError> {
        let cache_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("peeling")).ok()
            })
            .ok_or_else(|| {
                PeelError::Filesystem("unable to resolve cache directory".to_string())
            })?;

        Ok(Self {
            output_root: output_root.to_owned(),
            cache_root,
        })
    }

    pub fn new_with_paths(output_root: Utf8PathBuf, cache_root: Utf8PathBuf) -> Self {
        Self {
            output_root,
            cache_root,
        }
    }

    pub fn run_dir(&self, started: DateTime<Local>) -> Utf8PathBuf {
        self.output_root
            .join(started.format("%Y-%m-%d_%H-%M-%S").to_string())
    }

    /// Create `<output>/<timestamp>/plots` and return the run directory.
    pub fn create_run_dir(&self, started: DateTime<Local>) -> Result<Utf8PathBuf, PeelError> {
        let run_dir = self.run_dir(started);
        fs::create_dir_all(run_dir.join(PLOTS_DIR).as_std_path())
            .map_err(|err| PeelError::Filesystem(err.to_string()))?;
        Ok(run_dir)
    }

    /// Rich and accession-only tables are cached apart.
    pub fn annotation_cache_dir(&self, compartment: Compartment, rich: bool) -> Utf8PathBuf {
        self.cache_root
            .join("annotations")
            .join(compartment.code())
            .join(if rich { "rich" } else { "accession" })
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), PeelError> {
        let parent = path
            .parent()
            .ok_or_else(|| PeelError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| PeelError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".peeling")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| PeelError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| PeelError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| PeelError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn write_run_log(
        run_dir: &Utf8Path,
        run: &RunSettings,
        client: &ClientSettings,
    ) -> Result<(), PeelError> {
        Self::write_bytes_atomic(&run_dir.join(LOG_FILE), run_log(run, client).as_bytes())
    }
}

/// The parameters a run was started with, one per line.
pub fn run_log(run: &RunSettings, client: &ClientSettings) -> String {
    let optional = |path: &Option<std::path::PathBuf>| {
        path.as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "None".to_string())
    };
    let lines = [
        format!("mass_file: {}", run.mass_file.display()),
        format!("controls: {}", run.controls),
        format!("replicates: {}", run.replicates),
        format!("tolerance: {}", run.tolerance),
        format!("compartment: {}", run.compartment),
        format!("ids: {}", optional(&run.overrides.ids)),
        format!("true_positive: {}", optional(&run.overrides.true_positive)),
        format!("false_positive: {}", optional(&run.overrides.false_positive)),
        format!("nomap: {}", run.no_id_mapping),
        format!("cache: {}", run.cache),
        format!("reuse_cache: {}", run.reuse_cache),
        format!("api_url: {}", client.api_url),
    ];
    let mut log = lines.join("\n");
    log.push('\n');
    log
}
