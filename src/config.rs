use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::Compartment;
use crate::error::PeelError;

pub const DEFAULT_CONFIG_FILE: &str = "peeling.json";

/// Remote client knobs. Every field may be omitted from `peeling.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientSettings {
    pub api_url: String,
    pub chunk_size: usize,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub timeout_secs: u64,
    pub connect_retries: usize,
    pub max_idle_connections: usize,
    pub page_size: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_url: "https://rest.uniprot.org".to_string(),
            chunk_size: 2000,
            poll_interval_ms: 5000,
            max_poll_attempts: 10,
            timeout_secs: 600,
            connect_retries: 5,
            max_idle_connections: 10,
            page_size: 500,
        }
    }
}

impl ClientSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ClientSettings, PeelError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(ClientSettings::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| PeelError::ConfigRead(config_path.clone()))?;
        let settings: ClientSettings = serde_json::from_str(&content)
            .map_err(|err| PeelError::ConfigParse(err.to_string()))?;

        Self::resolve_config(settings)
    }

    pub fn resolve_config(settings: ClientSettings) -> Result<ClientSettings, PeelError> {
        if settings.chunk_size == 0 {
            return Err(PeelError::ConfigParse("chunk_size must be at least 1".to_string()));
        }
        if settings.page_size == 0 {
            return Err(PeelError::ConfigParse("page_size must be at least 1".to_string()));
        }
        if settings.max_poll_attempts == 0 {
            return Err(PeelError::ConfigParse(
                "max_poll_attempts must be at least 1".to_string(),
            ));
        }
        let api_url = settings.api_url.trim_end_matches('/').to_string();
        Ok(ClientSettings { api_url, ..settings })
    }
}

/// Optional local files that replace remote calls.
#[derive(Debug, Clone, Default)]
pub struct LocalOverrides {
    pub ids: Option<PathBuf>,
    pub true_positive: Option<PathBuf>,
    pub false_positive: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub mass_file: PathBuf,
    pub controls: usize,
    pub replicates: usize,
    pub tolerance: usize,
    pub compartment: Compartment,
    pub cache: bool,
    pub reuse_cache: bool,
    pub no_id_mapping: bool,
    pub overrides: LocalOverrides,
}

impl RunSettings {
    pub fn total_columns(&self) -> usize {
        self.controls * self.replicates
    }

    pub fn validate(&self) -> Result<(), PeelError> {
        if self.controls < 1 {
            return Err(PeelError::InvalidCount(
                "# Controls should be a positive integer".to_string(),
            ));
        }
        if self.replicates < 1 {
            return Err(PeelError::InvalidCount(
                "# Replicates should be a positive integer".to_string(),
            ));
        }
        if self.overrides.true_positive.is_some() != self.overrides.false_positive.is_some() {
            return Err(PeelError::InvalidInput(
                "local annotation files must be given for both true and false positives"
                    .to_string(),
            ));
        }
        validate_tolerance(self.tolerance, self.total_columns())
    }
}

pub fn validate_tolerance(tolerance: usize, columns: usize) -> Result<(), PeelError> {
    if tolerance > columns {
        return Err(PeelError::ToleranceOutOfRange { tolerance, columns });
    }
    Ok(())
}
