//! Optional run configuration, `soundpack.yaml`.
//!
//! ```yaml
//! template: template.json
//! workers: 4
//! untracked: adopt
//! retry:
//!   max_retries: 5
//!   min_interval_ms: 250
//! post_process:
//!   ceiling_db: -0.5
//! services:
//!   awspolly:
//!     engine: neural
//! ```
//!
//! Every field is optional; a missing file yields the defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use soundpack_audio::PostProcessConfig;
use soundpack_core::UntrackedPolicy;
use soundpack_provider::{ProviderOptions, RetryPolicy};

use crate::error::{io_err, SyncError};
use crate::orchestrator::{SyncSettings, DEFAULT_WORKERS};

pub const CONFIG_FILE: &str = "soundpack.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Template file, relative to the config file's directory.
    pub template: Option<PathBuf>,
    pub workers: usize,
    pub untracked: UntrackedPolicy,
    pub retry: RetryPolicy,
    pub post_process: PostProcessConfig,
    /// Provider options keyed by lowercase service name.
    pub services: BTreeMap<String, ProviderOptions>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            template: None,
            workers: DEFAULT_WORKERS,
            untracked: UntrackedPolicy::default(),
            retry: RetryPolicy::default(),
            post_process: PostProcessConfig::default(),
            services: BTreeMap::new(),
        }
    }
}

impl RunConfig {
    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            workers: self.workers,
            retry: self.retry.clone(),
            post_process: self.post_process.clone(),
            untracked: self.untracked,
        }
    }

    /// Options for `service` (case-insensitive); empty when unconfigured.
    pub fn options_for(&self, service: &str) -> ProviderOptions {
        self.services
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(service))
            .map(|(_, opts)| opts.clone())
            .unwrap_or_default()
    }
}

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Load `<dir>/soundpack.yaml`, or the defaults if it does not exist.
///
/// A relative `template` is resolved against `dir`.
pub fn load_at(dir: &Path) -> Result<RunConfig, SyncError> {
    let path = config_path(dir);
    if !path.exists() {
        return Ok(RunConfig::default());
    }
    load_file(&path)
}

pub fn load_file(path: &Path) -> Result<RunConfig, SyncError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let mut config: RunConfig = if contents.trim().is_empty() {
        RunConfig::default()
    } else {
        serde_yaml::from_str(&contents).map_err(|e| SyncError::Config {
            path: path.to_path_buf(),
            source: e,
        })?
    };
    if let (Some(template), Some(dir)) = (&config.template, path.parent()) {
        if template.is_relative() {
            config.template = Some(dir.join(template));
        }
    }
    Ok(config)
}
