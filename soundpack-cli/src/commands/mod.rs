pub mod prune;
pub mod status;
pub mod sync;
pub mod update_all;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;

use soundpack_core::{Template, VoiceId};
use soundpack_provider::command::CommandProvider;
use soundpack_provider::ttsmonster::TtsMonsterProvider;
use soundpack_provider::{ProviderOptions, TtsProvider};
use soundpack_sync::batch::{self, ProviderRegistry};
use soundpack_sync::config::{self, RunConfig};

pub const TTSMONSTER_KEY_ENV: &str = "TTSMONSTER_API_KEY";
pub const ENGINE_CMD_ENV: &str = "SOUNDPACK_ENGINE_CMD";
pub const DEFAULT_ENGINE_CMD: &str = "espeak-ng --stdout -v {voice}";

/// Services the CLI can build a provider for.
pub const CLI_SERVICES: &[&str] = &["local", "ttsm"];

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

/// Template and config flags shared by every command.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Template file (JSON or YAML). Defaults to `template:` in the config.
    #[arg(long, short)]
    pub template: Option<PathBuf>,

    /// Config file. Defaults to `soundpack.yaml` in the target directory.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl SourceArgs {
    pub fn load(&self, dir: &Path) -> Result<(RunConfig, Template)> {
        let config = match &self.config {
            Some(path) => config::load_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => config::load_at(dir)
                .with_context(|| format!("failed to load config in {}", dir.display()))?,
        };
        let template_path = self
            .template
            .clone()
            .or_else(|| config.template.clone())
            .with_context(|| {
                format!(
                    "no template given; pass --template or set `template:` in {}",
                    config::CONFIG_FILE
                )
            })?;
        let template = soundpack_core::template::load_at(&template_path)
            .with_context(|| format!("failed to load template {}", template_path.display()))?;
        Ok((config, template))
    }
}

/// Build the provider for `service` from the environment.
pub fn provider_for(service: &str, options: &ProviderOptions) -> Result<Box<dyn TtsProvider>> {
    match service.to_ascii_lowercase().as_str() {
        "ttsm" => {
            let key = std::env::var(TTSMONSTER_KEY_ENV)
                .map_err(|_| anyhow!("{TTSMONSTER_KEY_ENV} is not set"))?;
            Ok(Box::new(TtsMonsterProvider::new(key, options, PROVIDER_TIMEOUT)))
        }
        "local" => {
            let line =
                std::env::var(ENGINE_CMD_ENV).unwrap_or_else(|_| DEFAULT_ENGINE_CMD.to_string());
            let engine = CommandProvider::from_command_line(&line, PROVIDER_TIMEOUT)
                .with_context(|| format!("{ENGINE_CMD_ENV} is empty"))?;
            Ok(Box::new(engine))
        }
        "awspolly" => bail!(
            "AWS Polly needs an authenticated client session; drive it through the soundpack-sync library"
        ),
        other => bail!(
            "unknown service '{other}'; expected one of: {}",
            CLI_SERVICES.join(", ")
        ),
    }
}

/// Every provider the environment can build, keyed by service.
pub fn provider_registry(config: &RunConfig) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for service in CLI_SERVICES {
        match provider_for(service, &config.options_for(service)) {
            Ok(provider) => {
                registry.insert(service.to_string(), provider);
            }
            Err(err) => tracing::info!("{service} packs will be skipped: {err}"),
        }
    }
    registry
}

/// Service and voice from a `<Service>-<Voice>` directory or its `sounds/`.
pub fn infer_pack(dir: &Path) -> Option<(String, VoiceId)> {
    let resolved = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    let pack_dir = if resolved
        .file_name()
        .is_some_and(|name| name == batch::SOUNDS_DIR)
    {
        resolved.parent()?
    } else {
        resolved.as_path()
    };
    batch::parse_pack_name(pack_dir.file_name()?.to_str()?)
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize JSON output")?
    );
    Ok(())
}
