//! Soundpack: keep TTS soundpacks in sync with their template.
//!
//! # Usage
//!
//! ```text
//! soundpack sync <dir> [--template <file>] [--service ttsm|local] [--voice <id>] [--dry-run] [--json]
//! soundpack status <dir> [--template <file>] [--json]
//! soundpack update-all <root> [--template <file>] [--yes] [--dry-run] [--json]
//! soundpack prune <dir> [--template <file>] [--yes]
//! ```

mod commands;

use std::fmt;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{prune::PruneArgs, status::StatusArgs, sync::SyncArgs, update_all::UpdateAllArgs};
use soundpack_core::UntrackedPolicy;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "soundpack",
    version,
    about = "Incrementally synthesize TTS soundpacks from a template",
    long_about = None,
)]
struct Cli {
    /// Log filter, e.g. `debug` or `soundpack_sync=debug`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synthesize missing and changed entries of one soundpack directory.
    Sync(SyncArgs),

    /// Show what a sync would do, without calling any provider.
    Status(StatusArgs),

    /// Sync every `<Service>-<Voice>` pack under a root directory.
    UpdateAll(UpdateAllArgs),

    /// Delete files the template no longer lists.
    Prune(PruneArgs),
}

// ---------------------------------------------------------------------------
// Shared UntrackedPolicy argument
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `UntrackedPolicy` from CLI args.
#[derive(Debug, Clone, Copy, Default)]
pub struct UntrackedArg(pub UntrackedPolicy);

impl FromStr for UntrackedArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adopt" => Ok(Self(UntrackedPolicy::Adopt)),
            "regenerate" => Ok(Self(UntrackedPolicy::Regenerate)),
            other => Err(format!(
                "unknown untracked policy '{other}'; expected: adopt, regenerate"
            )),
        }
    }
}

impl fmt::Display for UntrackedArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<UntrackedArg> for UntrackedPolicy {
    fn from(p: UntrackedArg) -> Self {
        p.0
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());
    match cli.command {
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::UpdateAll(args) => args.run(),
        Commands::Prune(args) => args.run(),
    }
}

/// Logs go to stderr so `--json` output stays parseable.
fn init_tracing(level: Option<&str>) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
