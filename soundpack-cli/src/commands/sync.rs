//! `soundpack sync`: synthesize what one soundpack directory is missing.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use soundpack_core::VoiceId;
use soundpack_provider::RateGate;
use soundpack_sync::orchestrator::{EntryState, SyncResult, SyncStatus};
use soundpack_sync::{sync_pack, ChangeKind, SyncRequest};

use super::{infer_pack, print_json, provider_for, SourceArgs};
use crate::UntrackedArg;

/// Arguments for `soundpack sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Soundpack directory holding the audio files.
    pub dir: PathBuf,

    #[command(flatten)]
    pub source: SourceArgs,

    /// TTS service: `local` or `ttsm`. Inferred from a `<Service>-<Voice>` directory name.
    #[arg(long)]
    pub service: Option<String>,

    /// Voice id. Inferred from a `<Service>-<Voice>` directory name.
    #[arg(long)]
    pub voice: Option<String>,

    /// Show what would be synthesized without calling the provider or writing files.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit the sync summary as JSON.
    #[arg(long)]
    pub json: bool,

    /// Concurrent synthesis workers (1 = sequential).
    #[arg(long)]
    pub workers: Option<usize>,

    /// Treat files without a recorded fingerprint as `adopt` or `regenerate`.
    #[arg(long)]
    pub untracked: Option<UntrackedArg>,
}

impl SyncArgs {
    pub fn run(self) -> Result<ExitCode> {
        let (config, template) = self.source.load(&self.dir)?;
        let inferred = infer_pack(&self.dir);
        let service = self
            .service
            .clone()
            .or_else(|| inferred.as_ref().map(|(service, _)| service.clone()))
            .context("no service given; pass --service or use a <Service>-<Voice> directory")?;
        let voice = self
            .voice
            .clone()
            .map(VoiceId::from)
            .or_else(|| inferred.map(|(_, voice)| voice))
            .context("no voice given; pass --voice or use a <Service>-<Voice> directory")?;

        let mut settings = config.settings();
        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
        if let Some(untracked) = self.untracked {
            settings.untracked = untracked.into();
        }
        let options = config.options_for(&service);
        let provider = provider_for(&service, &options)?;
        let gate = RateGate::new(settings.retry.min_interval());

        let result = sync_pack(&SyncRequest {
            template: &template,
            base_dir: &self.dir,
            provider: provider.as_ref(),
            voice: &voice,
            options: &options,
            settings: &settings,
            gate: &gate,
            dry_run: self.dry_run,
        })
        .with_context(|| format!("sync failed for {}", self.dir.display()))?;

        if self.json {
            print_json(&result)?;
        } else {
            print_result(&result);
        }
        Ok(ExitCode::from(result.status().exit_code() as u8))
    }
}

#[derive(Tabled)]
struct FailureRow {
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "error")]
    kind: String,
    #[tabled(rename = "detail")]
    message: String,
}

fn print_result(result: &SyncResult) {
    let prefix = if result.dry_run { "[dry-run] " } else { "" };
    let dir = result.base_dir.display();

    if result.dry_run {
        println!(
            "{prefix}'{dir}': {} to create, {} to update, {} unchanged, {} adopted, {} orphaned",
            result.would_create, result.would_update, result.unchanged, result.adopted, result.orphaned
        );
    } else if result.written() == 0 && result.failures.is_empty() {
        println!("{} '{dir}' nothing to do ({} unchanged)", "✓".green(), result.unchanged);
    } else {
        let mark = match result.status() {
            SyncStatus::Success => "✓".green(),
            SyncStatus::PartialFailure => "!".yellow(),
            SyncStatus::TotalFailure | SyncStatus::Aborted => "✗".red(),
        };
        println!(
            "{mark} '{dir}' synced ({} created, {} updated, {} unchanged, {} adopted, {} failed, {} bytes)",
            result.created,
            result.updated,
            result.unchanged,
            result.adopted,
            result.failures.len(),
            result.bytes_written
        );
    }

    for outcome in &result.outcomes {
        match (outcome.state, outcome.change) {
            (EntryState::Done, ChangeKind::Create) => println!("  +  {}", outcome.path),
            (EntryState::Done, _) => println!("  ✎  {}", outcome.path),
            (EntryState::Pending, ChangeKind::Create) => println!("  +  {} (would create)", outcome.path),
            (EntryState::Pending, _) => println!("  ~  {} (would update)", outcome.path),
            (EntryState::Skipped, _) if outcome.adopted => println!("  ·  {} (adopted)", outcome.path),
            _ => {}
        }
    }
    for orphan in &result.orphans {
        println!("  ?  {orphan} (not in template)");
    }

    if !result.failures.is_empty() {
        let rows: Vec<FailureRow> = result
            .failures
            .iter()
            .map(|f| FailureRow {
                path: f.path.to_string(),
                kind: f.kind.to_string(),
                message: f.message.clone(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }
    if result.aborted {
        println!("{}", "Authentication failed; remaining entries were not attempted.".red());
    }
    if !result.orphans.is_empty() && !result.dry_run {
        println!("Run 'soundpack prune' to delete files the template no longer lists.");
    }
}
