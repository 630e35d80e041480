//! `soundpack prune`: delete files the template no longer lists.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use dialoguer::Confirm;

use soundpack_core::{EntryPath, UntrackedPolicy};
use soundpack_sync::{plan, remove_orphans, ChangeRecord};

use super::SourceArgs;

/// Arguments for `soundpack prune`.
#[derive(Args, Debug)]
pub struct PruneArgs {
    /// Soundpack directory holding the audio files.
    pub dir: PathBuf,

    #[command(flatten)]
    pub source: SourceArgs,

    /// Delete without asking.
    #[arg(long, short)]
    pub yes: bool,
}

impl PruneArgs {
    pub fn run(self) -> Result<ExitCode> {
        let (_, template) = self.source.load(&self.dir)?;
        // Orphans do not depend on the untracked policy.
        let (_, changes) = plan(&template, &self.dir, UntrackedPolicy::Adopt)
            .with_context(|| format!("failed to scan {}", self.dir.display()))?;
        let orphans: Vec<EntryPath> = changes
            .into_iter()
            .filter_map(|change| match change {
                ChangeRecord::Orphaned(path) => Some(path),
                _ => None,
            })
            .collect();

        if orphans.is_empty() {
            println!("{} no orphaned files in {}", "✓".green(), self.dir.display());
            return Ok(ExitCode::SUCCESS);
        }
        for path in &orphans {
            println!("  ?  {path}");
        }
        if !self.yes {
            let proceed = Confirm::new()
                .with_prompt(format!("Delete {} orphaned file(s)?", orphans.len()))
                .default(false)
                .interact()
                .context("confirmation needs an interactive terminal; pass --yes to skip it")?;
            if !proceed {
                println!("Cancelled.");
                return Ok(ExitCode::SUCCESS);
            }
        }

        let removed = remove_orphans(&self.dir, &template, &orphans)
            .with_context(|| format!("failed to prune {}", self.dir.display()))?;
        println!("{} removed {} file(s)", "✓".green(), removed.len());
        Ok(ExitCode::SUCCESS)
    }
}
