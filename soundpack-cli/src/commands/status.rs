//! `soundpack status`: read-only view of what a sync would do.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use soundpack_sync::diff::ChangeCounts;
use soundpack_sync::{plan, ChangeRecord};

use super::{print_json, SourceArgs};
use crate::UntrackedArg;

/// Arguments for `soundpack status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Soundpack directory holding the audio files.
    pub dir: PathBuf,

    #[command(flatten)]
    pub source: SourceArgs,

    /// Treat files without a recorded fingerprint as `adopt` or `regenerate`.
    #[arg(long)]
    pub untracked: Option<UntrackedArg>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StatusReportJson {
    summary: ChangeCounts,
    last_sync_at: Option<String>,
    changes: Vec<ChangeRecord>,
}

#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "status")]
    status: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<ExitCode> {
        let (config, template) = self.source.load(&self.dir)?;
        let untracked = self.untracked.map(|u| u.0).unwrap_or(config.untracked);
        let (state, changes) = plan(&template, &self.dir, untracked)
            .with_context(|| format!("failed to scan {}", self.dir.display()))?;

        let counts = ChangeCounts::of(&changes);
        let last_sync = (!state.manifest.files.is_empty()).then_some(state.manifest.synced_at);

        if self.json {
            print_json(&StatusReportJson {
                summary: counts,
                last_sync_at: last_sync.map(|at| at.to_rfc3339()),
                changes,
            })?;
            return Ok(ExitCode::SUCCESS);
        }

        println!(
            "{} | {} entries | {} to create | {} to update | {} orphaned | last sync {}",
            self.dir.display(),
            template.len(),
            counts.create,
            counts.update,
            counts.orphaned,
            last_sync.map(format_age).unwrap_or_else(|| "never".to_string()),
        );
        let rows: Vec<ChangeRow> = changes
            .iter()
            .filter_map(|change| {
                let status = match change {
                    ChangeRecord::Create(_) => "CREATE".green().to_string(),
                    ChangeRecord::Update(_) => "UPDATE".yellow().to_string(),
                    ChangeRecord::Unchanged { adopted: true, .. } => "ADOPT".cyan().to_string(),
                    ChangeRecord::Unchanged { .. } => return None,
                    ChangeRecord::Orphaned(_) => "ORPHAN".magenta().to_string(),
                };
                Some(ChangeRow {
                    path: change.path().to_string(),
                    status,
                })
            })
            .collect();
        if rows.is_empty() {
            println!("{} up to date", "✓".green());
            return Ok(ExitCode::SUCCESS);
        }
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        if counts.pending() > 0 {
            println!("Run 'soundpack sync' to synthesize pending entries.");
        }
        Ok(ExitCode::SUCCESS)
    }
}

fn format_age(timestamp: DateTime<Utc>) -> String {
    let seconds = Utc::now()
        .signed_duration_since(timestamp)
        .num_seconds()
        .max(0);
    let age = match seconds {
        s if s < 60 => format!("{s}s"),
        s if s < 60 * 60 => format!("{}m", s / 60),
        s if s < 60 * 60 * 24 => format!("{}h", s / (60 * 60)),
        s => format!("{}d", s / (60 * 60 * 24)),
    };
    format!("{age} ago")
}
