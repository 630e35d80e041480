//! `soundpack update-all`: sync every voice pack under a root directory.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use dialoguer::Confirm;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use soundpack_sync::batch::{self, BatchReport, BatchRequest, CostEstimate, PackOutcome};
use soundpack_sync::SyncStatus;

use super::{print_json, provider_registry, SourceArgs};
use crate::UntrackedArg;

pub const FEE_PROMPT: &str = "You are responsible for any TTS generation fees incurred. Proceed?";

/// Arguments for `soundpack update-all`.
#[derive(Args, Debug)]
pub struct UpdateAllArgs {
    /// Directory containing `<Service>-<Voice>/sounds/` packs.
    pub root: PathBuf,

    #[command(flatten)]
    pub source: SourceArgs,

    /// Skip the fee confirmation prompt.
    #[arg(long, short)]
    pub yes: bool,

    /// Print the estimate and stop.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit the estimate (and batch report) as JSON.
    #[arg(long)]
    pub json: bool,

    /// Concurrent synthesis workers per pack.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Treat files without a recorded fingerprint as `adopt` or `regenerate`.
    #[arg(long)]
    pub untracked: Option<UntrackedArg>,
}

#[derive(Serialize)]
struct UpdateAllJson<'a> {
    estimate: &'a CostEstimate,
    report: Option<&'a BatchReport>,
}

#[derive(Tabled)]
struct EstimateRow {
    #[tabled(rename = "service")]
    service: String,
    #[tabled(rename = "provider")]
    provider: &'static str,
    #[tabled(rename = "packs")]
    packs: usize,
    #[tabled(rename = "files")]
    files: usize,
    #[tabled(rename = "characters")]
    characters: usize,
}

impl UpdateAllArgs {
    pub fn run(self) -> Result<ExitCode> {
        let (mut config, template) = self.source.load(&self.root)?;
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(untracked) = self.untracked {
            config.untracked = untracked.into();
        }

        let packs = batch::discover_packs(&self.root)
            .with_context(|| format!("failed to list packs in {}", self.root.display()))?;
        let providers = provider_registry(&config);
        let estimate = batch::estimate(&template, &packs, config.untracked, &providers);
        let has_failures = estimate.failed_packs().next().is_some();

        if !self.json {
            print_estimate(&estimate);
        }
        if self.dry_run || (estimate.is_free() && !has_failures) {
            if self.json {
                print_json(&UpdateAllJson {
                    estimate: &estimate,
                    report: None,
                })?;
            } else if estimate.is_free() && !has_failures {
                println!("{} every served pack is up to date", "✓".green());
            }
            return Ok(ExitCode::SUCCESS);
        }

        if !self.yes && !estimate.is_free() && !confirm_fees()? {
            println!("Cancelled.");
            return Ok(ExitCode::SUCCESS);
        }

        let report = batch::run(&BatchRequest {
            template: &template,
            packs: &packs,
            providers: &providers,
            config: &config,
            dry_run: false,
        });

        if self.json {
            print_json(&UpdateAllJson {
                estimate: &estimate,
                report: Some(&report),
            })?;
        } else {
            print_report(&report);
        }
        Ok(ExitCode::from(report.status().exit_code() as u8))
    }
}

fn confirm_fees() -> Result<bool> {
    Confirm::new()
        .with_prompt(FEE_PROMPT)
        .default(false)
        .interact()
        .context("confirmation needs an interactive terminal; pass --yes to skip it")
}

fn print_estimate(estimate: &CostEstimate) {
    let rows: Vec<EstimateRow> = estimate
        .per_service
        .iter()
        .map(|(service, s)| EstimateRow {
            service: service.clone(),
            provider: if s.served { "ready" } else { "none, skipped" },
            packs: s.packs,
            files: s.files,
            characters: s.characters,
        })
        .collect();
    if rows.is_empty() {
        println!("No <Service>-<Voice> packs found.");
        return;
    }
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    for pack in estimate.failed_packs() {
        let error = pack.error.as_deref().unwrap_or_default();
        println!("{} {}: cannot estimate, {error}", "✗".red(), pack.pack);
    }
    let unserved = estimate.unserved_services();
    if !unserved.is_empty() {
        println!(
            "Not counted, no provider available: {}",
            unserved.join(", ")
        );
    }
    println!(
        "{} file(s), {} billable character(s) pending",
        estimate.total_files(),
        estimate.total_characters()
    );
}

fn print_report(report: &BatchReport) {
    for pack in &report.packs {
        let name = &pack.pack.name;
        match &pack.outcome {
            PackOutcome::Synced { result } => {
                let mark = match result.status() {
                    SyncStatus::Success => "✓".green(),
                    SyncStatus::PartialFailure => "!".yellow(),
                    SyncStatus::TotalFailure | SyncStatus::Aborted => "✗".red(),
                };
                println!(
                    "{mark} {name}: {} created, {} updated, {} unchanged, {} failed",
                    result.created,
                    result.updated,
                    result.unchanged,
                    result.failures.len()
                );
                for failure in &result.failures {
                    println!("    {} [{}] {}", failure.path, failure.kind, failure.message);
                }
            }
            PackOutcome::Skipped { reason } => {
                println!("{} {name}: skipped, {reason}", "-".bright_black())
            }
            PackOutcome::Failed { error } => println!("{} {name}: {error}", "✗".red()),
            PackOutcome::NotRun => println!("{} {name}: not run", "-".bright_black()),
        }
    }
    if report.aborted {
        println!("{}", "Authentication failed; the batch was stopped.".red());
    }
}
