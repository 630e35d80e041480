//! Batch driver: one template, many voice directories.
//!
//! A pack root contains directories named `<Service>-<Voice>` (for example
//! `AWSPolly-Brian` or `TTSM-<voice id>`), each with a `sounds/` subdirectory
//! holding the audio. [`run`] syncs every such directory with the provider
//! registered for its service.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use soundpack_core::{Template, UntrackedPolicy, VoiceId};
use soundpack_provider::{RateGate, TtsProvider};

use crate::config::RunConfig;
use crate::diff::ChangeRecord;
use crate::error::{scan_err, SyncError};
use crate::orchestrator::{plan, sync_pack, SyncRequest, SyncResult, SyncStatus};

pub const SOUNDS_DIR: &str = "sounds";

/// A voice directory of a pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackDir {
    /// Directory name, e.g. `AWSPolly-Brian`.
    pub name: String,
    /// Lowercase service prefix, e.g. `awspolly`.
    pub service: String,
    pub voice: VoiceId,
    /// The `sounds/` directory; template paths are relative to it.
    pub sounds_dir: PathBuf,
}

/// Split `<Service>-<Voice>` at the first dash.
pub fn parse_pack_name(name: &str) -> Option<(String, VoiceId)> {
    let (service, voice) = name.split_once('-')?;
    if service.is_empty() || voice.is_empty() {
        return None;
    }
    Some((service.to_ascii_lowercase(), VoiceId::from(voice)))
}

/// List the voice directories under `root`, sorted by name.
///
/// Directories without a `sounds/` subdirectory are skipped with an info
/// log; names without a `<Service>-` prefix are ignored.
pub fn discover_packs(root: &Path) -> Result<Vec<PackDir>, SyncError> {
    let read = std::fs::read_dir(root).map_err(|e| scan_err(root, e))?;
    let mut packs = Vec::new();
    for item in read {
        let item = item.map_err(|e| scan_err(root, e))?;
        let path = item.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
            continue;
        };
        let Some((service, voice)) = parse_pack_name(&name) else {
            tracing::debug!("ignoring {}: not a <Service>-<Voice> directory", path.display());
            continue;
        };
        let sounds_dir = path.join(SOUNDS_DIR);
        if !sounds_dir.is_dir() {
            tracing::info!("skipping {name}: no {SOUNDS_DIR}/ directory");
            continue;
        }
        packs.push(PackDir {
            name,
            service,
            voice,
            sounds_dir,
        });
    }
    packs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(packs)
}

// ---------------------------------------------------------------------------
// Cost estimate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackEstimate {
    pub pack: String,
    pub service: String,
    /// A provider is registered for the service; unserved packs are skipped by [`run`].
    pub served: bool,
    /// Entries that would be synthesized.
    pub files: usize,
    /// Billable characters of those entries.
    pub characters: usize,
    /// Why the pack could not be planned, e.g. a corrupt manifest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceEstimate {
    pub served: bool,
    pub packs: usize,
    pub files: usize,
    pub characters: usize,
    /// Packs that could not be planned.
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CostEstimate {
    pub per_pack: Vec<PackEstimate>,
    pub per_service: BTreeMap<String, ServiceEstimate>,
}

impl CostEstimate {
    fn served(&self) -> impl Iterator<Item = &ServiceEstimate> {
        self.per_service.values().filter(|s| s.served)
    }

    /// Files that would be sent to a provider.
    pub fn total_files(&self) -> usize {
        self.served().map(|s| s.files).sum()
    }

    /// Billable characters that would be sent to a provider.
    pub fn total_characters(&self) -> usize {
        self.served().map(|s| s.characters).sum()
    }

    /// Services with pending files but no registered provider.
    pub fn unserved_services(&self) -> Vec<&str> {
        self.per_service
            .iter()
            .filter(|(_, s)| !s.served && s.files > 0)
            .map(|(service, _)| service.as_str())
            .collect()
    }

    /// Packs that could not be planned.
    pub fn failed_packs(&self) -> impl Iterator<Item = &PackEstimate> {
        self.per_pack.iter().filter(|p| p.error.is_some())
    }

    /// Nothing would be sent to any provider.
    pub fn is_free(&self) -> bool {
        self.total_files() == 0
    }
}

/// What a batch run would synthesize, per pack and per service. Read-only.
///
/// Only services present in `providers` count towards the totals. A pack
/// that cannot be planned is recorded with its error and the next pack
/// proceeds, the same way [`run`] isolates packs.
pub fn estimate(
    template: &Template,
    packs: &[PackDir],
    untracked: UntrackedPolicy,
    providers: &ProviderRegistry,
) -> CostEstimate {
    let mut estimate = CostEstimate::default();
    for pack in packs {
        let served = providers.contains_key(&pack.service);
        let service = estimate.per_service.entry(pack.service.clone()).or_default();
        service.served = served;
        service.packs += 1;

        let changes = match plan(template, &pack.sounds_dir, untracked) {
            Ok((_, changes)) => changes,
            Err(err) => {
                tracing::warn!("{}: cannot estimate: {err}", pack.name);
                service.failed += 1;
                estimate.per_pack.push(PackEstimate {
                    pack: pack.name.clone(),
                    service: pack.service.clone(),
                    served,
                    files: 0,
                    characters: 0,
                    error: Some(err.to_string()),
                });
                continue;
            }
        };
        let pending: Vec<_> = changes
            .iter()
            .filter(|c| c.needs_synthesis())
            .map(ChangeRecord::path)
            .collect();
        let characters = template.billable_characters(pending.iter().copied());
        for path in &pending {
            tracing::debug!("{}: pending {path}", pack.name);
        }

        service.files += pending.len();
        service.characters += characters;
        estimate.per_pack.push(PackEstimate {
            pack: pack.name.clone(),
            service: pack.service.clone(),
            served,
            files: pending.len(),
            characters,
            error: None,
        });
    }
    for (service, s) in &estimate.per_service {
        tracing::info!(
            "{service}: {} pack(s) missing {} file(s), {} TTS characters{}",
            s.packs,
            s.files,
            s.characters,
            if s.served { "" } else { " (no provider)" }
        );
    }
    estimate
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Providers keyed by lowercase service prefix.
pub type ProviderRegistry = BTreeMap<String, Box<dyn TtsProvider>>;

pub struct BatchRequest<'a> {
    pub template: &'a Template,
    pub packs: &'a [PackDir],
    pub providers: &'a ProviderRegistry,
    pub config: &'a RunConfig,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PackOutcome {
    Synced { result: SyncResult },
    Skipped { reason: String },
    Failed { error: String },
    /// Not attempted because an earlier pack aborted the batch.
    NotRun,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackReport {
    pub pack: PackDir,
    #[serde(flatten)]
    pub outcome: PackOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub packs: Vec<PackReport>,
    pub aborted: bool,
}

impl BatchReport {
    pub fn results(&self) -> impl Iterator<Item = &SyncResult> {
        self.packs.iter().filter_map(|p| match &p.outcome {
            PackOutcome::Synced { result } => Some(result),
            _ => None,
        })
    }

    pub fn status(&self) -> SyncStatus {
        if self.aborted {
            return SyncStatus::Aborted;
        }
        let written: usize = self.results().map(SyncResult::written).sum();
        let failures: usize = self.results().map(|r| r.failures.len()).sum::<usize>()
            + self
                .packs
                .iter()
                .filter(|p| matches!(p.outcome, PackOutcome::Failed { .. }))
                .count();
        if failures == 0 {
            SyncStatus::Success
        } else if written > 0 {
            SyncStatus::PartialFailure
        } else {
            SyncStatus::TotalFailure
        }
    }
}

/// Sync every pack in order. A structural error in one pack is recorded and
/// the next pack proceeds; an authentication failure stops the batch.
pub fn run(request: &BatchRequest<'_>) -> BatchReport {
    let settings = request.config.settings();
    let mut gates: BTreeMap<&str, RateGate> = BTreeMap::new();
    let mut report = BatchReport::default();

    for pack in request.packs {
        if report.aborted {
            report.packs.push(PackReport {
                pack: pack.clone(),
                outcome: PackOutcome::NotRun,
            });
            continue;
        }
        let Some(provider) = request.providers.get(&pack.service) else {
            tracing::warn!("skipping {}: no provider for service '{}'", pack.name, pack.service);
            report.packs.push(PackReport {
                pack: pack.clone(),
                outcome: PackOutcome::Skipped {
                    reason: format!("no provider for service '{}'", pack.service),
                },
            });
            continue;
        };
        let gate = gates
            .entry(pack.service.as_str())
            .or_insert_with(|| RateGate::new(settings.retry.min_interval()));
        let options = request.config.options_for(&pack.service);

        tracing::info!("syncing {} ({} voice {})", pack.name, provider.name(), pack.voice);
        let outcome = match sync_pack(&SyncRequest {
            template: request.template,
            base_dir: &pack.sounds_dir,
            provider: provider.as_ref(),
            voice: &pack.voice,
            options: &options,
            settings: &settings,
            gate,
            dry_run: request.dry_run,
        }) {
            Ok(result) => {
                if result.aborted {
                    tracing::warn!("{}: authentication failed, stopping batch", pack.name);
                    report.aborted = true;
                }
                PackOutcome::Synced { result }
            }
            Err(err) => {
                tracing::warn!("{}: {err}", pack.name);
                PackOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };
        report.packs.push(PackReport {
            pack: pack.clone(),
            outcome,
        });
    }
    report
}
