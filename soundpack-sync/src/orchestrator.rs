//! Sync orchestration for one soundpack directory.
//!
//! ## `sync_pack`: per-entry state machine
//!
//! 1. Scan the directory and diff it against the template (single-threaded).
//! 2. `Unchanged` entries are `Skipped`; adopted ones get a manifest record.
//! 3. `Create`/`Update` entries run on a bounded worker pool:
//!    `Synthesizing` → `PostProcessing` → `Writing` → `Done`, or `Failed`.
//! 4. The manifest is saved, even when the run was aborted.
//!
//! Orphans are reported, never deleted; see [`remove_orphans`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use soundpack_audio::{PostProcessConfig, PostProcessor};
use soundpack_core::{EntryPath, FailureKind, Template, TemplateEntry, UntrackedPolicy, VoiceId};
use soundpack_provider::{
    synthesize_with_retry_until, ProviderOptions, RateGate, RetryPolicy, SynthesisRequest,
    TtsProvider,
};

use crate::diff::{diff_with, ChangeKind, ChangeRecord};
use crate::error::{io_err, SyncError};
use crate::manifest::{self, ManifestRecord};
use crate::scanner::{scan, DirectoryState};
use crate::writer;

pub const DEFAULT_WORKERS: usize = 4;

/// Tempo applied to entries whose markup asks for `rate='fast'` when the
/// provider cannot read markup.
pub const FAST_RATE_TEMPO: f32 = 1.3;

/// The markup carries a prosody `rate='fast'` (either quote style).
pub fn requests_fast_rate(entry: &TemplateEntry) -> bool {
    entry
        .markup_text
        .as_deref()
        .is_some_and(|m| m.contains("rate='fast'") || m.contains("rate=\"fast\""))
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Tunables of a run, usually taken from [`crate::config::RunConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Parallel synthesis calls; `1` is sequential.
    pub workers: usize,
    pub retry: RetryPolicy,
    pub post_process: PostProcessConfig,
    pub untracked: UntrackedPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            retry: RetryPolicy::default(),
            post_process: PostProcessConfig::default(),
            untracked: UntrackedPolicy::default(),
        }
    }
}

/// Everything one [`sync_pack`] call needs. The provider is constructed (and
/// authenticated) by the caller.
pub struct SyncRequest<'a> {
    pub template: &'a Template,
    pub base_dir: &'a Path,
    pub provider: &'a dyn TtsProvider,
    pub voice: &'a VoiceId,
    pub options: &'a ProviderOptions,
    pub settings: &'a SyncSettings,
    /// Shared by every pack that uses the same provider.
    pub gate: &'a RateGate,
    pub dry_run: bool,
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    Skipped,
    Synthesizing,
    PostProcessing,
    Writing,
    Done,
    Failed,
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntryState::Pending => "pending",
            EntryState::Skipped => "skipped",
            EntryState::Synthesizing => "synthesizing",
            EntryState::PostProcessing => "post-processing",
            EntryState::Writing => "writing",
            EntryState::Done => "done",
            EntryState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub path: EntryPath,
    pub kind: FailureKind,
    pub message: String,
}

/// Final state of one template entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryOutcome {
    pub path: EntryPath,
    pub change: ChangeKind,
    pub adopted: bool,
    pub state: EntryState,
    pub bytes_written: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    /// Some entries failed, at least one was written.
    PartialFailure,
    /// Entries failed and none was written.
    TotalFailure,
    /// Stopped by an authentication failure.
    Aborted,
}

impl SyncStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncStatus::Success => 0,
            SyncStatus::PartialFailure => 2,
            SyncStatus::TotalFailure | SyncStatus::Aborted => 1,
        }
    }
}

/// Summary of a [`sync_pack`] run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncResult {
    pub base_dir: PathBuf,
    pub dry_run: bool,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub adopted: usize,
    pub orphaned: usize,
    pub would_create: usize,
    pub would_update: usize,
    pub failures: Vec<Failure>,
    pub bytes_written: u64,
    pub orphans: Vec<EntryPath>,
    pub aborted: bool,
    /// One per template entry, in template order.
    pub outcomes: Vec<EntryOutcome>,
}

impl SyncResult {
    pub fn status(&self) -> SyncStatus {
        if self.aborted {
            SyncStatus::Aborted
        } else if self.failures.is_empty() {
            SyncStatus::Success
        } else if self.created + self.updated > 0 {
            SyncStatus::PartialFailure
        } else {
            SyncStatus::TotalFailure
        }
    }

    pub fn written(&self) -> usize {
        self.created + self.updated
    }

    fn tally(&mut self, outcome: &EntryOutcome) {
        match (outcome.state, outcome.change) {
            (EntryState::Done, ChangeKind::Create) => self.created += 1,
            (EntryState::Done, ChangeKind::Update) => self.updated += 1,
            (EntryState::Skipped, _) => {
                self.unchanged += 1;
                if outcome.adopted {
                    self.adopted += 1;
                }
            }
            (EntryState::Pending, ChangeKind::Create) => self.would_create += 1,
            (EntryState::Pending, ChangeKind::Update) => self.would_update += 1,
            _ => {}
        }
        if let Some(failure) = &outcome.failure {
            self.failures.push(failure.clone());
        }
        self.bytes_written += outcome.bytes_written;
    }
}

// ---------------------------------------------------------------------------
// plan
// ---------------------------------------------------------------------------

/// Scan `base_dir` and diff it against `template`. Read-only.
pub fn plan(
    template: &Template,
    base_dir: &Path,
    untracked: UntrackedPolicy,
) -> Result<(DirectoryState, Vec<ChangeRecord>), SyncError> {
    let state = scan(base_dir, template.paths())?;
    let changes = diff_with(template, &state, untracked);
    Ok((state, changes))
}

// ---------------------------------------------------------------------------
// sync_pack
// ---------------------------------------------------------------------------

struct Worker<'a> {
    request: &'a SyncRequest<'a>,
    processor: PostProcessor,
    /// Same settings at [`FAST_RATE_TEMPO`].
    fast_processor: PostProcessor,
    abort: AtomicBool,
}

struct Generated {
    bytes: u64,
    sha256: String,
}

impl Worker<'_> {
    /// Returns the outcome and, when written, the content digest.
    fn run(&self, entry: &TemplateEntry, change: ChangeKind) -> (EntryOutcome, Option<String>) {
        let base = EntryOutcome {
            path: entry.path.clone(),
            change,
            adopted: false,
            state: EntryState::Pending,
            bytes_written: 0,
            failure: None,
        };
        match self.generate(entry) {
            Ok(generated) => (
                EntryOutcome {
                    state: EntryState::Done,
                    bytes_written: generated.bytes,
                    ..base
                },
                Some(generated.sha256),
            ),
            Err((kind, message)) => {
                if kind == FailureKind::Cancelled {
                    tracing::debug!("{}: cancelled", entry.path);
                } else {
                    tracing::warn!("{}: {kind}: {message}", entry.path);
                }
                let outcome = EntryOutcome {
                    state: EntryState::Failed,
                    failure: Some(Failure {
                        path: entry.path.clone(),
                        kind,
                        message,
                    }),
                    ..base
                };
                (outcome, None)
            }
        }
    }

    fn generate(&self, entry: &TemplateEntry) -> Result<Generated, (FailureKind, String)> {
        let req = self.request;
        if self.abort.load(Ordering::SeqCst) {
            return Err((FailureKind::Cancelled, "run aborted before synthesis".into()));
        }

        transition(&entry.path, EntryState::Synthesizing);
        let synthesis = SynthesisRequest::for_entry(entry, req.voice, req.options);
        let aborted = || self.abort.load(Ordering::SeqCst);
        let raw = synthesize_with_retry_until(
            req.provider,
            &synthesis,
            &req.settings.retry,
            req.gate,
            &aborted,
        )
        .map_err(|e| {
            if e.is_fatal() {
                self.abort.store(true, Ordering::SeqCst);
            }
            (e.kind(), e.to_string())
        })?;

        transition(&entry.path, EntryState::PostProcessing);
        let format = req.provider.output_format();
        let processor = if requests_fast_rate(entry) && !req.provider.supports_markup() {
            tracing::debug!("{}: emulating rate='fast' with tempo {FAST_RATE_TEMPO}", entry.path);
            &self.fast_processor
        } else {
            &self.processor
        };
        let audio = if format.is_decodable() {
            processor
                .process(&raw, format)
                .map_err(|e| (FailureKind::AudioDecode, e.to_string()))?
        } else {
            tracing::debug!("{}: {format} output written without post-processing", entry.path);
            raw
        };

        transition(&entry.path, EntryState::Writing);
        let target = entry.path.to_native(req.base_dir);
        let bytes = writer::write_atomic(&target, &audio)
            .map_err(|e| (FailureKind::Write, e.to_string()))?;
        tracing::info!("wrote: {} ({bytes} bytes)", target.display());
        Ok(Generated {
            bytes,
            sha256: writer::content_digest(&audio),
        })
    }
}

fn transition(path: &EntryPath, state: EntryState) {
    tracing::debug!("{path}: {state}");
}

/// Bring one soundpack directory in line with its template.
///
/// Structural problems (unreadable directory, corrupt manifest) are returned
/// as errors before any provider call. Per-entry failures are recorded in the
/// result and never stop the other entries; an authentication failure stops
/// every entry that has not started yet.
pub fn sync_pack(request: &SyncRequest<'_>) -> Result<SyncResult, SyncError> {
    let started_at = Utc::now();
    let template = request.template;
    let (state, changes) = plan(template, request.base_dir, request.settings.untracked)?;
    let DirectoryState {
        entries: observed,
        mut manifest,
        ..
    } = state;

    let mut result = SyncResult {
        base_dir: request.base_dir.to_path_buf(),
        dry_run: request.dry_run,
        ..Default::default()
    };

    // Template order is the change-set order, so indices line up.
    let mut outcomes: Vec<Option<EntryOutcome>> = vec![None; template.len()];
    let mut work = Vec::new();
    for (i, change) in changes.iter().enumerate() {
        match change {
            ChangeRecord::Unchanged { path, adopted } => {
                if *adopted {
                    if let (Some(entry), Some(seen)) = (template.get(path), observed.get(path)) {
                        tracing::info!("adopting existing file: {path}");
                        manifest.insert(
                            path.clone(),
                            ManifestRecord {
                                fingerprint: entry.fingerprint(),
                                bytes: seen.bytes,
                                sha256: seen.digest.clone(),
                            },
                        );
                    }
                }
                outcomes[i] = Some(EntryOutcome {
                    path: path.clone(),
                    change: ChangeKind::Unchanged,
                    adopted: *adopted,
                    state: EntryState::Skipped,
                    bytes_written: 0,
                    failure: None,
                });
            }
            ChangeRecord::Create(path) | ChangeRecord::Update(path) => {
                if request.dry_run {
                    tracing::info!("[dry-run] would {}: {path}", change_verb(change.kind()));
                    outcomes[i] = Some(EntryOutcome {
                        path: path.clone(),
                        change: change.kind(),
                        adopted: false,
                        state: EntryState::Pending,
                        bytes_written: 0,
                        failure: None,
                    });
                } else if let Some(entry) = template.get(path) {
                    work.push((i, entry, change.kind()));
                }
            }
            ChangeRecord::Orphaned(path) => {
                tracing::info!("orphan (not in template): {path}");
                result.orphans.push(path.clone());
            }
        }
    }
    result.orphaned = result.orphans.len();

    if !work.is_empty() {
        let worker = Worker {
            request,
            processor: PostProcessor::new(request.settings.post_process.clone()),
            fast_processor: PostProcessor::new(PostProcessConfig {
                tempo: FAST_RATE_TEMPO,
                ..request.settings.post_process.clone()
            }),
            abort: AtomicBool::new(false),
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(request.settings.workers.max(1))
            .build()?;
        tracing::info!(
            "{}: synthesizing {} entries with {} ({} workers)",
            request.base_dir.display(),
            work.len(),
            request.provider.name(),
            request.settings.workers.max(1)
        );
        let done: Vec<(usize, EntryOutcome, Option<String>)> = pool.install(|| {
            work.par_iter()
                .map(|(i, entry, kind)| {
                    let (outcome, sha256) = worker.run(entry, *kind);
                    (*i, outcome, sha256)
                })
                .collect()
        });
        result.aborted = worker.abort.load(Ordering::SeqCst);

        for (i, outcome, sha256) in done {
            if outcome.state == EntryState::Done {
                if let Some(entry) = template.get(&outcome.path) {
                    manifest.insert(
                        outcome.path.clone(),
                        ManifestRecord {
                            fingerprint: entry.fingerprint(),
                            bytes: outcome.bytes_written,
                            sha256,
                        },
                    );
                }
            }
            outcomes[i] = Some(outcome);
        }
    }

    for outcome in outcomes.into_iter().flatten() {
        result.tally(&outcome);
        result.outcomes.push(outcome);
    }

    if !request.dry_run {
        // Drop records of files that are gone and no longer wanted.
        let orphans = &result.orphans;
        manifest
            .files
            .retain(|p, _| template.contains(p) || orphans.contains(p));
        manifest.synced_at = started_at;
        if !template.is_empty() || request.base_dir.exists() {
            manifest::save_at(request.base_dir, &manifest)?;
        }
    }

    if result.aborted {
        tracing::warn!(
            "{}: aborted after authentication failure; {} entries written",
            request.base_dir.display(),
            result.written()
        );
    }
    Ok(result)
}

fn change_verb(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Create => "create",
        ChangeKind::Update => "update",
        ChangeKind::Unchanged => "skip",
        ChangeKind::Orphaned => "report",
    }
}

// ---------------------------------------------------------------------------
// remove_orphans
// ---------------------------------------------------------------------------

/// Delete `paths` from `base_dir`, but only those the current scan still
/// reports as orphans of `template`. Their manifest records are dropped and
/// directories left empty are removed.
///
/// Returns the paths actually deleted.
pub fn remove_orphans(
    base_dir: &Path,
    template: &Template,
    paths: &[EntryPath],
) -> Result<Vec<EntryPath>, SyncError> {
    let mut state = scan(base_dir, template.paths())?;
    let mut removed = Vec::new();
    for path in paths {
        if !state.is_orphan(path) {
            tracing::warn!("not an orphan, keeping: {path}");
            continue;
        }
        let file = path.to_native(base_dir);
        std::fs::remove_file(&file).map_err(|e| io_err(&file, e))?;
        tracing::info!("removed orphan: {}", file.display());
        remove_empty_parents(base_dir, &file);
        state.manifest.remove(path);
        removed.push(path.clone());
    }
    if !removed.is_empty() {
        manifest::save_at(base_dir, &state.manifest)?;
    }
    Ok(removed)
}

fn remove_empty_parents(base_dir: &Path, file: &Path) {
    let mut dir = file.parent();
    while let Some(d) = dir {
        if d == base_dir || !d.starts_with(base_dir) {
            break;
        }
        // Fails (and stops) on the first non-empty directory.
        if std::fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(change: ChangeKind, state: EntryState, failure: Option<FailureKind>) -> EntryOutcome {
        EntryOutcome {
            path: "x.wav".into(),
            change,
            adopted: false,
            state,
            bytes_written: if state == EntryState::Done { 10 } else { 0 },
            failure: failure.map(|kind| Failure {
                path: "x.wav".into(),
                kind,
                message: String::new(),
            }),
        }
    }

    fn result_of(outcomes: &[EntryOutcome]) -> SyncResult {
        let mut r = SyncResult::default();
        for o in outcomes {
            r.tally(o);
        }
        r
    }

    #[test]
    fn status_distinguishes_partial_from_total_failure() {
        let ok = outcome(ChangeKind::Create, EntryState::Done, None);
        let bad = outcome(
            ChangeKind::Update,
            EntryState::Failed,
            Some(FailureKind::ProviderRequest),
        );

        assert_eq!(result_of(&[ok.clone()]).status(), SyncStatus::Success);
        assert_eq!(
            result_of(&[ok.clone(), bad.clone()]).status(),
            SyncStatus::PartialFailure
        );
        assert_eq!(result_of(&[bad.clone()]).status(), SyncStatus::TotalFailure);

        let mut aborted = result_of(&[ok, bad]);
        aborted.aborted = true;
        assert_eq!(aborted.status(), SyncStatus::Aborted);
    }

    #[test]
    fn exit_codes() {
        assert_eq!(SyncStatus::Success.exit_code(), 0);
        assert_eq!(SyncStatus::PartialFailure.exit_code(), 2);
        assert_eq!(SyncStatus::TotalFailure.exit_code(), 1);
        assert_eq!(SyncStatus::Aborted.exit_code(), 1);
    }

    #[test]
    fn tally_counts_bytes_and_dry_run_intents() {
        let r = result_of(&[
            outcome(ChangeKind::Create, EntryState::Done, None),
            outcome(ChangeKind::Update, EntryState::Done, None),
            outcome(ChangeKind::Create, EntryState::Pending, None),
            outcome(ChangeKind::Update, EntryState::Pending, None),
            outcome(ChangeKind::Unchanged, EntryState::Skipped, None),
        ]);
        assert_eq!((r.created, r.updated, r.unchanged), (1, 1, 1));
        assert_eq!((r.would_create, r.would_update), (1, 1));
        assert_eq!(r.bytes_written, 20);
    }

    #[test]
    fn empty_parent_directories_are_pruned_up_to_base() {
        let tmp = tempfile::TempDir::new().unwrap();
        let deep = tmp.path().join("a").join("b");
        std::fs::create_dir_all(&deep).unwrap();
        std::fs::write(tmp.path().join("a").join("keep.wav"), b"x").unwrap();
        let file = deep.join("gone.wav");
        remove_empty_parents(tmp.path(), &file);
        assert!(!deep.exists());
        assert!(tmp.path().join("a").exists(), "non-empty parent is kept");
        assert!(tmp.path().exists());
    }
}
