//! Directory state scanner.
//!
//! Observes a soundpack directory without modifying it: for every template
//! path, whether the file exists and which template text it was generated
//! from; for every other audio-like file, that it is an orphan candidate.

use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use soundpack_core::{EntryPath, Fingerprint};

use crate::error::{scan_err, SyncError};
use crate::manifest::{self, Manifest, MANIFEST_FILE};
use crate::writer;

/// File extensions that count as audio when looking for orphans.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "pcm", "flac"];

/// Observed state of one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub path: EntryPath,
    pub exists: bool,
    /// Fingerprint of the text the file was generated from; `None` when the
    /// file is missing, has no manifest record, or was replaced since.
    pub fingerprint: Option<Fingerprint>,
    /// Fingerprint the manifest records for this path, whether or not the
    /// file still matches the recorded content.
    pub recorded: Option<Fingerprint>,
    pub modified: Option<DateTime<Utc>>,
    pub bytes: u64,
    /// Hex SHA-256 of the current file content.
    #[serde(skip)]
    pub digest: Option<String>,
}

impl DirectoryEntry {
    fn missing(path: EntryPath) -> Self {
        Self {
            path,
            exists: false,
            fingerprint: None,
            recorded: None,
            modified: None,
            bytes: 0,
            digest: None,
        }
    }

    /// Present on disk but with no trustworthy manifest record.
    pub fn is_untracked(&self) -> bool {
        self.exists && self.fingerprint.is_none()
    }
}

/// Result of [`scan`].
#[derive(Debug, Clone)]
pub struct DirectoryState {
    pub base_dir: PathBuf,
    /// One entry per template path, present or not.
    pub entries: BTreeMap<EntryPath, DirectoryEntry>,
    /// Audio-like files not referenced by any template path, sorted by path.
    pub orphans: Vec<DirectoryEntry>,
    /// The manifest as loaded; the orchestrator updates and saves it.
    pub manifest: Manifest,
}

impl DirectoryState {
    pub fn get(&self, path: &EntryPath) -> Option<&DirectoryEntry> {
        self.entries.get(path)
    }

    pub fn is_orphan(&self, path: &EntryPath) -> bool {
        self.orphans.iter().any(|o| &o.path == path)
    }
}

/// Scan `base_dir` for the files named by `template_paths`.
///
/// A missing `base_dir` scans as empty. Any other read failure is a
/// [`SyncError::Scan`]; the caller decides whether to proceed.
pub fn scan<'a>(
    base_dir: &Path,
    template_paths: impl IntoIterator<Item = &'a EntryPath>,
) -> Result<DirectoryState, SyncError> {
    let wanted: HashSet<&EntryPath> = template_paths.into_iter().collect();
    let manifest = manifest::load_at(base_dir)?;

    let mut files = Vec::new();
    match std::fs::metadata(base_dir) {
        Ok(meta) if meta.is_dir() => collect_files(base_dir, &mut files)?,
        Ok(_) => {
            return Err(scan_err(
                base_dir,
                std::io::Error::other("not a directory"),
            ))
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            tracing::debug!("{} does not exist yet; scanning as empty", base_dir.display());
        }
        Err(err) => return Err(scan_err(base_dir, err)),
    }

    let mut entries = BTreeMap::new();
    let mut orphans = Vec::new();
    for file in files {
        if writer::is_tmp_file(&file) {
            continue;
        }
        let Some(path) = EntryPath::from_native(base_dir, &file) else {
            continue;
        };
        if path.as_str() == MANIFEST_FILE {
            continue;
        }
        if wanted.contains(&path) {
            let entry = observe(&file, path.clone(), &manifest)?;
            entries.insert(path, entry);
        } else if is_audio_like(&file) {
            orphans.push(observe(&file, path, &manifest)?);
        }
    }
    for path in wanted {
        entries
            .entry(path.clone())
            .or_insert_with(|| DirectoryEntry::missing(path.clone()));
    }
    orphans.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(DirectoryState {
        base_dir: base_dir.to_path_buf(),
        entries,
        orphans,
        manifest,
    })
}

pub fn is_audio_like(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| AUDIO_EXTENSIONS.iter().any(|a| e.eq_ignore_ascii_case(a)))
}

/// Recursively list regular files. Symlinks to files are listed; symlinked
/// directories and dangling links are skipped, so link cycles cannot recurse.
fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), SyncError> {
    let read = std::fs::read_dir(dir).map_err(|e| scan_err(dir, e))?;
    for item in read {
        let item = item.map_err(|e| scan_err(dir, e))?;
        let path = item.path();
        let kind = item.file_type().map_err(|e| scan_err(&path, e))?;
        if kind.is_symlink() {
            match std::fs::metadata(&path) {
                Ok(target) if target.is_file() => out.push(path),
                Ok(_) => tracing::debug!("not following directory link {}", path.display()),
                Err(err) => tracing::debug!("skipping dangling link {}: {err}", path.display()),
            }
        } else if kind.is_dir() {
            collect_files(&path, out)?;
        } else if kind.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn observe(file: &Path, path: EntryPath, manifest: &Manifest) -> Result<DirectoryEntry, SyncError> {
    let meta = std::fs::metadata(file).map_err(|e| scan_err(file, e))?;
    let bytes = meta.len();
    let modified = meta.modified().ok().map(DateTime::<Utc>::from);
    let content = std::fs::read(file).map_err(|e| scan_err(file, e))?;
    let digest = writer::content_digest(&content);

    let recorded = manifest.get(&path).map(|record| record.fingerprint.clone());
    let fingerprint = manifest.get(&path).and_then(|record| {
        let same_size = record.bytes == bytes;
        let same_content = record.sha256.as_ref().map_or(true, |s| s == &digest);
        if same_size && same_content {
            Some(record.fingerprint.clone())
        } else {
            tracing::debug!("{path}: file changed since it was generated");
            None
        }
    });

    Ok(DirectoryEntry {
        path,
        exists: true,
        fingerprint,
        recorded,
        modified,
        bytes,
        digest: Some(digest),
    })
}
