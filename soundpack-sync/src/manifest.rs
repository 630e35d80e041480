//! Fingerprint manifest: the record of which text each file was generated
//! from.
//!
//! Persists a [`Manifest`] JSON document at
//! `<base_dir>/.soundpack-manifest.json`. Writes go through
//! [`crate::writer::write_atomic`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use soundpack_core::{EntryPath, Fingerprint};

use crate::error::{io_err, SyncError};
use crate::writer;

pub use soundpack_core::template::MANIFEST_FILE;
pub const MANIFEST_VERSION: u32 = 1;

/// What the engine knows about one generated file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestRecord {
    /// Fingerprint of the template text the file was generated from.
    pub fingerprint: Fingerprint,
    /// Size of the file as written.
    pub bytes: u64,
    /// Hex SHA-256 of the file as written; a mismatch means the file was
    /// replaced outside the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// On-disk manifest payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub version: u32,
    pub synced_at: DateTime<Utc>,
    pub files: BTreeMap<EntryPath, ManifestRecord>,
}

impl Manifest {
    pub fn new() -> Self {
        Self {
            version: MANIFEST_VERSION,
            synced_at: Utc::now(),
            files: BTreeMap::new(),
        }
    }

    pub fn get(&self, path: &EntryPath) -> Option<&ManifestRecord> {
        self.files.get(path)
    }

    pub fn insert(&mut self, path: EntryPath, record: ManifestRecord) {
        self.files.insert(path, record);
    }

    pub fn remove(&mut self, path: &EntryPath) -> Option<ManifestRecord> {
        self.files.remove(path)
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestCompat {
    Structured(ManifestStructuredCompat),
    /// Flat `path -> fingerprint` map.
    Legacy(BTreeMap<EntryPath, Fingerprint>),
}

#[derive(Debug, Deserialize)]
struct ManifestStructuredCompat {
    pub version: Option<u32>,
    pub synced_at: Option<DateTime<Utc>>,
    pub files: BTreeMap<EntryPath, ManifestRecord>,
}

/// `<base_dir>/.soundpack-manifest.json`
pub fn manifest_path(base_dir: &Path) -> PathBuf {
    base_dir.join(MANIFEST_FILE)
}

pub fn exists_at(base_dir: &Path) -> bool {
    manifest_path(base_dir).exists()
}

/// Load the manifest of `base_dir`.
///
/// Returns an empty manifest if the file does not yet exist.
pub fn load_at(base_dir: &Path) -> Result<Manifest, SyncError> {
    let path = manifest_path(base_dir);
    if !path.exists() {
        return Ok(Manifest::new());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    match serde_json::from_str::<ManifestCompat>(&contents)? {
        ManifestCompat::Structured(m) => Ok(Manifest {
            version: m.version.unwrap_or(MANIFEST_VERSION),
            synced_at: m.synced_at.unwrap_or_else(Utc::now),
            files: m.files,
        }),
        ManifestCompat::Legacy(fingerprints) => {
            tracing::info!("migrating flat manifest at {}", path.display());
            let files = fingerprints
                .into_iter()
                .map(|(p, fingerprint)| {
                    let bytes = std::fs::metadata(p.to_native(base_dir))
                        .map(|m| m.len())
                        .unwrap_or(0);
                    (
                        p,
                        ManifestRecord {
                            fingerprint,
                            bytes,
                            sha256: None,
                        },
                    )
                })
                .collect();
            Ok(Manifest {
                version: MANIFEST_VERSION,
                synced_at: Utc::now(),
                files,
            })
        }
    }
}

/// Save the manifest of `base_dir` atomically.
pub fn save_at(base_dir: &Path, manifest: &Manifest) -> Result<(), SyncError> {
    let json = serde_json::to_string_pretty(manifest)?;
    writer::write_atomic(&manifest_path(base_dir), json.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(text: &str, bytes: u64) -> ManifestRecord {
        ManifestRecord {
            fingerprint: Fingerprint::of(text, None),
            bytes,
            sha256: Some("ab".repeat(32)),
        }
    }

    #[test]
    fn empty_manifest_when_file_missing() {
        let tmp = TempDir::new().unwrap();
        let manifest = load_at(tmp.path()).unwrap();
        assert!(manifest.files.is_empty());
        assert_eq!(manifest.version, MANIFEST_VERSION);
        assert!(!exists_at(tmp.path()));
    }

    #[test]
    fn roundtrip_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut manifest = Manifest::new();
        manifest.insert("divine.wav".into(), record("Divine", 44));
        manifest.insert("maps/t16.wav".into(), record("Tier sixteen", 1000));

        save_at(tmp.path(), &manifest).unwrap();
        let loaded = load_at(tmp.path()).unwrap();
        assert_eq!(loaded.files, manifest.files);
        assert!(exists_at(tmp.path()));
    }

    #[test]
    fn saved_document_uses_plain_path_keys() {
        let tmp = TempDir::new().unwrap();
        let mut manifest = Manifest::new();
        manifest.insert("maps/t16.wav".into(), record("Tier sixteen", 10));
        save_at(tmp.path(), &manifest).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(manifest_path(tmp.path())).unwrap())
                .unwrap();
        assert_eq!(raw["version"], 1);
        assert!(raw["synced_at"].is_string());
        let fp = raw["files"]["maps/t16.wav"]["fingerprint"].as_str().unwrap();
        assert!(fp.starts_with("sha256:"));
    }

    #[test]
    fn tmp_file_cleaned_up_after_save() {
        let tmp = TempDir::new().unwrap();
        save_at(tmp.path(), &Manifest::new()).unwrap();
        let tmp_path = writer::tmp_path_for(&manifest_path(tmp.path()));
        assert!(!tmp_path.exists(), "tmp file should be removed after atomic rename");
    }

    #[test]
    fn load_legacy_flat_map_migrates_to_structured_manifest() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("divine.wav"), b"12345").unwrap();
        let fp = Fingerprint::of("Divine", None);
        std::fs::write(
            manifest_path(tmp.path()),
            format!(r#"{{"divine.wav":"{}"}}"#, fp.as_str()),
        )
        .unwrap();

        let loaded = load_at(tmp.path()).unwrap();
        let rec = loaded.get(&"divine.wav".into()).expect("record");
        assert_eq!(rec.fingerprint, fp);
        assert_eq!(rec.bytes, 5);
        assert_eq!(rec.sha256, None);
    }

    #[test]
    fn load_structured_without_synced_at_sets_timestamp() {
        let tmp = TempDir::new().unwrap();
        let fp = Fingerprint::of("Divine", None);
        std::fs::write(
            manifest_path(tmp.path()),
            format!(r#"{{"files":{{"divine.wav":{{"fingerprint":"{}","bytes":3}}}}}}"#, fp.as_str()),
        )
        .unwrap();

        let before = Utc::now();
        let loaded = load_at(tmp.path()).unwrap();
        let after = Utc::now();
        assert_eq!(loaded.files.len(), 1);
        assert!(loaded.synced_at >= before && loaded.synced_at <= after);
    }

    #[test]
    fn corrupt_manifest_is_an_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(manifest_path(tmp.path()), "{ not json").unwrap();
        assert!(matches!(load_at(tmp.path()), Err(SyncError::Json(_))));
    }
}
