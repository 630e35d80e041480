//! Domain types shared by every soundpack crate.
//!
//! Template paths are kept as slash-separated strings ([`EntryPath`]) and only
//! turned into a `PathBuf` when joined onto a soundpack directory.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Relative, slash-separated path of a soundpack file; the template key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryPath(pub String);

impl EntryPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join this path onto `base`, one component per slash segment.
    pub fn to_native(&self, base: &Path) -> PathBuf {
        let mut out = base.to_path_buf();
        for segment in self.0.split('/') {
            out.push(segment);
        }
        out
    }

    /// Inverse of [`EntryPath::to_native`]; `None` when `path` is not under
    /// `base` or is not valid UTF-8.
    pub fn from_native(base: &Path, path: &Path) -> Option<Self> {
        let relative = path.strip_prefix(base).ok()?;
        let mut segments = Vec::new();
        for component in relative.components() {
            segments.push(component.as_os_str().to_str()?.to_owned());
        }
        if segments.is_empty() {
            return None;
        }
        Some(Self(segments.join("/")))
    }
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for EntryPath {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntryPath {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Provider-specific voice identifier (e.g. `Brian` for Polly).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoiceId(pub String);

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for VoiceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VoiceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

const FINGERPRINT_PREFIX: &str = "sha256:";
const FINGERPRINT_DOMAIN: &[u8] = b"soundpack-text-v1\0";

/// Digest of the source text a soundpack file was generated from.
///
/// Format: `sha256:<hex>`. Each field is length-prefixed before hashing so
/// `("ab", None)`, `("a", Some("b"))` and `("ab", Some(""))` all differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn of(spoken_text: &str, markup_text: Option<&str>) -> Self {
        let mut h = Sha256::new();
        h.update(FINGERPRINT_DOMAIN);
        h.update((spoken_text.len() as u64).to_le_bytes());
        h.update(spoken_text.as_bytes());
        match markup_text {
            Some(markup) => {
                h.update([1u8]);
                h.update((markup.len() as u64).to_le_bytes());
                h.update(markup.as_bytes());
            }
            None => h.update([0u8]),
        }
        Self(format!("{FINGERPRINT_PREFIX}{}", hex::encode(h.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How the diff treats a file that exists on disk but has no recorded
/// fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UntrackedPolicy {
    /// Keep the file and record the current entry's fingerprint for it.
    #[default]
    Adopt,
    /// Treat the file as stale and synthesize it again.
    Regenerate,
}

impl fmt::Display for UntrackedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UntrackedPolicy::Adopt => write!(f, "adopt"),
            UntrackedPolicy::Regenerate => write!(f, "regenerate"),
        }
    }
}

/// Why a single entry failed; reported per path in the sync summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ProviderRequest,
    ProviderRateLimit,
    ProviderAuth,
    AudioDecode,
    Write,
    /// Not attempted because the run was aborted.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::ProviderRequest => "provider_request",
            FailureKind::ProviderRateLimit => "provider_rate_limit",
            FailureKind::ProviderAuth => "provider_auth",
            FailureKind::AudioDecode => "audio_decode",
            FailureKind::Write => "write",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
