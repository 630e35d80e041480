//! Soundpack template: the ordered list of files a soundpack must contain and
//! the text each one speaks.
//!
//! # File format
//!
//! ```json
//! [
//!   { "path": "currency/divine.mp3", "tts_text": "divine", "ssml_text": "" },
//!   { "path": "alerts/rare.mp3", "tts_text": "rare item" }
//! ]
//! ```
//!
//! Older templates store each entry as a `[path, tts_text, ssml_text]` array;
//! both shapes are accepted. Files ending in `.yaml`/`.yml` are parsed as YAML
//! with the same structure.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TemplateError;
use crate::types::{EntryPath, Fingerprint};

/// Sidecar file a soundpack directory keeps its generation records in.
pub const MANIFEST_FILE: &str = ".soundpack-manifest.json";

/// Suffix of in-flight writes; such files are never treated as soundpack content.
pub const TMP_SUFFIX: &str = ".soundpack.tmp";

/// One desired soundpack file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateEntry {
    pub path: EntryPath,
    /// Plain text passed to the TTS provider.
    #[serde(rename = "tts_text")]
    pub spoken_text: String,
    /// Provider markup (SSML); takes precedence for providers that support it.
    #[serde(rename = "ssml_text", skip_serializing_if = "Option::is_none")]
    pub markup_text: Option<String>,
}

impl TemplateEntry {
    pub fn new(
        path: impl Into<EntryPath>,
        spoken_text: impl Into<String>,
        markup_text: Option<String>,
    ) -> Self {
        Self {
            path: path.into(),
            spoken_text: spoken_text.into(),
            markup_text: markup_text.filter(|m| !m.is_empty()),
        }
    }

    /// Fingerprint a file generated from this entry must carry to be current.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.spoken_text, self.markup_text.as_deref())
    }

    /// Characters a provider bills for this entry.
    pub fn billable_characters(&self) -> usize {
        self.markup_text
            .as_deref()
            .unwrap_or(&self.spoken_text)
            .chars()
            .count()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EntryCompat {
    Object {
        path: String,
        tts_text: String,
        #[serde(default)]
        ssml_text: Option<String>,
    },
    Legacy(String, String, #[serde(default)] Option<String>),
}

impl From<EntryCompat> for TemplateEntry {
    fn from(raw: EntryCompat) -> Self {
        match raw {
            EntryCompat::Object {
                path,
                tts_text,
                ssml_text,
            }
            | EntryCompat::Legacy(path, tts_text, ssml_text) => {
                TemplateEntry::new(path, tts_text, ssml_text)
            }
        }
    }
}

/// Validated, ordered template with an index by path.
#[derive(Debug, Clone, Default)]
pub struct Template {
    entries: Vec<TemplateEntry>,
    index: HashMap<EntryPath, usize>,
}

impl Template {
    /// Validate `entries` and build the path index.
    ///
    /// Fails on the first entry with an empty, non-relative, or duplicate
    /// path, or with empty spoken text.
    pub fn new(entries: Vec<TemplateEntry>) -> Result<Self, TemplateError> {
        let mut index = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            validate_path(i, entry.path.as_str())?;
            if entry.spoken_text.trim().is_empty() {
                return Err(TemplateError::validation(
                    i,
                    entry.path.as_str(),
                    "tts_text is empty",
                ));
            }
            if let Some(first) = index.insert(entry.path.clone(), i) {
                return Err(TemplateError::validation(
                    i,
                    entry.path.as_str(),
                    format!("duplicate path (first defined at entry #{first})"),
                ));
            }
        }
        Ok(Self { entries, index })
    }

    pub fn from_json_str(contents: &str) -> Result<Self, TemplateError> {
        Self::parse_json(contents, "<inline>")
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, TemplateError> {
        Self::parse_yaml(contents, "<inline>")
    }

    fn parse_json(contents: &str, origin: &str) -> Result<Self, TemplateError> {
        let raw: Vec<EntryCompat> =
            serde_json::from_str(contents).map_err(|e| TemplateError::Parse {
                origin: origin.to_owned(),
                source: Box::new(e),
            })?;
        Self::new(raw.into_iter().map(TemplateEntry::from).collect())
    }

    fn parse_yaml(contents: &str, origin: &str) -> Result<Self, TemplateError> {
        let raw: Vec<EntryCompat> =
            serde_yaml::from_str(contents).map_err(|e| TemplateError::Parse {
                origin: origin.to_owned(),
                source: Box::new(e),
            })?;
        Self::new(raw.into_iter().map(TemplateEntry::from).collect())
    }

    /// Entries in template order.
    pub fn entries(&self) -> &[TemplateEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TemplateEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// O(1) lookup by path.
    pub fn get(&self, path: &EntryPath) -> Option<&TemplateEntry> {
        self.index.get(path).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, path: &EntryPath) -> bool {
        self.index.contains_key(path)
    }

    /// Position of `path` in template order.
    pub fn position(&self, path: &EntryPath) -> Option<usize> {
        self.index.get(path).copied()
    }

    pub fn paths(&self) -> impl Iterator<Item = &EntryPath> {
        self.entries.iter().map(|e| &e.path)
    }

    /// Sum of billable characters over `paths`; unknown paths count zero.
    pub fn billable_characters<'a>(&self, paths: impl IntoIterator<Item = &'a EntryPath>) -> usize {
        paths
            .into_iter()
            .filter_map(|p| self.get(p))
            .map(TemplateEntry::billable_characters)
            .sum()
    }
}

impl<'a> IntoIterator for &'a Template {
    type Item = &'a TemplateEntry;
    type IntoIter = std::slice::Iter<'a, TemplateEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Load a template file. The format is chosen from the extension: `.yaml` /
/// `.yml` are YAML, anything else JSON.
pub fn load_at(path: &Path) -> Result<Template, TemplateError> {
    let contents = std::fs::read_to_string(path).map_err(|e| TemplateError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let origin = path.display().to_string();
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);
    if is_yaml {
        Template::parse_yaml(&contents, &origin)
    } else {
        Template::parse_json(&contents, &origin)
    }
}

fn validate_path(index: usize, path: &str) -> Result<(), TemplateError> {
    let reason = if path.is_empty() {
        "path is empty"
    } else if path.starts_with('/') || path.contains(':') {
        "path must be relative"
    } else if path.contains('\\') {
        "path must use '/' separators"
    } else if path.split('/').any(str::is_empty) {
        "path has an empty segment"
    } else if path.split('/').any(|s| s == "." || s == "..") {
        "path must not contain '.' or '..' segments"
    } else if path == MANIFEST_FILE {
        "path is reserved for the soundpack manifest"
    } else if path.ends_with(TMP_SUFFIX) {
        "path must not end in the temporary-file suffix"
    } else {
        return Ok(());
    };
    Err(TemplateError::validation(index, path, reason))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
