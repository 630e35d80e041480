//! Change-set computation: template state against directory state.
//!
//! Regeneration is triggered by a fingerprint mismatch only, never by file
//! age.

use serde::Serialize;

use soundpack_core::{EntryPath, Template, UntrackedPolicy};

use crate::scanner::DirectoryState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeRecord {
    /// In the template, not on disk.
    Create(EntryPath),
    /// On disk, but generated from different text.
    Update(EntryPath),
    /// Up to date. `adopted` marks an untracked file accepted as-is.
    Unchanged { path: EntryPath, adopted: bool },
    /// On disk, not in the template.
    Orphaned(EntryPath),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Update,
    Unchanged,
    Orphaned,
}

impl ChangeRecord {
    pub fn path(&self) -> &EntryPath {
        match self {
            ChangeRecord::Create(p) | ChangeRecord::Update(p) | ChangeRecord::Orphaned(p) => p,
            ChangeRecord::Unchanged { path, .. } => path,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeRecord::Create(_) => ChangeKind::Create,
            ChangeRecord::Update(_) => ChangeKind::Update,
            ChangeRecord::Unchanged { .. } => ChangeKind::Unchanged,
            ChangeRecord::Orphaned(_) => ChangeKind::Orphaned,
        }
    }

    pub fn needs_synthesis(&self) -> bool {
        matches!(self, ChangeRecord::Create(_) | ChangeRecord::Update(_))
    }
}

/// Change counts per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeCounts {
    pub create: usize,
    pub update: usize,
    pub unchanged: usize,
    pub adopted: usize,
    pub orphaned: usize,
}

impl ChangeCounts {
    pub fn of(changes: &[ChangeRecord]) -> Self {
        let mut counts = Self::default();
        for change in changes {
            match change {
                ChangeRecord::Create(_) => counts.create += 1,
                ChangeRecord::Update(_) => counts.update += 1,
                ChangeRecord::Unchanged { adopted, .. } => {
                    counts.unchanged += 1;
                    if *adopted {
                        counts.adopted += 1;
                    }
                }
                ChangeRecord::Orphaned(_) => counts.orphaned += 1,
            }
        }
        counts
    }

    /// Entries a sync would send to the provider.
    pub fn pending(&self) -> usize {
        self.create + self.update
    }
}

/// [`diff_with`] under [`UntrackedPolicy::Regenerate`]: any file without a
/// matching fingerprint is regenerated.
pub fn diff(template: &Template, state: &DirectoryState) -> Vec<ChangeRecord> {
    diff_with(template, state, UntrackedPolicy::Regenerate)
}

/// One record per template entry, in template order, then one `Orphaned`
/// record per orphan, sorted by path.
pub fn diff_with(
    template: &Template,
    state: &DirectoryState,
    untracked: UntrackedPolicy,
) -> Vec<ChangeRecord> {
    let mut changes = Vec::with_capacity(template.len() + state.orphans.len());
    for entry in template {
        let path = entry.path.clone();
        let record = match state.get(&entry.path) {
            None => ChangeRecord::Create(path),
            Some(observed) if !observed.exists => ChangeRecord::Create(path),
            Some(observed) => match &observed.fingerprint {
                Some(fp) if *fp == entry.fingerprint() => ChangeRecord::Unchanged {
                    path,
                    adopted: false,
                },
                Some(_) => ChangeRecord::Update(path),
                // Replaced by hand, and the text moved on since it was recorded.
                None if observed
                    .recorded
                    .as_ref()
                    .is_some_and(|fp| *fp != entry.fingerprint()) =>
                {
                    ChangeRecord::Update(path)
                }
                None => match untracked {
                    UntrackedPolicy::Adopt => ChangeRecord::Unchanged {
                        path,
                        adopted: true,
                    },
                    UntrackedPolicy::Regenerate => ChangeRecord::Update(path),
                },
            },
        };
        changes.push(record);
    }
    // The scanner already sorts orphans; keep the guarantee local.
    let mut orphans: Vec<&EntryPath> = state
        .orphans
        .iter()
        .map(|o| &o.path)
        .filter(|p| !template.contains(p))
        .collect();
    orphans.sort();
    changes.extend(orphans.into_iter().cloned().map(ChangeRecord::Orphaned));
    changes
}
