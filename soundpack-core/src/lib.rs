//! Soundpack core library: template model, domain types, errors.
//!
//! Public API surface:
//! - [`types`]: newtypes, [`Fingerprint`], [`FailureKind`]
//! - [`template`]: [`Template`] load / validate / lookup
//! - [`error`]: [`TemplateError`]

pub mod error;
pub mod template;
pub mod types;

pub use error::TemplateError;
pub use template::{Template, TemplateEntry};
pub use types::{EntryPath, FailureKind, Fingerprint, UntrackedPolicy, VoiceId};
