//! Error types for soundpack-audio.

use thiserror::Error;

use crate::format::AudioFormat;

/// Errors raised while decoding, processing or re-encoding audio.
///
/// Every variant aborts post-processing of a single entry only.
#[derive(Debug, Error)]
pub enum AudioError {
    /// The bytes are not valid audio of the declared format.
    #[error("audio decode error: {0}")]
    Decode(String),

    /// WAV container error from `hound` (decode or encode).
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// Nothing above the silence threshold; writing it would yield an empty file.
    #[error("no audible content above {threshold_db} dBFS")]
    Silent { threshold_db: f32 },

    /// The format is compressed and cannot be decoded here.
    #[error("cannot post-process {0} audio")]
    Unsupported(AudioFormat),
}
