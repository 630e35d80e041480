//! # soundpack-audio
//!
//! Post-processing for freshly synthesized soundpack audio: leading/trailing
//! silence trim, an optional tempo change, then peak normalization that never clips.
//!
//! ```rust,no_run
//! use soundpack_audio::{AudioFormat, PostProcessConfig, PostProcessor};
//!
//! fn level(raw: &[u8]) -> Result<Vec<u8>, soundpack_audio::AudioError> {
//!     PostProcessor::new(PostProcessConfig::default()).process(raw, AudioFormat::Wav)
//! }
//! ```

pub mod error;
pub mod format;
pub mod process;
pub mod waveform;

pub use error::AudioError;
pub use format::AudioFormat;
pub use process::{change_tempo, normalize_peak, trim_silence, PostProcessConfig, PostProcessor};
pub use waveform::Waveform;
