//! The provider capability interface.

use std::collections::BTreeMap;

use soundpack_audio::AudioFormat;
use soundpack_core::{TemplateEntry, VoiceId};

use crate::error::ProviderError;

/// Opaque provider settings (engine, sample rate, base URL, ...). Keys are
/// interpreted by the provider only.
pub type ProviderOptions = BTreeMap<String, String>;

/// One synthesis call.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisRequest<'a> {
    pub spoken_text: &'a str,
    pub markup_text: Option<&'a str>,
    pub voice: &'a VoiceId,
    pub options: &'a ProviderOptions,
}

impl<'a> SynthesisRequest<'a> {
    pub fn for_entry(entry: &'a TemplateEntry, voice: &'a VoiceId, options: &'a ProviderOptions) -> Self {
        Self {
            spoken_text: &entry.spoken_text,
            markup_text: entry.markup_text.as_deref(),
            voice,
            options,
        }
    }

    pub fn option(&self, key: &str) -> Option<&'a str> {
        self.options.get(key).map(String::as_str)
    }
}

/// A TTS backend.
///
/// Implementations own their session/connection and must be safe to call from
/// several worker threads at once. Every call must time out rather than block
/// indefinitely; a timeout is a [`ProviderError::Request`].
pub trait TtsProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether `markup_text` is sent instead of `spoken_text` when present.
    fn supports_markup(&self) -> bool {
        false
    }

    /// Format of the bytes [`TtsProvider::synthesize`] returns.
    fn output_format(&self) -> AudioFormat;

    fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<Vec<u8>, ProviderError>;
}

impl<P: TtsProvider + ?Sized> TtsProvider for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn supports_markup(&self) -> bool {
        (**self).supports_markup()
    }

    fn output_format(&self) -> AudioFormat {
        (**self).output_format()
    }

    fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<Vec<u8>, ProviderError> {
        (**self).synthesize(request)
    }
}
