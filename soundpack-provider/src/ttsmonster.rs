//! TTS.Monster adapter over `ureq`.
//!
//! Two calls per entry: `POST <base>/generate` returns a JSON body with the
//! URL of the rendered clip, which is then downloaded. The service has no
//! markup support, so markup is ignored here; the sync engine emulates
//! `rate='fast'` with a tempo change after download.
//!
//! Options understood: `base_url` (default [`DEFAULT_BASE_URL`]).

use std::io::Read;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use soundpack_audio::AudioFormat;

use crate::error::ProviderError;
use crate::provider::{ProviderOptions, SynthesisRequest, TtsProvider};

pub const DEFAULT_BASE_URL: &str = "https://api.console.tts.monster";

/// Upper bound on a downloaded clip.
const MAX_AUDIO_BYTES: u64 = 32 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    url: Option<String>,
    #[serde(rename = "characterUsage")]
    character_usage: Option<u64>,
}

pub struct TtsMonsterProvider {
    agent: ureq::Agent,
    api_key: String,
    base_url: String,
}

impl TtsMonsterProvider {
    /// The agent (and its connection pool) is shared by every call of the run.
    pub fn new(api_key: impl Into<String>, options: &ProviderOptions, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        let base_url = options
            .get("base_url")
            .map(|u| u.trim_end_matches('/').to_owned())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        Self {
            agent,
            api_key: api_key.into(),
            base_url,
        }
    }

    fn generate(&self, voice_id: &str, message: &str) -> Result<GenerateResponse, ProviderError> {
        let url = format!("{}/generate", self.base_url);
        let response = self
            .agent
            .post(&url)
            .set("Authorization", &self.api_key)
            .send_json(json!({ "voice_id": voice_id, "message": message }))
            .map_err(map_ureq_error)?;
        response
            .into_json::<GenerateResponse>()
            .map_err(|e| ProviderError::request(format!("malformed generate response: {e}")))
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self.agent.get(url).call().map_err(map_ureq_error)?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_AUDIO_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| ProviderError::request(format!("audio download failed: {e}")))?;
        Ok(bytes)
    }
}

impl TtsProvider for TtsMonsterProvider {
    fn name(&self) -> &str {
        "ttsmonster"
    }

    fn output_format(&self) -> AudioFormat {
        AudioFormat::Wav
    }

    fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<Vec<u8>, ProviderError> {
        let generated = self.generate(&request.voice.0, request.spoken_text)?;
        let Some(url) = generated.url else {
            return Err(ProviderError::request("no audio URL in TTS.Monster response"));
        };
        if let Some(used) = generated.character_usage {
            tracing::debug!(characters_used = used, "TTS.Monster usage");
        }
        let audio = self.download(&url)?;
        if audio.is_empty() {
            return Err(ProviderError::request("TTS.Monster returned an empty clip"));
        }
        Ok(audio)
    }
}

/// Classify a failed HTTP exchange.
pub(crate) fn map_ureq_error(err: ureq::Error) -> ProviderError {
    match err {
        ureq::Error::Status(code, response) => {
            let retry_after = response
                .header("Retry-After")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.into_string().unwrap_or_default();
            classify_status(code, retry_after, body.trim())
        }
        ureq::Error::Transport(transport) => ProviderError::request(transport.to_string()),
    }
}

pub(crate) fn classify_status(code: u16, retry_after: Option<Duration>, body: &str) -> ProviderError {
    let message = if body.is_empty() {
        format!("HTTP {code}")
    } else {
        format!("HTTP {code}: {body}")
    };
    match code {
        401 | 403 => ProviderError::auth(message),
        429 => ProviderError::rate_limit(message, retry_after),
        _ => ProviderError::request(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soundpack_core::FailureKind;

    #[test]
    fn status_codes_are_classified() {
        assert_eq!(classify_status(401, None, "").kind(), FailureKind::ProviderAuth);
        assert_eq!(classify_status(403, None, "nope").kind(), FailureKind::ProviderAuth);
        assert_eq!(classify_status(400, None, "").kind(), FailureKind::ProviderRequest);
        assert_eq!(classify_status(503, None, "").kind(), FailureKind::ProviderRequest);

        let limited = classify_status(429, Some(Duration::from_secs(7)), "quota");
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(7)));
        assert!(limited.to_string().contains("quota"));
    }

    #[test]
    fn base_url_option_strips_trailing_slash() {
        let opts = ProviderOptions::from([(
            "base_url".to_string(),
            "http://127.0.0.1:9/".to_string(),
        )]);
        let provider = TtsMonsterProvider::new("key", &opts, Duration::from_secs(1));
        assert_eq!(provider.base_url, "http://127.0.0.1:9");
    }
}
