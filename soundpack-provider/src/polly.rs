//! AWS Polly-style adapter.
//!
//! The adapter never touches credentials: the caller constructs a
//! pre-authenticated [`PollyClient`] (an SDK session, a signing proxy, ...) and
//! hands it in. This module only decides *what* to ask for and classifies the
//! client's errors.
//!
//! Options understood: `engine` (`standard` | `neural`, default `standard`),
//! `output_format` (`pcm` | `mp3` | `ogg_vorbis`, default `pcm`),
//! `sample_rate` (default `16000`).

use std::time::Duration;

use soundpack_audio::{format::DEFAULT_PCM_SAMPLE_RATE, AudioFormat};

use crate::error::ProviderError;
use crate::provider::{ProviderOptions, SynthesisRequest, TtsProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextType {
    Text,
    Ssml,
}

impl TextType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextType::Text => "text",
            TextType::Ssml => "ssml",
        }
    }
}

/// Parameters of one `SynthesizeSpeech` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechInput<'a> {
    pub text: &'a str,
    pub text_type: TextType,
    pub voice_id: &'a str,
    pub engine: &'a str,
    pub output_format: &'a str,
    pub sample_rate: String,
}

/// Error reported by a [`PollyClient`], in AWS terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollyClientError {
    /// AWS error code, e.g. `ThrottlingException`.
    pub code: String,
    pub message: String,
    pub http_status: Option<u16>,
    pub retry_after: Option<Duration>,
}

impl PollyClientError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            http_status: None,
            retry_after: None,
        }
    }
}

/// A pre-authenticated Polly session supplied by the caller.
pub trait PollyClient: Send + Sync {
    /// Returns the audio stream bytes.
    fn synthesize_speech(&self, input: &SpeechInput<'_>) -> Result<Vec<u8>, PollyClientError>;
}

const AUTH_CODES: &[&str] = &[
    "UnrecognizedClientException",
    "InvalidSignatureException",
    "AccessDeniedException",
    "ExpiredTokenException",
    "MissingAuthenticationTokenException",
    "InvalidClientTokenId",
];

const THROTTLE_CODES: &[&str] = &[
    "ThrottlingException",
    "Throttling",
    "TooManyRequestsException",
    "ServiceQuotaExceededException",
];

fn classify(err: PollyClientError) -> ProviderError {
    let message = format!("{}: {}", err.code, err.message);
    if AUTH_CODES.contains(&err.code.as_str()) || matches!(err.http_status, Some(401 | 403)) {
        ProviderError::auth(message)
    } else if THROTTLE_CODES.contains(&err.code.as_str()) || err.http_status == Some(429) {
        ProviderError::rate_limit(message, err.retry_after)
    } else {
        ProviderError::request(message)
    }
}

pub struct PollyProvider<C> {
    client: C,
    output_format: AudioFormat,
}

impl<C: PollyClient> PollyProvider<C> {
    /// `options` fixes the output format for the run; per-call options may
    /// still choose the engine.
    pub fn new(client: C, options: &ProviderOptions) -> Result<Self, ProviderError> {
        let output_format = match options.get("output_format").map(String::as_str) {
            None | Some("pcm") => AudioFormat::Pcm {
                sample_rate: parse_sample_rate(options)?,
            },
            Some("mp3") => AudioFormat::Mp3,
            Some("ogg_vorbis") => AudioFormat::Ogg,
            Some(other) => {
                return Err(ProviderError::request(format!(
                    "unsupported Polly output_format '{other}'"
                )))
            }
        };
        Ok(Self {
            client,
            output_format,
        })
    }

    fn format_name(&self) -> &'static str {
        match self.output_format {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Ogg => "ogg_vorbis",
            _ => "pcm",
        }
    }

    fn sample_rate(&self) -> String {
        match self.output_format {
            AudioFormat::Pcm { sample_rate } => sample_rate.to_string(),
            _ => "22050".to_string(),
        }
    }
}

fn parse_sample_rate(options: &ProviderOptions) -> Result<u32, ProviderError> {
    match options.get("sample_rate") {
        None => Ok(DEFAULT_PCM_SAMPLE_RATE),
        Some(raw) => raw
            .parse()
            .map_err(|_| ProviderError::request(format!("invalid Polly sample_rate '{raw}'"))),
    }
}

impl<C: PollyClient> TtsProvider for PollyProvider<C> {
    fn name(&self) -> &str {
        "awspolly"
    }

    fn supports_markup(&self) -> bool {
        true
    }

    fn output_format(&self) -> AudioFormat {
        self.output_format
    }

    fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<Vec<u8>, ProviderError> {
        let (text, text_type) = match request.markup_text {
            Some(markup) => (markup, TextType::Ssml),
            None => (request.spoken_text, TextType::Text),
        };
        let input = SpeechInput {
            text,
            text_type,
            voice_id: &request.voice.0,
            engine: request.option("engine").unwrap_or("standard"),
            output_format: self.format_name(),
            sample_rate: self.sample_rate(),
        };
        tracing::debug!(
            voice = input.voice_id,
            text_type = input.text_type.as_str(),
            engine = input.engine,
            "polly synthesize_speech"
        );
        let audio = self.client.synthesize_speech(&input).map_err(classify)?;
        if audio.is_empty() {
            return Err(ProviderError::request("no audio stream in Polly response"));
        }
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use rstest::rstest;
    use soundpack_core::VoiceId;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, TextType, String, String)>>,
        fail: Option<PollyClientError>,
    }

    impl PollyClient for Recorder {
        fn synthesize_speech(&self, input: &SpeechInput<'_>) -> Result<Vec<u8>, PollyClientError> {
            self.seen.lock().push((
                input.text.to_owned(),
                input.text_type,
                input.engine.to_owned(),
                input.output_format.to_owned(),
            ));
            match &self.fail {
                Some(err) => Err(err.clone()),
                None => Ok(vec![0, 0]),
            }
        }
    }

    fn request<'a>(
        markup: Option<&'a str>,
        voice: &'a VoiceId,
        options: &'a ProviderOptions,
    ) -> SynthesisRequest<'a> {
        SynthesisRequest {
            spoken_text: "divine",
            markup_text: markup,
            voice,
            options,
        }
    }

    #[test]
    fn markup_takes_precedence_as_ssml() {
        let provider = PollyProvider::new(Recorder::default(), &ProviderOptions::new()).unwrap();
        let voice = VoiceId::from("Brian");
        let opts = ProviderOptions::from([("engine".to_string(), "neural".to_string())]);
        provider
            .synthesize(&request(Some("<speak>divine</speak>"), &voice, &opts))
            .unwrap();
        provider.synthesize(&request(None, &voice, &opts)).unwrap();

        let seen = provider.client.seen.lock();
        assert_eq!(seen[0].0, "<speak>divine</speak>");
        assert_eq!(seen[0].1, TextType::Ssml);
        assert_eq!(seen[0].2, "neural");
        assert_eq!(seen[1].0, "divine");
        assert_eq!(seen[1].1, TextType::Text);
        assert_eq!(seen[1].3, "pcm");
    }

    #[test]
    fn output_format_from_options() {
        let mp3 = ProviderOptions::from([("output_format".to_string(), "mp3".to_string())]);
        let provider = PollyProvider::new(Recorder::default(), &mp3).unwrap();
        assert_eq!(provider.output_format(), AudioFormat::Mp3);

        let pcm = ProviderOptions::from([("sample_rate".to_string(), "8000".to_string())]);
        let provider = PollyProvider::new(Recorder::default(), &pcm).unwrap();
        assert_eq!(provider.output_format(), AudioFormat::Pcm { sample_rate: 8000 });

        let bad = ProviderOptions::from([("output_format".to_string(), "flac".to_string())]);
        assert!(PollyProvider::new(Recorder::default(), &bad).is_err());
    }

    #[rstest]
    #[case("ThrottlingException", None, soundpack_core::FailureKind::ProviderRateLimit)]
    #[case("Whatever", Some(429), soundpack_core::FailureKind::ProviderRateLimit)]
    #[case("UnrecognizedClientException", None, soundpack_core::FailureKind::ProviderAuth)]
    #[case("Whatever", Some(403), soundpack_core::FailureKind::ProviderAuth)]
    #[case("TextLengthExceededException", Some(400), soundpack_core::FailureKind::ProviderRequest)]
    #[case("InvalidSsmlException", None, soundpack_core::FailureKind::ProviderRequest)]
    fn client_errors_are_classified(
        #[case] code: &str,
        #[case] status: Option<u16>,
        #[case] expected: soundpack_core::FailureKind,
    ) {
        let mut err = PollyClientError::new(code, "boom");
        err.http_status = status;
        let recorder = Recorder {
            fail: Some(err),
            ..Default::default()
        };
        let provider = PollyProvider::new(recorder, &ProviderOptions::new()).unwrap();
        let voice = VoiceId::from("Amy");
        let opts = ProviderOptions::new();
        let got = provider.synthesize(&request(None, &voice, &opts)).unwrap_err();
        assert_eq!(got.kind(), expected);
    }
}
