//! Local engine adapter: runs a piper/espeak-style program that reads text on
//! stdin and writes WAV to stdout.
//!
//! Arguments may contain `{voice}`, replaced with the request's voice id.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use soundpack_audio::AudioFormat;

use crate::error::ProviderError;
use crate::provider::{SynthesisRequest, TtsProvider};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct CommandProvider {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    output_format: AudioFormat,
}

impl CommandProvider {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            output_format: AudioFormat::Wav,
        }
    }

    /// Split a shell-like command line on whitespace (no quoting).
    pub fn from_command_line(line: &str, timeout: Duration) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_owned);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect(), timeout))
    }

    pub fn with_output_format(mut self, format: AudioFormat) -> Self {
        self.output_format = format;
        self
    }
}

impl TtsProvider for CommandProvider {
    fn name(&self) -> &str {
        "command"
    }

    fn output_format(&self) -> AudioFormat {
        self.output_format
    }

    fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<Vec<u8>, ProviderError> {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace("{voice}", &request.voice.0))
            .collect();
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ProviderError::request(format!("failed to start {}: {e}", self.program.display()))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A closed pipe means the engine exited early; its status tells why.
            let _ = stdin.write_all(request.spoken_text.as_bytes());
        }

        let stdout = child.stdout.take();
        let reader = thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut out) = stdout {
                let _ = out.read_to_end(&mut buf);
            }
            buf
        });
        let stderr = child.stderr.take();
        let err_reader = thread::spawn(move || {
            let mut buf = String::new();
            if let Some(mut err) = stderr {
                let _ = err.read_to_string(&mut buf);
            }
            buf
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ProviderError::request(format!(
                        "{} timed out after {:?}",
                        self.program.display(),
                        self.timeout
                    )));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => return Err(ProviderError::request(format!("wait failed: {e}"))),
            }
        };

        let audio = reader.join().unwrap_or_default();
        let stderr = err_reader.join().unwrap_or_default();
        if !status.success() {
            return Err(ProviderError::request(format!(
                "{} exited with {status}: {}",
                self.program.display(),
                stderr.trim()
            )));
        }
        if audio.is_empty() {
            return Err(ProviderError::request(format!(
                "{} produced no audio",
                self.program.display()
            )));
        }
        Ok(audio)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use soundpack_core::{FailureKind, VoiceId};

    use super::*;
    use crate::provider::ProviderOptions;

    fn synth(provider: &CommandProvider, text: &str) -> Result<Vec<u8>, ProviderError> {
        let voice = VoiceId::from("en-us");
        let options = ProviderOptions::new();
        provider.synthesize(&SynthesisRequest {
            spoken_text: text,
            markup_text: None,
            voice: &voice,
            options: &options,
        })
    }

    fn sh(script: &str, timeout: Duration) -> CommandProvider {
        CommandProvider::new("sh", vec!["-c".into(), script.into()], timeout)
    }

    #[test]
    fn stdout_is_returned_as_audio() {
        let provider = sh("cat", Duration::from_secs(5));
        assert_eq!(synth(&provider, "hello").unwrap(), b"hello");
    }

    #[test]
    fn voice_placeholder_is_substituted() {
        let provider = sh("printf '%s' \"{voice}\"", Duration::from_secs(5));
        assert_eq!(synth(&provider, "ignored").unwrap(), b"en-us");
    }

    #[test]
    fn non_zero_exit_is_request_error() {
        let provider = sh("echo broken >&2; exit 3", Duration::from_secs(5));
        let err = synth(&provider, "x").unwrap_err();
        assert_eq!(err.kind(), FailureKind::ProviderRequest);
        assert!(err.to_string().contains("broken"), "got: {err}");
    }

    #[test]
    fn slow_engine_times_out() {
        let provider = sh("sleep 5", Duration::from_millis(100));
        let start = Instant::now();
        let err = synth(&provider, "x").unwrap_err();
        assert!(err.to_string().contains("timed out"), "got: {err}");
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_program_is_request_error() {
        let provider = CommandProvider::new("/nonexistent/tts-engine", vec![], Duration::from_secs(1));
        assert_eq!(synth(&provider, "x").unwrap_err().kind(), FailureKind::ProviderRequest);
    }

    #[test]
    fn command_line_parsing() {
        let p = CommandProvider::from_command_line("espeak-ng -v {voice} --stdout", Duration::from_secs(1))
            .expect("parsed");
        assert_eq!(p.program, PathBuf::from("espeak-ng"));
        assert_eq!(p.args, vec!["-v", "{voice}", "--stdout"]);
        assert!(CommandProvider::from_command_line("   ", Duration::from_secs(1)).is_none());
    }
}
