//! Audio container formats a provider may return.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Polly's PCM output is 16 kHz, mono, signed 16-bit little-endian.
pub const DEFAULT_PCM_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Wav,
    /// Headerless mono s16le.
    Pcm { sample_rate: u32 },
    Mp3,
    Ogg,
}

impl AudioFormat {
    /// Whether [`crate::Waveform::decode`] understands this format.
    pub fn is_decodable(&self) -> bool {
        matches!(self, AudioFormat::Wav | AudioFormat::Pcm { .. })
    }

    /// Format written to disk after post-processing.
    pub fn processed(&self) -> AudioFormat {
        if self.is_decodable() {
            AudioFormat::Wav
        } else {
            *self
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Pcm { .. } => "pcm",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Ogg => "ogg",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioFormat::Pcm { sample_rate } => write!(f, "pcm:{sample_rate}"),
            other => f.write_str(other.extension()),
        }
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    /// Accepts `wav`, `mp3`, `ogg`, `pcm` and `pcm:<rate>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        match lower.as_str() {
            "wav" => Ok(AudioFormat::Wav),
            "mp3" => Ok(AudioFormat::Mp3),
            "ogg" | "ogg_vorbis" => Ok(AudioFormat::Ogg),
            "pcm" => Ok(AudioFormat::Pcm {
                sample_rate: DEFAULT_PCM_SAMPLE_RATE,
            }),
            other => match other.strip_prefix("pcm:").map(str::parse::<u32>) {
                Some(Ok(sample_rate)) if sample_rate > 0 => Ok(AudioFormat::Pcm { sample_rate }),
                _ => Err(format!(
                    "unknown audio format '{s}'; expected: wav, mp3, ogg, pcm, pcm:<rate>"
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        assert_eq!("WAV".parse::<AudioFormat>(), Ok(AudioFormat::Wav));
        assert_eq!(
            "pcm".parse::<AudioFormat>(),
            Ok(AudioFormat::Pcm { sample_rate: 16_000 })
        );
        assert_eq!(
            "pcm:22050".parse::<AudioFormat>().map(|f| f.to_string()),
            Ok("pcm:22050".to_string())
        );
        assert!("pcm:0".parse::<AudioFormat>().is_err());
        assert!("flac".parse::<AudioFormat>().is_err());
    }

    #[test]
    fn decodable_formats_are_written_as_wav() {
        assert_eq!(AudioFormat::Pcm { sample_rate: 8000 }.processed(), AudioFormat::Wav);
        assert_eq!(AudioFormat::Mp3.processed(), AudioFormat::Mp3);
        assert!(!AudioFormat::Ogg.is_decodable());
    }
}
