//! In-memory decoded waveform: interleaved `f32` samples in `[-1.0, 1.0]`.

use std::io::Cursor;
use std::time::Duration;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::AudioError;
use crate::format::AudioFormat;

#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved by frame.
    pub samples: Vec<f32>,
}

impl Waveform {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            channels,
            samples,
        }
    }

    /// Decode provider output. Only WAV and raw PCM are supported.
    pub fn decode(bytes: &[u8], format: AudioFormat) -> Result<Self, AudioError> {
        if bytes.is_empty() {
            return Err(AudioError::Decode("empty audio payload".into()));
        }
        match format {
            AudioFormat::Wav => Self::decode_wav(bytes),
            AudioFormat::Pcm { sample_rate } => Self::decode_pcm_s16le(bytes, sample_rate),
            other => Err(AudioError::Unsupported(other)),
        }
    }

    fn decode_wav(bytes: &[u8]) -> Result<Self, AudioError> {
        let mut reader = WavReader::new(Cursor::new(bytes))?;
        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(AudioError::Decode("WAV declares zero channels".into()));
        }
        let samples = match spec.sample_format {
            SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
            SampleFormat::Int => {
                let max = (1_i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        if samples.len() % spec.channels as usize != 0 {
            return Err(AudioError::Decode("truncated WAV frame".into()));
        }
        Ok(Self::new(spec.sample_rate, spec.channels, samples))
    }

    fn decode_pcm_s16le(bytes: &[u8], sample_rate: u32) -> Result<Self, AudioError> {
        if bytes.len() % 2 != 0 {
            return Err(AudioError::Decode(format!(
                "PCM payload has odd length {}",
                bytes.len()
            )));
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32_768.0)
            .collect();
        Ok(Self::new(sample_rate, 1, samples))
    }

    /// Encode as 16-bit integer WAV. Samples are clamped to full scale.
    pub fn encode_wav(&self) -> Result<Vec<u8>, AudioError> {
        let spec = WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut out = Cursor::new(Vec::with_capacity(44 + self.samples.len() * 2));
        {
            let mut writer = WavWriter::new(&mut out, spec)?;
            for &value in &self.samples {
                let scaled = (value.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
                writer.write_sample(scaled)?;
            }
            writer.finalize()?;
        }
        Ok(out.into_inner())
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Maximum absolute sample value.
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()))
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub(crate) fn frame(&self, index: usize) -> &[f32] {
        let ch = self.channels as usize;
        &self.samples[index * ch..(index + 1) * ch]
    }

    pub(crate) fn slice_frames(&self, start: usize, end: usize) -> Waveform {
        let ch = self.channels as usize;
        Waveform::new(
            self.sample_rate,
            self.channels,
            self.samples[start * ch..end * ch].to_vec(),
        )
    }
}

/// `10^(db/20)`.
pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// `20·log10(linear)`; `-inf` for zero.
pub fn linear_to_db(linear: f32) -> f32 {
    20.0 * linear.log10()
}
