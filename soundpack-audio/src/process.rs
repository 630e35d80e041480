//! Silence trim, tempo change and peak normalization.
//!
//! Each step is a pure function over a [`Waveform`]; [`PostProcessor`] chains
//! them in order (trim first, so silence does not dilute the peak search) and
//! handles decode/encode around them.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::AudioError;
use crate::format::AudioFormat;
use crate::waveform::{db_to_linear, linear_to_db, Waveform};

/// Post-processing settings. Every field has a default, so a partial YAML
/// block is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessConfig {
    pub trim: bool,
    /// Frames whose every channel is below this level count as silence.
    pub silence_threshold_db: f32,
    /// Silence kept on each side of the audible region.
    pub guard_ms: u32,
    pub normalize: bool,
    /// Target peak after normalization, in dBFS (must be < 0).
    pub ceiling_db: f32,
    /// Upper bound on boost, so near-silent takes are not amplified into noise.
    pub max_gain_db: f32,
    /// Scale down audio whose peak is already above the ceiling. When off,
    /// audio past full scale is still brought back to full scale.
    pub allow_attenuation: bool,
    /// Playback speed factor; `1.3` plays 30% faster at the same pitch.
    pub tempo: f32,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            trim: true,
            silence_threshold_db: -50.0,
            guard_ms: 30,
            normalize: true,
            ceiling_db: -1.0,
            max_gain_db: 30.0,
            allow_attenuation: true,
            tempo: 1.0,
        }
    }
}

impl PostProcessConfig {
    fn ceiling(&self) -> f32 {
        db_to_linear(self.ceiling_db.min(0.0))
    }

    fn changes_tempo(&self) -> bool {
        self.tempo > 0.0 && (self.tempo - 1.0).abs() > f32::EPSILON
    }
}

/// Analysis window of the tempo change.
const TEMPO_WINDOW_MS: u32 = 40;

/// Speed audio up (`tempo > 1`) or slow it down without shifting pitch.
///
/// Overlap-add of Hann-windowed grains: grains are read `tempo` times
/// further apart than they are written. The output holds `frames / tempo`
/// frames and its peak never exceeds the input's. A non-positive tempo
/// returns the input unchanged.
pub fn change_tempo(wave: &Waveform, tempo: f32) -> Waveform {
    if tempo <= 0.0 || (tempo - 1.0).abs() <= f32::EPSILON || wave.is_empty() {
        return wave.clone();
    }
    let channels = wave.channels.max(1) as usize;
    let in_frames = wave.frames();
    let out_frames = (in_frames as f64 / tempo as f64).round() as usize;
    let grain = ((TEMPO_WINDOW_MS as usize * wave.sample_rate as usize / 1000).max(4)) & !1;
    let hop_out = grain / 2;
    let hop_in = hop_out as f64 * tempo as f64;
    let window: Vec<f32> = (0..grain)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / grain as f32).cos())
        .collect();

    let mut samples = vec![0.0f32; out_frames * channels];
    let mut weight = vec![0.0f32; out_frames];
    for k in 0.. {
        let out_start = k * hop_out;
        if out_start >= out_frames {
            break;
        }
        let in_start = (k as f64 * hop_in).round() as usize;
        for (i, w) in window.iter().enumerate() {
            let (o, src) = (out_start + i, in_start + i);
            if o >= out_frames || src >= in_frames {
                break;
            }
            for c in 0..channels {
                samples[o * channels + c] += wave.samples[src * channels + c] * w;
            }
            weight[o] += w;
        }
    }
    // Each output sample is a weighted mean of input samples.
    for (o, w) in weight.iter().enumerate() {
        if *w > 0.0 {
            for s in &mut samples[o * channels..(o + 1) * channels] {
                *s /= w;
            }
        }
    }
    Waveform::new(wave.sample_rate, wave.channels, samples)
}

/// Remove leading and trailing silence, keeping `guard_ms` of it on each side.
///
/// An all-silent waveform trims to an empty one.
pub fn trim_silence(wave: &Waveform, config: &PostProcessConfig) -> Waveform {
    let threshold = db_to_linear(config.silence_threshold_db);
    let frames = wave.frames();
    let audible = |i: usize| wave.frame(i).iter().any(|s| s.abs() >= threshold);

    let Some(first) = (0..frames).find(|&i| audible(i)) else {
        return Waveform::new(wave.sample_rate, wave.channels, Vec::new());
    };
    // `first` exists, so a last audible frame does too.
    let last = (first..frames).rev().find(|&i| audible(i)).unwrap_or(first);

    let guard = (config.guard_ms as u64 * wave.sample_rate as u64 / 1000) as usize;
    let start = first.saturating_sub(guard);
    let end = (last + 1 + guard).min(frames);
    wave.slice_frames(start, end)
}

/// Scale uniformly so the peak sits at the ceiling. Returns the new waveform
/// and the applied gain (linear).
///
/// The gain never exceeds `ceiling / peak`, so no sample can pass the ceiling
/// or full scale. Silent input is returned unchanged.
pub fn normalize_peak(wave: &Waveform, config: &PostProcessConfig) -> (Waveform, f32) {
    let peak = wave.peak();
    if peak <= f32::EPSILON {
        return (wave.clone(), 1.0);
    }
    let ceiling = config.ceiling();
    let safe_gain = ceiling / peak;
    let mut gain = safe_gain.min(db_to_linear(config.max_gain_db));
    if gain < 1.0 && !config.allow_attenuation {
        // Float input past full scale is pulled back rather than clipped.
        gain = peak.recip().min(1.0);
    }
    // Float rounding can land a hair above the ceiling; only then does the clamp bite.
    let bound = if gain <= safe_gain { ceiling } else { 1.0 };
    let samples = wave
        .samples
        .iter()
        .map(|s| (s * gain).clamp(-bound, bound))
        .collect();
    (
        Waveform::new(wave.sample_rate, wave.channels, samples),
        gain,
    )
}

/// Decode → trim → tempo → normalize → encode as WAV.
#[derive(Debug, Clone, Default)]
pub struct PostProcessor {
    config: PostProcessConfig,
}

impl PostProcessor {
    pub fn new(config: PostProcessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PostProcessConfig {
        &self.config
    }

    /// Process raw provider bytes of `format` into WAV bytes.
    pub fn process(&self, raw: &[u8], format: AudioFormat) -> Result<Vec<u8>, AudioError> {
        let wave = Waveform::decode(raw, format)?;
        let processed = self.process_waveform(&wave)?;
        processed.encode_wav()
    }

    pub fn process_waveform(&self, wave: &Waveform) -> Result<Waveform, AudioError> {
        let mut out = if self.config.trim {
            trim_silence(wave, &self.config)
        } else {
            wave.clone()
        };
        if out.is_empty() {
            return Err(AudioError::Silent {
                threshold_db: self.config.silence_threshold_db,
            });
        }
        if self.config.changes_tempo() {
            out = change_tempo(&out, self.config.tempo);
            tracing::debug!(tempo = self.config.tempo, "changed tempo");
        }
        if self.config.normalize {
            let (normalized, gain) = normalize_peak(&out, &self.config);
            tracing::debug!(
                trimmed_ms = (wave.duration().as_millis() as i64 - out.duration().as_millis() as i64),
                gain_db = linear_to_db(gain),
                "post-processed waveform"
            );
            out = normalized;
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
