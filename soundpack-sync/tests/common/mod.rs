#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use soundpack_audio::AudioFormat;
use soundpack_core::{Template, TemplateEntry, VoiceId};
use soundpack_provider::{
    ProviderError, ProviderOptions, RateGate, RetryPolicy, SynthesisRequest, TtsProvider,
};
use soundpack_sync::{sync_pack, SyncRequest, SyncResult, SyncSettings};

/// Provider double: returns a short tone as WAV unless the spoken text is
/// scripted to fail.
pub struct FakeProvider {
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<String>>,
    pub failures: HashMap<String, ProviderError>,
    pub format: AudioFormat,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            failures: HashMap::new(),
            format: AudioFormat::Wav,
        }
    }

    pub fn failing(mut self, text: &str, err: ProviderError) -> Self {
        self.failures.insert(text.to_string(), err);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl TtsProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    fn output_format(&self) -> AudioFormat {
        self.format
    }

    fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<Vec<u8>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.spoken_text.to_string());
        if let Some(err) = self.failures.get(request.spoken_text) {
            return Err(err.clone());
        }
        match self.format {
            AudioFormat::Wav => Ok(tone_wav(16_000, 0.25)),
            _ => Ok(b"ID3fake-compressed-audio".to_vec()),
        }
    }
}

/// 100 ms silence, 200 ms sine at `amplitude`, 100 ms silence; 16-bit mono.
pub fn tone_wav(sample_rate: u32, amplitude: f32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let ms = |n: u32| (sample_rate / 1000 * n) as usize;
        for _ in 0..ms(100) {
            writer.write_sample(0i16).unwrap();
        }
        for i in 0..ms(200) {
            let t = i as f32 / sample_rate as f32;
            let v = amplitude * (2.0 * std::f32::consts::PI * 440.0 * t).sin();
            writer.write_sample((v * i16::MAX as f32) as i16).unwrap();
        }
        for _ in 0..ms(100) {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn template(entries: &[(&str, &str)]) -> Template {
    Template::new(
        entries
            .iter()
            .map(|(p, t)| TemplateEntry::new(*p, *t, None))
            .collect(),
    )
    .unwrap()
}

pub fn fast_settings(workers: usize) -> SyncSettings {
    SyncSettings {
        workers,
        retry: RetryPolicy {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn run_sync(
    template: &Template,
    dir: &Path,
    provider: &FakeProvider,
    settings: &SyncSettings,
    dry_run: bool,
) -> SyncResult {
    let _ = env_logger::builder().is_test(true).try_init();
    let voice = VoiceId::from("Brian");
    let options = ProviderOptions::new();
    let gate = RateGate::unlimited();
    sync_pack(&SyncRequest {
        template,
        base_dir: dir,
        provider,
        voice: &voice,
        options: &options,
        settings,
        gate: &gate,
        dry_run,
    })
    .expect("sync")
}
