mod common;

use std::collections::HashSet;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, SystemTime};

use filetime::{set_file_mtime, FileTime};

use soundpack_audio::{AudioFormat, Waveform};
use soundpack_core::{EntryPath, FailureKind, Template, TemplateEntry, UntrackedPolicy, VoiceId};
use soundpack_provider::{
    ProviderError, ProviderOptions, RateGate, SynthesisRequest, TtsProvider,
};
use soundpack_sync::{
    diff, diff_with, manifest, plan, remove_orphans, scan, sync_pack, ChangeKind, ChangeRecord,
    EntryState, SyncRequest, SyncStatus,
};
use tempfile::TempDir;

use common::{fast_settings, run_sync, template, tone_wav, FakeProvider};

#[test]
fn change_set_partitions_template_and_orphans() {
    let dir = TempDir::new().expect("dir");
    let t = template(&[("a.wav", "Alpha"), ("b.wav", "Beta"), ("c.wav", "Gamma")]);
    fs::create_dir_all(dir.path().join("extra")).unwrap();
    fs::write(dir.path().join("extra/file.mp3"), b"old").unwrap();
    fs::write(dir.path().join("b.wav"), b"untracked").unwrap();

    let state = scan(dir.path(), t.paths()).expect("scan");
    let changes = diff(&t, &state);

    let template_paths: HashSet<&EntryPath> = t.paths().collect();
    let mut seen = HashSet::new();
    for change in &changes {
        assert!(seen.insert(change.path().clone()), "path reported twice");
        let in_template = template_paths.contains(change.path());
        assert_eq!(in_template, change.kind() != ChangeKind::Orphaned);
    }
    assert_eq!(seen.len(), 4);
    assert_eq!(
        changes.last(),
        Some(&ChangeRecord::Orphaned("extra/file.mp3".into()))
    );
}

#[test]
fn first_sync_creates_everything_then_is_idempotent() {
    let dir = TempDir::new().expect("dir");
    let t = template(&[("a.wav", "Alpha"), ("orbs/b.wav", "Beta")]);
    let provider = FakeProvider::new();

    let first = run_sync(&t, dir.path(), &provider, &fast_settings(2), false);
    assert_eq!(first.created, 2);
    assert_eq!(first.status(), SyncStatus::Success);
    assert!(first.bytes_written > 0);
    assert!(dir.path().join("orbs/b.wav").exists());
    assert!(manifest::exists_at(dir.path()));

    let second = run_sync(&t, dir.path(), &provider, &fast_settings(2), false);
    assert_eq!(second.created + second.updated, 0);
    assert_eq!(second.unchanged, 2);
    assert_eq!(provider.calls(), 2, "no paid call on the second run");
}

#[test]
fn changed_text_regenerates_once() {
    let dir = TempDir::new().expect("dir");
    let provider = FakeProvider::new();
    let v1 = template(&[("a.wav", "Alpha"), ("b.wav", "Beta")]);
    run_sync(&v1, dir.path(), &provider, &fast_settings(1), false);

    let v2 = template(&[("a.wav", "Alpha"), ("b.wav", "Beta, revised")]);
    let (_, changes) = plan(&v2, dir.path(), UntrackedPolicy::Regenerate).expect("plan");
    assert_eq!(changes[1], ChangeRecord::Update("b.wav".into()));

    let result = run_sync(&v2, dir.path(), &provider, &fast_settings(1), false);
    assert_eq!((result.updated, result.unchanged), (1, 1));
    assert_eq!(provider.seen().last().map(String::as_str), Some("Beta, revised"));

    let (_, after) = plan(&v2, dir.path(), UntrackedPolicy::Regenerate).expect("plan");
    assert!(after.iter().all(|c| c.kind() == ChangeKind::Unchanged));
}

#[test]
fn hand_replaced_file_is_regenerated_when_its_text_changed() {
    let dir = TempDir::new().expect("dir");
    let provider = FakeProvider::new();
    let v1 = template(&[("a.wav", "Alpha")]);
    run_sync(&v1, dir.path(), &provider, &fast_settings(1), false);
    fs::write(dir.path().join("a.wav"), b"edited in an audio tool").unwrap();

    let v2 = template(&[("a.wav", "Completely different text")]);
    let result = run_sync(&v2, dir.path(), &provider, &fast_settings(1), false);
    assert_eq!((result.updated, result.adopted), (1, 0));
    assert_eq!(provider.calls(), 2);
    assert_eq!(
        provider.seen().last().map(String::as_str),
        Some("Completely different text")
    );

    let state = scan(dir.path(), v2.paths()).expect("scan");
    assert_eq!(
        diff(&v2, &state),
        vec![ChangeRecord::Unchanged {
            path: "a.wav".into(),
            adopted: false
        }]
    );
}

#[test]
fn hand_replaced_file_with_current_text_is_adopted() {
    let dir = TempDir::new().expect("dir");
    let provider = FakeProvider::new();
    let t = template(&[("a.wav", "Alpha")]);
    run_sync(&t, dir.path(), &provider, &fast_settings(1), false);
    fs::write(dir.path().join("a.wav"), b"re-recorded by hand").unwrap();

    let result = run_sync(&t, dir.path(), &provider, &fast_settings(1), false);
    assert_eq!((result.unchanged, result.adopted), (1, 1));
    assert_eq!(provider.calls(), 1);
}

#[test]
fn rate_limited_entry_fails_alone() {
    let dir = TempDir::new().expect("dir");
    let t = template(&[("1.wav", "one"), ("2.wav", "two"), ("3.wav", "three")]);
    let provider =
        FakeProvider::new().failing("two", ProviderError::rate_limit("slow down", None));

    let result = run_sync(&t, dir.path(), &provider, &fast_settings(2), false);

    assert_eq!(result.created, 2);
    assert!(!result.aborted);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].path, EntryPath::from("2.wav"));
    assert_eq!(result.failures[0].kind, FailureKind::ProviderRateLimit);
    assert_eq!(result.status(), SyncStatus::PartialFailure);
    // 1 attempt + 2 retries for "two", one call each for the others.
    assert_eq!(provider.calls(), 5);
    assert!(!dir.path().join("2.wav").exists());
}

#[test]
fn auth_failure_cancels_entries_not_started() {
    let dir = TempDir::new().expect("dir");
    let t = template(&[("1.wav", "one"), ("2.wav", "two"), ("3.wav", "three")]);
    let provider = FakeProvider::new().failing("two", ProviderError::auth("bad key"));

    let result = run_sync(&t, dir.path(), &provider, &fast_settings(1), false);

    assert!(result.aborted);
    assert_eq!(result.status(), SyncStatus::Aborted);
    assert_eq!(provider.calls(), 2, "nothing dispatched after the auth failure");
    let states: Vec<EntryState> = result.outcomes.iter().map(|o| o.state).collect();
    assert_eq!(
        states,
        vec![EntryState::Done, EntryState::Failed, EntryState::Failed]
    );
    assert_eq!(
        result.outcomes[2].failure.as_ref().map(|f| f.kind),
        Some(FailureKind::Cancelled)
    );

    // Completed work is recorded even though the run aborted.
    let saved = manifest::load_at(dir.path()).expect("manifest");
    assert!(saved.get(&"1.wav".into()).is_some());
    assert!(saved.get(&"2.wav".into()).is_none());
}

/// Throttles "busy" forever; rejects credentials for anything else once
/// "busy" has been throttled at least once.
struct ThrottledThenRejected {
    throttled: AtomicUsize,
}

impl TtsProvider for ThrottledThenRejected {
    fn name(&self) -> &str {
        "throttled"
    }

    fn output_format(&self) -> AudioFormat {
        AudioFormat::Wav
    }

    fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<Vec<u8>, ProviderError> {
        if request.spoken_text == "busy" {
            self.throttled.fetch_add(1, Ordering::SeqCst);
            return Err(ProviderError::rate_limit("slow down", None));
        }
        while self.throttled.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        Err(ProviderError::auth("expired token"))
    }
}

#[test]
fn auth_failure_stops_a_worker_in_backoff() {
    let dir = TempDir::new().expect("dir");
    let t = template(&[("busy.wav", "busy"), ("bad.wav", "bad")]);
    let provider = ThrottledThenRejected {
        throttled: AtomicUsize::new(0),
    };
    let mut settings = fast_settings(2);
    settings.retry.max_retries = 500;
    let voice = VoiceId::from("Brian");
    let options = ProviderOptions::new();
    let gate = RateGate::unlimited();

    let result = sync_pack(&SyncRequest {
        template: &t,
        base_dir: dir.path(),
        provider: &provider,
        voice: &voice,
        options: &options,
        settings: &settings,
        gate: &gate,
        dry_run: false,
    })
    .expect("sync");

    assert!(result.aborted);
    assert_eq!(
        result.outcomes[0].failure.as_ref().map(|f| f.kind),
        Some(FailureKind::Cancelled)
    );
    assert!(provider.throttled.load(Ordering::SeqCst) < 501, "retry budget was not spent");
}

#[test]
fn dry_run_writes_nothing() {
    let dir = TempDir::new().expect("dir");
    let base = dir.path().join("sounds");
    let t = template(&[("a.wav", "Alpha"), ("b.wav", "Beta")]);
    let provider = FakeProvider::new();

    let result = run_sync(&t, &base, &provider, &fast_settings(2), true);

    assert_eq!((result.would_create, result.would_update), (2, 0));
    assert_eq!(result.created, 0);
    assert_eq!(provider.calls(), 0);
    assert!(!base.exists(), "dry-run must not create the directory");
    assert!(result
        .outcomes
        .iter()
        .all(|o| o.state == EntryState::Pending));
}

#[test]
fn untracked_files_are_adopted_without_provider_calls() {
    let dir = TempDir::new().expect("dir");
    fs::write(dir.path().join("a.wav"), b"hand made").unwrap();
    let t = template(&[("a.wav", "Alpha")]);
    let provider = FakeProvider::new();

    let result = run_sync(&t, dir.path(), &provider, &fast_settings(1), false);
    assert_eq!((result.unchanged, result.adopted), (1, 1));
    assert_eq!(provider.calls(), 0);

    // Adopted means tracked: even a strict diff now sees it as current.
    let (_, changes) = plan(&t, dir.path(), UntrackedPolicy::Regenerate).expect("plan");
    assert_eq!(
        changes,
        vec![ChangeRecord::Unchanged {
            path: "a.wav".into(),
            adopted: false
        }]
    );
    assert_eq!(fs::read(dir.path().join("a.wav")).unwrap(), b"hand made");
}

#[test]
fn regenerate_policy_replaces_untracked_files() {
    let dir = TempDir::new().expect("dir");
    fs::write(dir.path().join("a.wav"), b"hand made").unwrap();
    let t = template(&[("a.wav", "Alpha")]);
    let provider = FakeProvider::new();
    let mut settings = fast_settings(1);
    settings.untracked = UntrackedPolicy::Regenerate;

    let result = run_sync(&t, dir.path(), &provider, &settings, false);
    assert_eq!(result.updated, 1);
    assert_ne!(fs::read(dir.path().join("a.wav")).unwrap(), b"hand made");
}

#[test]
fn written_audio_is_trimmed_and_normalized() {
    let dir = TempDir::new().expect("dir");
    let t = template(&[("a.wav", "Alpha")]);
    let provider = FakeProvider::new();
    let settings = fast_settings(1);
    run_sync(&t, dir.path(), &provider, &settings, false);

    let bytes = fs::read(dir.path().join("a.wav")).unwrap();
    let wave = Waveform::decode(&bytes, AudioFormat::Wav).expect("decodable");
    let ceiling = 10f32.powf(settings.post_process.ceiling_db / 20.0);
    assert!(wave.peak() <= ceiling + 1e-3);
    assert!(wave.peak() > ceiling - 0.01, "quiet tone was boosted");
    // 200 ms of tone plus two 30 ms guards, well under the 400 ms input.
    let ms = wave.duration().as_millis();
    assert!((250..=270).contains(&ms), "duration {ms} ms");
}

/// Reads markup, so prosody is left to the service.
struct MarkupAware;

impl TtsProvider for MarkupAware {
    fn name(&self) -> &str {
        "markup-aware"
    }

    fn output_format(&self) -> AudioFormat {
        AudioFormat::Wav
    }

    fn supports_markup(&self) -> bool {
        true
    }

    fn synthesize(&self, _request: &SynthesisRequest<'_>) -> Result<Vec<u8>, ProviderError> {
        Ok(tone_wav(16_000, 0.25))
    }
}

fn fast_rate_template() -> Template {
    Template::new(vec![
        TemplateEntry::new("plain.wav", "Alpha", None),
        TemplateEntry::new(
            "fast.wav",
            "Alpha",
            Some("<speak><prosody rate='fast'>Alpha</prosody></speak>".to_string()),
        ),
    ])
    .unwrap()
}

fn duration_ms(path: &std::path::Path) -> u128 {
    let bytes = fs::read(path).unwrap();
    Waveform::decode(&bytes, AudioFormat::Wav)
        .expect("decodable")
        .duration()
        .as_millis()
}

#[test]
fn fast_rate_markup_speeds_up_audio_from_plain_text_providers() {
    let dir = TempDir::new().expect("dir");
    let t = fast_rate_template();
    let provider = FakeProvider::new();
    let result = run_sync(&t, dir.path(), &provider, &fast_settings(1), false);
    assert_eq!(result.created, 2);

    // 260 ms after trimming, played 1.3 times faster.
    let plain = duration_ms(&dir.path().join("plain.wav"));
    let fast = duration_ms(&dir.path().join("fast.wav"));
    assert!((250..=270).contains(&plain), "plain {plain} ms");
    assert!((190..=210).contains(&fast), "fast {fast} ms");
}

#[test]
fn fast_rate_markup_is_left_to_markup_aware_providers() {
    let dir = TempDir::new().expect("dir");
    let t = fast_rate_template();
    let voice = VoiceId::from("Brian");
    let options = ProviderOptions::new();
    let gate = RateGate::unlimited();
    let settings = fast_settings(1);

    sync_pack(&SyncRequest {
        template: &t,
        base_dir: dir.path(),
        provider: &MarkupAware,
        voice: &voice,
        options: &options,
        settings: &settings,
        gate: &gate,
        dry_run: false,
    })
    .expect("sync");

    let fast = duration_ms(&dir.path().join("fast.wav"));
    assert!((250..=270).contains(&fast), "fast {fast} ms");
}

#[test]
fn undecodable_audio_fails_only_that_entry() {
    let dir = TempDir::new().expect("dir");
    let t = template(&[("a.wav", "Alpha")]);
    let voice = VoiceId::from("Brian");
    let options = ProviderOptions::new();
    let gate = RateGate::unlimited();
    let settings = fast_settings(1);

    let result = sync_pack(&SyncRequest {
        template: &t,
        base_dir: dir.path(),
        provider: &GarbageWav,
        voice: &voice,
        options: &options,
        settings: &settings,
        gate: &gate,
        dry_run: false,
    })
    .expect("sync");

    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].kind, FailureKind::AudioDecode);
    assert_eq!(result.status(), SyncStatus::TotalFailure);
    assert!(!dir.path().join("a.wav").exists());
}

/// Claims WAV, returns junk.
struct GarbageWav;

impl TtsProvider for GarbageWav {
    fn name(&self) -> &str {
        "garbage"
    }

    fn output_format(&self) -> AudioFormat {
        AudioFormat::Wav
    }

    fn synthesize(&self, _request: &SynthesisRequest<'_>) -> Result<Vec<u8>, ProviderError> {
        Ok(b"definitely not a wav file".to_vec())
    }
}

#[test]
fn compressed_output_is_written_verbatim() {
    let dir = TempDir::new().expect("dir");
    let t = template(&[("a.mp3", "Alpha")]);
    let mut provider = FakeProvider::new();
    provider.format = AudioFormat::Mp3;

    let result = run_sync(&t, dir.path(), &provider, &fast_settings(1), false);
    assert_eq!(result.created, 1);
    assert_eq!(
        fs::read(dir.path().join("a.mp3")).unwrap(),
        b"ID3fake-compressed-audio"
    );
}

#[test]
fn orphans_are_reported_not_deleted() {
    let dir = TempDir::new().expect("dir");
    fs::create_dir_all(dir.path().join("extra")).unwrap();
    fs::write(dir.path().join("extra/file.mp3"), b"old").unwrap();
    let t = template(&[("a.wav", "Alpha")]);
    let provider = FakeProvider::new();

    let result = run_sync(&t, dir.path(), &provider, &fast_settings(1), false);
    assert_eq!(result.orphans, vec![EntryPath::from("extra/file.mp3")]);
    assert_eq!(result.orphaned, 1);
    assert!(dir.path().join("extra/file.mp3").exists());
}

#[test]
fn remove_orphans_only_deletes_current_orphans() {
    let dir = TempDir::new().expect("dir");
    fs::create_dir_all(dir.path().join("extra")).unwrap();
    fs::write(dir.path().join("extra/file.mp3"), b"old").unwrap();
    let t = template(&[("a.wav", "Alpha")]);
    let provider = FakeProvider::new();
    run_sync(&t, dir.path(), &provider, &fast_settings(1), false);

    let removed = remove_orphans(
        dir.path(),
        &t,
        &["extra/file.mp3".into(), "a.wav".into(), "missing.wav".into()],
    )
    .expect("prune");

    assert_eq!(removed, vec![EntryPath::from("extra/file.mp3")]);
    assert!(!dir.path().join("extra").exists(), "emptied directory removed");
    assert!(dir.path().join("a.wav").exists(), "template file kept");
    let state = scan(dir.path(), t.paths()).expect("scan");
    assert!(state.orphans.is_empty());
}

#[test]
fn adopt_diff_then_regenerate_diff_differ_only_on_untracked() {
    let dir = TempDir::new().expect("dir");
    fs::write(dir.path().join("a.wav"), b"x").unwrap();
    let t = template(&[("a.wav", "Alpha"), ("b.wav", "Beta")]);
    let state = scan(dir.path(), t.paths()).expect("scan");

    let adopt = diff_with(&t, &state, UntrackedPolicy::Adopt);
    let regen = diff_with(&t, &state, UntrackedPolicy::Regenerate);
    assert_eq!(adopt[1], regen[1]);
    assert_ne!(adopt[0], regen[0]);
}

#[test]
fn file_age_never_triggers_regeneration() {
    let dir = TempDir::new().expect("dir");
    let t = template(&[("a.wav", "Alpha")]);
    let provider = FakeProvider::new();
    run_sync(&t, dir.path(), &provider, &fast_settings(1), false);

    let ancient = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(400 * 24 * 3600));
    set_file_mtime(dir.path().join("a.wav"), ancient).expect("set mtime");

    let (state, changes) = plan(&t, dir.path(), UntrackedPolicy::Regenerate).expect("plan");
    assert!(state.get(&"a.wav".into()).unwrap().modified.is_some());
    assert_eq!(changes[0].kind(), ChangeKind::Unchanged);
}
