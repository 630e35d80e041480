//! Rate-limit policy: bounded exponential backoff plus a gate shared by all
//! workers of one run.

use std::thread;
use std::time::{Duration, Instant};

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::provider::{SynthesisRequest, TtsProvider};

/// Retry settings for rate-limited calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` disables retrying.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Minimum spacing between any two calls across all workers.
    pub min_interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
            min_interval_ms: 0,
        }
    }
}

impl RetryPolicy {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff())
            .with_max_interval(Duration::from_millis(
                self.max_backoff_ms.max(self.initial_backoff_ms),
            ))
            .with_multiplier(self.multiplier.max(1.0))
            .with_randomization_factor(0.2)
            // Bounded by `max_retries` instead of wall-clock time.
            .with_max_elapsed_time(None)
            .build()
    }
}

#[derive(Debug)]
struct GateState {
    next_slot: Instant,
    paused_until: Option<Instant>,
}

/// The one shared mutable resource of a run: spaces calls by a minimum
/// interval and, once any worker is throttled, holds every worker back until
/// the cool-down has passed.
#[derive(Debug)]
pub struct RateGate {
    min_interval: Duration,
    state: Mutex<GateState>,
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            state: Mutex::new(GateState {
                next_slot: Instant::now(),
                paused_until: None,
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Block until the caller may issue one request, and claim that slot.
    pub fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                let mut ready = state.next_slot;
                if let Some(paused) = state.paused_until {
                    ready = ready.max(paused);
                }
                if ready <= now {
                    state.next_slot = now + self.min_interval;
                    state.paused_until = None;
                    return;
                }
                ready - now
            };
            thread::sleep(wait);
        }
    }

    /// Hold all callers back for at least `duration` from now.
    pub fn pause_for(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut state = self.state.lock();
        state.paused_until = Some(state.paused_until.map_or(until, |p| p.max(until)));
    }

    pub fn is_paused(&self) -> bool {
        self.state
            .lock()
            .paused_until
            .is_some_and(|p| p > Instant::now())
    }
}

impl Default for RateGate {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Call `provider`, retrying rate-limit errors up to `policy.max_retries`
/// times. Every other error is returned immediately.
///
/// After the retry budget is spent the last rate-limit error is returned, so
/// the caller can record it against the entry.
pub fn synthesize_with_retry(
    provider: &dyn TtsProvider,
    request: &SynthesisRequest<'_>,
    policy: &RetryPolicy,
    gate: &RateGate,
) -> Result<Vec<u8>, ProviderError> {
    synthesize_with_retry_until(provider, request, policy, gate, &|| false)
}

/// [`synthesize_with_retry`] that gives up with [`ProviderError::Cancelled`]
/// as soon as `cancelled` returns true, checked before every attempt.
pub fn synthesize_with_retry_until(
    provider: &dyn TtsProvider,
    request: &SynthesisRequest<'_>,
    policy: &RetryPolicy,
    gate: &RateGate,
    cancelled: &dyn Fn() -> bool,
) -> Result<Vec<u8>, ProviderError> {
    let mut attempts: u32 = 0;
    let op = || {
        gate.acquire();
        if cancelled() {
            return Err(backoff::Error::permanent(ProviderError::cancelled(
                "run aborted while retrying",
            )));
        }
        attempts += 1;
        match provider.synthesize(request) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.is_rate_limit() => {
                if attempts > policy.max_retries {
                    return Err(backoff::Error::permanent(err));
                }
                let retry_after = err.retry_after();
                gate.pause_for(retry_after.unwrap_or_else(|| policy.initial_backoff()));
                tracing::warn!(
                    provider = provider.name(),
                    attempt = attempts,
                    max_retries = policy.max_retries,
                    "rate limited, backing off"
                );
                match retry_after {
                    Some(delay) => Err(backoff::Error::retry_after(err, delay)),
                    None => Err(backoff::Error::transient(err)),
                }
            }
            Err(err) => Err(backoff::Error::permanent(err)),
        }
    };

    backoff::retry(policy.backoff(), op).map_err(|e| match e {
        backoff::Error::Permanent(err) => err,
        backoff::Error::Transient { err, .. } => err,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use soundpack_audio::AudioFormat;
    use soundpack_core::{FailureKind, VoiceId};

    use super::*;
    use crate::provider::ProviderOptions;

    struct Scripted {
        fail_first: u32,
        error: ProviderError,
        calls: AtomicU32,
    }

    impl TtsProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn output_format(&self) -> AudioFormat {
            AudioFormat::Wav
        }

        fn synthesize(&self, _request: &SynthesisRequest<'_>) -> Result<Vec<u8>, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(self.error.clone())
            } else {
                Ok(vec![1, 2, 3])
            }
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            ..Default::default()
        }
    }

    fn call(provider: &Scripted, policy: &RetryPolicy) -> Result<Vec<u8>, ProviderError> {
        let voice = VoiceId::from("v");
        let options = ProviderOptions::new();
        let request = SynthesisRequest {
            spoken_text: "hello",
            markup_text: None,
            voice: &voice,
            options: &options,
        };
        synthesize_with_retry(provider, &request, policy, &RateGate::unlimited())
    }

    #[test]
    fn rate_limit_recovers_within_budget() {
        let provider = Scripted {
            fail_first: 2,
            error: ProviderError::rate_limit("slow down", None),
            calls: AtomicU32::new(0),
        };
        let bytes = call(&provider, &fast_policy(3)).expect("recovered");
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn rate_limit_exhausts_budget() {
        let provider = Scripted {
            fail_first: u32::MAX,
            error: ProviderError::rate_limit("slow down", Some(Duration::from_millis(1))),
            calls: AtomicU32::new(0),
        };
        let err = call(&provider, &fast_policy(2)).unwrap_err();
        assert!(err.is_rate_limit());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3, "1 attempt + 2 retries");
    }

    #[test]
    fn request_and_auth_errors_are_not_retried() {
        for error in [ProviderError::request("400"), ProviderError::auth("bad key")] {
            let provider = Scripted {
                fail_first: u32::MAX,
                error: error.clone(),
                calls: AtomicU32::new(0),
            };
            assert_eq!(call(&provider, &fast_policy(5)).unwrap_err(), error);
            assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn cancellation_stops_a_retry_loop() {
        let provider = Scripted {
            fail_first: u32::MAX,
            error: ProviderError::rate_limit("slow down", None),
            calls: AtomicU32::new(0),
        };
        let voice = VoiceId::from("v");
        let options = ProviderOptions::new();
        let request = SynthesisRequest {
            spoken_text: "hello",
            markup_text: None,
            voice: &voice,
            options: &options,
        };
        // Another worker flips the flag after the second attempt.
        let stop = || provider.calls.load(Ordering::SeqCst) >= 2;
        let err = synthesize_with_retry_until(
            &provider,
            &request,
            &fast_policy(10),
            &RateGate::unlimited(),
            &stop,
        )
        .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Cancelled);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn gate_spaces_calls_by_min_interval() {
        let gate = RateGate::new(Duration::from_millis(20));
        let start = Instant::now();
        gate.acquire();
        gate.acquire();
        gate.acquire();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn gate_pause_holds_callers() {
        let gate = RateGate::unlimited();
        gate.pause_for(Duration::from_millis(30));
        assert!(gate.is_paused());
        let start = Instant::now();
        gate.acquire();
        assert!(start.elapsed() >= Duration::from_millis(25));
        assert!(!gate.is_paused());
    }
}
