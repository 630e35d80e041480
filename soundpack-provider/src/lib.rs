//! # soundpack-provider
//!
//! The TTS capability boundary. A provider turns one template entry's text into
//! raw audio bytes; everything about sessions, credentials and wire formats
//! stays behind [`TtsProvider`].
//!
//! Rate-limit handling lives here too: [`retry::synthesize_with_retry`] wraps
//! any provider with bounded exponential backoff coordinated through a shared
//! [`RateGate`].

pub mod command;
pub mod error;
pub mod polly;
pub mod provider;
pub mod retry;
pub mod ttsmonster;

pub use error::ProviderError;
pub use provider::{ProviderOptions, SynthesisRequest, TtsProvider};
pub use retry::{synthesize_with_retry, synthesize_with_retry_until, RateGate, RetryPolicy};
