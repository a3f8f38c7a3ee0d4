//! The seam between job/stream orchestration and the recognition engine.
//!
//! The engine is an external collaborator as far as the orchestration core is
//! concerned: jobs and streaming sessions only ever see this trait. That
//! keeps the executor testable with stub recognizers and leaves the engine
//! implementation swappable.

use async_trait::async_trait;

/// Converts canonical audio into text.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Transcribe one buffer of canonical audio (mono, 16 kHz, f32 samples
    /// in [-1.0, 1.0]) into text. An empty or whitespace-only string is a
    /// valid result for silent audio.
    async fn transcribe(&self, samples: &[f32]) -> anyhow::Result<String>;
}
