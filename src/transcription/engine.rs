//! # Transcription Engine
//!
//! The single shared recognition engine. One instance serves every
//! background job and streaming session in the process.
//!
//! ## Concurrency:
//! The underlying Whisper decoder keeps a KV cache across forward passes, so
//! it is not safe to run two clips through it at once. `transcribe` takes the
//! model's write lock for the duration of inference, which serializes access
//! for all callers. Jobs queue on the lock; the executor's semaphore keeps
//! that queue short.

use crate::config::AppConfig;
use crate::transcription::model::{ModelSize, WhisperModel};
use crate::transcription::recognizer::SpeechRecognizer;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use candle_core::Device;
use tokio::sync::RwLock;

pub struct TranscriptionEngine {
    /// Loaded model, if startup loading succeeded. Write access serializes
    /// inference.
    model: RwLock<Option<WhisperModel>>,

    model_size: ModelSize,
    language: String,
    device: Device,

    /// Upper bound on clip length, in samples at the canonical rate.
    max_clip_samples: usize,
}

impl TranscriptionEngine {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let model_size: ModelSize = config.models.whisper_model.parse()?;

        Ok(Self {
            model: RwLock::new(None),
            model_size,
            language: config.models.language.clone(),
            device: Device::Cpu,
            max_clip_samples: config.audio.sample_rate as usize
                * config.audio.max_clip_seconds as usize,
        })
    }

    /// Fetch and install the configured model.
    ///
    /// Called once at startup. A failure leaves the engine unloaded; jobs
    /// then fail with a descriptive message instead of taking the service
    /// down.
    pub async fn load(&self) -> Result<()> {
        let loaded = WhisperModel::fetch(self.model_size, self.device.clone()).await?;
        *self.model.write().await = Some(loaded);
        Ok(())
    }

    pub async fn is_loaded(&self) -> bool {
        self.model.read().await.is_some()
    }

    pub fn model_size(&self) -> ModelSize {
        self.model_size
    }
}

#[async_trait]
impl SpeechRecognizer for TranscriptionEngine {
    async fn transcribe(&self, samples: &[f32]) -> Result<String> {
        if samples.is_empty() {
            return Err(anyhow!("audio is empty after normalization"));
        }

        if samples.len() > self.max_clip_samples {
            return Err(anyhow!(
                "audio is {:.1}s long, the configured limit is {:.1}s",
                samples.len() as f64 / 16_000.0,
                self.max_clip_samples as f64 / 16_000.0
            ));
        }

        let mut guard = self.model.write().await;
        let model = guard
            .as_mut()
            .ok_or_else(|| anyhow!("no recognition model is loaded"))?;

        let started = std::time::Instant::now();
        let text = model.transcribe(samples, &self.language)?;

        tracing::debug!(
            "Transcribed {:.2}s of audio in {:.2}s: {} chars",
            samples.len() as f64 / 16_000.0,
            started.elapsed().as_secs_f64(),
            text.len()
        );

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> TranscriptionEngine {
        TranscriptionEngine::new(&AppConfig::default()).unwrap()
    }

    #[test]
    fn test_rejects_unknown_model_name() {
        let mut config = AppConfig::default();
        config.models.whisper_model = "colossal".to_string();
        assert!(TranscriptionEngine::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_empty_audio_is_rejected() {
        let err = engine().transcribe(&[]).await.unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[tokio::test]
    async fn test_overlong_audio_is_rejected() {
        let mut config = AppConfig::default();
        config.audio.max_clip_seconds = 1;
        let engine = TranscriptionEngine::new(&config).unwrap();

        let two_seconds = vec![0.0_f32; 32_000];
        let err = engine.transcribe(&two_seconds).await.unwrap_err();
        assert!(err.to_string().contains("limit"));
    }

    #[tokio::test]
    async fn test_unloaded_engine_reports_missing_model() {
        let engine = engine();
        assert!(!engine.is_loaded().await);

        let err = engine.transcribe(&[0.0; 16_000]).await.unwrap_err();
        assert!(err.to_string().contains("no recognition model"));
    }
}
