//! # Whisper Model
//!
//! Loading and running Whisper checkpoints with Candle-rs.
//!
//! ## Loading Process:
//! 1. Fetch config, tokenizer and safetensors weights from HuggingFace
//!    (cached locally by hf-hub)
//! 2. Build the mel filter bank for the checkpoint's mel bin count
//! 3. Memory-map the weights and construct the model on the target device
//!
//! ## Inference:
//! PCM → log-mel spectrogram → encoder → greedy token-by-token decode until
//! the end-of-text token. Decoding is deterministic; no temperature
//! sampling.

use anyhow::{anyhow, Result};
use candle_core::{Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, audio, Config};
use tokenizers::Tokenizer;

/// Longest token sequence one clip may decode to.
const MAX_DECODE_TOKENS: usize = 448;

/// FFT bin count for Whisper's 400-point STFT (1 + n_fft / 2).
const N_FREQS: usize = 201;

/// Available Whisper checkpoint sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// HuggingFace repository holding this checkpoint.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v2",
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!(
                "unknown model size '{}' (expected tiny/base/small/medium/large)",
                s
            )),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// A loaded Whisper checkpoint ready for inference.
///
/// `transcribe` takes `&mut self`: the decoder carries a KV cache between
/// forward passes, so one clip must finish before the next may start. The
/// engine enforces that with a write lock.
pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    tokenizer: Tokenizer,
    device: Device,
    mel_filters: Vec<f32>,
}

impl WhisperModel {
    /// Fetch and load a checkpoint from HuggingFace (cached across runs).
    pub async fn fetch(size: ModelSize, device: Device) -> Result<Self> {
        tracing::info!("Loading Whisper {} model from {}", size, size.repo_name());
        let started = std::time::Instant::now();

        let mut builder = hf_hub::api::tokio::ApiBuilder::new().with_progress(false);
        if let Ok(token) = std::env::var("HF_TOKEN") {
            builder = builder.with_token(Some(token));
        }
        let api = builder
            .build()
            .map_err(|e| anyhow!("failed to initialize HuggingFace API client: {}", e))?;
        let repo = api.model(size.repo_name().to_string());

        let config_path = repo
            .get("config.json")
            .await
            .map_err(|e| anyhow!("failed to fetch config.json from {}: {}", size.repo_name(), e))?;
        let tokenizer_path = repo.get("tokenizer.json").await.map_err(|e| {
            anyhow!(
                "failed to fetch tokenizer.json from {}: {}",
                size.repo_name(),
                e
            )
        })?;
        let weights_path = repo.get("model.safetensors").await.map_err(|e| {
            anyhow!(
                "failed to fetch model.safetensors from {}: {}",
                size.repo_name(),
                e
            )
        })?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_path)?)?;
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow!("failed to load tokenizer: {}", e))?;
        let mel_filters = mel_filter_bank(config.num_mel_bins as usize);

        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        tracing::info!(
            "Whisper {} model loaded in {:.2}s",
            size,
            started.elapsed().as_secs_f64()
        );

        Ok(Self {
            model,
            config,
            tokenizer,
            device,
            mel_filters,
        })
    }

    /// Transcribe canonical audio into text.
    ///
    /// The clip is padded or truncated to Whisper's 30-second window by the
    /// spectrogram helper; callers wanting longer audio handled must bound it
    /// upstream.
    pub fn transcribe(&mut self, samples: &[f32], language: &str) -> Result<String> {
        if samples.is_empty() {
            return Err(anyhow!("audio buffer is empty"));
        }

        let mel = audio::pcm_to_mel(&self.config, samples, &self.mel_filters);
        let mel_len = mel.len();
        let n_mels = self.config.num_mel_bins as usize;
        let mel = Tensor::from_vec(mel, (1, n_mels, mel_len / n_mels), &self.device)?;

        let features = self.model.encoder.forward(&mel, true)?;

        // Prompt: start-of-transcript, language hint if the tokenizer knows
        // it, transcribe task, no timestamps.
        let mut tokens = vec![self.token(m::SOT_TOKEN)?];
        if let Some(lang) = self.tokenizer.token_to_id(&format!("<|{}|>", language)) {
            tokens.push(lang);
        }
        tokens.push(self.token(m::TRANSCRIBE_TOKEN)?);
        tokens.push(self.token(m::NO_TIMESTAMPS_TOKEN)?);
        let end_of_text = self.token(m::EOT_TOKEN)?;

        let mut text_tokens = Vec::new();
        for step in 0..MAX_DECODE_TOKENS {
            let input = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            // flush=true on the first step resets the decoder's KV cache from
            // the previous clip.
            let hidden = self.model.decoder.forward(&input, &features, step == 0)?;
            let (_, seq_len, _) = hidden.dims3()?;
            let logits = self
                .model
                .decoder
                .final_linear(&hidden.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;

            let next = argmax(&logits.to_vec1::<f32>()?);
            if next == end_of_text {
                break;
            }
            tokens.push(next);
            text_tokens.push(next);
        }

        let text = self
            .tokenizer
            .decode(&text_tokens, true)
            .map_err(|e| anyhow!("tokenizer decode failed: {}", e))?;

        Ok(text.trim().to_string())
    }

    fn token(&self, name: &str) -> Result<u32> {
        self.tokenizer
            .token_to_id(name)
            .ok_or_else(|| anyhow!("tokenizer is missing the {} token", name))
    }
}

/// Index of the largest logit.
fn argmax(logits: &[f32]) -> u32 {
    logits
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(index, _)| index as u32)
        .unwrap_or(0)
}

/// Triangular mel filter bank for Whisper's 400-point STFT, laid out as
/// `n_mels` rows of `N_FREQS` weights.
fn mel_filter_bank(n_mels: usize) -> Vec<f32> {
    let f_max = 8_000.0_f32; // Nyquist at 16 kHz
    let mel_max = hz_to_mel(f_max);

    // n_mels + 2 edge frequencies evenly spaced on the mel scale.
    let edges: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();

    let mut filters = vec![0.0_f32; n_mels * N_FREQS];
    for mel_row in 0..n_mels {
        let (f_lo, f_center, f_hi) = (edges[mel_row], edges[mel_row + 1], edges[mel_row + 2]);
        for bin in 0..N_FREQS {
            let freq = bin as f32 * f_max / (N_FREQS - 1) as f32;
            let weight = if freq <= f_center {
                (freq - f_lo) / (f_center - f_lo).max(f32::EPSILON)
            } else {
                (f_hi - freq) / (f_hi - f_center).max(f32::EPSILON)
            };
            filters[mel_row * N_FREQS + bin] = weight.clamp(0.0, 1.0);
        }
    }

    filters
}

fn hz_to_mel(freq: f32) -> f32 {
    2595.0 * (1.0 + freq / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_size_parsing() {
        assert_eq!("tiny".parse::<ModelSize>().unwrap(), ModelSize::Tiny);
        assert_eq!("MEDIUM".parse::<ModelSize>().unwrap(), ModelSize::Medium);
        assert!("gigantic".parse::<ModelSize>().is_err());
    }

    #[test]
    fn test_model_size_display_roundtrip() {
        for size in [
            ModelSize::Tiny,
            ModelSize::Base,
            ModelSize::Small,
            ModelSize::Medium,
            ModelSize::Large,
        ] {
            assert_eq!(size.to_string().parse::<ModelSize>().unwrap(), size);
        }
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 3.0, -2.0, 2.9]), 1);
        assert_eq!(argmax(&[-5.0]), 0);
        assert_eq!(argmax(&[]), 0);
    }

    #[test]
    fn test_mel_filter_bank_shape_and_range() {
        let n_mels = 80;
        let filters = mel_filter_bank(n_mels);

        assert_eq!(filters.len(), n_mels * N_FREQS);
        assert!(filters.iter().all(|w| (0.0..=1.0).contains(w)));
        assert!(filters.iter().all(|w| w.is_finite()));

        // Every filter must respond to some frequency band.
        for row in 0..n_mels {
            let row_sum: f32 = filters[row * N_FREQS..(row + 1) * N_FREQS].iter().sum();
            assert!(row_sum > 0.0, "mel filter {} is all zeros", row);
        }
    }

    #[test]
    fn test_mel_scale_conversions_invert() {
        for freq in [100.0_f32, 440.0, 1_000.0, 7_999.0] {
            let roundtrip = mel_to_hz(hz_to_mel(freq));
            assert!((roundtrip - freq).abs() < 0.5, "{} became {}", freq, roundtrip);
        }
    }
}
