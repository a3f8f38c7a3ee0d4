//! # Transcription Module
//!
//! Speech-to-text via Whisper models running on the Candle-rs framework -
//! a pure Rust inference path with no FFI into whisper.cpp.
//!
//! ## Key Components:
//! - **SpeechRecognizer**: the trait seam the executor and streaming handler
//!   program against (tests substitute stubs here)
//! - **TranscriptionEngine**: the one shared engine instance; loads a model
//!   at startup and serializes inference behind a write lock
//! - **WhisperModel**: weight fetching (HuggingFace hub), mel spectrogram
//!   preparation and greedy token decoding
//!
//! ## Model Sizes:
//! `tiny` (~39 MB) through `large` (~1.5 GB); selected by config. Smaller
//! models trade accuracy for load time and inference speed.

pub mod engine;
pub mod model;
pub mod recognizer;

pub use engine::TranscriptionEngine;
pub use recognizer::SpeechRecognizer;
