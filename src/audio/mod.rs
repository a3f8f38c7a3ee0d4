//! # Audio Module
//!
//! Conversion of arbitrary input audio into the canonical format the
//! recognition engine accepts: mono, 16 kHz, 32-bit float samples in
//! [-1.0, 1.0].
//!
//! ## Input Paths:
//! - **WAV payloads/files** (uploads, retrieved media): decoded, down-mixed
//!   and resampled by the normalizer
//! - **Streaming chunks**: already canonical by protocol contract; parsed as
//!   raw little-endian f32 frames

pub mod normalizer;
