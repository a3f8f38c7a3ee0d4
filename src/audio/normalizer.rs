//! # Audio Normalizer
//!
//! Produces the canonical sample sequence (mono, 16 kHz, f32 in [-1.0, 1.0])
//! from whatever a caller supplies. The recognition engine accepts nothing
//! else, so every input path funnels through here before inference.
//!
//! ## Conversion Steps:
//! 1. **Decode**: parse the WAV container (integer or float PCM, any bit
//!    depth hound supports, any rate, any channel count)
//! 2. **Downmix**: average interleaved channels into one
//! 3. **Resample**: sinc interpolation to 16 kHz when the source rate differs
//! 4. **Clamp**: keep samples inside [-1.0, 1.0]
//!
//! Anything that fails to parse is a `Decode` error; the job boundary turns
//! that into a `failed` status with the message preserved.

use crate::error::{AppError, AppResult};
use byteorder::{LittleEndian, ReadBytesExt};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::io::Cursor;
use std::path::Path;

/// The only sample rate the recognition engine accepts.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Resampler input block size.
const RESAMPLE_CHUNK: usize = 1024;

/// Decode a WAV payload held in memory into canonical samples.
pub fn wav_bytes_to_mono_16k(data: &[u8]) -> AppResult<Vec<f32>> {
    let reader = hound::WavReader::new(Cursor::new(data))
        .map_err(|e| AppError::Decode(format!("input is not parseable WAV audio: {}", e)))?;
    decode_reader(reader)
}

/// Decode a WAV file on disk into canonical samples.
pub fn file_to_mono_16k(path: &Path) -> AppResult<Vec<f32>> {
    let reader = hound::WavReader::open(path).map_err(|e| {
        AppError::Decode(format!(
            "'{}' is not parseable WAV audio: {}",
            path.display(),
            e
        ))
    })?;
    decode_reader(reader)
}

/// Parse a streaming chunk of raw little-endian f32 frames.
///
/// Streaming clients are contractually required to send canonical audio, so
/// no downmix or resampling happens here; the chunk only has to be a whole
/// number of 32-bit samples. Non-finite values are silenced to keep NaNs out
/// of the engine.
pub fn chunk_to_samples(data: &[u8]) -> AppResult<Vec<f32>> {
    if data.is_empty() {
        return Err(AppError::Decode("audio chunk is empty".to_string()));
    }
    if data.len() % 4 != 0 {
        return Err(AppError::Decode(format!(
            "chunk of {} bytes is not a whole number of 32-bit float samples",
            data.len()
        )));
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 4);
    while let Ok(sample) = cursor.read_f32::<LittleEndian>() {
        if sample.is_finite() {
            samples.push(sample.clamp(-1.0, 1.0));
        } else {
            samples.push(0.0);
        }
    }

    Ok(samples)
}

fn decode_reader<R: std::io::Read>(reader: hound::WavReader<R>) -> AppResult<Vec<f32>> {
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(AppError::Decode("WAV header reports zero channels".to_string()));
    }
    let channels = spec.channels as usize;

    // Scale everything to float in [-1, 1]; unreadable frames become silence.
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_value = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.unwrap_or(0) as f32 / max_value)
                .collect()
        }
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.unwrap_or(0.0))
            .collect(),
    };

    let mono = downmix(&samples, channels);

    let mut canonical = if spec.sample_rate == TARGET_SAMPLE_RATE {
        mono
    } else {
        resample_to_target(&mono, spec.sample_rate)?
    };

    for sample in &mut canonical {
        *sample = sample.clamp(-1.0, 1.0);
    }

    Ok(canonical)
}

/// Average interleaved frames down to a single channel.
fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resample mono audio from `src_rate` Hz to the canonical rate using sinc
/// interpolation.
fn resample_to_target(samples: &[f32], src_rate: u32) -> AppResult<Vec<f32>> {
    if src_rate == 0 {
        return Err(AppError::Decode("WAV header reports a zero sample rate".to_string()));
    }

    let ratio = TARGET_SAMPLE_RATE as f64 / src_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| AppError::Decode(format!("failed to build resampler: {}", e)))?;

    let mut output = Vec::with_capacity((samples.len() as f64 * ratio) as usize + RESAMPLE_CHUNK);

    let mut chunks = samples.chunks_exact(RESAMPLE_CHUNK);
    for chunk in &mut chunks {
        let mut resampled = resampler
            .process(&[chunk], None)
            .map_err(|e| AppError::Decode(format!("resampling failed: {}", e)))?;
        output.append(&mut resampled[0]);
    }

    let remainder = chunks.remainder();
    if !remainder.is_empty() {
        let frames = [remainder];
        let mut resampled = resampler
            .process_partial(Some(&frames[..]), None)
            .map_err(|e| AppError::Decode(format!("resampling failed: {}", e)))?;
        output.append(&mut resampled[0]);
    }

    // Drain the resampler's internal delay line.
    let mut tail = resampler
        .process_partial::<&[f32]>(None, None)
        .map_err(|e| AppError::Decode(format!("resampling failed: {}", e)))?;
    output.append(&mut tail[0]);

    Ok(output)
}
