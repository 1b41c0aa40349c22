//! Conversions between the wire audio format (base64 of signed 16-bit
//! little-endian PCM) and in-memory samples.

use crate::error::AudioError;
use base64::Engine;

/// Encodes i16 samples as base64 little-endian PCM16.
pub fn encode_i16(pcm16: &[i16]) -> String {
    let pcm16_bytes: Vec<u8> = pcm16
        .iter()
        .flat_map(|&sample| sample.to_le_bytes())
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&pcm16_bytes)
}

/// Decodes a base64 PCM16 payload into samples.
///
/// A trailing odd byte cannot form a sample and is ignored.
pub fn decode_i16(base64_fragment: &str) -> Result<Vec<i16>, AudioError> {
    let pcm16_bytes = base64::engine::general_purpose::STANDARD.decode(base64_fragment)?;
    if pcm16_bytes.len() % 2 != 0 {
        tracing::debug!(
            bytes = pcm16_bytes.len(),
            "Audio payload has an odd byte count; dropping the last byte."
        );
    }
    Ok(pcm16_bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect())
}

/// Converts one normalized f32 sample to i16, clamping out-of-range input.
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Converts one i16 sample to a normalized f32 in `[-1.0, 1.0)`.
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}
