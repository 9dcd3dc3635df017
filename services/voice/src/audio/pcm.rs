//! PCM16 transport codec.
//!
//! The wire carries little-endian 16-bit PCM as base64 text in both
//! directions. Encoding scales normalized f32 samples by 32767 with
//! rounding; decoding is the inverse and performs no resampling. Malformed
//! or truncated input is an error scoped to that one frame; the session
//! drops the frame and continues.

use crate::error::VoiceError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Encodes normalized f32 samples as base64 little-endian PCM16.
///
/// Samples outside [-1, 1] are clamped at the i16 range.
pub fn encode(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let scaled = (sample * 32767.0)
            .round()
            .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        bytes.extend_from_slice(&scaled.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// Decodes base64 PCM16 into raw i16 samples.
pub fn decode(data: &str) -> Result<Vec<i16>, VoiceError> {
    let bytes = STANDARD
        .decode(data)
        .map_err(|err| VoiceError::Decode(err.to_string()))?;
    if bytes.len() % 2 != 0 {
        return Err(VoiceError::Decode(format!(
            "truncated frame: {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// A decoded, immutable audio buffer ready for scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl PlaybackBuffer {
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

/// Decodes wire bytes into a normalized buffer at the given rate/layout.
pub fn decode_playback(
    data: &str,
    sample_rate: u32,
    channels: u16,
) -> Result<PlaybackBuffer, VoiceError> {
    let samples = decode(data)?
        .into_iter()
        .map(|value| (value as f32 / 32768.0).clamp(-1.0, 1.0))
        .collect();
    Ok(PlaybackBuffer {
        samples,
        sample_rate,
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn encode_decode_round_trips_within_one_quantization_step() {
        let original = vec![0.0f32, 0.5, -0.5, 0.99, -0.99, 0.125];
        let decoded = decode(&encode(&original)).unwrap();
        assert_eq!(decoded.len(), original.len());
        for (sample, value) in original.iter().zip(&decoded) {
            let expected = (sample * 32767.0).round() as i16;
            assert!((expected - value).abs() <= 1, "{sample} -> {value}");
        }
    }

    #[test]
    fn encode_clamps_out_of_range_samples() {
        let decoded = decode(&encode(&[2.0, -2.0, f32::INFINITY, f32::NEG_INFINITY])).unwrap();
        assert_eq!(decoded[0], i16::MAX);
        assert_eq!(decoded[1], i16::MIN);
        assert_eq!(decoded[2], i16::MAX);
        assert_eq!(decoded[3], i16::MIN);
    }

    #[test]
    fn known_values_decode_exactly() {
        // 16384 little-endian is [0x00, 0x40]; -32768 is [0x00, 0x80].
        let data = STANDARD.encode([0x00u8, 0x40, 0x00, 0x80]);
        assert_eq!(decode(&data).unwrap(), vec![16384, -32768]);
    }

    #[test]
    fn malformed_base64_is_a_decode_error() {
        let err = decode("not base64!").unwrap_err();
        assert!(matches!(err, VoiceError::Decode(_)));
    }

    #[test]
    fn odd_byte_count_is_a_truncated_frame() {
        let data = STANDARD.encode([0x00u8, 0x40, 0x7f]);
        match decode(&data) {
            Err(VoiceError::Decode(message)) => assert!(message.contains("truncated")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn playback_buffer_normalizes_and_reports_duration() {
        let data = STANDARD.encode([0x00u8, 0x40, 0x00, 0x80]);
        let buffer = decode_playback(&data, 24_000, 1).unwrap();
        assert_eq!(buffer.sample_rate(), 24_000);
        assert_eq!(buffer.channels(), 1);
        assert_abs_diff_eq!(buffer.samples()[0], 0.5, epsilon = 1e-4);
        assert_abs_diff_eq!(buffer.samples()[1], -1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(buffer.duration(), 2.0 / 24_000.0, epsilon = 1e-9);
    }

    #[test]
    fn stereo_duration_counts_frames_not_samples() {
        let data = STANDARD.encode([0u8; 8]); // four samples, two frames of stereo
        let buffer = decode_playback(&data, 24_000, 2).unwrap();
        assert_abs_diff_eq!(buffer.duration(), 2.0 / 24_000.0, epsilon = 1e-9);
    }

    #[test]
    fn empty_input_round_trips() {
        assert!(decode(&encode(&[])).unwrap().is_empty());
    }
}
