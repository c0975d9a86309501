//! Raw PCM16 interpretation.
//!
//! The live session streams signed 16-bit little-endian PCM. Inbound payloads
//! are interpreted here into normalized f32 planes that the playback scheduler
//! can submit to the output sink; outbound captured frames take the reverse
//! path before the transport codec.

use bytes::Bytes;

use crate::error::{EmoBotError, Result};

/// One inbound message's audio payload plus its MIME-style descriptor,
/// e.g. `audio/pcm;rate=24000`. Consumed immediately on receipt.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub data: Bytes,
    pub mime_type: String,
}

impl AudioChunk {
    pub fn new(data: Bytes, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
        }
    }
}

/// De-interleaved normalized audio, one `Vec<f32>` plane per channel.
///
/// Samples are in [-1.0, 1.0]. The scheduler owns a buffer from creation
/// until it has been submitted to the output sink.
#[derive(Debug, Clone)]
pub struct DecodedBuffer {
    planes: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl DecodedBuffer {
    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.planes.first().map_or(0, Vec::len)
    }

    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn plane(&self, channel: usize) -> &[f32] {
        &self.planes[channel]
    }

    /// Playback duration in seconds, derived from frame count and rate.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Re-interleave the planes into i16 samples for a hardware sink.
    pub fn to_interleaved_i16(&self) -> Vec<i16> {
        let frames = self.frames();
        let channels = self.channels();
        let mut out = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            for plane in &self.planes {
                let s = (plane[i] * 32768.0).clamp(-32768.0, 32767.0);
                out.push(s as i16);
            }
        }
        out
    }
}

/// Decode interleaved PCM16LE bytes into per-channel normalized planes.
///
/// The byte length must be a whole number of frames (`2 * channels` bytes
/// each); a truncated trailing frame is rejected rather than dropped, so a
/// transport bug surfaces instead of shifting every later sample. Zero-length
/// input is valid and yields an empty zero-duration buffer.
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<DecodedBuffer> {
    let frame_bytes = 2 * channels as usize;
    if channels == 0 || bytes.len() % frame_bytes != 0 {
        return Err(EmoBotError::MalformedAudio {
            len: bytes.len(),
            channels,
        });
    }

    let frames = bytes.len() / frame_bytes;
    let mut planes: Vec<Vec<f32>> = (0..channels)
        .map(|_| Vec::with_capacity(frames))
        .collect();
    for (i, sample) in bytes.chunks_exact(2).enumerate() {
        let value = i16::from_le_bytes([sample[0], sample[1]]);
        planes[i % channels as usize].push(value as f32 / 32768.0);
    }

    Ok(DecodedBuffer {
        planes,
        sample_rate,
    })
}

/// Encode normalized mono samples as interleaved PCM16LE bytes.
///
/// Used on the capture path before the transport codec.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let value = (s * 32768.0).clamp(-32768.0, 32767.0) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_a_zero_duration_buffer() {
        let buf = decode_pcm16(&[], 24000, 1).unwrap();
        assert_eq!(buf.frames(), 0);
        assert_eq!(buf.channels(), 1);
        assert_eq!(buf.duration(), 0.0);
    }

    #[test]
    fn full_scale_negative_maps_to_minus_one() {
        // i16::MIN little-endian
        let buf = decode_pcm16(&[0x00, 0x80], 24000, 1).unwrap();
        assert_eq!(buf.plane(0), &[-1.0]);
    }

    #[test]
    fn zero_bytes_decode_to_silence() {
        let buf = decode_pcm16(&[0u8; 8], 24000, 1).unwrap();
        assert!(buf.plane(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn positive_full_scale_stays_below_one() {
        // i16::MAX scales to 32767/32768, just under 1.0.
        let buf = decode_pcm16(&[0xff, 0x7f], 24000, 1).unwrap();
        let s = buf.plane(0)[0];
        assert!(s > 0.9999 && s < 1.0);
    }

    #[test]
    fn rejects_partial_trailing_frame() {
        assert!(matches!(
            decode_pcm16(&[0, 0, 0], 24000, 1),
            Err(EmoBotError::MalformedAudio { len: 3, channels: 1 })
        ));
        // 6 bytes is 1.5 stereo frames
        assert!(matches!(
            decode_pcm16(&[0; 6], 24000, 2),
            Err(EmoBotError::MalformedAudio { len: 6, channels: 2 })
        ));
    }

    #[test]
    fn rejects_zero_channels() {
        assert!(decode_pcm16(&[], 24000, 0).is_err());
    }

    #[test]
    fn stereo_is_deinterleaved() {
        // L=1000, R=-1000, L=2000, R=-2000
        let mut bytes = Vec::new();
        for v in [1000i16, -1000, 2000, -2000] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let buf = decode_pcm16(&bytes, 48000, 2).unwrap();
        assert_eq!(buf.frames(), 2);
        assert_eq!(buf.plane(0), &[1000.0 / 32768.0, 2000.0 / 32768.0]);
        assert_eq!(buf.plane(1), &[-1000.0 / 32768.0, -2000.0 / 32768.0]);
    }

    #[test]
    fn duration_follows_sample_count() {
        let bytes = vec![0u8; 24000 * 2];
        let buf = decode_pcm16(&bytes, 24000, 1).unwrap();
        assert_eq!(buf.duration(), 1.0);
    }

    #[test]
    fn capture_encoding_is_pcm16le() {
        let bytes = encode_pcm16(&[-1.0, 0.0]);
        assert_eq!(bytes, vec![0x00, 0x80, 0x00, 0x00]);
    }
}
