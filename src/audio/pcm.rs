//! 16-bit PCM wire codec.
//!
//! The Live API takes and returns raw little-endian PCM wrapped in base64,
//! so there is no container to negotiate: outbound audio is 16kHz mono,
//! inbound speech is 24kHz mono.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};

/// Base64 binary payload tagged with its MIME type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: String,
}

pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Clamp, scale and pack samples as 16-bit little-endian PCM.
pub fn encode_pcm(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| float_to_i16(s).to_le_bytes())
        .collect()
}

/// Encode a capture window into a wire blob.
pub fn encode_pcm_blob(samples: &[f32], sample_rate: u32) -> MediaBlob {
    MediaBlob {
        mime_type: pcm_mime_type(sample_rate),
        data: base64::engine::general_purpose::STANDARD.encode(encode_pcm(samples)),
    }
}

fn float_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * 32768.0)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub fn decode_base64(payload: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| TutorError::Format(format!("invalid base64 audio payload: {e}")))
}

/// Decoded audio ready for scheduling, one `Vec` per channel
#[derive(Debug, Clone, PartialEq)]
pub struct PlayableBuffer {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl PlayableBuffer {
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: vec![samples],
        }
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Interpret raw bytes as interleaved 16-bit signed LE PCM.
///
/// A trailing partial frame is ignored.
pub fn decode_audio_data(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<PlayableBuffer> {
    if sample_rate == 0 || channels == 0 {
        return Err(TutorError::Format(format!(
            "invalid PCM format: {}Hz, {} channels",
            sample_rate, channels
        )));
    }

    let channel_count = channels as usize;
    let frame_bytes = 2 * channel_count;
    let frames = bytes.len() / frame_bytes;

    let mut data = vec![Vec::with_capacity(frames); channel_count];
    for frame in bytes.chunks_exact(frame_bytes) {
        for (ch, sample) in frame.chunks_exact(2).enumerate() {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            data[ch].push(value as f32 / 32768.0);
        }
    }

    Ok(PlayableBuffer {
        sample_rate,
        channels: data,
    })
}
