use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use crate::error::Result;

/// One fixed-size capture window (mono f32 in [-1, 1])
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Captured samples, interleaved if `channels > 1`
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    pub fn duration_secs(&self) -> f64 {
        let frames = self.samples.len() / self.channels.max(1) as usize;
        frames as f64 / self.sample_rate.max(1) as f64
    }
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate (will resample if needed)
    pub target_sample_rate: u32,
    /// Target channel count (1 = mono)
    pub target_channels: u16,
    /// Samples per emitted frame
    pub frame_size: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000, // Live API input rate
            target_channels: 1,        // Mono
            frame_size: 4096,          // ~256ms at 16kHz
        }
    }
}

impl AudioBackendConfig {
    /// Playback length of one frame; never zero, even for tiny frames
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(
            self.frame_size.max(1) as f64 / self.target_sample_rate.max(1) as f64,
        )
    }

    pub fn frame_duration_ms(&self) -> u64 {
        (self.frame_size as u64 * 1000) / self.target_sample_rate.max(1) as u64
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - Microphone: cpal default input device
/// - File: WAV file paced in real time (headless runs and tests)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio and release the device
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create the capture backend for the given source
    pub fn create(source: AudioSource, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        info!("Creating audio backend: {:?}", source);

        match source {
            AudioSource::Microphone => {
                use super::microphone::MicrophoneBackend;
                Ok(Box::new(MicrophoneBackend::new(config)))
            }

            AudioSource::File(path) => {
                use super::file::FileBackend;
                Ok(Box::new(FileBackend::new(path, config)))
            }
        }
    }
}

/// Audio source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Microphone input (default device)
    Microphone,
    /// File input (for testing/headless runs)
    File(String),
}
