use std::path::Path;

use hound::{SampleFormat, WavReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::convert::{resample_linear, to_mono};
use crate::error::{Result, TutorError};

/// A WAV file decoded to mono f32 samples at its native rate
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).map_err(|e| {
            TutorError::Permission(format!("failed to open WAV file {}: {e}", path.display()))
        })?;

        let spec = reader.spec();
        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>(),
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()
            }
        }
        .map_err(|e| TutorError::Format(format!("failed to read audio samples: {e}")))?;

        let samples = to_mono(&interleaved, spec.channels);
        let duration_seconds = samples.len() as f64 / spec.sample_rate.max(1) as f64;

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Samples resampled to `target_rate`
    pub fn resampled(&self, target_rate: u32) -> Vec<f32> {
        resample_linear(&self.samples, self.sample_rate, target_rate)
    }
}

/// Streams a WAV file as if it were a microphone
pub struct FileBackend {
    path: String,
    config: AudioBackendConfig,
    /// Pace frames at their playback duration
    realtime: bool,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn new(path: String, config: AudioBackendConfig) -> Self {
        Self {
            path,
            config,
            realtime: true,
            cancel: None,
            task: None,
        }
    }

    /// Emit all frames as fast as the consumer accepts them
    pub fn unpaced(mut self) -> Self {
        self.realtime = false;
        self
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.task.is_some() {
            return Err(TutorError::Permission("file backend already capturing".into()));
        }

        let file = AudioFile::open(&self.path)?;
        let samples = file.resampled(self.config.target_sample_rate);
        let frame_size = self.config.frame_size.max(1);
        let sample_rate = self.config.target_sample_rate;
        let pace = self.realtime.then(|| self.config.frame_duration());

        let (tx, rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut interval = pace.map(tokio::time::interval);

            for (index, chunk) in samples.chunks(frame_size).enumerate() {
                if let Some(interval) = interval.as_mut() {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = interval.tick() => {}
                    }
                } else if token.is_cancelled() {
                    break;
                }

                let mut frame_samples = chunk.to_vec();
                frame_samples.resize(frame_size, 0.0);

                let frame = AudioFrame {
                    samples: frame_samples,
                    sample_rate,
                    channels: 1,
                    timestamp_ms: (index * frame_size) as u64 * 1000 / sample_rate.max(1) as u64,
                };

                if tx.send(frame).await.is_err() {
                    break;
                }
            }

            debug!("File capture finished");
        });

        self.cancel = Some(cancel);
        self.task = Some(task);

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}
