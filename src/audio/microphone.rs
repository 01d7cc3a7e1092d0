// Microphone capture backend using cpal
//
// cpal streams are not `Send`, so the stream lives on a dedicated thread
// that owns it until `stop()` is called.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::convert::{to_mono, FrameAssembler, StreamResampler};
use crate::error::{Result, TutorError};

/// Frames buffered between the device thread and the session
const FRAME_QUEUE: usize = 32;

/// Default input device, downmixed and resampled to the target format
pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        info!(
            "Microphone backend initialized ({}Hz, {} channels, {} samples/frame)",
            config.target_sample_rate, config.target_channels, config.frame_size
        );

        Self {
            config,
            stop_tx: None,
            thread: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.thread.is_some() {
            return Err(TutorError::Permission("microphone already capturing".into()));
        }

        info!("Starting microphone capture");

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let config = self.config.clone();

        let thread = std::thread::Builder::new()
            .name("parlez-capture".into())
            .spawn(move || run_capture(config, frame_tx, ready_tx, stop_rx))
            .map_err(|e| TutorError::Permission(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(TutorError::Permission(
                    "capture thread exited before the stream started".into(),
                ))
            }
        }

        self.stop_tx = Some(stop_tx);
        self.thread = Some(thread);

        info!("Microphone capture started successfully");

        Ok(frame_rx)
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        info!("Stopping microphone capture");

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => warn!("Capture thread panicked"),
            Err(e) => warn!("Failed to join capture thread: {}", e),
        }

        info!("Microphone capture stopped");

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

impl Drop for MicrophoneBackend {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

fn run_capture(
    config: AudioBackendConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    ready_tx: oneshot::Sender<Result<()>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let stream = match open_input_stream(&config, frame_tx) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(TutorError::Permission(format!(
            "failed to start input stream: {e}"
        ))));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    // Hold the stream alive until stopped (or the backend is dropped)
    let _ = stop_rx.recv();
    drop(stream);
}

fn open_input_stream(
    config: &AudioBackendConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| TutorError::Permission("no default input device".into()))?;

    let device_name = device.name().unwrap_or_else(|_| "<unknown>".into());
    info!("using input device: {device_name}");

    let default_config = device
        .default_input_config()
        .map_err(|e| TutorError::Permission(format!("no default input config: {e}")))?;

    let sample_format = default_config.sample_format();
    let stream_config: StreamConfig = default_config.into();

    info!(
        "native input config: {}Hz, {} channels, {:?} -> {}Hz mono",
        stream_config.sample_rate.0,
        stream_config.channels,
        sample_format,
        config.target_sample_rate
    );

    match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, config, frame_tx),
        SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, config, frame_tx),
        SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, config, frame_tx),
        other => Err(TutorError::Permission(format!(
            "unsupported input sample format: {other:?}"
        ))),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    stream_config: &StreamConfig,
    config: &AudioBackendConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let native_rate = stream_config.sample_rate.0;
    let native_channels = stream_config.channels;
    let target_rate = config.target_sample_rate;
    let mut resampler = StreamResampler::new(native_rate, target_rate);
    let mut assembler = FrameAssembler::new(config.frame_size);
    let mut emitted: u64 = 0;

    device
        .build_input_stream(
            stream_config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                let floats: Vec<f32> = data.iter().map(|s| s.to_sample::<f32>()).collect();
                let mono = to_mono(&floats, native_channels);
                let samples = resampler.process(&mono);

                for samples in assembler.push(&samples) {
                    let timestamp_ms = emitted * 1000 / target_rate.max(1) as u64;
                    emitted += samples.len() as u64;

                    let frame = AudioFrame {
                        samples,
                        sample_rate: target_rate,
                        channels: 1,
                        timestamp_ms,
                    };
                    // Never block the audio thread
                    if frame_tx.try_send(frame).is_err() {
                        debug!("audio channel full, dropping frame");
                    }
                }
            },
            move |err| {
                error!("audio input stream error: {err}");
            },
            None,
        )
        .map_err(|e| match e {
            BuildStreamError::DeviceNotAvailable => {
                TutorError::Permission("input device not available".into())
            }
            other => TutorError::Permission(format!("failed to build input stream: {other}")),
        })
}
