// Gap-free playback of streamed speech
//
// Inbound chunks are appended to a single timeline at
// max(next_start, now). The output device pulls from the timeline, which
// mixes whatever overlaps the rendered window and drops buffers once they
// have fully played.

use std::collections::BTreeMap;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::convert::{resample_linear, StreamResampler};
use super::pcm::PlayableBuffer;
use crate::error::{Result, TutorError};

/// Timeline shared between the network task (adds) and the output callback (removes)
pub type SharedTimeline = Arc<Mutex<PlaybackTimeline>>;

#[derive(Debug)]
struct ScheduledBuffer {
    start_frame: u64,
    samples: Vec<f32>,
}

impl ScheduledBuffer {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Output clock plus the set of buffers waiting to play
#[derive(Debug)]
pub struct PlaybackTimeline {
    sample_rate: u32,
    /// Frames rendered so far; this is the output clock
    position: u64,
    /// Scheduling cursor, in frames
    next_start: u64,
    next_id: u64,
    scheduled: BTreeMap<u64, ScheduledBuffer>,
}

impl PlaybackTimeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            position: 0,
            next_start: 0,
            next_id: 0,
            scheduled: BTreeMap::new(),
        }
    }

    pub fn shared(sample_rate: u32) -> SharedTimeline {
        Arc::new(Mutex::new(Self::new(sample_rate)))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Switch the clock rate to match the opened device. Drops anything scheduled.
    pub fn reset(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1);
        self.position = 0;
        self.next_start = 0;
        self.scheduled.clear();
    }

    /// Current output clock, in seconds
    pub fn current_time(&self) -> f64 {
        self.position as f64 / self.sample_rate as f64
    }

    /// Where the next chunk will start if it arrives before then, in seconds
    pub fn next_start_time(&self) -> f64 {
        self.next_start as f64 / self.sample_rate as f64
    }

    /// Buffers scheduled but not yet finished
    pub fn active_count(&self) -> usize {
        self.scheduled.len()
    }

    /// Append a buffer right after the previous one (or now, if the
    /// timeline has run dry). Returns the start time in seconds.
    ///
    /// Resamples in place; the session path converts with a [`ChunkPreparer`]
    /// first so the lock is only held for the insert.
    pub fn schedule(&mut self, buffer: PlayableBuffer) -> f64 {
        let mono = mix_to_mono(buffer.channels);
        self.insert(resample_linear(&mono, buffer.sample_rate, self.sample_rate))
    }

    /// Append a chunk already converted to this timeline's format.
    pub fn schedule_prepared(&mut self, chunk: PreparedChunk) -> f64 {
        let samples = if chunk.sample_rate == self.sample_rate {
            chunk.samples
        } else {
            // Device was reopened at another rate after the chunk was prepared
            warn!(
                "Prepared chunk at {}Hz does not match timeline rate {}Hz",
                chunk.sample_rate, self.sample_rate
            );
            resample_linear(&chunk.samples, chunk.sample_rate, self.sample_rate)
        };
        self.insert(samples)
    }

    fn insert(&mut self, samples: Vec<f32>) -> f64 {
        let start_frame = self.next_start.max(self.position);
        self.next_start = start_frame + samples.len() as u64;

        let id = self.next_id;
        self.next_id += 1;

        debug!(
            "Scheduled buffer {} at {:.3}s ({} frames)",
            id,
            start_frame as f64 / self.sample_rate as f64,
            samples.len()
        );

        if !samples.is_empty() {
            self.scheduled.insert(
                id,
                ScheduledBuffer {
                    start_frame,
                    samples,
                },
            );
        }

        start_frame as f64 / self.sample_rate as f64
    }

    /// Fill `out` (interleaved, `channels` wide) and advance the clock.
    pub fn render(&mut self, out: &mut [f32], channels: u16) {
        let channels = channels.max(1) as usize;
        let frames = (out.len() / channels) as u64;
        let window_start = self.position;
        let window_end = window_start + frames;

        out.iter_mut().for_each(|s| *s = 0.0);

        for buffer in self.scheduled.values() {
            let from = buffer.start_frame.max(window_start);
            let to = buffer.end_frame().min(window_end);
            for frame in from..to {
                let sample = buffer.samples[(frame - buffer.start_frame) as usize];
                let base = (frame - window_start) as usize * channels;
                for ch in 0..channels {
                    out[base + ch] += sample;
                }
            }
        }

        self.position = window_end;

        let before = self.scheduled.len();
        self.scheduled.retain(|_, b| b.end_frame() > window_end);
        let finished = before - self.scheduled.len();
        if finished > 0 {
            debug!("{} buffer(s) finished playing", finished);
        }
    }

    /// Advance the clock without producing output.
    pub fn advance(&mut self, frames: u64) {
        let mut scratch = vec![0.0; frames as usize];
        self.render(&mut scratch, 1);
    }

    /// Drop every scheduled buffer immediately. Returns how many were cut.
    pub fn stop_all(&mut self) -> usize {
        let stopped = self.scheduled.len();
        self.scheduled.clear();
        self.next_start = self.position;
        stopped
    }
}

fn mix_to_mono(channels: Vec<Vec<f32>>) -> Vec<f32> {
    match channels.len() {
        0 => Vec::new(),
        1 => channels.into_iter().next().unwrap_or_default(),
        n => {
            let frames = channels[0].len();
            (0..frames)
                .map(|i| channels.iter().map(|c| c[i]).sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Mono samples at a timeline rate, ready to insert
#[derive(Debug, Clone)]
pub struct PreparedChunk {
    sample_rate: u32,
    samples: Vec<f32>,
}

impl PreparedChunk {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.samples.len()
    }

    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate.max(1) as f64
    }
}

/// Converts inbound chunks to the timeline format outside the timeline lock.
///
/// Consecutive chunks are one stream, so resampling state carries over.
#[derive(Debug, Default)]
pub struct ChunkPreparer {
    resampler: Option<StreamResampler>,
}

impl ChunkPreparer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepare(&mut self, buffer: PlayableBuffer, target_rate: u32) -> PreparedChunk {
        let src_rate = buffer.sample_rate;
        let stale = !matches!(
            &self.resampler,
            Some(r) if r.src_rate() == src_rate && r.dst_rate() == target_rate
        );
        if stale {
            self.resampler = Some(StreamResampler::new(src_rate, target_rate));
        }

        let mono = mix_to_mono(buffer.channels);
        let samples = match self.resampler.as_mut() {
            Some(resampler) => resampler.process(&mono),
            None => mono,
        };

        PreparedChunk {
            sample_rate: target_rate,
            samples,
        }
    }

    /// The next chunk does not continue the previous one (interrupted turn).
    pub fn reset(&mut self) {
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }
}

/// Playback device driven by a [`PlaybackTimeline`]
#[async_trait::async_trait]
pub trait AudioOutput: Send + Sync {
    /// Open the device and start pulling from `timeline`
    async fn start(&mut self, timeline: SharedTimeline) -> Result<()>;

    /// Stop the device and release it
    async fn stop(&mut self) -> Result<()>;

    fn name(&self) -> &str;
}

/// Default output device via cpal
pub struct SpeakerOutput {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SpeakerOutput {
    pub fn new() -> Self {
        Self {
            stop_tx: None,
            thread: None,
        }
    }
}

impl Default for SpeakerOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AudioOutput for SpeakerOutput {
    async fn start(&mut self, timeline: SharedTimeline) -> Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("parlez-playback".into())
            .spawn(move || run_playback(timeline, ready_tx, stop_rx))
            .map_err(|e| TutorError::Permission(format!("failed to spawn playback thread: {e}")))?;

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(TutorError::Permission(
                    "playback thread exited before the stream started".into(),
                ))
            }
        }

        self.stop_tx = Some(stop_tx);
        self.thread = Some(thread);

        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => warn!("Playback thread panicked"),
            Err(e) => warn!("Failed to join playback thread: {}", e),
        }

        info!("audio playback stopped");

        Ok(())
    }

    fn name(&self) -> &str {
        "cpal speaker"
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

fn run_playback(
    timeline: SharedTimeline,
    ready_tx: oneshot::Sender<Result<()>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let stream = match open_output_stream(timeline) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(TutorError::Permission(format!(
            "failed to start output stream: {e}"
        ))));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    let _ = stop_rx.recv();
    drop(stream);
}

fn open_output_stream(timeline: SharedTimeline) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| TutorError::Permission("no default output device".into()))?;

    let device_name = device.name().unwrap_or_else(|_| "<unknown>".into());
    info!("using output device: {device_name}");

    let default_config = device
        .default_output_config()
        .map_err(|e| TutorError::Permission(format!("no default output config: {e}")))?;

    let sample_format = default_config.sample_format();
    let stream_config: StreamConfig = default_config.into();

    // Inbound chunks get resampled to the device clock when scheduled
    match timeline.lock() {
        Ok(mut t) => t.reset(stream_config.sample_rate.0),
        Err(e) => {
            return Err(TutorError::Permission(format!(
                "playback timeline lock poisoned: {e}"
            )))
        }
    }

    info!(
        "output config: {}Hz, {} channels, {:?}",
        stream_config.sample_rate.0, stream_config.channels, sample_format
    );

    match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, timeline),
        SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, timeline),
        SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, timeline),
        other => Err(TutorError::Permission(format!(
            "unsupported output sample format: {other:?}"
        ))),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    stream_config: &StreamConfig,
    timeline: SharedTimeline,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = stream_config.channels;
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            stream_config,
            move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                match timeline.lock() {
                    Ok(mut t) => t.render(&mut scratch, channels),
                    Err(_) => scratch.iter_mut().for_each(|s| *s = 0.0),
                }
                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(sample.clamp(-1.0, 1.0));
                }
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| TutorError::Permission(format!("failed to build output stream: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(secs: f64, rate: u32) -> PlayableBuffer {
        PlayableBuffer::mono(vec![0.1; (secs * rate as f64) as usize], rate)
    }

    #[test]
    fn test_back_to_back_chunks_are_gapless() {
        let mut timeline = PlaybackTimeline::new(24000);

        let first = timeline.schedule(chunk(0.5, 24000));
        let second = timeline.schedule(chunk(0.5, 24000));
        let third = timeline.schedule(chunk(0.5, 24000));

        assert_eq!(first, 0.0);
        assert!((second - first - 0.5).abs() < 1e-9);
        assert!((third - first - 1.0).abs() < 1e-9);
        assert_eq!(timeline.active_count(), 3);
    }

    #[test]
    fn test_late_chunk_starts_at_current_time() {
        let mut timeline = PlaybackTimeline::new(1000);

        timeline.schedule(chunk(0.1, 1000));
        timeline.advance(500);

        let start = timeline.schedule(chunk(0.1, 1000));
        assert!((start - 0.5).abs() < 1e-9);
        assert!(timeline.next_start_time() >= timeline.current_time());
    }

    #[test]
    fn test_render_plays_in_order_and_removes_finished() {
        let mut timeline = PlaybackTimeline::new(10);
        timeline.schedule(PlayableBuffer::mono(vec![0.5; 3], 10));
        timeline.schedule(PlayableBuffer::mono(vec![-0.5; 3], 10));

        let mut out = vec![0.0; 4];
        timeline.render(&mut out, 1);
        assert_eq!(out, vec![0.5, 0.5, 0.5, -0.5]);
        assert_eq!(timeline.active_count(), 1);

        let mut out = vec![0.0; 4];
        timeline.render(&mut out, 1);
        assert_eq!(out, vec![-0.5, -0.5, 0.0, 0.0]);
        assert_eq!(timeline.active_count(), 0);
    }

    #[test]
    fn test_render_duplicates_mono_across_channels() {
        let mut timeline = PlaybackTimeline::new(10);
        timeline.schedule(PlayableBuffer::mono(vec![0.25; 2], 10));

        let mut out = vec![0.0; 4];
        timeline.render(&mut out, 2);
        assert_eq!(out, vec![0.25, 0.25, 0.25, 0.25]);
    }

    #[test]
    fn test_stop_all_cuts_playback() {
        let mut timeline = PlaybackTimeline::new(10);
        timeline.schedule(PlayableBuffer::mono(vec![0.5; 10], 10));
        timeline.advance(2);

        assert_eq!(timeline.stop_all(), 1);
        assert_eq!(timeline.active_count(), 0);
        assert_eq!(timeline.next_start_time(), timeline.current_time());

        let mut out = vec![1.0; 4];
        timeline.render(&mut out, 1);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_prepare_runs_while_timeline_is_locked() {
        let timeline = PlaybackTimeline::shared(48000);
        let mut preparer = ChunkPreparer::new();

        // Conversion never touches the timeline, so the output callback can keep it
        let guard = timeline.lock().unwrap();
        let prepared = preparer.prepare(chunk(0.5, 24000), guard.sample_rate());
        drop(guard);

        assert_eq!(prepared.sample_rate(), 48000);
        let frames = prepared.frames() as u64;
        let start = timeline.lock().unwrap().schedule_prepared(prepared);

        assert_eq!(start, 0.0);
        assert_eq!(timeline.lock().unwrap().next_start, frames);
    }

    #[test]
    fn test_prepared_chunks_keep_device_rate_in_step() {
        let mut timeline = PlaybackTimeline::new(44100);
        let mut preparer = ChunkPreparer::new();

        for _ in 0..100 {
            let prepared = preparer.prepare(PlayableBuffer::mono(vec![0.1; 1001], 24000), 44100);
            timeline.schedule_prepared(prepared);
        }

        let exact = 100_100.0 * 44100.0 / 24000.0;
        let scheduled = timeline.next_start as f64;
        assert!((scheduled - exact).abs() <= 3.0, "scheduled {scheduled}, exact {exact:.1}");
    }

    #[test]
    fn test_mismatched_prepared_chunk_is_converted() {
        let mut timeline = PlaybackTimeline::new(48000);
        let mut preparer = ChunkPreparer::new();
        let prepared = preparer.prepare(chunk(0.5, 24000), 24000);

        timeline.schedule_prepared(prepared);
        assert!((timeline.next_start_time() - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_schedule_resamples_to_device_rate() {
        let mut timeline = PlaybackTimeline::new(48000);
        timeline.schedule(chunk(0.5, 24000));
        assert!((timeline.next_start_time() - 0.5).abs() < 1e-3);
    }
}
