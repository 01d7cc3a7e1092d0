use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::messages::{rate_from_mime, ClientMessage, ServerMessage, SetupRequest};
use super::stats::{SessionCounters, SessionStats};
use super::transport::{Transport, TransportEvent, TransportHandle, WebSocketTransport};
use crate::audio::{
    decode_audio_data, decode_base64, encode_pcm_blob, AudioBackend, AudioBackendConfig,
    AudioBackendFactory, AudioFrame, AudioOutput, AudioSource, ChunkPreparer, PlaybackTimeline,
    PlayableBuffer, SharedTimeline, SpeakerOutput, VolumeAnalyzer,
};
use crate::config::{AppConfig, Settings};
use crate::error::{Result, TutorError};
use crate::prompt::build_system_instruction;

/// Why the remote side ended the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    RemoteClosed(Option<String>),
    TransportError(String),
}

/// Resolves once when the remote side closes or errors.
///
/// A local `disconnect()` drops the sender instead.
pub type DisconnectSignal = oneshot::Receiver<DisconnectReason>;

/// Opens the capture and playback devices for a session
pub trait AudioDevices: Send + Sync {
    fn capture(&self) -> Result<Box<dyn AudioBackend>>;
    fn output(&self) -> Result<Box<dyn AudioOutput>>;
}

/// Microphone (or WAV file) in, default speaker out
pub struct SystemAudioDevices {
    source: AudioSource,
    config: AudioBackendConfig,
}

impl SystemAudioDevices {
    pub fn new(source: AudioSource, config: AudioBackendConfig) -> Self {
        Self { source, config }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let source = match &settings.audio.input_file {
            Some(path) => AudioSource::File(path.clone()),
            None => AudioSource::Microphone,
        };
        let config = AudioBackendConfig {
            target_sample_rate: settings.audio.input_sample_rate,
            target_channels: 1,
            frame_size: settings.audio.frame_size,
        };
        Self::new(source, config)
    }
}

impl AudioDevices for SystemAudioDevices {
    fn capture(&self) -> Result<Box<dyn AudioBackend>> {
        AudioBackendFactory::create(self.source.clone(), self.config.clone())
    }

    fn output(&self) -> Result<Box<dyn AudioOutput>> {
        Ok(Box::new(SpeakerOutput::new()))
    }
}

enum SessionState {
    Idle,
    Connecting,
    Active(ActiveSession),
    Closing,
}

struct ActiveSession {
    id: String,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
    timeline: SharedTimeline,
    counters: Arc<SessionCounters>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl ActiveSession {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Best-effort teardown: every step runs even if an earlier one fails.
    async fn shutdown(mut self) {
        self.cancel.cancel();

        // Dropping the last outbound sender closes the socket; no wait for the peer
        drop(self.outbound.take());

        match self.timeline.lock() {
            Ok(mut timeline) => {
                let stopped = timeline.stop_all();
                if stopped > 0 {
                    info!("Stopped {} scheduled playback buffer(s)", stopped);
                }
            }
            Err(e) => warn!("Playback timeline lock poisoned: {}", e),
        }

        for (name, task) in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("{} task panicked: {}", name, e);
            }
        }

        info!("Session {} closed", self.id);
    }
}

/// Owns the realtime session lifecycle: capture → encode → send and
/// receive → decode → play.
pub struct SessionManager {
    settings: Arc<Settings>,
    devices: Arc<dyn AudioDevices>,
    transport: Arc<dyn Transport>,
    state: SessionState,
    volume_tx: Arc<watch::Sender<f32>>,
}

impl SessionManager {
    pub fn new(
        settings: Arc<Settings>,
        devices: Arc<dyn AudioDevices>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (volume_tx, _) = watch::channel(0.0);

        Self {
            settings,
            devices,
            transport,
            state: SessionState::Idle,
            volume_tx: Arc::new(volume_tx),
        }
    }

    /// Wire the system audio devices and the WebSocket transport.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        settings.require_api_key()?;

        let devices = Arc::new(SystemAudioDevices::from_settings(&settings));
        let transport = Arc::new(WebSocketTransport::new(&settings.service));

        Ok(Self::new(Arc::new(settings), devices, transport))
    }

    /// Latest input volume in [0, 255], updated once per capture window
    pub fn volume(&self) -> watch::Receiver<f32> {
        self.volume_tx.subscribe()
    }

    /// Streaming and not yet ended by the remote side
    pub fn is_active(&self) -> bool {
        matches!(&self.state, SessionState::Active(session) if session.is_live())
    }

    pub fn stats(&self) -> Option<SessionStats> {
        match &self.state {
            SessionState::Active(session) => Some(session.counters.snapshot(
                &session.id,
                session.is_live(),
                session.started_at,
            )),
            _ => None,
        }
    }

    /// Timeline of the active session, if any
    pub fn playback_timeline(&self) -> Option<SharedTimeline> {
        match &self.state {
            SessionState::Active(session) => Some(Arc::clone(&session.timeline)),
            _ => None,
        }
    }

    /// Acquire the microphone, open the speaker and start a Live session.
    ///
    /// All-or-nothing: on error every acquired resource is released and the
    /// manager stays idle.
    pub async fn connect(&mut self, config: &AppConfig) -> Result<DisconnectSignal> {
        if let SessionState::Active(session) = &self.state {
            if session.is_live() {
                return Err(TutorError::Connection("a session is already active".into()));
            }
            // Ended by the remote side; clear it out before starting over
            self.disconnect().await;
        }

        self.state = SessionState::Connecting;

        match self.open_session(config).await {
            Ok((session, signal)) => {
                info!("Session {} active", session.id);
                self.state = SessionState::Active(session);
                Ok(signal)
            }
            Err(e) => {
                error!("Failed to start session: {}", e);
                self.state = SessionState::Idle;
                Err(e)
            }
        }
    }

    /// Stop playback, release capture and both devices, close the remote
    /// session. Safe to call at any time, any number of times.
    pub async fn disconnect(&mut self) {
        let state = std::mem::replace(&mut self.state, SessionState::Closing);

        if let SessionState::Active(session) = state {
            info!("Disconnecting session {}", session.id);
            session.shutdown().await;
            self.volume_tx.send_replace(0.0);
        }

        self.state = SessionState::Idle;
    }

    async fn open_session(&self, config: &AppConfig) -> Result<(ActiveSession, DisconnectSignal)> {
        let session_id = format!("session-{}", uuid::Uuid::new_v4());
        info!("Starting session {} ({} level)", session_id, config.level);

        let mut capture = self.devices.capture()?;
        let frames = capture.start().await?;
        info!("Capture started via {}", capture.name());

        let timeline = PlaybackTimeline::shared(self.settings.audio.output_sample_rate);
        let mut output = match self.devices.output() {
            Ok(output) => output,
            Err(e) => {
                release(capture.as_mut(), None).await;
                return Err(e);
            }
        };
        if let Err(e) = output.start(Arc::clone(&timeline)).await {
            release(capture.as_mut(), None).await;
            return Err(e);
        }

        let setup = SetupRequest::new(&self.settings.service, build_system_instruction(config));
        let TransportHandle { outbound, events } = match self.transport.open(setup).await {
            Ok(handle) => handle,
            Err(e) => {
                release(capture.as_mut(), Some(output.as_mut())).await;
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let counters = Arc::new(SessionCounters::default());
        let (disconnect_tx, disconnect_rx) = oneshot::channel();

        let capture_task = tokio::spawn(run_capture(
            capture,
            frames,
            outbound.clone(),
            Arc::clone(&self.volume_tx),
            Arc::clone(&counters),
            cancel.clone(),
        ));

        let receive_task = tokio::spawn(run_receive(
            events,
            Arc::clone(&timeline),
            Arc::clone(&counters),
            cancel.clone(),
            disconnect_tx,
            self.settings.audio.output_sample_rate,
        ));

        let playback_task = tokio::spawn(run_playback(output, Arc::clone(&timeline), cancel.clone()));

        let session = ActiveSession {
            id: session_id,
            started_at: Utc::now(),
            cancel,
            outbound: Some(outbound),
            timeline,
            counters,
            tasks: vec![
                ("Capture", capture_task),
                ("Receive", receive_task),
                ("Playback", playback_task),
            ],
        };

        Ok((session, disconnect_rx))
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        // Tasks release their own devices once cancelled
        if let SessionState::Active(session) = &self.state {
            session.cancel.cancel();
        }
    }
}

async fn release(capture: &mut dyn AudioBackend, output: Option<&mut dyn AudioOutput>) {
    if let Err(e) = capture.stop().await {
        warn!("Failed to stop capture: {}", e);
    }
    if let Some(output) = output {
        if let Err(e) = output.stop().await {
            warn!("Failed to stop playback: {}", e);
        }
    }
}

/// Capture → volume → encode → outbound queue, in capture order.
async fn run_capture(
    mut capture: Box<dyn AudioBackend>,
    mut frames: mpsc::Receiver<AudioFrame>,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    volume_tx: Arc<watch::Sender<f32>>,
    counters: Arc<SessionCounters>,
    cancel: CancellationToken,
) {
    info!("Capture task started");

    let mut analyzer = VolumeAnalyzer::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    info!("Capture stream ended");
                    break;
                };

                volume_tx.send_replace(analyzer.analyze(&frame.samples));

                let blob = encode_pcm_blob(&frame.samples, frame.sample_rate);
                // Fire-and-forget; the transport queues without bound
                if outbound.send(ClientMessage::audio(blob)).is_err() {
                    debug!("Transport closed, dropping frame at {}ms", frame.timestamp_ms);
                    continue;
                }
                counters.frames_sent.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    if let Err(e) = capture.stop().await {
        warn!("Failed to stop capture backend: {}", e);
    }
    volume_tx.send_replace(0.0);

    info!("Capture task stopped");
}

/// Transport events → decode → playback timeline.
async fn run_receive(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    timeline: SharedTimeline,
    counters: Arc<SessionCounters>,
    cancel: CancellationToken,
    disconnect_tx: oneshot::Sender<DisconnectReason>,
    output_sample_rate: u32,
) {
    info!("Receive task started");

    let mut preparer = ChunkPreparer::new();

    let reason = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break None,
            event = events.recv() => match event {
                Some(TransportEvent::Open) => info!("Live session open"),
                Some(TransportEvent::Message(message)) => {
                    handle_server_message(
                        &message,
                        &timeline,
                        &mut preparer,
                        &counters,
                        output_sample_rate,
                    );
                }
                Some(TransportEvent::Close(reason)) => {
                    info!("Remote closed the session: {:?}", reason);
                    break Some(DisconnectReason::RemoteClosed(reason));
                }
                Some(TransportEvent::Error(err)) => {
                    error!("Transport error: {}", err);
                    break Some(DisconnectReason::TransportError(err));
                }
                None => break Some(DisconnectReason::RemoteClosed(None)),
            }
        }
    };

    if let Some(reason) = reason {
        // The remote side ending the session always ends it locally; no reconnect
        cancel.cancel();
        let _ = disconnect_tx.send(reason);
    }

    info!("Receive task stopped");
}

/// Holds the output device until the session ends, then cuts playback.
async fn run_playback(
    mut output: Box<dyn AudioOutput>,
    timeline: SharedTimeline,
    cancel: CancellationToken,
) {
    cancel.cancelled().await;

    if let Ok(mut timeline) = timeline.lock() {
        timeline.stop_all();
    }
    if let Err(e) = output.stop().await {
        warn!("Failed to stop {}: {}", output.name(), e);
    }
}

/// Schedule the first inline audio payload of a message.
///
/// A chunk that fails to decode is logged and dropped; the session continues.
/// Resampling happens before the timeline is locked, so the output callback
/// only waits for the insert.
pub(crate) fn handle_server_message(
    message: &ServerMessage,
    timeline: &SharedTimeline,
    preparer: &mut ChunkPreparer,
    counters: &SessionCounters,
    default_sample_rate: u32,
) {
    let Some(content) = &message.server_content else {
        if message.go_away.is_some() {
            warn!("Server announced it will close the session soon");
        }
        return;
    };

    for text in content.texts() {
        debug!("Model text: {}", text);
    }

    if let Some(blob) = content.first_inline_audio() {
        counters.chunks_received.fetch_add(1, Ordering::SeqCst);

        let sample_rate = rate_from_mime(&blob.mime_type).unwrap_or(default_sample_rate);
        let decoded =
            decode_base64(&blob.data).and_then(|bytes| decode_audio_data(&bytes, sample_rate, 1));

        match decoded {
            Ok(buffer) => schedule_chunk(buffer, timeline, preparer),
            Err(e) => {
                counters.chunks_dropped.fetch_add(1, Ordering::SeqCst);
                warn!("Dropping audio chunk: {}", e);
            }
        }
    }

    if content.interrupted {
        debug!("Model turn interrupted");
        preparer.reset();
    }

    if content.turn_complete {
        counters.turns_completed.fetch_add(1, Ordering::SeqCst);
        debug!("Model turn complete");
    }
}

fn schedule_chunk(buffer: PlayableBuffer, timeline: &SharedTimeline, preparer: &mut ChunkPreparer) {
    let target_rate = match timeline.lock() {
        Ok(timeline) => timeline.sample_rate(),
        Err(e) => {
            warn!("Playback timeline lock poisoned: {}", e);
            return;
        }
    };

    let chunk = preparer.prepare(buffer, target_rate);
    let duration = chunk.duration();

    match timeline.lock() {
        Ok(mut timeline) => {
            let start = timeline.schedule_prepared(chunk);
            debug!("Audio chunk scheduled at {:.3}s ({:.3}s)", start, duration);
        }
        Err(e) => warn!("Playback timeline lock poisoned: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio_message(samples: usize, turn_complete: bool) -> ServerMessage {
        let blob = encode_pcm_blob(&vec![0.1; samples], 24000);
        let json = serde_json::json!({
            "serverContent": {
                "modelTurn": { "parts": [{ "inlineData": { "mimeType": blob.mime_type, "data": blob.data } }] },
                "turnComplete": turn_complete
            }
        });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_chunks_schedule_back_to_back() {
        let timeline = PlaybackTimeline::shared(24000);
        let counters = SessionCounters::default();
        let mut preparer = ChunkPreparer::new();

        for _ in 0..3 {
            handle_server_message(
                &audio_message(12000, false),
                &timeline,
                &mut preparer,
                &counters,
                24000,
            );
        }

        let t = timeline.lock().unwrap();
        assert_eq!(t.active_count(), 3);
        assert!((t.next_start_time() - 1.5).abs() < 1e-9);
        assert_eq!(counters.chunks_received.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_chunks_resampled_to_device_rate_without_drift() {
        let timeline = PlaybackTimeline::shared(44100);
        let counters = SessionCounters::default();
        let mut preparer = ChunkPreparer::new();

        for _ in 0..100 {
            handle_server_message(
                &audio_message(1001, false),
                &timeline,
                &mut preparer,
                &counters,
                24000,
            );
        }

        let scheduled = timeline.lock().unwrap().next_start_time() * 44100.0;
        let exact = 100_100.0 * 44100.0 / 24000.0;
        assert!((scheduled - exact).abs() <= 3.0, "scheduled {scheduled}, exact {exact:.1}");
    }

    #[test]
    fn test_bad_chunk_is_dropped_and_next_still_plays() {
        let timeline = PlaybackTimeline::shared(24000);
        let counters = SessionCounters::default();
        let mut preparer = ChunkPreparer::new();

        let bad: ServerMessage = serde_json::from_value(serde_json::json!({
            "serverContent": {
                "modelTurn": { "parts": [{ "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "%%%" } }] }
            }
        }))
        .unwrap();

        handle_server_message(&bad, &timeline, &mut preparer, &counters, 24000);
        handle_server_message(
            &audio_message(2400, true),
            &timeline,
            &mut preparer,
            &counters,
            24000,
        );

        assert_eq!(counters.chunks_dropped.load(Ordering::SeqCst), 1);
        assert_eq!(counters.turns_completed.load(Ordering::SeqCst), 1);
        assert_eq!(timeline.lock().unwrap().active_count(), 1);
    }

    #[test]
    fn test_turn_complete_without_audio_only_counts() {
        let timeline = PlaybackTimeline::shared(24000);
        let counters = SessionCounters::default();
        let mut preparer = ChunkPreparer::new();
        let message: ServerMessage =
            serde_json::from_value(serde_json::json!({ "serverContent": { "turnComplete": true } }))
                .unwrap();

        handle_server_message(&message, &timeline, &mut preparer, &counters, 24000);

        assert_eq!(timeline.lock().unwrap().active_count(), 0);
        assert_eq!(counters.turns_completed.load(Ordering::SeqCst), 1);
    }
}
