pub mod audio;
pub mod chat;
pub mod config;
pub mod error;
pub mod prompt;
pub mod session;
pub mod visualizer;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioOutput,
    AudioSource, PlaybackTimeline, PlayableBuffer, SharedTimeline, VolumeAnalyzer,
};
pub use chat::ChatSession;
pub use config::{AppConfig, InteractionMode, ProficiencyLevel, Settings};
pub use error::{TutorError, CONNECT_FAILED_MESSAGE};
pub use prompt::build_system_instruction;
pub use session::{
    AudioDevices, DisconnectReason, DisconnectSignal, SessionManager, SessionStats,
    SystemAudioDevices, Transport, TransportEvent, TransportHandle, WebSocketTransport,
};
pub use visualizer::{compose_frame, DrawCommand, PulseStyle, Renderer, Surface, TerminalSurface};
