//! Realtime conversation session
//!
//! This module provides the `SessionManager` that ties together:
//! - Microphone capture and volume analysis
//! - PCM encoding and streaming to the Live API
//! - Decoding and gapless scheduling of the spoken replies
//! - Session statistics and teardown

mod manager;
mod messages;
mod stats;
mod transport;

pub use manager::{
    AudioDevices, DisconnectReason, DisconnectSignal, SessionManager, SystemAudioDevices,
};
pub use messages::{
    rate_from_mime, ClientMessage, Content, GenerationConfig, Part, RealtimeInput, ServerContent,
    ServerMessage, SetupRequest,
};
pub use stats::{SessionCounters, SessionStats};
pub use transport::{Transport, TransportEvent, TransportHandle, WebSocketTransport};
