use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about a realtime session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,

    /// Whether the session is still streaming
    pub is_active: bool,

    /// When the session was established
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Capture windows queued for sending
    pub frames_sent: usize,

    /// Inbound audio chunks received
    pub chunks_received: usize,

    /// Inbound chunks dropped because they failed to decode
    pub chunks_dropped: usize,

    /// Model turns completed
    pub turns_completed: usize,
}

/// Counters shared by the session tasks
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub frames_sent: AtomicUsize,
    pub chunks_received: AtomicUsize,
    pub chunks_dropped: AtomicUsize,
    pub turns_completed: AtomicUsize,
}

impl SessionCounters {
    pub fn snapshot(
        &self,
        session_id: &str,
        is_active: bool,
        started_at: DateTime<Utc>,
    ) -> SessionStats {
        let duration = Utc::now().signed_duration_since(started_at);

        SessionStats {
            session_id: session_id.to_string(),
            is_active,
            started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            frames_sent: self.frames_sent.load(Ordering::SeqCst),
            chunks_received: self.chunks_received.load(Ordering::SeqCst),
            chunks_dropped: self.chunks_dropped.load(Ordering::SeqCst),
            turns_completed: self.turns_completed.load(Ordering::SeqCst),
        }
    }
}
