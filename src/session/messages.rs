use serde::{Deserialize, Serialize};

use crate::audio::MediaBlob;
use crate::config::ServiceConfig;

/// One part of a content turn: text or inline binary data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<MediaBlob>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }
}

/// A turn (or system instruction): ordered parts with an optional role
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(role: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part::text(text)],
        }
    }

    /// Concatenated text of all parts
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }
}

// ============================================================================
// Client → server
// ============================================================================

/// Messages sent to the Live API, one JSON object per WebSocket frame
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(SetupRequest),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    /// Wrap one encoded capture window
    pub fn audio(media: MediaBlob) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![media],
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupRequest {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

impl SetupRequest {
    /// Audio replies in the configured voice, steered by `instruction`
    pub fn new(service: &ServiceConfig, instruction: String) -> Self {
        Self {
            model: service.live_model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: service.voice.clone(),
                        },
                    },
                }),
            },
            system_instruction: Content::text(None, instruction),
        }
    }

    pub fn instruction_text(&self) -> String {
        self.system_instruction.joined_text()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaBlob>,
}

// ============================================================================
// Server → client
// ============================================================================

/// Message received from the Live API. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<serde_json::Value>,
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

impl ServerContent {
    /// Inline data of the first part of the model turn, if any
    pub fn first_inline_audio(&self) -> Option<&MediaBlob> {
        self.model_turn
            .as_ref()?
            .parts
            .first()?
            .inline_data
            .as_ref()
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.model_turn
            .iter()
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| part.text.as_deref())
    }
}

/// Sample rate declared in a MIME type such as `audio/pcm;rate=24000`
pub fn rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
}
