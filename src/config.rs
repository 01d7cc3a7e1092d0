use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::TutorError;

/// Topic used when the learner leaves the topic blank.
pub const DEFAULT_TOPIC: &str = "Daily Life";

/// Process-level settings, loaded once at start.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub visualizer: VisualizerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Gemini API credential
    pub api_key: String,
    /// Bidirectional streaming endpoint (Live API)
    pub live_url: String,
    /// REST base used by text mode
    pub rest_url: String,
    pub live_model: String,
    pub chat_model: String,
    /// Prebuilt voice for synthesized replies
    pub voice: String,
    /// How long to wait for `setupComplete` after the socket opens
    pub setup_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            live_url: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            rest_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            live_model: "models/gemini-2.0-flash-live-001".to_string(),
            chat_model: "gemini-2.0-flash".to_string(),
            voice: "Puck".to_string(),
            setup_timeout_secs: 10,
        }
    }
}

impl ServiceConfig {
    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture rate sent to the model
    pub input_sample_rate: u32,
    /// Rate of the synthesized speech returned by the model
    pub output_sample_rate: u32,
    /// Samples per capture window
    pub frame_size: usize,
    /// Optional WAV file used instead of the microphone
    pub input_file: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            frame_size: 4096,
            input_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisualizerConfig {
    pub enabled: bool,
    pub fps: u32,
    pub width: usize,
    pub height: usize,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fps: 60,
            width: 48,
            height: 24,
        }
    }
}

impl Settings {
    /// Layer an optional config file with `PARLEZ__SECTION__KEY` variables.
    ///
    /// `GEMINI_API_KEY` is accepted as a fallback for the credential.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("PARLEZ").separator("__"))
            .build()
            .with_context(|| format!("Failed to read settings from {}", path))?;

        let mut settings: Settings = settings
            .try_deserialize()
            .context("Failed to parse settings")?;

        if settings.service.api_key.is_empty() {
            if let Ok(key) = std::env::var("GEMINI_API_KEY") {
                settings.service.api_key = key;
            }
        }

        Ok(settings)
    }

    pub fn require_api_key(&self) -> std::result::Result<&str, TutorError> {
        if self.service.api_key.trim().is_empty() {
            return Err(TutorError::Config(
                "no API key configured (set GEMINI_API_KEY)".into(),
            ));
        }
        Ok(&self.service.api_key)
    }
}

/// CEFR proficiency level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProficiencyLevel {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

impl fmt::Display for ProficiencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::A1 => "A1",
            Self::A2 => "A2",
            Self::B1 => "B1",
            Self::B2 => "B2",
            Self::C1 => "C1",
            Self::C2 => "C2",
        };
        f.write_str(s)
    }
}

impl FromStr for ProficiencyLevel {
    type Err = TutorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A1" => Ok(Self::A1),
            "A2" => Ok(Self::A2),
            "B1" => Ok(Self::B1),
            "B2" => Ok(Self::B2),
            "C1" => Ok(Self::C1),
            "C2" => Ok(Self::C2),
            other => Err(TutorError::Config(format!("unknown level: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InteractionMode {
    Text,
    Speech,
}

impl FromStr for InteractionMode {
    type Err = TutorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "speech" => Ok(Self::Speech),
            other => Err(TutorError::Config(format!("unknown mode: {}", other))),
        }
    }
}

/// What the learner chose before starting a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub level: ProficiencyLevel,
    /// Target vocabulary, in the order the learner entered it
    pub words: Vec<String>,
    pub topic: Option<String>,
    pub mode: InteractionMode,
}

impl AppConfig {
    /// Topic with blank input treated as absent.
    pub fn topic_or_default(&self) -> &str {
        match self.topic.as_deref().map(str::trim) {
            Some(topic) if !topic.is_empty() => topic,
            _ => DEFAULT_TOPIC,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_topic_falls_back() {
        let mut cfg = AppConfig {
            level: ProficiencyLevel::B1,
            words: vec![],
            topic: Some("   ".into()),
            mode: InteractionMode::Text,
        };
        assert_eq!(cfg.topic_or_default(), DEFAULT_TOPIC);

        cfg.topic = None;
        assert_eq!(cfg.topic_or_default(), DEFAULT_TOPIC);

        cfg.topic = Some("Le cinéma".into());
        assert_eq!(cfg.topic_or_default(), "Le cinéma");
    }

    #[test]
    fn level_parsing_is_case_insensitive() {
        assert_eq!("a2".parse::<ProficiencyLevel>().unwrap(), ProficiencyLevel::A2);
        assert_eq!("C1".parse::<ProficiencyLevel>().unwrap(), ProficiencyLevel::C1);
        assert!("D1".parse::<ProficiencyLevel>().is_err());
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("Speech".parse::<InteractionMode>().unwrap(), InteractionMode::Speech);
        assert!("video".parse::<InteractionMode>().is_err());
    }

    #[test]
    fn defaults_match_live_api_formats() {
        let settings = Settings::default();
        assert_eq!(settings.audio.input_sample_rate, 16000);
        assert_eq!(settings.audio.output_sample_rate, 24000);
        assert_eq!(settings.audio.frame_size, 4096);
        assert_eq!(settings.service.voice, "Puck");
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let settings = Settings::default();
        assert!(matches!(
            settings.require_api_key(),
            Err(TutorError::Config(_))
        ));
    }
}
