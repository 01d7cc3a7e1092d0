//! Turn-based text conversation over `generateContent`.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{AppConfig, ServiceConfig};
use crate::error::{Result, TutorError};
use crate::prompt::build_system_instruction;
use crate::session::Content;

const USER_ROLE: &str = "user";
const MODEL_ROLE: &str = "model";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: &'a [Content],
    system_instruction: &'a Content,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

/// Stateful text conversation; prior turns are resent with every message.
pub struct ChatSession {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    system_instruction: Content,
    history: Vec<Content>,
}

impl ChatSession {
    pub fn new(service: &ServiceConfig, config: &AppConfig) -> Self {
        let endpoint = format!(
            "{}/models/{}:generateContent",
            service.rest_url.trim_end_matches('/'),
            service.chat_model
        );

        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key: service.api_key.clone(),
            system_instruction: Content::text(None, build_system_instruction(config)),
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[Content] {
        &self.history
    }

    /// Send one user message and return the model's reply.
    ///
    /// The history only grows when the exchange succeeds.
    pub async fn send(&mut self, text: &str) -> Result<String> {
        let mut contents = self.history.clone();
        contents.push(Content::text(Some(USER_ROLE), text));

        let body = GenerateRequest {
            contents: &contents,
            system_instruction: &self.system_instruction,
        };

        debug!("Sending chat turn {} to {}", contents.len(), self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| TutorError::Chat(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(TutorError::Chat(format!(
                "HTTP {}: {}",
                status.as_u16(),
                extract_error_message(&body_text)
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| TutorError::Chat(format!("invalid response: {e}")))?;

        let reply = parsed
            .candidates
            .into_iter()
            .find_map(|c| c.content)
            .map(|c| c.joined_text())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TutorError::Chat("response contained no text".into()))?;

        contents.push(Content::text(Some(MODEL_ROLE), reply.clone()));
        self.history = contents;

        info!("Chat turn complete ({} messages in history)", self.history.len());
        Ok(reply)
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}
