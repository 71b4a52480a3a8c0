use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_stream::try_stream;
use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::StreamExt;
use munbot_core::{
    ChatBackend, ChatSession, ConversationSession, GenerationConfig, Preamble, ProviderError,
    ReplyStream, Role,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Gemini chat backend bound to a single API key.
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiProvider {
    pub const DEFAULT_MODEL: &'static str = "gemini-2.0-flash";

    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Last four characters of the key, for logs.
    #[must_use]
    pub fn masked_key(&self) -> String {
        let tail: String = self
            .api_key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("...{tail}")
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl ChatBackend for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn open_session(
        &self,
        preamble: Arc<Preamble>,
        config: &GenerationConfig,
    ) -> Result<Arc<dyn ChatSession>, ProviderError> {
        let history = ConversationSession::new();
        info!(
            "Created Gemini chat session {} (model={}, key={})",
            history.id,
            self.model,
            self.masked_key()
        );

        Ok(Arc::new(GeminiSession {
            client: self.client.clone(),
            url: self.stream_url(),
            api_key: self.api_key.clone(),
            system_instruction: preamble.system_instruction(),
            generation: config.clone(),
            history: Arc::new(Mutex::new(history)),
        }))
    }
}

struct GeminiSession {
    client: Client,
    url: String,
    api_key: String,
    system_instruction: String,
    generation: GenerationConfig,
    history: Arc<Mutex<ConversationSession>>,
}

fn lock_history(history: &Mutex<ConversationSession>) -> MutexGuard<'_, ConversationSession> {
    history.lock().unwrap_or_else(PoisonError::into_inner)
}

impl GeminiSession {
    fn build_request(&self, message: &str) -> GenerateContentRequest {
        let mut contents: Vec<Content> = lock_history(&self.history)
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| Content::text(wire_role(m.role), &m.content))
            .collect();
        contents.push(Content::text("user", message));

        GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: Some(self.system_instruction.clone()),
                }],
            },
            contents,
            generation_config: WireGenerationConfig {
                temperature: self.generation.temperature,
                top_p: self.generation.top_p,
                top_k: self.generation.top_k,
                max_output_tokens: self.generation.max_output_tokens,
            },
        }
    }
}

#[async_trait]
impl ChatSession for GeminiSession {
    async fn send_stream(&self, message: &str) -> Result<ReplyStream, ProviderError> {
        let request = self.build_request(message);

        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Network(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!("Failed to read Gemini error body (HTTP {status}): {e}");
                    String::new()
                }
            };
            warn!("Gemini API error response: HTTP {status}");
            return Err(classify_status(status.as_u16(), &error_detail(&body)));
        }

        let history = Arc::clone(&self.history);
        let user_message = message.to_string();

        let stream: ReplyStream = Box::pin(try_stream! {
            let mut events = response.bytes_stream().eventsource();
            let mut reply = String::new();

            while let Some(event) = events.next().await {
                let event = event.map_err(stream_error)?;
                if let Some(text) = parse_chunk(&event.data)? {
                    reply.push_str(&text);
                    yield text;
                }
            }

            debug!("Gemini stream finished ({} chars)", reply.len());
            lock_history(&history).add_turn(user_message, reply);
        });

        Ok(stream)
    }
}

/// Map an HTTP status (or the `code` of an in-stream error) to an error class.
#[must_use]
pub fn classify_status(status: u16, detail: &str) -> ProviderError {
    let message = format!("HTTP {status}: {detail}");
    let lower = detail.to_lowercase();
    match status {
        401 | 403 => ProviderError::Auth(message),
        400 if lower.contains("api key") || lower.contains("api_key_invalid") => {
            ProviderError::Auth(message)
        }
        429 => ProviderError::RateLimited(message),
        502..=504 => ProviderError::Network(message),
        _ => ProviderError::Other(message),
    }
}

fn error_detail(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body).map_or_else(
        |_| body.trim().to_string(),
        |envelope| envelope.error.message,
    )
}

fn stream_error(err: EventStreamError<reqwest::Error>) -> ProviderError {
    match err {
        EventStreamError::Transport(e) => {
            ProviderError::Network(format!("response body read: {e}"))
        }
        other => ProviderError::Other(format!("invalid event stream: {other}")),
    }
}

fn parse_chunk(event: &str) -> Result<Option<String>, ProviderError> {
    if event.trim() == "[DONE]" {
        return Ok(None);
    }

    let chunk: StreamChunk = serde_json::from_str(event)
        .map_err(|e| ProviderError::Other(format!("invalid stream chunk: {e}")))?;

    if let Some(error) = chunk.error {
        // in-stream errors sometimes carry only a status name
        if error.code == 0 {
            return Err(ProviderError::from_message(format!(
                "{}: {}",
                error.status, error.message
            )));
        }
        return Err(classify_status(error.code, &error.message));
    }

    let text: String = chunk
        .candidates
        .iter()
        .take(1)
        .filter_map(|c| c.content.as_ref())
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| p.text.as_deref())
        .collect();

    Ok((!text.is_empty()).then_some(text))
}

const fn wire_role(role: Role) -> &'static str {
    match role {
        Role::Assistant => "model",
        Role::User | Role::System => "user",
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: WireGenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            parts: vec![Part {
                text: Some(text.to_string()),
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}
