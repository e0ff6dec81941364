use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::SessionError;
use crate::kernel::session::{ChatSession, SessionFactory};
use crate::vision::Frame;

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub system_prompt: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<&'a ChatMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// A conversation held by an OpenAI-compatible chat endpoint
/// (llama-server, Ollama, vLLM).
///
/// The full history is resent with every request, so it grows until the
/// server reports the context window is full.
pub struct RemoteSession {
    id: Uuid,
    client: Client,
    settings: Arc<RemoteSettings>,
    history: Mutex<Vec<ChatMessage>>,
}

impl RemoteSession {
    fn new(client: Client, settings: Arc<RemoteSettings>) -> Self {
        Self {
            id: Uuid::new_v4(),
            client,
            settings,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Sends `turn` after the history; the pair is kept only if the reply is usable.
    async fn exchange(&self, turn: ChatMessage) -> Result<String, SessionError> {
        let mut history = self.history.lock().await;

        let system = ChatMessage {
            role: "system",
            content: MessageContent::Text(self.settings.system_prompt.clone()),
        };
        let messages: Vec<&ChatMessage> = std::iter::once(&system)
            .chain(history.iter())
            .chain(std::iter::once(&turn))
            .collect();

        let body = CompletionRequest {
            model: &self.settings.model,
            messages,
            stream: false,
        };

        let mut request = self
            .client
            .post(format!("{}/v1/chat/completions", self.settings.base_url.trim_end_matches('/')))
            .json(&body);
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body_text));
        }

        let parsed: CompletionResponse = response.json().await.map_err(transport_error)?;
        let reply = extract_reply(parsed)?;

        history.push(turn);
        history.push(ChatMessage {
            role: "assistant",
            content: MessageContent::Text(reply.clone()),
        });
        debug!(session = %self.id, turns = history.len(), "Exchange recorded");

        Ok(reply)
    }
}

#[async_trait]
impl ChatSession for RemoteSession {
    async fn append(&self, frame: &Frame, prompt: &str) -> Result<String, SessionError> {
        let turn = ChatMessage {
            role: "user",
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: prompt.to_string() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: frame.to_data_url() },
                },
            ]),
        };
        self.exchange(turn).await
    }

    async fn query(&self, question: &str) -> Result<String, SessionError> {
        let turn = ChatMessage {
            role: "user",
            content: MessageContent::Text(question.to_string()),
        };
        self.exchange(turn).await
    }
}

/// Opens a fresh remote conversation per call; the HTTP client is shared.
pub struct RemoteSessionFactory {
    client: Client,
    settings: Arc<RemoteSettings>,
}

impl RemoteSessionFactory {
    pub fn new(settings: RemoteSettings) -> Self {
        let client = Client::builder()
            .timeout(settings.request_timeout) // network-level ceiling; the arbiter deadline is the real bound
            .build()
            .unwrap_or_default();
        info!(base_url = %settings.base_url, model = %settings.model, "Remote session factory ready");
        Self {
            client,
            settings: Arc::new(settings),
        }
    }
}

impl SessionFactory for RemoteSessionFactory {
    fn open(&self) -> Arc<dyn ChatSession> {
        let session = RemoteSession::new(self.client.clone(), self.settings.clone());
        debug!(session = %session.id, "Remote session opened");
        Arc::new(session)
    }
}

fn transport_error(e: reqwest::Error) -> SessionError {
    if e.is_timeout() {
        SessionError::Network(format!("request timed out: {}", e))
    } else {
        SessionError::Network(e.to_string())
    }
}

fn extract_reply(response: CompletionResponse) -> Result<String, SessionError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default();

    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(SessionError::EmptyResponse);
    }
    Ok(trimmed.to_string())
}

/// Maps a non-success HTTP reply onto the session error taxonomy.
///
/// Only 413, or a 400 whose body names the context window, means the session
/// is full. Rate limits and server faults stay `Network` whatever the body says.
fn classify_failure(status: StatusCode, body: &str) -> SessionError {
    let context_full = match status {
        StatusCode::PAYLOAD_TOO_LARGE => true,
        StatusCode::BAD_REQUEST => mentions_context_window(body),
        _ => false,
    };

    if context_full {
        SessionError::CapacityExceeded(format!("{}: {}", status, body.trim()))
    } else {
        SessionError::Network(format!("server error {}: {}", status, body.trim()))
    }
}

fn mentions_context_window(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("context_length_exceeded")
        || (lower.contains("context") && (lower.contains("exceed") || lower.contains("too long")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llama_server_context_overflow_is_capacity_exceeded() {
        let body = r#"{"error":{"code":400,"message":"the request exceeds the available context size, try increasing it"}}"#;
        let err = classify_failure(StatusCode::BAD_REQUEST, body);
        assert!(err.is_capacity_exceeded());
    }

    #[test]
    fn openai_context_length_code_is_capacity_exceeded() {
        let body = r#"{"error":{"code":"context_length_exceeded"}}"#;
        assert!(classify_failure(StatusCode::BAD_REQUEST, body).is_capacity_exceeded());
        assert!(classify_failure(StatusCode::PAYLOAD_TOO_LARGE, "").is_capacity_exceeded());
    }

    #[test]
    fn other_failures_are_network_errors() {
        let err = classify_failure(StatusCode::SERVICE_UNAVAILABLE, "loading model");
        assert!(matches!(err, SessionError::Network(msg) if msg.contains("503")));
    }

    #[test]
    fn rate_limits_never_clear_the_session() {
        let body = r#"{"error":{"message":"You have exceeded token rate limit of your current pricing tier","type":"tokens"}}"#;
        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, body);
        assert!(!err.is_capacity_exceeded());
        assert!(matches!(err, SessionError::Network(msg) if msg.contains("429")));
    }

    #[test]
    fn context_wording_outside_a_bad_request_is_a_network_error() {
        let body = "upstream context exceeded its retry budget";
        assert!(!classify_failure(StatusCode::BAD_GATEWAY, body).is_capacity_exceeded());
    }

    #[test]
    fn blank_reply_is_empty_response() {
        let parsed: CompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"  \n"}}]}"#).unwrap();
        assert_eq!(extract_reply(parsed), Err(SessionError::EmptyResponse));

        let parsed: CompletionResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert_eq!(extract_reply(parsed), Err(SessionError::EmptyResponse));
    }

    #[test]
    fn frame_turn_serializes_as_vision_parts() {
        let frame = Frame::new(vec![1, 2, 3], "image/jpeg", 1, 1);
        let turn = ChatMessage {
            role: "user",
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: "describe".to_string() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: frame.to_data_url() },
                },
            ]),
        };

        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(json["content"][1]["image_url"]["url"], "data:image/jpeg;base64,AQID");
    }

    #[test]
    fn text_turn_serializes_as_plain_string() {
        let turn = ChatMessage {
            role: "user",
            content: MessageContent::Text("what changed?".to_string()),
        };
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["content"], "what changed?");
    }
}
