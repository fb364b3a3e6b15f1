use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ProxySettings;
use crate::models::ChatMessage;
use crate::services::sse::{SseEvent, SseLineBuffer};

/// Connection timeout for endpoint requests.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Errors surfaced by the endpoint client.
///
/// Everything here is terminal for the current run only; the session manager
/// converts it into an error notification at the run boundary.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("authentication rejected by endpoint: {message}")]
    Auth { message: String },

    #[error("endpoint returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("stream read error: {message}")]
    Stream { message: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Stream chunks emitted during a streaming completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    Text(String),
    Done,
}

/// Type alias for response streams.
pub type ResponseStream = BoxStream<'static, Result<StreamChunk, LlmError>>;

/// One turn's worth of request input for an endpoint.
///
/// The history snapshot holds the turns *before* the message being sent; the
/// client appends the new user message itself when building the wire payload.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub system_prompt: String,
    pub history: Vec<ChatMessage>,
    pub user_message: String,
}

// Wire types for the OpenAI-compatible chat-completions API.

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct WireStreamChunk {
    choices: Vec<WireStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    delta: WireDelta,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireErrorResponse {
    error: WireErrorDetail,
}

#[derive(Debug, Deserialize)]
struct WireErrorDetail {
    message: String,
}

/// Build the outgoing message list: system prompt (when non-empty), then the
/// history snapshot, then the new user message.
fn build_messages(request: &ChatRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(request.history.len() + 2);
    if !request.system_prompt.is_empty() {
        messages.push(ChatMessage::system(request.system_prompt.clone()));
    }
    messages.extend(request.history.iter().cloned());
    messages.push(ChatMessage::user(request.user_message.clone()));
    messages
}

fn completions_url(endpoint: &str) -> String {
    format!("{}/chat/completions", endpoint.trim_end_matches('/'))
}

fn parse_error_response(status: reqwest::StatusCode, body: &str) -> LlmError {
    let message = serde_json::from_str::<WireErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    match status.as_u16() {
        401 | 403 => LlmError::Auth { message },
        code => LlmError::Api {
            status: code,
            message,
        },
    }
}

/// Stateless client for OpenAI-compatible streaming chat completions.
///
/// One instance wraps one HTTP connection pool and is shared by every
/// session's runs; per-turn state lives entirely in the returned stream.
pub struct LlmService {
    client: reqwest::Client,
}

impl LlmService {
    /// Create the client, routing through the supplied proxy when enabled.
    pub fn new(proxy: Option<&ProxySettings>) -> Result<Self, LlmError> {
        let mut builder =
            reqwest::Client::builder().connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS));

        if let Some(proxy) = proxy
            && let Some(server) = proxy.server_if_enabled()
        {
            debug!(server = %server, "routing endpoint requests through proxy");
            let proxy = reqwest::Proxy::all(format!("http://{server}")).map_err(LlmError::Client)?;
            builder = builder.proxy(proxy);
        }

        Ok(Self {
            client: builder.build().map_err(LlmError::Client)?,
        })
    }

    /// Issue one streaming chat-completion request.
    ///
    /// Fails fast on connect/auth/API errors. On success, returns a lazy
    /// stream of text deltas terminated by `Done`; each delta is forwarded as
    /// soon as its SSE event is parsed. A transport failure mid-stream yields
    /// a terminal `LlmError::Stream` item; deltas already delivered stand.
    pub async fn stream_chat(&self, request: ChatRequest) -> Result<ResponseStream, LlmError> {
        let url = completions_url(&request.endpoint);
        let wire = WireRequest {
            model: request.model.clone(),
            messages: build_messages(&request),
            stream: true,
        };

        debug!(
            url = %url,
            model = %wire.model,
            message_count = wire.messages.len(),
            "sending streaming chat completion request"
        );

        let mut http = self.client.post(&url).json(&wire);
        if let Some(key) = request.api_key.as_deref().filter(|k| !k.is_empty()) {
            http = http.bearer_auth(key);
        }

        let response = http.send().await.map_err(|source| LlmError::Request {
            url: url.clone(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(parse_error_response(status, &body));
        }

        let mut byte_stream = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut parser = SseLineBuffer::new();
            while let Some(chunk) = byte_stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        for event in parser.feed(&bytes) {
                            match event {
                                SseEvent::Data(json) => {
                                    if let Some(text) = parse_delta(&json) {
                                        yield Ok(StreamChunk::Text(text));
                                    }
                                }
                                SseEvent::Done => {
                                    yield Ok(StreamChunk::Done);
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(LlmError::Stream {
                            message: e.to_string(),
                        });
                        return;
                    }
                }
            }
            // Byte stream ended without [DONE]; drain any buffered tail and
            // treat the end of the connection as normal completion.
            if let Some(SseEvent::Data(json)) = parser.flush()
                && let Some(text) = parse_delta(&json)
            {
                yield Ok(StreamChunk::Text(text));
            }
            yield Ok(StreamChunk::Done);
        };

        Ok(Box::pin(stream))
    }
}

/// Parse one `data:` payload into its text delta.
///
/// Malformed chunks are skipped with a warning rather than aborting the
/// stream; the partial reply already delivered remains usable.
fn parse_delta(json: &str) -> Option<String> {
    match serde_json::from_str::<WireStreamChunk>(json) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|text| !text.is_empty()),
        Err(e) => {
            warn!(error = %e, "skipping malformed stream chunk");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn request_with(system_prompt: &str) -> ChatRequest {
        ChatRequest {
            endpoint: "http://localhost:1234/v1/".into(),
            model: "test-model".into(),
            api_key: None,
            system_prompt: system_prompt.into(),
            history: vec![
                ChatMessage::user("earlier"),
                ChatMessage::assistant("reply"),
            ],
            user_message: "now".into(),
        }
    }

    #[test]
    fn test_message_order_with_system_prompt() {
        let messages = build_messages(&request_with("be brief"));
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(messages[0].content, "be brief");
        assert_eq!(messages[3].content, "now");
    }

    #[test]
    fn test_empty_system_prompt_is_omitted() {
        let messages = build_messages(&request_with(""));
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::User);
    }

    #[test]
    fn test_completions_url_joining() {
        assert_eq!(
            completions_url("https://api.example.com/v1/"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            completions_url("https://api.example.com/v1"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_parse_delta_extracts_content() {
        let json = r#"{"choices":[{"delta":{"content":"Hi"}}]}"#;
        assert_eq!(parse_delta(json), Some("Hi".into()));
    }

    #[test]
    fn test_parse_delta_skips_empty_and_malformed() {
        assert_eq!(parse_delta(r#"{"choices":[{"delta":{}}]}"#), None);
        assert_eq!(parse_delta(r#"{"choices":[]}"#), None);
        assert_eq!(parse_delta("not json"), None);
    }

    #[test]
    fn test_error_response_mapping() {
        let body = r#"{"error":{"message":"bad key","type":"auth"}}"#;
        match parse_error_response(reqwest::StatusCode::UNAUTHORIZED, body) {
            LlmError::Auth { message } => assert_eq!(message, "bad key"),
            other => panic!("unexpected error: {other:?}"),
        }
        match parse_error_response(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "oops") {
            LlmError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "oops");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
