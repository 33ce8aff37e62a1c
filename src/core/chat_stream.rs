use std::fmt;

use futures_util::StreamExt;
use memchr::memchr;
use tokio::sync::mpsc;
use tracing::debug;

use crate::api::{
    Content, GenerateRequest, GenerationConfig, StreamFragment, ThinkingConfig, ToolDeclaration,
};
use crate::core::builtin_personas::PersonaConfig;
use crate::core::classify::{empty_prompt, format_turn_error, missing_credential};
use crate::core::message::{GroundingSource, Message};
use crate::utils::url::stream_generate_url;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Environment variable consulted when a persona has no key of its own. No
/// credential is ever embedded in shipped configuration.
pub const API_KEY_ENV_VAR: &str = "GEMINI_API_KEY";

const BASE_INSTRUCTION: &str = "You are a helpful AI assistant. You are helpful, harmless, and \
honest. If you use search, summarize the results clearly.";

/// Reasoning budget attached when the persona declares thinking support.
const THINKING_BUDGET_TOKENS: u32 = 4096;

/// Incremental events for one turn. Exactly one terminal event (`Completed`
/// xor `Errored`) is emitted per stream; nothing follows it.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// Append this text to the in-flight reply.
    Chunk(String),
    /// Append this text to the reply's thinking log.
    Thought(String),
    /// Sources newly cited by one fragment. Not cumulative; deduplication
    /// against earlier fragments is the consumer's responsibility.
    Grounding(Vec<GroundingSource>),
    /// Terminal: the turn failed. Carries the formatted transcript message.
    Errored(String),
    /// Terminal: the stream ended cleanly.
    Completed,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Errored(_) | StreamEvent::Completed)
    }
}

/// Identifies which placeholder message a stream's events belong to. The
/// consumer re-resolves session and message by id on every event; the
/// stream id lets stale streams be dropped after cancellation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamTag {
    pub session_id: String,
    pub message_id: String,
    pub stream_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    NoEligiblePrompt,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::NoEligiblePrompt => write!(f, "history contains no message to send"),
        }
    }
}

impl std::error::Error for RequestError {}

/// Resolve the credential for a turn: the persona's own key wins, then the
/// process environment. `None` means the turn must fail fast.
pub fn resolve_credential(persona: &PersonaConfig) -> Option<String> {
    if let Some(key) = persona.user_api_key.as_deref() {
        if !key.trim().is_empty() {
            return Some(key.trim().to_string());
        }
    }
    std::env::var(API_KEY_ENV_VAR)
        .ok()
        .filter(|key| !key.trim().is_empty())
}

fn compose_system_instruction(persona: &PersonaConfig) -> String {
    match persona.system_instruction.as_deref() {
        Some(specific) if !specific.trim().is_empty() => {
            format!("{BASE_INSTRUCTION} {specific}")
        }
        _ => BASE_INSTRUCTION.to_string(),
    }
}

/// Build the upstream request from a history snapshot.
///
/// Errored and empty messages are excluded entirely; the last eligible
/// message becomes the new user prompt and the rest are prior turns.
/// System-role messages are never forwarded as turns.
pub fn build_request(
    history: &[Message],
    persona: &PersonaConfig,
    enable_search: bool,
) -> Result<GenerateRequest, RequestError> {
    let eligible: Vec<&Message> = history.iter().filter(|m| m.is_context_eligible()).collect();
    let (prompt, prior) = eligible
        .split_last()
        .ok_or(RequestError::NoEligiblePrompt)?;

    let mut contents: Vec<Content> = prior
        .iter()
        .filter_map(|m| {
            m.role
                .api_role()
                .map(|role| Content::turn(role, m.text.clone()))
        })
        .collect();
    contents.push(Content::turn("user", prompt.text.clone()));

    let tools = if enable_search && persona.supports_search {
        Some(vec![ToolDeclaration::web_search()])
    } else {
        None
    };

    let generation_config = if persona.supports_thinking {
        Some(GenerationConfig {
            thinking_config: Some(ThinkingConfig {
                thinking_budget: THINKING_BUDGET_TOKENS,
            }),
        })
    } else {
        None
    };

    Ok(GenerateRequest {
        contents,
        system_instruction: Some(Content::instruction(compose_system_instruction(persona))),
        tools,
        generation_config,
    })
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                serde_json::Value::Object(map) => map
                    .get("message")
                    .and_then(|message| message.as_str().map(str::to_owned)),
                _ => None,
            })
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

fn fragment_sources(fragment: &StreamFragment) -> Vec<GroundingSource> {
    fragment
        .web_sources()
        .into_iter()
        .filter_map(|web| match (web.uri, web.title) {
            (Some(uri), Some(title)) => Some(GroundingSource { uri, title }),
            _ => None,
        })
        .collect()
}

/// Apply one SSE data payload. Returns true when a terminal event was sent
/// and the stream must stop.
fn handle_data_payload(
    payload: &str,
    tx: &mpsc::UnboundedSender<(StreamEvent, StreamTag)>,
    tag: &StreamTag,
) -> bool {
    if payload.trim().is_empty() {
        return false;
    }

    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(_) => {
            let _ = tx.send((
                StreamEvent::Errored(format_turn_error(payload)),
                tag.clone(),
            ));
            return true;
        }
    };

    if let Some(summary) = extract_error_summary(&value) {
        let _ = tx.send((
            StreamEvent::Errored(format_turn_error(&summary)),
            tag.clone(),
        ));
        return true;
    }

    let fragment: StreamFragment = match serde_json::from_value(value) {
        Ok(fragment) => fragment,
        Err(_) => {
            let _ = tx.send((
                StreamEvent::Errored(format_turn_error(payload)),
                tag.clone(),
            ));
            return true;
        }
    };

    if let Some(text) = fragment.reply_text() {
        let _ = tx.send((StreamEvent::Chunk(text), tag.clone()));
    }
    if let Some(thought) = fragment.thought_text() {
        let _ = tx.send((StreamEvent::Thought(thought), tag.clone()));
    }
    let sources = fragment_sources(&fragment);
    if !sources.is_empty() {
        let _ = tx.send((StreamEvent::Grounding(sources), tag.clone()));
    }

    false
}

fn process_sse_line(
    line: &str,
    tx: &mpsc::UnboundedSender<(StreamEvent, StreamTag)>,
    tag: &StreamTag,
) -> bool {
    extract_data_payload(line)
        .map(|payload| handle_data_payload(payload, tx, tag))
        .unwrap_or(false)
}

pub struct StreamParams {
    pub client: reqwest::Client,
    pub base_url: String,
    /// Resolved credential; `None` fails the turn before any network call.
    pub api_key: Option<String>,
    pub persona: PersonaConfig,
    /// Snapshot of the session's messages, placeholder excluded.
    pub history: Vec<Message>,
    pub enable_search: bool,
    pub cancel_token: tokio_util::sync::CancellationToken,
    pub tag: StreamTag,
}

/// Spawns one stream task per turn and multiplexes their events onto a
/// single channel. Holds only the sender half; all state belongs to the
/// consumer draining the receiver.
#[derive(Clone)]
pub struct ChatStreamService {
    tx: mpsc::UnboundedSender<(StreamEvent, StreamTag)>,
}

impl ChatStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamEvent, StreamTag)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, params: StreamParams) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let StreamParams {
                client,
                base_url,
                api_key,
                persona,
                history,
                enable_search,
                cancel_token,
                tag,
            } = params;

            let Some(api_key) = api_key else {
                let _ = tx.send((
                    StreamEvent::Errored(missing_credential().to_transcript_message()),
                    tag,
                ));
                return;
            };

            let request = match build_request(&history, &persona, enable_search) {
                Ok(request) => request,
                Err(RequestError::NoEligiblePrompt) => {
                    let _ = tx.send((
                        StreamEvent::Errored(empty_prompt().to_transcript_message()),
                        tag,
                    ));
                    return;
                }
            };

            debug!(
                persona = %persona.id,
                model = %persona.model,
                stream_id = tag.stream_id,
                turns = request.contents.len(),
                search = enable_search && persona.supports_search,
                "starting stream"
            );

            tokio::select! {
                _ = consume_stream(&client, &base_url, &api_key, &persona.model, request, &tx, &tag, &cancel_token) => {}
                _ = cancel_token.cancelled() => {
                    debug!(stream_id = tag.stream_id, "stream cancelled");
                }
            }
        });
    }
}

#[allow(clippy::too_many_arguments)]
async fn consume_stream(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    request: GenerateRequest,
    tx: &mpsc::UnboundedSender<(StreamEvent, StreamTag)>,
    tag: &StreamTag,
    cancel_token: &tokio_util::sync::CancellationToken,
) {
    let url = stream_generate_url(base_url, model);
    let response = client
        .post(url)
        .header("Content-Type", "application/json")
        .header("x-goog-api-key", api_key)
        .json(&request)
        .send()
        .await;

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            let _ = tx.send((
                StreamEvent::Errored(format_turn_error(&e.to_string())),
                tag.clone(),
            ));
            return;
        }
    };

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        let raw = format!("{} {}", status.as_u16(), body);
        let _ = tx.send((
            StreamEvent::Errored(format_turn_error(&raw)),
            tag.clone(),
        ));
        return;
    }

    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        if cancel_token.is_cancelled() {
            return;
        }

        let chunk_bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tx.send((
                    StreamEvent::Errored(format_turn_error(&e.to_string())),
                    tag.clone(),
                ));
                return;
            }
        };

        buffer.extend_from_slice(&chunk_bytes);

        while let Some(newline_pos) = memchr(b'\n', &buffer) {
            let line = match std::str::from_utf8(&buffer[..newline_pos]) {
                Ok(s) => s.trim().to_string(),
                Err(e) => {
                    debug!(stream_id = tag.stream_id, "invalid UTF-8 in stream: {e}");
                    buffer.drain(..=newline_pos);
                    continue;
                }
            };
            buffer.drain(..=newline_pos);

            if process_sse_line(&line, tx, tag) {
                return;
            }
        }
    }

    let _ = tx.send((StreamEvent::Completed, tag.clone()));
}
