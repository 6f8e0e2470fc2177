//! CustomGPT conversation API.
//!
//! CustomGPT keeps conversation state server-side per session, so each
//! distinct prior conversation is mapped to a session id through an owned
//! [`TtlCache`]. Replies can be streamed over SSE, in which case reading
//! stops as soon as enough text for a spoken answer has arrived.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use voice_relay_core::cache::TtlCache;
use voice_relay_core::config::{BrevityConfig, CustomGptConfig};
use voice_relay_core::error::ProviderError;
use voice_relay_core::types::{ConversationTurn, Role};

use crate::http::{ensure_success, not_configured, transport_error, trim_base_url};
use crate::openai::voice_system_prompt;
use crate::sse::sse_events;
use crate::{CompletionOptions, CompletionProvider, Provider};

const CUSTOMGPT_BASE_URL: &str = "https://app.customgpt.ai/api/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Session ids keyed by a hash of the prior conversation.
pub type SessionCache = TtlCache<String, String>;

pub struct CustomGptCompletion {
    base_url: String,
    api_key: Option<String>,
    project_id: Option<String>,
    stream: bool,
    instructions: Option<String>,
    brevity: Option<BrevityConfig>,
    sessions: Arc<SessionCache>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    prompt: &'a str,
    response_source: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessageEnvelope {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    data: Option<MessageData>,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    #[serde(default)]
    openai_response: Option<String>,
}

/// One `data:` payload of the streaming endpoint.
#[derive(Debug, Deserialize)]
struct StreamPayload {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    openai_response: Option<String>,
}

impl CustomGptCompletion {
    pub fn new(config: &CustomGptConfig, sessions: Arc<SessionCache>) -> Self {
        Self {
            base_url: trim_base_url(config.base_url.as_deref(), CUSTOMGPT_BASE_URL),
            api_key: config.resolve_api_key(),
            project_id: config.resolve_project_id(),
            stream: config.stream,
            instructions: config.instructions.clone(),
            brevity: config.brevity.clone(),
            sessions,
            client: reqwest::Client::new(),
        }
    }

    /// Session id for the conversation preceding the current prompt.
    fn session_for(&self, prior: &[ConversationTurn]) -> String {
        let key = session_key(prior);
        if let Some(existing) = self.sessions.get(&key) {
            debug!(session = %existing, "Reusing CustomGPT session");
            return existing;
        }
        let session = self
            .sessions
            .get_or_insert_with(key, || uuid::Uuid::new_v4().to_string());
        info!(session = %session, "Created CustomGPT session");
        session
    }

    fn first_message_prompt(&self, prompt: &str, language: &str) -> String {
        let instructions = self
            .instructions
            .clone()
            .unwrap_or_else(|| voice_system_prompt(language));
        format!("{instructions}\n\nUser question: {prompt}")
    }

    async fn read_streamed(&self, resp: reqwest::Response) -> Result<String, ProviderError> {
        let mut events = Box::pin(sse_events(resp));
        let mut reply = String::new();
        let mut sentences = 0usize;

        while let Some(event) = events.next().await {
            let event = event?;
            let Ok(payload) = serde_json::from_str::<StreamPayload>(&event.data) else {
                continue;
            };

            match payload.status.as_deref() {
                Some("progress") => {
                    let Some(chunk) = payload.message.filter(|m| !m.is_empty()) else {
                        continue;
                    };
                    sentences += chunk.chars().filter(|c| matches!(c, '.' | '!' | '?')).count();
                    reply.push_str(&chunk);

                    if let Some(brevity) = &self.brevity {
                        let words = reply.split_whitespace().count();
                        if sentences >= brevity.max_sentences || words >= brevity.stream_word_limit {
                            debug!(sentences, words, "Enough text for a spoken reply, closing stream");
                            break;
                        }
                    }
                }
                Some("error") => {
                    return Err(ProviderError::Other(format!(
                        "CustomGPT stream error: {}",
                        payload.message.unwrap_or_default()
                    )));
                }
                Some("finish") if payload.openai_response.is_none() => break,
                _ => {
                    if let Some(full) = payload.openai_response {
                        reply = full;
                        break;
                    }
                }
            }
        }

        Ok(reply)
    }
}

impl Provider for CustomGptCompletion {
    fn id(&self) -> &str {
        "customgpt"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some() && self.project_id.is_some()
    }
}

#[async_trait]
impl CompletionProvider for CustomGptCompletion {
    async fn complete(
        &self,
        messages: &[ConversationTurn],
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| not_configured("customgpt", "API key"))?;
        let project_id = self
            .project_id
            .as_deref()
            .ok_or_else(|| not_configured("customgpt", "project id"))?;

        let last_user = messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .ok_or_else(|| ProviderError::Other("no user message to send".into()))?;
        let prior: Vec<ConversationTurn> = messages[..last_user]
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect();
        let user_prompt = &messages[last_user].content;

        let session = self.session_for(&prior);
        let prompt = if prior.is_empty() {
            self.first_message_prompt(user_prompt, &options.language)
        } else {
            user_prompt.clone()
        };

        let url = format!(
            "{}/projects/{project_id}/conversations/{session}/messages",
            self.base_url
        );
        debug!(session = %session, stream = self.stream, "Calling CustomGPT conversation API");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .header("accept", "application/json")
            .query(&[
                ("stream", if self.stream { "true" } else { "false" }),
                ("lang", options.language.as_str()),
            ])
            .timeout(REQUEST_TIMEOUT)
            .json(&MessageRequest {
                prompt: &prompt,
                response_source: "default",
            })
            .send()
            .await
            .map_err(transport_error)?;
        let resp = ensure_success(resp).await?;

        let raw = if self.stream {
            self.read_streamed(resp).await?
        } else {
            let envelope: MessageEnvelope = resp
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
            if envelope.status.as_deref().is_some_and(|s| s != "success") {
                return Err(ProviderError::InvalidResponse(format!(
                    "CustomGPT status {}",
                    envelope.status.unwrap_or_default()
                )));
            }
            envelope
                .data
                .and_then(|d| d.openai_response)
                .unwrap_or_default()
        };

        if raw.trim().is_empty() {
            return Err(ProviderError::InvalidResponse(
                "CustomGPT returned no reply text".into(),
            ));
        }

        Ok(match &self.brevity {
            Some(brevity) => truncate_for_voice(&raw, brevity),
            None => raw,
        })
    }
}

/// SHA-256 over the serialized turns, hex encoded.
pub fn session_key(prior: &[ConversationTurn]) -> String {
    let mut hasher = Sha256::new();
    for turn in prior {
        hasher.update(turn.role.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(turn.content.as_bytes());
        hasher.update([0u8]);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

static BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").expect("static regex"));
static ITALIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*([^*]+)\*").expect("static regex"));
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").expect("static regex"));
static BARE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:https?://|www\.)\S+").expect("static regex"));
static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#+\s").expect("static regex"));
static SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?]+[.!?]*").expect("static regex"));

/// Strip markdown and URLs, then keep at most `max_sentences` sentences and
/// `max_words` words.
pub fn truncate_for_voice(text: &str, brevity: &BrevityConfig) -> String {
    let text = BOLD.replace_all(text, "$1");
    let text = ITALIC.replace_all(&text, "$1");
    let text = LINK.replace_all(&text, "$1");
    let text = BARE_URL.replace_all(&text, "");
    let text = HEADING.replace_all(&text, "");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut kept: Vec<String> = Vec::new();
    let mut words = 0usize;

    for sentence in SENTENCE
        .find_iter(&text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.trim_matches(|c| matches!(c, '.' | '!' | '?')).trim().is_empty())
        .take(brevity.max_sentences)
    {
        let count = sentence.split_whitespace().count();
        if words + count > brevity.max_words {
            if kept.is_empty() {
                let partial: Vec<&str> = sentence
                    .split_whitespace()
                    .take(brevity.max_words)
                    .collect();
                kept.push(partial.join(" "));
            }
            break;
        }
        kept.push(sentence.to_string());
        words += count;
    }

    let mut result = kept.join(" ");
    if !result.is_empty() && !result.ends_with(['.', '!', '?']) {
        result.push('.');
    }
    if result.len() < text.len() {
        debug!(
            before_chars = text.len(),
            after_chars = result.len(),
            "Shortened reply for voice"
        );
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brevity(max_sentences: usize, max_words: usize) -> BrevityConfig {
        BrevityConfig {
            max_sentences,
            max_words,
            ..BrevityConfig::default()
        }
    }

    #[test]
    fn test_keeps_first_two_sentences() {
        let out = truncate_for_voice(
            "It is sunny. Expect highs of 20. Tomorrow brings rain!",
            &brevity(2, 50),
        );
        assert_eq!(out, "It is sunny. Expect highs of 20.");
    }

    #[test]
    fn test_preserves_question_mark() {
        let out = truncate_for_voice("Can I help? Sure.", &brevity(1, 50));
        assert_eq!(out, "Can I help?");
    }

    #[test]
    fn test_strips_markdown_and_urls() {
        let out = truncate_for_voice(
            "## Answer\n**Bold** and *soft* see [docs](https://x.y/z) or https://example.com now.",
            &brevity(2, 50),
        );
        assert_eq!(out, "Answer Bold and soft see docs or now.");
    }

    #[test]
    fn test_word_cap_cuts_first_sentence() {
        let out = truncate_for_voice("one two three four five six", &brevity(2, 3));
        assert_eq!(out, "one two three.");
    }

    #[test]
    fn test_word_cap_drops_second_sentence() {
        let out = truncate_for_voice("One two. Three four five.", &brevity(2, 3));
        assert_eq!(out, "One two.");
    }

    #[test]
    fn test_session_key_stable_and_distinct() {
        let a = vec![ConversationTurn::user("hi"), ConversationTurn::assistant("hello")];
        let b = vec![ConversationTurn::user("hi")];
        assert_eq!(session_key(&a), session_key(&a.clone()));
        assert_ne!(session_key(&a), session_key(&b));
        assert_eq!(session_key(&[]).len(), 64);
    }

    #[test]
    fn test_same_history_reuses_session() {
        let sessions = Arc::new(TtlCache::new(Duration::from_secs(60), 16));
        let provider = CustomGptCompletion::new(&CustomGptConfig::default(), Arc::clone(&sessions));
        let history = vec![ConversationTurn::user("a"), ConversationTurn::assistant("b")];
        let first = provider.session_for(&history);
        let second = provider.session_for(&history);
        assert_eq!(first, second);
        assert_ne!(first, provider.session_for(&[]));
        assert_eq!(sessions.len(), 2);
    }

    #[test]
    fn test_first_message_carries_instructions() {
        let config = CustomGptConfig {
            instructions: Some("Be brief.".into()),
            ..CustomGptConfig::default()
        };
        let provider = CustomGptCompletion::new(&config, Arc::new(TtlCache::new(Duration::from_secs(1), 1)));
        assert_eq!(
            provider.first_message_prompt("weather?", "en"),
            "Be brief.\n\nUser question: weather?"
        );
    }
}
