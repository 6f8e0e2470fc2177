//! Bounded conversation history and its base64 JSON wire form.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use voice_relay_core::types::{ConversationTurn, Role};

/// The most recent turns of a conversation, never more than `max_turns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
    max_turns: usize,
}

impl ConversationHistory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns,
        }
    }

    pub fn from_turns(turns: Vec<ConversationTurn>, max_turns: usize) -> Self {
        let mut history = Self { turns, max_turns };
        history.trim();
        history
    }

    /// Decode client-supplied history.
    ///
    /// Anything unreadable degrades to an empty history: bad base64, bad
    /// JSON, or a payload that is not an array. Array items that are not
    /// `{role, content}` objects are skipped, as are `system` turns, which
    /// clients may not inject.
    pub fn decode_lenient(encoded: Option<&str>, max_turns: usize) -> Self {
        let turns = encoded
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(decode_turns)
            .unwrap_or_default();
        Self::from_turns(turns, max_turns)
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
        self.trim();
    }

    /// Record one user/assistant exchange.
    pub fn record_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.turns.push(ConversationTurn::user(user));
        self.turns.push(ConversationTurn::assistant(assistant));
        self.trim();
    }

    /// Prior turns followed by a new user prompt, as sent to a completion provider.
    pub fn with_prompt(&self, prompt: &str) -> Vec<ConversationTurn> {
        let mut messages = Vec::with_capacity(self.turns.len() + 1);
        messages.extend(self.turns.iter().cloned());
        messages.push(ConversationTurn::user(prompt));
        messages
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Base64-encoded JSON array of turns.
    pub fn encode(&self) -> String {
        encode_turns(&self.turns)
    }

    /// Drop the oldest turns until the encoded form fits in `max_bytes`,
    /// then return it. A single turn too large to fit empties the history.
    pub fn encode_within(&mut self, max_bytes: usize) -> String {
        loop {
            let encoded = self.encode();
            if encoded.len() <= max_bytes || self.turns.is_empty() {
                return encoded;
            }
            self.turns.remove(0);
        }
    }

    pub fn into_turns(self) -> Vec<ConversationTurn> {
        self.turns
    }

    fn trim(&mut self) {
        if self.turns.len() > self.max_turns {
            let excess = self.turns.len() - self.max_turns;
            self.turns.drain(..excess);
        }
    }
}

pub fn encode_turns(turns: &[ConversationTurn]) -> String {
    let json = serde_json::to_string(turns).unwrap_or_else(|_| "[]".to_string());
    STANDARD.encode(json)
}

fn decode_turns(encoded: &str) -> Vec<ConversationTurn> {
    let bytes = match STANDARD.decode(encoded) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(%e, "Conversation header is not base64, starting fresh");
            return Vec::new();
        }
    };
    let items = match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(serde_json::Value::Array(items)) => items,
        Ok(_) => {
            debug!("Conversation payload is not an array, starting fresh");
            return Vec::new();
        }
        Err(e) => {
            debug!(%e, "Conversation payload is not JSON, starting fresh");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<ConversationTurn>(item).ok())
        .filter(|turn| turn.role != Role::System)
        .collect()
}
