//! Bounded conversation history.
//!
//! Backends read a window of recent turns before asking and append the
//! question and answer once a reply arrives. Only the most recent
//! `context_length` turns per conversation are kept.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Upper bound accepted for the history window.
pub const MAX_CONTEXT_LENGTH: usize = 20;

/// Who said a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Storage for conversation turns.
pub trait ConversationHistory: Send + Sync {
    /// Append `new_turns` (possibly none) to the conversation and return the
    /// most recent window, oldest first.
    fn append_and_get_window(
        &self,
        conversation_key: &str,
        new_turns: &[ConversationTurn],
    ) -> Vec<ConversationTurn>;
}

/// Process-local history, lost on exit.
#[derive(Debug)]
pub struct InMemoryHistory {
    context_length: usize,
    conversations: Mutex<HashMap<String, VecDeque<ConversationTurn>>>,
}

impl InMemoryHistory {
    /// `context_length` is clamped to [`MAX_CONTEXT_LENGTH`]. Zero disables
    /// history entirely.
    pub fn new(context_length: usize) -> Self {
        Self {
            context_length: context_length.min(MAX_CONTEXT_LENGTH),
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub fn context_length(&self) -> usize {
        self.context_length
    }
}

impl ConversationHistory for InMemoryHistory {
    fn append_and_get_window(
        &self,
        conversation_key: &str,
        new_turns: &[ConversationTurn],
    ) -> Vec<ConversationTurn> {
        if self.context_length == 0 {
            return Vec::new();
        }

        let mut conversations = self.conversations.lock().unwrap_or_else(|e| e.into_inner());
        let turns = conversations
            .entry(conversation_key.to_string())
            .or_default();
        turns.extend(new_turns.iter().cloned());
        while turns.len() > self.context_length {
            turns.pop_front();
        }
        turns.iter().cloned().collect()
    }
}
