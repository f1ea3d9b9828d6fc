//! Chat command recognition.
//!
//! Two forms address the assistant:
//!
//! - `/? question` asks publicly.
//! - `/w gpt question` or `/whisper [gpt, Alice, Bob] question` asks
//!   privately. The recipient list must name `gpt`; the other names receive
//!   the answer.
//!
//! Anything else is left to the host application.

use std::sync::LazyLock;

use regex::Regex;

/// Alias that routes a whisper to the assistant.
pub const ASSISTANT_ALIAS: &str = "gpt";

static WHISPER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(/w(?:hisper)?\s)(\[(?:[^\]]+)\]|(?:[^\s]+))\s*([\s\S]*)").unwrap()
});

static PUBLIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^(/\?\s)\s*([\s\S]*)").unwrap());

/// A chat line addressed to the assistant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Public {
        question: String,
    },
    Whisper {
        question: String,
        /// Other whisper targets, in the order given. Never contains the
        /// assistant alias.
        recipients: Vec<String>,
    },
}

impl ChatCommand {
    pub fn question(&self) -> &str {
        match self {
            Self::Public { question } | Self::Whisper { question, .. } => question,
        }
    }
}

/// Recognize a command addressed to the assistant, or `None` for ordinary
/// chat and whispers that do not include it.
pub fn parse_chat_command(message: &str) -> Option<ChatCommand> {
    if let Some(caps) = WHISPER.captures(message) {
        let aliases: Vec<String> = caps[2]
            .replace(['[', ']'], "")
            .split(',')
            .map(|name| name.trim().to_string())
            .collect();

        if aliases
            .iter()
            .any(|name| name.eq_ignore_ascii_case(ASSISTANT_ALIAS))
        {
            let recipients = aliases
                .into_iter()
                .filter(|name| !name.is_empty() && !name.eq_ignore_ascii_case(ASSISTANT_ALIAS))
                .collect();
            return Some(ChatCommand::Whisper {
                question: caps[3].trim().to_string(),
                recipients,
            });
        }
    }

    PUBLIC.captures(message).map(|caps| ChatCommand::Public {
        question: caps[2].trim().to_string(),
    })
}
