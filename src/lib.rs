//! smartchat: a game-master chat assistant on top of OpenAI-style backends.
//!
//! The core is [`llm::Orchestrator`], which tries the managed assistant, the
//! user's assistant and plain chat completions in that order. Each backend
//! issues its HTTP calls through [`llm::RequestExecutor`] (bounded retry with
//! backoff), and assistant runs are awaited with [`llm::JobPoller`].

pub mod command;
pub mod config;
pub mod error;
pub mod history;
pub mod llm;
pub mod prompt;
pub mod render;

pub use config::Config;
