//! Capability traits at the crate's two external seams.
//!
//! ```text
//!   POST /query ──▶ QueryAgent ──▶ LanguageModel ──▶ Ollama / OpenAI
//!                      │
//!                      └──▶ query::execute(table)
//! ```
//!
//! - [`LanguageModel`] is the external model runtime. [`crate::llm`] provides
//!   the HTTP-backed implementations; tests plug in scripted models.
//! - [`QueryAgent`] is what the service shell talks to. [`crate::agent::TableAgent`]
//!   is the real implementation; tests plug in stubs that return canned
//!   responses or errors.
//!
//! Both traits are `Send + Sync` and take `&self`: one instance is shared by
//! every concurrent request for the lifetime of the process.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Chat roles understood by both supported runtimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

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

/// An external language model.
///
/// Implementations must be trusted: the agent executes whatever table
/// queries the model proposes.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier (e.g. `"llama3"`).
    fn model_name(&self) -> &str;

    /// Complete a conversation and return the assistant's reply text.
    ///
    /// Errors cover an unreachable runtime, a missing model, or a response
    /// without content.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// A natural-language question answerer bound to one table.
#[async_trait]
pub trait QueryAgent: Send + Sync {
    /// Answer `query`, returning the agent's raw response object.
    async fn invoke(&self, query: &str) -> Result<AgentResponse>;
}

/// Raw agent output.
///
/// Treated as opaque apart from [`output_text`](AgentResponse::output_text),
/// which pulls out the primary answer.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse(pub Value);

impl AgentResponse {
    /// The `output` field as text, or the whole response stringified when
    /// there is no `output` field.
    pub fn output_text(&self) -> String {
        match self.0.get("output") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => match &self.0 {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        }
    }
}
