//! Model-collaborator abstraction for structured generation.
//!
//! # Implementations
//! - [`openai::OpenAiClient`]: any OpenAI-compatible chat-completions endpoint.

pub mod openai;

use crate::errors::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A chat message for the model conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
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
}

/// Speaker role in a chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Trait for model clients supporting structured (JSON schema) output.
#[allow(async_fn_in_trait)]
pub trait LlmClient: Send + Sync {
    /// Send a request and parse the response as `T`.
    ///
    /// The JSON schema derived from `T` (via `schemars`) constrains the
    /// model output. Implementations use deterministic decoding.
    async fn generate_structured<T>(&self, messages: &[Message]) -> Result<T>
    where
        T: DeserializeOwned + schemars::JsonSchema;
}
