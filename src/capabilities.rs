//! Narrow async interfaces to the external speech, language and retrieval providers.
//!
//! Everything the conversation needs from the outside world goes through these traits so a
//! call can be driven end to end against in-process fakes.

use crate::error::ProviderError;
use crate::providers::vad::Vad;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe mono PCM16 audio spoken in `language`.
    async fn transcribe(&self, audio: &[i16], language: &str) -> Result<String, ProviderError>;
}

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Render `text` as mono PCM16 at the bridge sample rate.
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<i16>, ProviderError>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Nearest passages, most relevant first.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: &str,
    ) -> Result<Vec<Passage>, ProviderError>;
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A function call requested by the language model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments as produced by the model.
    pub arguments: String,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// Function the model may call, described with a JSON schema.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
}

#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// A retrieved passage from the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub id: String,
    pub score: f32,
    pub text: String,
}

/// Retrieval stack behind the knowledge lookup tool.
pub struct KnowledgeBase {
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn VectorIndex>,
    /// Absent when no translation provider is configured; queries are then used as spoken.
    pub translator: Option<Arc<dyn Translator>>,
    pub namespace: String,
    pub top_k: usize,
}

/// Provider handles shared by every call, built once at start-up and passed in.
pub struct Capabilities {
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<dyn TextToSpeech>,
    pub llm: Arc<dyn LanguageModel>,
    pub vad: Vad,
    pub knowledge: Option<Arc<KnowledgeBase>>,
}
