use super::{ensure_success, http_error};
use crate::capabilities::{
    ChatMessage, Completion, CompletionRequest, Embedder, LanguageModel, ToolCall, ToolSpec,
};
use crate::error::ProviderError;
use crate::openai_types::{
    OpenAIBatchResponse, OpenAIEmbeddingPayload, OpenAIEmbeddingResponse, OpenAIFunctionCall,
    OpenAIFunctionDef, OpenAIMessage, OpenAIPayload, OpenAITool, OpenAIToolCall,
};

use async_trait::async_trait;
use tracing::debug;

const PROVIDER: &str = "openai";
const CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Chat completions with function calling.
pub struct OpenAIChat {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAIChat {
    pub fn new(
        http_client: reqwest::Client,
        api_key: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            http_client,
            api_key: api_key.into(),
            model: model.into(),
            temperature,
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAIChat {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let payload = OpenAIPayload {
            model: self.model.clone(),
            messages: request.messages.iter().map(to_wire_message).collect(),
            tools: request.tools.iter().map(to_wire_tool).collect(),
            temperature: Some(self.temperature),
            ..Default::default()
        };
        let resp = self
            .http_client
            .post(CHAT_URL)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .json(&payload)
            .send()
            .await
            .map_err(http_error(PROVIDER))?;
        let resp = ensure_success(PROVIDER, resp)
            .await?
            .json::<OpenAIBatchResponse>()
            .await
            .map_err(http_error(PROVIDER))?;
        if let Some(usage) = &resp.usage {
            debug!(model=%resp.model, total_tokens = usage.total_tokens, "openai completion");
        }

        let choice =
            resp.choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::InvalidResponse {
                    provider: PROVIDER,
                    message: "completion had no choices".to_string(),
                })?;
        Ok(Completion {
            text: choice.message.content.filter(|c| !c.trim().is_empty()),
            tool_calls: choice
                .message
                .tool_calls
                .into_iter()
                .map(|c| ToolCall {
                    id: c.id,
                    name: c.function.name,
                    arguments: c.function.arguments,
                })
                .collect(),
        })
    }
}

fn to_wire_message(msg: &ChatMessage) -> OpenAIMessage {
    OpenAIMessage {
        role: msg.role.as_str().to_string(),
        content: msg.content.clone(),
        tool_calls: msg
            .tool_calls
            .iter()
            .map(|c| OpenAIToolCall {
                id: c.id.clone(),
                kind: "function".to_string(),
                function: OpenAIFunctionCall {
                    name: c.name.clone(),
                    arguments: c.arguments.clone(),
                },
            })
            .collect(),
        tool_call_id: msg.tool_call_id.clone(),
    }
}

fn to_wire_tool(spec: &ToolSpec) -> OpenAITool {
    OpenAITool {
        kind: "function",
        function: OpenAIFunctionDef {
            name: spec.name.clone(),
            description: spec.description.clone(),
            parameters: spec.parameters.clone(),
        },
    }
}

pub struct OpenAIEmbedder {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAIEmbedder {
    pub fn new(
        http_client: reqwest::Client,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let payload = OpenAIEmbeddingPayload {
            model: &self.model,
            input: text,
        };
        let resp = self
            .http_client
            .post(EMBEDDINGS_URL)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .json(&payload)
            .send()
            .await
            .map_err(http_error(PROVIDER))?;
        let resp = ensure_success(PROVIDER, resp)
            .await?
            .json::<OpenAIEmbeddingResponse>()
            .await
            .map_err(http_error(PROVIDER))?;
        resp.data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: PROVIDER,
                message: "embedding response had no data".to_string(),
            })
    }
}
