//! Functions the language model may call during a conversation.
//!
//! Tools live in a name → handler map built once per call.  Handlers never touch the
//! conversation state directly; they return a `ScriptEffect` the engine applies.

use crate::capabilities::{KnowledgeBase, ToolSpec};
use crate::config::Features;
use crate::consts::LOOKUP_TARGET_LANGUAGE;
use crate::conversation_state::ScheduledFollowUp;
use crate::db_types::NewFollowUp;
use crate::error::{ProviderError, ToolError};
use crate::store::CallStore;
use crate::types::{CallJob, ProductCandidate};

use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const LOOKUP_INFORMATION: &str = "lookup_information";
pub const SCHEDULE_FOLLOWUP_CALL: &str = "schedule_followup_call";
pub const RECORD_OBJECTION: &str = "record_objection";

const NO_LOOKUP_RESULTS: &str = "No relevant information was found.";

/// State change a tool asks the script engine to make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEffect {
    AdvanceTier,
    Close(ScheduledFollowUp),
}

#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// Returned to the model as the tool result.
    pub output: String,
    pub effect: Option<ScriptEffect>,
}

impl ToolOutcome {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            effect: None,
        }
    }
}

/// What a tool handler may see of the call.
#[derive(Clone)]
pub struct ToolContext {
    pub job: Arc<CallJob>,
    pub knowledge: Option<Arc<KnowledgeBase>>,
    pub store: Arc<dyn CallStore>,
    /// Offer on the table when the tool was called.
    pub current_product: Option<ProductCandidate>,
}

pub type ToolHandler = Arc<
    dyn Fn(ToolContext, Value) -> BoxFuture<'static, Result<ToolOutcome, ToolError>> + Send + Sync,
>;

struct RegisteredTool {
    spec: ToolSpec,
    handler: ToolHandler,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The conversation tools enabled by `features`.  Knowledge lookup also needs a
    /// configured knowledge base.
    pub fn for_call(features: &Features, has_knowledge: bool) -> Self {
        let mut registry = Self::new();
        registry.register(schedule_followup_spec(), handler(schedule_followup));
        registry.register(
            record_objection_spec(),
            handler(|_ctx, args| record_objection(args)),
        );
        if features.rag_lookup && has_knowledge {
            registry.register(lookup_information_spec(), handler(lookup_information));
        }
        registry
    }

    /// Add or replace the tool named `spec.name`.
    pub fn register(&mut self, spec: ToolSpec, handler: ToolHandler) {
        debug!(tool=%spec.name, "registered tool");
        self.tools
            .insert(spec.name.clone(), RegisteredTool { spec, handler });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool descriptions for the model, in name order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec.clone()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub async fn invoke(
        &self,
        name: &str,
        ctx: ToolContext,
        args: Value,
    ) -> Result<ToolOutcome, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        (tool.handler)(ctx, args).await
    }
}

/// Box an async function as a `ToolHandler`.
pub fn handler<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolOutcome, ToolError>> + Send + 'static,
{
    Arc::new(move |ctx: ToolContext, args: Value| {
        Box::pin(f(ctx, args)) as BoxFuture<'static, _>
    })
}

fn parse_args<T: for<'de> Deserialize<'de>>(tool: &str, args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

fn lookup_information_spec() -> ToolSpec {
    ToolSpec {
        name: LOOKUP_INFORMATION.to_string(),
        description: "Retrieve product and policy information from the bank's knowledge base. \
                      Use it whenever you are unsure how to answer the customer."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "The customer's question"}
            },
            "required": ["query"]
        }),
    }
}

fn schedule_followup_spec() -> ToolSpec {
    ToolSpec {
        name: SCHEDULE_FOLLOWUP_CALL.to_string(),
        description: "Schedule a follow-up call when the customer asks to be called back later."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "preferred_time": {
                    "type": "string",
                    "description": "When the customer wants to be called, as they said it"
                },
                "note": {"type": "string", "description": "Anything the caller should know"}
            },
            "required": ["preferred_time"]
        }),
    }
}

fn record_objection_spec() -> ToolSpec {
    ToolSpec {
        name: RECORD_OBJECTION.to_string(),
        description: "Call when the customer declines or objects to the product currently \
                      being offered, so the next alternative can be presented."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "reason": {"type": "string", "description": "The customer's objection"}
            }
        }),
    }
}

#[derive(Deserialize)]
struct LookupArgs {
    query: String,
}

async fn lookup_information(ctx: ToolContext, args: Value) -> Result<ToolOutcome, ToolError> {
    let LookupArgs { query } = parse_args(LOOKUP_INFORMATION, args)?;
    let Some(knowledge) = ctx.knowledge else {
        return Err(ToolError::UnknownTool(LOOKUP_INFORMATION.to_string()));
    };
    let passages = knowledge_lookup(&knowledge, &query).await?;
    if passages.is_empty() {
        return Ok(ToolOutcome::text(NO_LOOKUP_RESULTS));
    }
    Ok(ToolOutcome::text(passages))
}

/// Translate `query` to English, embed it and return the nearest passages joined by blank
/// lines, most relevant first.  A failed translation falls back to the query as spoken.
pub async fn knowledge_lookup(
    knowledge: &KnowledgeBase,
    query: &str,
) -> Result<String, ProviderError> {
    let translated = match &knowledge.translator {
        Some(translator) => match translator.translate(query, LOOKUP_TARGET_LANGUAGE).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => query.to_string(),
            Err(e) => {
                warn!(error=%e, "translation failed; using original query");
                query.to_string()
            }
        },
        None => query.to_string(),
    };
    debug!(query=%query, translated=%translated, "knowledge lookup");

    let vector = knowledge.embedder.embed(&translated).await?;
    let passages = knowledge
        .index
        .query(&vector, knowledge.top_k, &knowledge.namespace)
        .await?;
    info!(count = passages.len(), "knowledge lookup returned passages");
    Ok(passages
        .into_iter()
        .map(|p| p.text)
        .filter(|t| !t.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n"))
}

#[derive(Deserialize)]
struct FollowUpArgs {
    preferred_time: String,
    #[serde(default)]
    note: Option<String>,
}

async fn schedule_followup(ctx: ToolContext, args: Value) -> Result<ToolOutcome, ToolError> {
    let FollowUpArgs {
        preferred_time,
        note,
    } = parse_args(SCHEDULE_FOLLOWUP_CALL, args)?;
    let preferred_time = preferred_time.trim().to_string();
    if preferred_time.is_empty() {
        return Err(ToolError::InvalidArguments {
            tool: SCHEDULE_FOLLOWUP_CALL.to_string(),
            message: "preferred_time must not be empty".to_string(),
        });
    }

    let job = &ctx.job;
    let product_name = ctx
        .current_product
        .as_ref()
        .map(|p| p.name.clone())
        .or_else(|| job.primary_product_name().map(str::to_string));
    let id = ctx
        .store
        .insert_follow_up(&NewFollowUp {
            call_id: job.call_id.clone(),
            customer_name: job.customer_name.clone(),
            phone_number: job.phone_number.clone(),
            customer_id: job.profile.customer_id(),
            product_name,
            preferred_time: preferred_time.clone(),
            note,
        })
        .await?;
    info!(follow_up=%id, call_id=%job.call_id, when=%preferred_time, "follow-up call scheduled");

    let confirmation = format!(
        "A follow-up call with {} has been scheduled for {preferred_time}.",
        job.customer_name
    );
    Ok(ToolOutcome {
        output: confirmation.clone(),
        effect: Some(ScriptEffect::Close(ScheduledFollowUp {
            preferred_time,
            confirmation,
        })),
    })
}

async fn record_objection(args: Value) -> Result<ToolOutcome, ToolError> {
    let reason = args
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    debug!(reason=%reason, "model reported an objection");
    Ok(ToolOutcome {
        output: "Objection noted. Present the next alternative if there is one.".to_string(),
        effect: Some(ScriptEffect::AdvanceTier),
    })
}
