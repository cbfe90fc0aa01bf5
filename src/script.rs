//! The persuasion script: who the agent is, what it knows about the customer, which offer is
//! on the table, and how a user turn is answered.

use crate::capabilities::{ChatMessage, CompletionRequest, KnowledgeBase, LanguageModel};
use crate::config::Persona;
use crate::consts::MAX_TOOL_ROUNDS;
use crate::conversation_state::{
    CloseReason, ConversationState, ConversationSummary, PitchTier, ScriptPhase,
};
use crate::error::ProviderError;
use crate::store::CallStore;
use crate::tools::{ScriptEffect, ToolContext, ToolRegistry, LOOKUP_INFORMATION, RECORD_OBJECTION};
use crate::types::{CallJob, SharedTranscript, Speaker};

use serde_json::Value;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Phrases that count as declining the current offer.  Matched case-insensitively.
const DECLINE_PHRASES: &[&str] = &[
    "not interested",
    "no thanks",
    "no thank you",
    "don't want",
    "do not want",
    "don't need",
    "do not need",
    "too risky",
    "too expensive",
    "nahi chahiye",
    "nahin chahiye",
    "interest nahi",
    "नहीं चाहिए",
    "दिलचस्पी नहीं",
    "চাই না",
    "লাগবে না",
    "আগ্রহ নেই",
];

/// Phrases that accept the offer.  An utterance containing one is never a decline.
const ACCEPT_PHRASES: &[&str] = &[
    "sign me up",
    "i'll take",
    "i will take",
    "i'm interested",
    "i am interested",
    "sounds good",
    "yes please",
    "go ahead with",
    "le lunga",
    "le lungi",
    "ले लूंगा",
    "নেব",
];

/// What may follow a decline phrase when the negation is about something other than the offer,
/// as in "don't want to miss this".
const NOT_AN_OBJECTION: &[&str] = &["to miss", "to lose", "to pass", "to wait", "to think", "more time"];

/// Whether the whole utterance declines the offer on the table.
pub fn is_decline(utterance: &str) -> bool {
    let lowered = utterance.to_lowercase();
    if ACCEPT_PHRASES.iter().any(|p| lowered.contains(p)) {
        return false;
    }
    DECLINE_PHRASES.iter().any(|phrase| {
        lowered.match_indices(phrase).any(|(at, _)| {
            let starts_word = lowered[..at]
                .chars()
                .next_back()
                .map_or(true, |c| !c.is_alphanumeric());
            let rest = lowered[at + phrase.len()..].trim_start();
            starts_word && !NOT_AN_OBJECTION.iter().any(|w| rest.starts_with(w))
        })
    })
}

/// Drives one call's conversation.  Owned by the call's turn loop; one user turn is handled to
/// completion before the next.
pub struct ScriptEngine {
    job: Arc<CallJob>,
    persona: Persona,
    llm: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    knowledge: Option<Arc<KnowledgeBase>>,
    store: Arc<dyn CallStore>,
    state: ConversationState,
    history: Vec<ChatMessage>,
}

impl ScriptEngine {
    pub fn new(
        job: Arc<CallJob>,
        persona: Persona,
        llm: Arc<dyn LanguageModel>,
        tools: ToolRegistry,
        knowledge: Option<Arc<KnowledgeBase>>,
        store: Arc<dyn CallStore>,
        transcript: SharedTranscript,
    ) -> Self {
        let state = ConversationState::new(job.products.len(), transcript);
        Self {
            job,
            persona,
            llm,
            tools,
            knowledge,
            store,
            state,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    /// Standing instructions for the model.
    pub fn instructions(&self) -> String {
        let Persona {
            agent_name,
            organization,
        } = &self.persona;
        let product = self.job.primary_product_name().unwrap_or("our product");
        let mut text = format!(
            "You are {agent_name}, Product Manager from {organization}, calling {customer}. \
             Your task is to engage them in a natural, polite and persuasive conversation about \
             {product}. Respond in plain text only. Do not use any Markdown: no asterisks, \
             underscores, backticks, headings, lists or code fences. Avoid repetition, jargon \
             and being overly pushy. Encourage next steps.",
            customer = self.job.customer_name,
        );
        if self.tools.contains(LOOKUP_INFORMATION) {
            text.push_str(&format!(
                " If you are unsure or lack knowledge about a question, tell the customer you \
                 will look it up, then call {LOOKUP_INFORMATION} with their question and answer \
                 from what it returns."
            ));
        }
        if self.tools.contains(RECORD_OBJECTION) {
            text.push_str(&format!(
                " When the customer declines the product you are offering, call \
                 {RECORD_OBJECTION}."
            ));
        }
        text.push_str(&format!(" Talk in {} only.", self.job.language));
        text
    }

    /// Customer profile, ranked offers and the directive for the current script phase.
    pub fn context_payload(&self) -> String {
        let job = &self.job;
        let p = &job.profile;
        let yes_no = |key: &str| if p.flag(key) { "Yes" } else { "No" };

        let mut out = String::new();
        let _ = writeln!(out, "Customer Details:");
        let _ = writeln!(out, "- Name: {}", job.customer_name);
        let _ = writeln!(out, "- Customer ID: {}", p.display("customerId"));
        let _ = writeln!(out, "- Age: {}", p.display("age"));
        let _ = writeln!(out, "- Gender: {}", p.display("gender"));
        let _ = writeln!(out, "- Location: {}", p.display("location"));
        let _ = writeln!(out, "- Credit Score: {}", p.display("creditScore"));
        let _ = writeln!(out, "- Estimated Salary: ₹{}", p.display("estimatedSalary"));
        let _ = writeln!(out, "- Balance: ₹{}", p.display("balance"));
        let _ = writeln!(out, "- Tenure: {} years", p.display("tenure"));
        let _ = writeln!(out, "- Active Member: {}", yes_no("activeMember"));
        let _ = writeln!(out, "- Products: {}", p.display("productNumbers"));
        let _ = writeln!(out, "- Credit Card: {}", yes_no("creditCard"));

        for (idx, product) in job.products.iter().enumerate() {
            let label = if idx == 0 {
                "Primary Recommendation"
            } else {
                "Alternative"
            };
            let _ = writeln!(out);
            let _ = writeln!(out, "Product {} ({label}):", idx + 1);
            let _ = writeln!(out, "- Name: {}", product.name);
            let _ = writeln!(out, "- Category: {}", product.category);
            let _ = writeln!(out, "- Risk Level: {}", product.risk_level);
            let _ = writeln!(out, "- Description: {}", product.description);
        }

        let _ = writeln!(out);
        out.push_str(&self.phase_directive());
        let _ = write!(out, "\nTalk in {} only.", job.language);
        out
    }

    fn phase_directive(&self) -> String {
        match self.state.phase() {
            ScriptPhase::Closed(CloseReason::FollowUpScheduled) => {
                let when = self
                    .state
                    .follow_up()
                    .map(|f| f.preferred_time.as_str())
                    .unwrap_or("the agreed time");
                format!(
                    "A follow-up call has been scheduled for {when}. Confirm it, thank the \
                     customer and close the conversation politely. Do not pitch further."
                )
            }
            ScriptPhase::Closed(CloseReason::ConversationEnded) => {
                "The conversation is over. Thank the customer and say goodbye.".to_string()
            }
            ScriptPhase::Pitching(tier) => {
                let name = self
                    .job
                    .product(tier)
                    .map(|p| p.name.as_str())
                    .unwrap_or("the product");
                match tier {
                    PitchTier::Tier1 => format!(
                        "Currently offering Product 1: {name}. Begin with Product 1 and tailor \
                         the explanation to the customer's profile."
                    ),
                    _ if self.state.pending_pitch() == Some(tier) => format!(
                        "The customer declined the previous offer. Politely present Product {}: \
                         {name} as a better-suited alternative.",
                        tier.number()
                    ),
                    _ => format!(
                        "Currently offering Product {}: {name}. Address the customer's concerns.",
                        tier.number()
                    ),
                }
            }
        }
    }

    fn request(&self, with_tools: bool) -> CompletionRequest {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::system(self.instructions()));
        messages.push(ChatMessage::assistant(self.context_payload()));
        messages.extend(self.history.iter().cloned());
        CompletionRequest {
            messages,
            tools: if with_tools {
                self.tools.specs()
            } else {
                Vec::new()
            },
        }
    }

    fn tool_context(&self) -> ToolContext {
        ToolContext {
            job: self.job.clone(),
            knowledge: self.knowledge.clone(),
            store: self.store.clone(),
            current_product: self.job.product(self.state.tier()).cloned(),
        }
    }

    /// The agent's first line once the callee is on the line.
    pub async fn opening(&mut self) -> Result<Option<String>, ProviderError> {
        self.respond(false).await
    }

    /// Answer one finished user utterance.  `Ok(None)` means the model produced nothing to say.
    pub async fn handle_user_turn(&mut self, utterance: &str) -> Result<Option<String>, ProviderError> {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Ok(None);
        }
        self.state.push_turn(Speaker::User, utterance).await;
        self.history.push(ChatMessage::user(utterance));

        let mut advanced = false;
        if is_decline(utterance) {
            advanced = self.advance();
        }
        self.respond(advanced).await
    }

    fn advance(&mut self) -> bool {
        let moved = self.state.advance_tier();
        if moved {
            info!(call_id=%self.job.call_id, tier = self.state.tier().number(), "advancing to next offer");
        }
        moved
    }

    /// Run completion rounds until the model answers in text.  `advanced` records whether this
    /// user turn already moved the tier.
    async fn respond(&mut self, mut advanced: bool) -> Result<Option<String>, ProviderError> {
        let mut reply = None;
        for round in 0..=MAX_TOOL_ROUNDS {
            let with_tools = round < MAX_TOOL_ROUNDS;
            let completion = self.llm.complete(&self.request(with_tools)).await?;
            if completion.tool_calls.is_empty() || !with_tools {
                reply = completion.text;
                break;
            }

            self.history
                .push(ChatMessage::assistant_tool_calls(completion.tool_calls.clone()));
            for call in completion.tool_calls {
                let output = self.run_tool(&call.name, &call.arguments, &mut advanced).await;
                self.history.push(ChatMessage::tool_result(call.id, output));
            }
        }

        let Some(text) = reply.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        self.state.push_turn(Speaker::Assistant, &text).await;
        self.history.push(ChatMessage::assistant(text.clone()));
        self.state.mark_pitched();
        Ok(Some(text))
    }

    async fn run_tool(&mut self, name: &str, arguments: &str, advanced: &mut bool) -> String {
        if name == RECORD_OBJECTION && *advanced {
            return "Objection already noted for this turn.".to_string();
        }
        let args: Value = match serde_json::from_str(arguments) {
            Ok(v) => v,
            Err(e) => return format!("Error: arguments are not valid JSON: {e}"),
        };

        self.state.pending_lookup = name == LOOKUP_INFORMATION;
        let result = self.tools.invoke(name, self.tool_context(), args).await;
        self.state.pending_lookup = false;

        match result {
            Ok(outcome) => {
                match outcome.effect {
                    Some(ScriptEffect::AdvanceTier) => {
                        *advanced = self.advance() || *advanced;
                    }
                    Some(ScriptEffect::Close(follow_up)) => {
                        self.state.record_follow_up(follow_up);
                    }
                    None => {}
                }
                outcome.output
            }
            Err(e) => {
                warn!(tool=%name, error=%e, "tool call failed");
                format!("Error: {e}")
            }
        }
    }

    /// Close the script when the call ends and summarise it.
    pub async fn finish(&mut self) -> ConversationSummary {
        self.state.close(CloseReason::ConversationEnded);
        let summary = ConversationSummary {
            phase: self.state.phase(),
            pitched: self.state.pitched().to_vec(),
            turns: self.state.turns().await.len(),
        };
        debug!(call_id=%self.job.call_id, summary=?summary, "conversation finished");
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decline_phrases_are_detected() {
        assert!(is_decline("Sorry, I'm NOT interested in this."));
        assert!(is_decline("আমার এটা লাগবে না"));
        assert!(is_decline("mujhe nahi chahiye"));
        assert!(!is_decline("Tell me more about the interest rate"));
    }

    #[test]
    fn acceptances_are_not_declines() {
        assert!(!is_decline("I don't want to miss this offer, sign me up"));
        assert!(!is_decline("I don't need more time, I'll take it"));
        assert!(!is_decline("No thanks needed, I am interested"));
        assert!(!is_decline("I don't want to wait, what are the next steps?"));
        assert!(is_decline("I don't want it, thanks"));
        assert!(is_decline("No thank you. Too expensive for me."));
    }
}
