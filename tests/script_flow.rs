mod common;

use common::*;
use dialout_agent::capabilities::{KnowledgeBase, Translator};
use dialout_agent::config::{Features, Persona};
use dialout_agent::conversation_state::{CloseReason, PitchTier, ScriptPhase};
use dialout_agent::script::ScriptEngine;
use dialout_agent::store::MemoryStore;
use dialout_agent::tools::{
    knowledge_lookup, ToolRegistry, LOOKUP_INFORMATION, RECORD_OBJECTION, SCHEDULE_FOLLOWUP_CALL,
};
use dialout_agent::types::{SharedTranscript, Speaker};

use serde_json::json;
use std::sync::Arc;

fn engine(
    llm: Arc<ScriptedLlm>,
    store: Arc<MemoryStore>,
    knowledge: Option<Arc<KnowledgeBase>>,
    products: usize,
) -> (ScriptEngine, SharedTranscript) {
    let mut call = job("s1");
    call.products.truncate(products);
    let transcript = SharedTranscript::default();
    let engine = ScriptEngine::new(
        Arc::new(call),
        Persona::default(),
        llm,
        ToolRegistry::for_call(&Features::default(), knowledge.is_some()),
        knowledge,
        store,
        transcript.clone(),
    );
    (engine, transcript)
}

#[tokio::test]
async fn declining_twice_reaches_third_offer_once() {
    let llm = Arc::new(ScriptedLlm::default());
    let (mut engine, transcript) = engine(llm.clone(), Arc::new(MemoryStore::new()), None, 3);

    engine.opening().await.unwrap();
    assert_eq!(engine.state().pitched(), &[PitchTier::Tier1]);

    engine.handle_user_turn("I'm not interested").await.unwrap();
    assert_eq!(engine.state().tier(), PitchTier::Tier2);
    engine.handle_user_turn("no thanks, too risky").await.unwrap();
    assert_eq!(engine.state().tier(), PitchTier::Tier3);
    engine.handle_user_turn("still not interested").await.unwrap();
    assert_eq!(engine.state().tier(), PitchTier::Tier3);

    assert_eq!(
        engine.state().pitched(),
        &[PitchTier::Tier1, PitchTier::Tier2, PitchTier::Tier3]
    );
    let turns = transcript.read().await;
    assert_eq!(turns.len(), 7);
    assert_eq!(turns[1].speaker, Speaker::User);
}

#[tokio::test]
async fn accepting_the_offer_keeps_the_first_tier() {
    let llm = Arc::new(ScriptedLlm::default());
    let (mut engine, _) = engine(llm, Arc::new(MemoryStore::new()), None, 3);
    engine.opening().await.unwrap();

    engine
        .handle_user_turn("I don't want to miss this offer, sign me up")
        .await
        .unwrap();
    engine
        .handle_user_turn("I don't need more time, I'll take it")
        .await
        .unwrap();

    assert_eq!(engine.state().tier(), PitchTier::Tier1);
    assert_eq!(engine.state().pitched(), &[PitchTier::Tier1]);
    assert!(engine
        .context_payload()
        .contains("Currently offering Product 1: Gold Saver"));
}

#[tokio::test]
async fn third_offer_is_presented_in_context() {
    let llm = Arc::new(ScriptedLlm::default());
    let (mut engine, _) = engine(llm.clone(), Arc::new(MemoryStore::new()), None, 3);
    engine.opening().await.unwrap();
    engine.handle_user_turn("not interested").await.unwrap();
    engine.handle_user_turn("don't want it").await.unwrap();

    let context = engine.context_payload();
    assert!(context.contains("Product 3: Equity Plus"));
    assert!(context.contains("Talk in bn-IN only."));
}

#[tokio::test]
async fn objection_tool_and_decline_phrase_advance_once_per_turn() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        text("Hello Asha, I am calling about Gold Saver."),
        tool_call(RECORD_OBJECTION, json!({"reason": "not interested"})),
        text("Then perhaps the Balanced Growth Fund suits you better."),
    ]));
    let (mut engine, _) = engine(llm.clone(), Arc::new(MemoryStore::new()), None, 3);
    engine.opening().await.unwrap();

    let reply = engine.handle_user_turn("not interested").await.unwrap();
    assert_eq!(
        reply.as_deref(),
        Some("Then perhaps the Balanced Growth Fund suits you better.")
    );
    assert_eq!(engine.state().tier(), PitchTier::Tier2);

    let requests = llm.requests.lock().unwrap();
    let tool_result = requests[2]
        .messages
        .iter()
        .rev()
        .find(|m| m.tool_call_id.is_some())
        .and_then(|m| m.content.clone())
        .unwrap();
    assert_eq!(tool_result, "Objection already noted for this turn.");
}

#[tokio::test]
async fn objection_tool_alone_advances_the_tier() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        text("Hello"),
        tool_call(RECORD_OBJECTION, json!({"reason": "fees"})),
        text("Let me tell you about another option."),
    ]));
    let (mut engine, _) = engine(llm, Arc::new(MemoryStore::new()), None, 2);
    engine.opening().await.unwrap();
    engine
        .handle_user_turn("the fees look high to me")
        .await
        .unwrap();
    assert_eq!(engine.state().tier(), PitchTier::Tier2);
    assert_eq!(engine.state().pitched(), &[PitchTier::Tier1, PitchTier::Tier2]);
}

#[tokio::test]
async fn tier_is_capped_by_product_count() {
    let llm = Arc::new(ScriptedLlm::default());
    let (mut engine, _) = engine(llm, Arc::new(MemoryStore::new()), None, 1);
    engine.opening().await.unwrap();
    engine.handle_user_turn("not interested").await.unwrap();
    engine.handle_user_turn("not interested").await.unwrap();
    assert_eq!(engine.state().tier(), PitchTier::Tier1);
    assert_eq!(engine.state().pitched(), &[PitchTier::Tier1]);
}

#[tokio::test]
async fn follow_up_is_persisted_and_closes_the_script() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        text("Hello"),
        tool_call(
            SCHEDULE_FOLLOWUP_CALL,
            json!({"preferred_time": "tomorrow at 5 pm", "note": "prefers Bengali"}),
        ),
        text("I have scheduled a call for tomorrow at 5 pm. Thank you!"),
    ]));
    let store = Arc::new(MemoryStore::new());
    let (mut engine, _) = engine(llm, store.clone(), None, 3);
    engine.opening().await.unwrap();
    engine
        .handle_user_turn("call me back tomorrow at 5 pm")
        .await
        .unwrap();

    assert_eq!(
        engine.state().phase(),
        ScriptPhase::Closed(CloseReason::FollowUpScheduled)
    );
    let follow_ups = store.follow_ups();
    assert_eq!(follow_ups.len(), 1);
    assert_eq!(follow_ups[0].preferred_time, "tomorrow at 5 pm");
    assert_eq!(follow_ups[0].product_name.as_deref(), Some("Gold Saver"));
    assert_eq!(follow_ups[0].customer_id.as_deref(), Some("15634602"));

    engine.handle_user_turn("not interested").await.unwrap();
    assert_eq!(engine.state().tier(), PitchTier::Tier1);
    assert!(engine.context_payload().contains("follow-up call has been scheduled"));

    let summary = engine.finish().await;
    assert_eq!(summary.phase, ScriptPhase::Closed(CloseReason::FollowUpScheduled));
}

#[tokio::test]
async fn lookup_survives_translation_failure() {
    let embedder = Arc::new(RecordingEmbedder::default());
    let translator: Arc<dyn Translator> = Arc::new(FailingTranslator);
    let kb = knowledge(embedder.clone(), Some(translator));

    let answer = knowledge_lookup(&kb, "সুদের হার কত?").await.unwrap();
    assert_eq!(
        answer,
        "Gold Saver pays 7.1% a year.\n\nDeposits are insured up to 5 lakh."
    );
    assert_eq!(*embedder.inputs.lock().unwrap(), vec!["সুদের হার কত?".to_string()]);
}

#[tokio::test]
async fn lookup_tool_answers_through_the_engine() {
    let embedder = Arc::new(RecordingEmbedder::default());
    let kb = knowledge(embedder.clone(), None);
    let llm = Arc::new(ScriptedLlm::new(vec![
        text("Hello"),
        tool_call(LOOKUP_INFORMATION, json!({"query": "What is the interest rate?"})),
        text("Gold Saver pays 7.1% a year."),
    ]));
    let (mut engine, _) = engine(llm.clone(), Arc::new(MemoryStore::new()), Some(kb), 3);
    assert!(engine.instructions().contains(LOOKUP_INFORMATION));
    engine.opening().await.unwrap();

    let reply = engine
        .handle_user_turn("What is the interest rate?")
        .await
        .unwrap();
    assert_eq!(reply.as_deref(), Some("Gold Saver pays 7.1% a year."));
    assert!(!engine.state().pending_lookup);
    assert_eq!(embedder.inputs.lock().unwrap().len(), 1);

    let requests = llm.requests.lock().unwrap();
    let tool_result = requests[2]
        .messages
        .iter()
        .find(|m| m.tool_call_id.is_some())
        .and_then(|m| m.content.clone())
        .unwrap();
    assert!(tool_result.contains("insured up to 5 lakh"));
}
