use dialout_agent::capabilities::{Capabilities, KnowledgeBase, Translator};
use dialout_agent::config::Config;
use dialout_agent::consts::LOOKUP_TOP_K;
use dialout_agent::coordinator::{CallCoordinator, CallSettings};
use dialout_agent::dispatch::DispatchRegistry;
use dialout_agent::handlers;
use dialout_agent::livekit::LiveKitClient;
use dialout_agent::media::WsAudioBridge;
use dialout_agent::providers::google_translate::GoogleTranslate;
use dialout_agent::providers::openai::{OpenAIChat, OpenAIEmbedder};
use dialout_agent::providers::pinecone::PineconeIndex;
use dialout_agent::providers::sarvam::{SarvamStt, SarvamTts};
use dialout_agent::providers::vad::{Vad, VadConfig};
use dialout_agent::recording::{HttpManifestFetcher, RecordingCoordinator};
use dialout_agent::session::AmbientAudio;
use dialout_agent::store::{CallStore, MemoryStore, PgStore};
use dialout_agent::types::AppState;

use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("no .env loaded: {e}");
    }
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(true)
                .with_line_number(true),
        )
        .with(tracing_subscriber::filter::Targets::new().with_targets([
            ("hyper", tracing_subscriber::filter::LevelFilter::OFF),
            ("sqlx", tracing_subscriber::filter::LevelFilter::WARN),
            ("dialout_agent", tracing_subscriber::filter::LevelFilter::DEBUG),
        ]));
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let config = Config::from_env().expect("invalid configuration");
    info!(config=?config, "starting dial-out agent");

    let http_client = reqwest::Client::new();
    let livekit = Arc::new(LiveKitClient::new(http_client.clone(), config.livekit.clone()));

    let knowledge = config.pinecone.clone().map(|pinecone| {
        let translator = config.google_translate_api_key.clone().map(|key| {
            Arc::new(GoogleTranslate::new(http_client.clone(), key)) as Arc<dyn Translator>
        });
        let namespace = pinecone.namespace.clone();
        Arc::new(KnowledgeBase {
            embedder: Arc::new(OpenAIEmbedder::new(
                http_client.clone(),
                &config.openai_api_key,
                &config.embedding_model,
            )),
            index: Arc::new(PineconeIndex::new(http_client.clone(), pinecone)),
            translator,
            namespace,
            top_k: LOOKUP_TOP_K,
        })
    });

    let capabilities = Arc::new(Capabilities {
        stt: Arc::new(SarvamStt::new(
            http_client.clone(),
            &config.sarvam_api_key,
            &config.stt_model,
        )),
        tts: Arc::new(SarvamTts::new(
            http_client.clone(),
            &config.sarvam_api_key,
            &config.tts_model,
            &config.tts_speaker,
        )),
        llm: Arc::new(OpenAIChat::new(
            http_client.clone(),
            &config.openai_api_key,
            &config.llm_model,
            config.llm_temperature,
        )),
        vad: Vad::silero(VadConfig::default()),
        knowledge,
    });
    capabilities
        .vad
        .segmenter()
        .expect("voice activity detector unavailable");

    let store: Arc<dyn CallStore> = match &config.database_url {
        Some(url) => Arc::new(PgStore::connect(url).await.expect("database unavailable")),
        None => {
            warn!("DATABASE_URL not set; call records are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let mut settings = CallSettings::from_config(&config);
    if let Some(dir) = &config.ambient_clip_dir {
        match AmbientAudio::load(dir).await {
            Ok(ambient) if !ambient.is_empty() => settings.ambient = Some(ambient),
            Ok(_) => {}
            Err(e) => warn!(dir=%dir.display(), error=%e, "failed to load ambient clips"),
        }
    }

    let recorder = config
        .storage
        .clone()
        .map(|storage| Arc::new(RecordingCoordinator::new(livekit.clone(), storage)));

    let coordinator = Arc::new(CallCoordinator {
        dialer: livekit.clone(),
        participants: livekit.clone(),
        transport: Arc::new(WsAudioBridge::new(&config.media_bridge_url, livekit.clone())),
        recorder,
        manifests: Arc::new(HttpManifestFetcher::new(http_client.clone())),
        store: store.clone(),
        capabilities,
        settings,
    });

    let app_state = Arc::new(AppState {
        coordinator,
        dispatches: DispatchRegistry::new(),
        store,
        default_language: config.default_language.clone(),
    });

    let app = handlers::router(app_state);

    info!(addr=%config.listen_addr, "listening");
    axum::Server::bind(&config.listen_addr)
        .serve(app.into_make_service())
        .await
        .unwrap();
}
