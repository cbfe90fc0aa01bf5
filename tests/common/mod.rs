//! In-process stand-ins for every external dependency of a call.
#![allow(dead_code)]

use dialout_agent::capabilities::{
    Capabilities, Completion, CompletionRequest, Embedder, KnowledgeBase, LanguageModel, Passage,
    SpeechToText, TextToSpeech, ToolCall, Translator, VectorIndex,
};
use dialout_agent::config::{BlobStorageConfig, Features, ManifestRetryPolicy, Persona};
use dialout_agent::coordinator::{CallCoordinator, CallSettings};
use dialout_agent::error::{LiveKitError, ProviderError, RecordingError, SessionError};
use dialout_agent::livekit::{ParticipantDirectory, RecordingBackend, SipDialer};
use dialout_agent::livekit_types::{
    CreateSipParticipantRequest, EgressInfo, EgressManifest, ParticipantState,
    RoomCompositeEgressRequest, SipParticipantInfo,
};
use dialout_agent::media::{AudioFrame, MediaLink, RoomTransport};
use dialout_agent::providers::vad::{SpeechDetector, Vad, VadConfig};
use dialout_agent::recording::{ManifestFetcher, RecordingCoordinator};
use dialout_agent::session::{AmbientAudio, AmbientClip};
use dialout_agent::store::MemoryStore;
use dialout_agent::types::{CallJob, CustomerProfile, ProductCandidate};

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;

pub const STORAGE_ACCOUNT: &str = "ringstorage";
pub const STORAGE_CONTAINER: &str = "recordings";

pub fn storage() -> BlobStorageConfig {
    BlobStorageConfig::new(STORAGE_ACCOUNT, STORAGE_CONTAINER)
}

pub fn products(count: usize) -> Vec<ProductCandidate> {
    ["Gold Saver", "Balanced Growth Fund", "Equity Plus"]
        .iter()
        .take(count)
        .enumerate()
        .map(|(i, name)| ProductCandidate {
            name: name.to_string(),
            category: "Investment".to_string(),
            risk_level: ["Low", "Medium", "High"][i].to_string(),
            description: format!("{name} description"),
        })
        .collect()
}

pub fn job(call_id: &str) -> CallJob {
    let profile: CustomerProfile =
        serde_json::from_value(json!({"customerId": 15634602, "age": 42, "activeMember": 1}))
            .unwrap();
    CallJob {
        call_id: call_id.to_string(),
        room: format!("call-{call_id}"),
        phone_number: "+919547234545".to_string(),
        customer_name: "Asha".to_string(),
        language: "bn-IN".to_string(),
        profile,
        products: products(3),
        created_at: OffsetDateTime::now_utc(),
    }
}

/// SIP dialer that answers, or fails with a Twirp error when `failure` is set.
#[derive(Default)]
pub struct FakeDialer {
    pub calls: AtomicU32,
    pub requests: Mutex<Vec<CreateSipParticipantRequest>>,
    pub failure: Option<(String, String)>,
}

impl FakeDialer {
    pub fn answering() -> Self {
        Self::default()
    }

    pub fn failing(sip_status_code: &str, sip_status: &str) -> Self {
        Self {
            failure: Some((sip_status_code.to_string(), sip_status.to_string())),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SipDialer for FakeDialer {
    async fn dial(
        &self,
        request: &CreateSipParticipantRequest,
    ) -> Result<SipParticipantInfo, LiveKitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        match &self.failure {
            Some((code, status)) => Err(LiveKitError::Twirp {
                code: "unavailable".to_string(),
                msg: "sip call failed".to_string(),
                sip_status_code: Some(code.clone()),
                sip_status: Some(status.clone()),
            }),
            None => Ok(SipParticipantInfo {
                participant_id: "PA_callee".to_string(),
                participant_identity: request.participant_identity.clone(),
                room_name: request.room_name.clone(),
                sip_call_id: "SCL_1".to_string(),
            }),
        }
    }
}

/// Room membership: the callee is present until `hang_up` is called.
pub struct FakeDirectory {
    pub joined: AtomicBool,
    pub hung_up: AtomicBool,
    pub removed: Mutex<Vec<String>>,
}

impl FakeDirectory {
    pub fn present() -> Self {
        Self {
            joined: AtomicBool::new(true),
            hung_up: AtomicBool::new(false),
            removed: Mutex::new(Vec::new()),
        }
    }

    pub fn never_joins() -> Self {
        Self {
            joined: AtomicBool::new(false),
            ..Self::present()
        }
    }

    pub fn hang_up(&self) {
        self.hung_up.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ParticipantDirectory for FakeDirectory {
    async fn participant_state(
        &self,
        _room: &str,
        _identity: &str,
    ) -> Result<Option<ParticipantState>, LiveKitError> {
        if self.hung_up.load(Ordering::SeqCst) {
            return Ok(None);
        }
        if self.joined.load(Ordering::SeqCst) {
            Ok(Some(ParticipantState::Active))
        } else {
            Ok(Some(ParticipantState::Joining))
        }
    }

    async fn remove_participant(&self, room: &str, _identity: &str) -> Result<(), LiveKitError> {
        self.removed.lock().unwrap().push(room.to_string());
        Ok(())
    }
}

/// Joins succeed after `join_delay` (zero unless set); both audio legs stay open until the test
/// ends.
#[derive(Default)]
pub struct FakeTransport {
    pub joins: AtomicU32,
    pub join_delay: Mutex<Duration>,
    links: Mutex<Vec<(mpsc::Sender<AudioFrame>, mpsc::Receiver<AudioFrame>)>>,
}

impl FakeTransport {
    pub fn delay_joins(&self, delay: Duration) {
        *self.join_delay.lock().unwrap() = delay;
    }

    /// Number of joins that completed and handed out a media link.
    pub fn links(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    /// Frames the agent has played into the room so far.
    pub fn frames_sent(&self) -> usize {
        let mut links = self.links.lock().unwrap();
        let mut sent = 0;
        for (_, outbound) in links.iter_mut() {
            while outbound.try_recv().is_ok() {
                sent += 1;
            }
        }
        sent
    }
}

#[async_trait]
impl RoomTransport for FakeTransport {
    async fn join(&self, _room: &str, _identity: &str) -> Result<MediaLink, SessionError> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        let delay = *self.join_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let (in_tx, in_rx) = mpsc::channel(64);
        let (out_tx, out_rx) = mpsc::channel(1024);
        self.links.lock().unwrap().push((in_tx, out_rx));
        Ok(MediaLink {
            inbound: in_rx,
            outbound: out_tx,
        })
    }
}

/// Egress ids are `EG_{room}`.  Starts fail once `fail_starts` is set.
#[derive(Default)]
pub struct FakeRecorder {
    pub starts: AtomicU32,
    pub fail_starts: AtomicBool,
    pub stops: Mutex<Vec<String>>,
}

#[async_trait]
impl RecordingBackend for FakeRecorder {
    async fn start_room_composite(
        &self,
        request: &RoomCompositeEgressRequest,
    ) -> Result<EgressInfo, LiveKitError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_starts.load(Ordering::SeqCst) {
            return Err(LiveKitError::Twirp {
                code: "resource_exhausted".to_string(),
                msg: "no egress workers available".to_string(),
                sip_status_code: None,
                sip_status: None,
            });
        }
        Ok(EgressInfo {
            egress_id: format!("EG_{}", request.room_name),
            room_name: request.room_name.clone(),
            status: None,
        })
    }

    async fn stop_egress(&self, egress_id: &str) -> Result<EgressInfo, LiveKitError> {
        self.stops.lock().unwrap().push(egress_id.to_string());
        Ok(EgressInfo {
            egress_id: egress_id.to_string(),
            ..EgressInfo::default()
        })
    }
}

/// Serves a three-segment manifest, except for URLs containing one of `missing`.
#[derive(Default)]
pub struct FakeManifests {
    pub missing: Vec<String>,
    pub fetched: Mutex<Vec<String>>,
}

impl FakeManifests {
    pub fn missing_for(rooms: &[&str]) -> Self {
        Self {
            missing: rooms.iter().map(|r| r.to_string()).collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ManifestFetcher for FakeManifests {
    async fn fetch(&self, url: &str) -> Result<EgressManifest, RecordingError> {
        self.fetched.lock().unwrap().push(url.to_string());
        if self.missing.iter().any(|m| url.contains(m.as_str())) {
            return Err(RecordingError::ManifestUnavailable {
                url: url.to_string(),
                reason: "status 404 Not Found".to_string(),
            });
        }
        Ok(serde_json::from_value(json!({
            "egress_id": "EG_R1",
            "started_at": "1717000000000000000",
            "ended_at": 1717000060000000000i64,
            "playlists": [{
                "name": "call.m3u8",
                "segments": [
                    {"name": "s_0.ts", "location": "call-recording/s_0.ts"},
                    {"name": "s_1.ts", "location": "https://ringstorage.blob.core.windows.net/call-recording/s_1.ts"},
                    {"name": "s_2.ts", "location": "https://ringstorage.blob.core.windows.net/recordings/call-recording/s_2.ts"}
                ]
            }]
        }))
        .unwrap())
    }
}

/// Language model that plays back scripted completions, then answers with plain text.
#[derive(Default)]
pub struct ScriptedLlm {
    pub replies: Mutex<VecDeque<Completion>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Completion>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

pub fn text(reply: &str) -> Completion {
    Completion {
        text: Some(reply.to_string()),
        tool_calls: Vec::new(),
    }
}

pub fn tool_call(name: &str, arguments: serde_json::Value) -> Completion {
    Completion {
        text: None,
        tool_calls: vec![ToolCall {
            id: format!("call_{name}"),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }],
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.replies.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| text("Thank you for your time.")))
    }
}

pub struct FixedStt(pub String);

#[async_trait]
impl SpeechToText for FixedStt {
    async fn transcribe(&self, _audio: &[i16], _language: &str) -> Result<String, ProviderError> {
        Ok(self.0.clone())
    }
}

pub struct ToneTts;

#[async_trait]
impl TextToSpeech for ToneTts {
    async fn synthesize(&self, _text: &str, _language: &str) -> Result<Vec<i16>, ProviderError> {
        Ok(vec![1_000; 320])
    }
}

/// Records what it was asked to embed.
#[derive(Default)]
pub struct RecordingEmbedder {
    pub inputs: Mutex<Vec<String>>,
}

#[async_trait]
impl Embedder for RecordingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.inputs.lock().unwrap().push(text.to_string());
        Ok(vec![0.1, 0.2, 0.3])
    }
}

pub struct StaticIndex(pub Vec<Passage>);

#[async_trait]
impl VectorIndex for StaticIndex {
    async fn query(
        &self,
        _vector: &[f32],
        top_k: usize,
        _namespace: &str,
    ) -> Result<Vec<Passage>, ProviderError> {
        Ok(self.0.iter().take(top_k).cloned().collect())
    }
}

pub struct FailingTranslator;

#[async_trait]
impl Translator for FailingTranslator {
    async fn translate(&self, _text: &str, _target: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Status {
            provider: "google-translate",
            status: 503,
            body: "backend unavailable".to_string(),
        })
    }
}

pub fn passage(id: &str, score: f32, text: &str) -> Passage {
    Passage {
        id: id.to_string(),
        score,
        text: text.to_string(),
    }
}

pub fn knowledge(
    embedder: Arc<RecordingEmbedder>,
    translator: Option<Arc<dyn Translator>>,
) -> Arc<KnowledgeBase> {
    Arc::new(KnowledgeBase {
        embedder,
        index: Arc::new(StaticIndex(vec![
            passage("p1", 0.92, "Gold Saver pays 7.1% a year."),
            passage("p2", 0.81, "Deposits are insured up to 5 lakh."),
        ])),
        translator,
        namespace: "axis-products".to_string(),
        top_k: 10,
    })
}

/// Any non-zero sample counts as speech.
pub struct LevelDetector;

impl SpeechDetector for LevelDetector {
    fn is_speech(&mut self, frame: &[i16]) -> bool {
        frame.iter().any(|&s| s != 0)
    }
}

pub fn level_vad() -> Vad {
    Vad::with_factory(VadConfig::default(), |_| {
        Ok(Box::new(LevelDetector) as Box<dyn SpeechDetector>)
    })
}

pub fn capabilities(llm: Arc<ScriptedLlm>) -> Arc<Capabilities> {
    Arc::new(Capabilities {
        stt: Arc::new(FixedStt("hello".to_string())),
        tts: Arc::new(ToneTts),
        llm,
        vad: level_vad(),
        knowledge: None,
    })
}

pub fn ambient() -> AmbientAudio {
    AmbientAudio::from_clips(vec![
        AmbientClip {
            name: "keyboard_typing".to_string(),
            samples: vec![500; 640],
            volume: 0.8,
        },
        AmbientClip {
            name: "keyboard_typing2".to_string(),
            samples: vec![400; 640],
            volume: 0.7,
        },
    ])
}

pub fn settings(transcript_dir: &Path) -> CallSettings {
    CallSettings {
        agent_identity: "dialout-agent".to_string(),
        sip_trunk_id: "ST_trunk".to_string(),
        participant_join_timeout: Duration::from_secs(5),
        max_call_duration: Duration::from_secs(600),
        manifest_retry: ManifestRetryPolicy {
            settle_delay: Duration::ZERO,
            max_attempts: 1,
            backoff: Duration::from_millis(10),
        },
        transcript_dir: transcript_dir.to_path_buf(),
        features: Features {
            rag_lookup: false,
            recording: true,
        },
        persona: Persona::default(),
        ambient: Some(ambient()),
    }
}

/// Handles on every fake a coordinator was built from.
pub struct Harness {
    pub coordinator: Arc<CallCoordinator>,
    pub dialer: Arc<FakeDialer>,
    pub directory: Arc<FakeDirectory>,
    pub transport: Arc<FakeTransport>,
    pub recorder: Arc<FakeRecorder>,
    pub manifests: Arc<FakeManifests>,
    pub store: Arc<MemoryStore>,
    pub llm: Arc<ScriptedLlm>,
}

pub fn harness(
    transcript_dir: &Path,
    dialer: FakeDialer,
    directory: FakeDirectory,
    manifests: FakeManifests,
) -> Harness {
    harness_with(transcript_dir, dialer, directory, manifests, |_| {})
}

pub fn harness_with(
    transcript_dir: &Path,
    dialer: FakeDialer,
    directory: FakeDirectory,
    manifests: FakeManifests,
    tweak: impl FnOnce(&mut CallSettings),
) -> Harness {
    let mut settings = settings(transcript_dir);
    tweak(&mut settings);
    let dialer = Arc::new(dialer);
    let directory = Arc::new(directory);
    let transport = Arc::new(FakeTransport::default());
    let recorder = Arc::new(FakeRecorder::default());
    let manifests = Arc::new(manifests);
    let store = Arc::new(MemoryStore::new());
    let llm = Arc::new(ScriptedLlm::default());
    let coordinator = Arc::new(CallCoordinator {
        dialer: dialer.clone(),
        participants: directory.clone(),
        transport: transport.clone(),
        recorder: Some(Arc::new(RecordingCoordinator::new(
            recorder.clone(),
            storage(),
        ))),
        manifests: manifests.clone(),
        store: store.clone(),
        capabilities: capabilities(llm.clone()),
        settings,
    });
    Harness {
        coordinator,
        dialer,
        directory,
        transport,
        recorder,
        manifests,
        store,
        llm,
    }
}
