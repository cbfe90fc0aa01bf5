//! Places a call and owns it until teardown.
//!
//! The agent session and the SIP dial-out start together.  Ambient audio and the greeting wait
//! for the callee to be confirmed in the room, and the post-call finalizers run exactly once
//! when the call is torn down, whichever way it ends.

use crate::capabilities::Capabilities;
use crate::config::{Config, Features, ManifestRetryPolicy, Persona};
use crate::consts::PARTICIPANT_POLL_MILLIS;
use crate::error::{CallError, LiveKitError};
use crate::livekit::{ParticipantDirectory, SipDialer};
use crate::livekit_types::{CreateSipParticipantRequest, ParticipantState};
use crate::media::RoomTransport;
use crate::post_call::{
    flush_transcript, ArchiveJob, FinalizerReport, Finalizers, TeardownContext,
};
use crate::recording::{ManifestFetcher, RecordingCoordinator, RecordingJob};
use crate::script::ScriptEngine;
use crate::session::{AgentSession, AmbientAudio, SessionDeps, SessionHandle};
use crate::store::CallStore;
use crate::tools::ToolRegistry;
use crate::types::{CallJob, SharedTranscript};

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-call knobs, fixed for the life of the process.
#[derive(Debug, Clone)]
pub struct CallSettings {
    pub agent_identity: String,
    pub sip_trunk_id: String,
    pub participant_join_timeout: Duration,
    pub max_call_duration: Duration,
    pub manifest_retry: ManifestRetryPolicy,
    pub transcript_dir: PathBuf,
    pub features: Features,
    pub persona: Persona,
    /// Thinking bed attached once the callee has joined.
    pub ambient: Option<AmbientAudio>,
}

impl CallSettings {
    /// Settings taken from `config`.  Ambient audio is loaded separately.
    pub fn from_config(config: &Config) -> Self {
        Self {
            agent_identity: config.livekit.agent_identity.clone(),
            sip_trunk_id: config.livekit.sip_trunk_id.clone(),
            participant_join_timeout: config.participant_join_timeout,
            max_call_duration: config.max_call_duration,
            manifest_retry: config.manifest_retry.clone(),
            transcript_dir: config.transcript_dir.clone(),
            features: config.features,
            persona: config.persona.clone(),
            ambient: None,
        }
    }
}

/// Why a connected call came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The callee left the room.
    ParticipantLeft,
    /// The agent's turn loop stopped, e.g. the room audio closed.
    SessionEnded,
    MaxDuration,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndReason::ParticipantLeft => "participant_left",
            EndReason::SessionEnded => "session_ended",
            EndReason::MaxDuration => "max_duration",
        };
        f.write_str(s)
    }
}

/// A call whose callee answered and joined the room.
pub struct CallOutcome {
    pub connected: bool,
    pub session: CallSession,
}

/// Everything needed to wait for a live call to end and to tear it down.
pub struct CallSession {
    job: Arc<CallJob>,
    handle: SessionHandle,
    participants: Arc<dyn ParticipantDirectory>,
    finalizers: Finalizers,
    connected: bool,
    max_duration: Duration,
}

impl CallSession {
    pub fn job(&self) -> &CallJob {
        &self.job
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Finalizers that will run at teardown.
    pub fn finalizer_count(&self) -> usize {
        self.finalizers.len()
    }

    /// Resolve when the callee hangs up, the agent session stops, or the call hits its
    /// maximum duration.
    pub async fn wait_until_ended(&mut self) -> EndReason {
        let room = self.job.room.as_str();
        let identity = self.job.phone_number.as_str();
        let max_duration = self.max_duration;
        let participants = &self.participants;
        let handle = &mut self.handle;
        tokio::select! {
            ended = handle.wait_until_ended() => {
                if let Err(e) = ended {
                    warn!(room, error=%e, "agent session ended abnormally");
                }
                EndReason::SessionEnded
            }
            _ = until_participant_left(participants.as_ref(), room, identity) => {
                EndReason::ParticipantLeft
            }
            _ = sleep(max_duration) => EndReason::MaxDuration,
        }
    }

    /// Stop the agent, drop the callee from the room, then run every finalizer.
    pub async fn teardown(mut self, reason: EndReason) -> Vec<FinalizerReport> {
        let room = self.job.room.clone();
        match self.handle.shutdown().await {
            Ok(summary) => info!(room=%room, %reason, summary=?summary, "call ended"),
            Err(e) => warn!(room=%room, %reason, error=%e, "agent session did not stop cleanly"),
        }
        if let Err(e) = self
            .participants
            .remove_participant(&room, &self.job.phone_number)
            .await
        {
            debug!(room=%room, error=%e, "callee already gone");
        }
        self.finalizers
            .run_all(TeardownContext {
                connected: self.connected,
                reason: reason.to_string(),
            })
            .await
    }
}

/// Shared dependencies of every call, injected at start-up.
pub struct CallCoordinator {
    pub dialer: Arc<dyn SipDialer>,
    pub participants: Arc<dyn ParticipantDirectory>,
    pub transport: Arc<dyn RoomTransport>,
    /// `None` when recording is not configured.
    pub recorder: Option<Arc<RecordingCoordinator>>,
    pub manifests: Arc<dyn ManifestFetcher>,
    pub store: Arc<dyn CallStore>,
    pub capabilities: Arc<Capabilities>,
    pub settings: CallSettings,
}

/// A recording start running alongside the dial.
struct PendingRecording {
    recorder: Arc<RecordingCoordinator>,
    task: JoinHandle<Option<RecordingJob>>,
}

impl PendingRecording {
    /// Cancel the start if it is still in flight; stop the egress if it got going.
    async fn abandon(self) {
        self.task.abort();
        if let Ok(Some(recording)) = self.task.await {
            if let Err(e) = self.recorder.stop_recording(&recording).await {
                warn!(error=%e, "failed to stop recording of abandoned call");
            }
        }
    }
}

impl CallCoordinator {
    /// Place the call and bring the agent up.  Returns once the callee is confirmed in the room
    /// and the agent has been told to greet them.
    pub async fn start_call(&self, job: Arc<CallJob>) -> Result<CallOutcome, CallError> {
        let settings = &self.settings;
        let cancel = CancellationToken::new();
        let transcript = SharedTranscript::default();

        let mut finalizers = Finalizers::new();
        let (flushed_tx, flushed_rx) = oneshot::channel();
        {
            let dir = settings.transcript_dir.clone();
            let room = job.room.clone();
            let transcript = transcript.clone();
            finalizers.register("transcript_flush", move |_| {
                flush_transcript(dir, room, transcript, flushed_tx)
            });
        }

        let recording = self.spawn_recording(&job);

        let caps = &self.capabilities;
        let engine = ScriptEngine::new(
            job.clone(),
            settings.persona.clone(),
            caps.llm.clone(),
            ToolRegistry::for_call(&settings.features, caps.knowledge.is_some()),
            caps.knowledge.clone(),
            self.store.clone(),
            transcript,
        );
        let deps = SessionDeps {
            job: job.clone(),
            identity: settings.agent_identity.clone(),
            engine,
            stt: caps.stt.clone(),
            tts: caps.tts.clone(),
            vad: caps.vad.clone(),
        };
        let request = CreateSipParticipantRequest {
            sip_trunk_id: settings.sip_trunk_id.clone(),
            sip_call_to: job.phone_number.clone(),
            room_name: job.room.clone(),
            participant_identity: job.phone_number.clone(),
            participant_name: job.customer_name.clone(),
            wait_until_answered: true,
        };

        info!(call_id=%job.call_id, room=%job.room, "dialing");
        let dial = async {
            let dialed = self.dialer.dial(&request).await;
            if dialed.is_err() {
                cancel.cancel();
            }
            dialed
        };
        let (dialed, started) = tokio::join!(
            dial,
            AgentSession::start(self.transport.as_ref(), deps, cancel.clone())
        );

        if let Err(e) = dialed {
            let err = dial_failure(e);
            warn!(call_id=%job.call_id, error=%err, "dial failed");
            self.abandon(started.ok(), recording, finalizers, "dial_failed")
                .await;
            return Err(err);
        }
        info!(call_id=%job.call_id, "callee answered");

        let mut handle = match started {
            Ok(handle) => handle,
            Err(e) => {
                warn!(call_id=%job.call_id, error=%e, "agent session failed to start");
                self.remove_callee(&job).await;
                self.abandon(None, recording, finalizers, "session_failed")
                    .await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.wait_for_participant(&job).await {
            warn!(call_id=%job.call_id, error=%e, "callee never joined the room");
            self.remove_callee(&job).await;
            self.abandon(Some(handle), recording, finalizers, "join_timeout")
                .await;
            return Err(e);
        }

        if let Some(ambient) = settings.ambient.clone() {
            if handle.attach_ambient(ambient) {
                debug!(room=%job.room, "ambient audio attached");
            }
        }
        handle.greet();

        if let Some(PendingRecording { recorder, task }) = recording {
            let archive = ArchiveJob {
                job: job.clone(),
                recording: task,
                recorder,
                manifests: self.manifests.clone(),
                store: self.store.clone(),
                policy: settings.manifest_retry.clone(),
                transcript_flushed: flushed_rx,
            };
            finalizers.register("archive", move |ctx| async move {
                archive.run(ctx).await.map(|_| ())
            });
        }

        Ok(CallOutcome {
            connected: true,
            session: CallSession {
                job,
                handle,
                participants: self.participants.clone(),
                finalizers,
                connected: true,
                max_duration: settings.max_call_duration,
            },
        })
    }

    /// Start the call, wait for it to end and tear it down.
    pub async fn run_call(&self, job: Arc<CallJob>) -> Result<Vec<FinalizerReport>, CallError> {
        let CallOutcome { mut session, .. } = self.start_call(job).await?;
        let reason = session.wait_until_ended().await;
        Ok(session.teardown(reason).await)
    }

    fn spawn_recording(&self, job: &Arc<CallJob>) -> Option<PendingRecording> {
        if !self.settings.features.recording {
            return None;
        }
        let recorder = self.recorder.clone()?;
        let task = {
            let recorder = recorder.clone();
            let job = job.clone();
            tokio::spawn(async move {
                match recorder.start_recording(&job).await {
                    Ok(recording) => Some(recording),
                    Err(e) => {
                        warn!(room=%job.room, error=%e, "recording did not start");
                        None
                    }
                }
            })
        };
        Some(PendingRecording { recorder, task })
    }

    /// Poll the room until the callee is in it.
    async fn wait_for_participant(&self, job: &CallJob) -> Result<(), CallError> {
        let limit = self.settings.participant_join_timeout;
        let poll = async {
            let mut ticker = interval(Duration::from_millis(PARTICIPANT_POLL_MILLIS));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self
                    .participants
                    .participant_state(&job.room, &job.phone_number)
                    .await
                {
                    Ok(Some(state)) if state.is_present() => return,
                    Ok(state) => debug!(room=%job.room, state=?state, "waiting for callee"),
                    Err(e) => debug!(room=%job.room, error=%e, "presence check failed"),
                }
            }
        };
        timeout(limit, poll)
            .await
            .map_err(|_| CallError::ParticipantJoinTimeout {
                identity: job.phone_number.clone(),
                waited_secs: limit.as_secs(),
            })?;
        info!(room=%job.room, "callee joined");
        Ok(())
    }

    async fn remove_callee(&self, job: &CallJob) {
        if let Err(e) = self
            .participants
            .remove_participant(&job.room, &job.phone_number)
            .await
        {
            debug!(room=%job.room, error=%e, "could not remove callee");
        }
    }

    /// Tear down a call that never connected.  Only the transcript flush runs.
    async fn abandon(
        &self,
        session: Option<SessionHandle>,
        recording: Option<PendingRecording>,
        finalizers: Finalizers,
        reason: &str,
    ) {
        if let Some(mut session) = session {
            if let Err(e) = session.shutdown().await {
                debug!(error=%e, "agent session did not stop cleanly");
            }
        }
        if let Some(recording) = recording {
            recording.abandon().await;
        }
        finalizers
            .run_all(TeardownContext {
                connected: false,
                reason: reason.to_string(),
            })
            .await;
    }
}

/// Resolve once `identity` is no longer in `room`.
async fn until_participant_left(participants: &dyn ParticipantDirectory, room: &str, identity: &str) {
    let mut ticker = interval(Duration::from_millis(PARTICIPANT_POLL_MILLIS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match participants.participant_state(room, identity).await {
            Ok(None) | Ok(Some(ParticipantState::Disconnected)) => return,
            Ok(Some(_)) => {}
            Err(e) => debug!(room, error=%e, "presence check failed"),
        }
    }
}

fn dial_failure(e: LiveKitError) -> CallError {
    match e {
        LiveKitError::Twirp {
            code,
            msg,
            sip_status_code,
            sip_status,
        } => {
            let sip_status = match (sip_status_code, sip_status) {
                (Some(code), Some(status)) => Some(format!("{code} {status}")),
                (code, status) => code.or(status),
            };
            CallError::DialFailed {
                reason: format!("{code}: {msg}"),
                sip_status,
            }
        }
        other => CallError::DialFailed {
            reason: other.to_string(),
            sip_status: None,
        },
    }
}
