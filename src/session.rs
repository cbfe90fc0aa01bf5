//! The live agent in a call room: listen, segment, transcribe, answer, speak.

use crate::capabilities::{SpeechToText, TextToSpeech};
use crate::consts::FRAME_SAMPLES;
use crate::conversation_state::ConversationSummary;
use crate::error::SessionError;
use crate::media::{AudioFrame, RoomTransport};
use crate::providers::vad::{SpeechSegmenter, Vad};
use crate::script::ScriptEngine;
use crate::types::CallJob;
use crate::utils::{le_bytes_to_pcm, wav_to_pcm};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Keyboard-typing clips played while the agent is working on a reply, with their volumes.
const AMBIENT_CLIPS: &[(&str, f32)] = &[("keyboard_typing", 0.8), ("keyboard_typing2", 0.7)];
const FRAME_DURATION: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct AmbientClip {
    pub name: String,
    pub samples: Vec<i16>,
    pub volume: f32,
}

/// Background "thinking" audio bed.
#[derive(Debug, Clone, Default)]
pub struct AmbientAudio {
    pub clips: Vec<AmbientClip>,
}

impl AmbientAudio {
    pub fn from_clips(clips: Vec<AmbientClip>) -> Self {
        Self { clips }
    }

    /// Load the keyboard clips from `dir`.  Each clip is a 16kHz mono `.wav` or raw
    /// little-endian `.pcm` file; missing clips are skipped.
    pub async fn load(dir: &Path) -> std::io::Result<Self> {
        let mut clips = Vec::new();
        for (name, volume) in AMBIENT_CLIPS {
            for ext in ["wav", "pcm"] {
                let path = dir.join(format!("{name}.{ext}"));
                match tokio::fs::read(&path).await {
                    Ok(bytes) => {
                        let samples = if bytes.starts_with(b"RIFF") {
                            wav_to_pcm(&bytes).map_err(|e| {
                                std::io::Error::new(std::io::ErrorKind::InvalidData, e)
                            })?
                        } else {
                            le_bytes_to_pcm(&bytes)
                        };
                        clips.push(AmbientClip {
                            name: name.to_string(),
                            samples,
                            volume: *volume,
                        });
                        break;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e),
                }
            }
        }
        if clips.is_empty() {
            warn!(dir=%dir.display(), "no ambient clips found");
        }
        Ok(Self { clips })
    }

    pub fn is_empty(&self) -> bool {
        self.clips.iter().all(|c| c.samples.is_empty())
    }
}

/// Everything one agent session needs, handed over at start.
pub struct SessionDeps {
    pub job: Arc<CallJob>,
    pub identity: String,
    pub engine: ScriptEngine,
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<dyn TextToSpeech>,
    pub vad: Vad,
}

pub struct AgentSession;

impl AgentSession {
    /// Join the call room and start the turn loop.  Resolves as soon as the agent is in the
    /// room; cancelling `cancel` before that aborts the join.
    pub async fn start(
        transport: &dyn RoomTransport,
        deps: SessionDeps,
        cancel: CancellationToken,
    ) -> Result<SessionHandle, SessionError> {
        let room = deps.job.room.clone();
        let segmenter = deps.vad.segmenter().map_err(SessionError::Vad)?;
        let link = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            link = transport.join(&room, &deps.identity) => link?,
        };
        info!(room=%room, identity=%deps.identity, "agent joined call room");

        let (greet_tx, greet_rx) = oneshot::channel();
        let (thinking_tx, thinking_rx) = watch::channel(false);
        let turn_loop = TurnLoop {
            outbound: link.outbound.clone(),
            engine: deps.engine,
            stt: deps.stt,
            tts: deps.tts,
            language: deps.job.language.clone(),
            thinking: thinking_tx,
        };
        let task = tokio::spawn(turn_loop.run(
            link.inbound,
            segmenter,
            greet_rx,
            cancel.clone(),
        ));

        Ok(SessionHandle {
            task: Some(task),
            summary: None,
            outbound: link.outbound,
            thinking: thinking_rx,
            greet: Some(greet_tx),
            ambient: None,
            cancel,
        })
    }
}

/// Control surface of a running session.
pub struct SessionHandle {
    task: Option<JoinHandle<ConversationSummary>>,
    summary: Option<ConversationSummary>,
    outbound: mpsc::Sender<AudioFrame>,
    thinking: watch::Receiver<bool>,
    greet: Option<oneshot::Sender<()>>,
    ambient: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Let the agent open the conversation.  Only the first call has an effect.
    pub fn greet(&mut self) {
        if let Some(tx) = self.greet.take() {
            let _ = tx.send(());
        }
    }

    /// Start the thinking audio bed.  Returns false if it was already attached or there is
    /// nothing to play.
    pub fn attach_ambient(&mut self, ambient: AmbientAudio) -> bool {
        if self.ambient.is_some() || ambient.is_empty() {
            return false;
        }
        self.ambient = Some(tokio::spawn(play_ambient(
            ambient,
            self.outbound.clone(),
            self.thinking.clone(),
            self.cancel.clone(),
        )));
        true
    }

    pub fn ambient_attached(&self) -> bool {
        self.ambient.is_some()
    }

    /// Wait for the conversation to end on its own (remote hang-up or cancellation).
    pub async fn wait_until_ended(&mut self) -> Result<Option<ConversationSummary>, SessionError> {
        if let Some(task) = self.task.as_mut() {
            let summary = task.await.map_err(|e| SessionError::Task(e.to_string()))?;
            self.task = None;
            self.summary = Some(summary);
        }
        Ok(self.summary.clone())
    }

    /// Stop the turn loop and the audio bed.  Safe to call more than once.
    pub async fn shutdown(&mut self) -> Result<Option<ConversationSummary>, SessionError> {
        self.cancel.cancel();
        if let Some(ambient) = self.ambient.take() {
            ambient.abort();
        }
        self.wait_until_ended().await
    }
}

struct TurnLoop {
    outbound: mpsc::Sender<AudioFrame>,
    engine: ScriptEngine,
    stt: Arc<dyn SpeechToText>,
    tts: Arc<dyn TextToSpeech>,
    language: String,
    thinking: watch::Sender<bool>,
}

impl TurnLoop {
    async fn run(
        mut self,
        mut inbound: mpsc::Receiver<AudioFrame>,
        mut segmenter: SpeechSegmenter,
        mut greet: oneshot::Receiver<()>,
        cancel: CancellationToken,
    ) -> ConversationSummary {
        let mut greeted = false;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                signal = &mut greet, if !greeted => {
                    greeted = true;
                    if signal.is_ok() {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = self.open() => {}
                        }
                    }
                }
                frame = inbound.recv() => {
                    let Some(frame) = frame else {
                        debug!("room audio ended");
                        break;
                    };
                    if let Some(utterance) = segmenter.push(&frame) {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = self.answer(&utterance.samples) => {}
                        }
                    }
                }
            }
        }
        self.thinking.send_replace(false);
        self.engine.finish().await
    }

    async fn open(&mut self) {
        self.thinking.send_replace(true);
        let reply = self.engine.opening().await;
        self.thinking.send_replace(false);
        match reply {
            Ok(Some(text)) => self.speak(&text).await,
            Ok(None) => {}
            Err(e) => warn!(error=%e, "failed to generate opening line"),
        }
    }

    async fn answer(&mut self, samples: &[i16]) {
        self.thinking.send_replace(true);
        let reply = self.reply_to(samples).await;
        self.thinking.send_replace(false);
        if let Some(text) = reply {
            self.speak(&text).await;
        }
    }

    async fn reply_to(&mut self, samples: &[i16]) -> Option<String> {
        let text = match self.stt.transcribe(samples, &self.language).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => return None,
            Err(e) => {
                warn!(error=%e, "transcription failed");
                return None;
            }
        };
        debug!(user=%text, "user turn");
        match self.engine.handle_user_turn(&text).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error=%e, "failed to answer user turn");
                None
            }
        }
    }

    async fn speak(&mut self, text: &str) {
        let samples = match self.tts.synthesize(text, &self.language).await {
            Ok(samples) => samples,
            Err(e) => {
                warn!(error=%e, "speech synthesis failed");
                return;
            }
        };
        let mut ticker = interval(FRAME_DURATION);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        for chunk in samples.chunks(FRAME_SAMPLES) {
            ticker.tick().await;
            if self.outbound.send(AudioFrame::new(chunk.to_vec())).await.is_err() {
                break;
            }
        }
    }
}

/// Play the clips, in turn, whenever the agent is thinking.
async fn play_ambient(
    ambient: AmbientAudio,
    outbound: mpsc::Sender<AudioFrame>,
    mut thinking: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    let clips: Vec<&AmbientClip> = ambient.clips.iter().filter(|c| !c.samples.is_empty()).collect();
    if clips.is_empty() {
        return;
    }
    let mut next = 0;
    loop {
        while !*thinking.borrow() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                changed = thinking.changed() => if changed.is_err() { return },
            }
        }

        let clip = clips[next % clips.len()];
        next += 1;
        let mut ticker = interval(FRAME_DURATION);
        for chunk in clip.samples.chunks(FRAME_SAMPLES) {
            if !*thinking.borrow() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let frame = AudioFrame::new(chunk.to_vec()).scaled(clip.volume);
            if outbound.send(frame).await.is_err() {
                return;
            }
        }
    }
}
