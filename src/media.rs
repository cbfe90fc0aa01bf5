use crate::error::SessionError;
use crate::livekit::LiveKitClient;
use crate::utils::{le_bytes_to_pcm, pcm_to_le_bytes};

use async_trait::async_trait;
use futures_util::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, client::IntoClientRequest, http},
};
use tracing::{debug, trace, warn};

const INBOUND_CAPACITY: usize = 256;
const OUTBOUND_CAPACITY: usize = 64;

/// Mono PCM16 audio at the bridge sample rate, normally 20ms long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// Copy of this frame with every sample multiplied by `volume` (0.0..=1.0).
    pub fn scaled(&self, volume: f32) -> Self {
        let volume = volume.clamp(0.0, 1.0);
        Self {
            samples: self
                .samples
                .iter()
                .map(|&s| (s as f32 * volume) as i16)
                .collect(),
        }
    }
}

/// Audio legs of an agent that has joined a call room.  Dropping `outbound` leaves the room.
pub struct MediaLink {
    /// What the room hears, mixed, excluding the agent itself.
    pub inbound: mpsc::Receiver<AudioFrame>,
    /// What the agent says.
    pub outbound: mpsc::Sender<AudioFrame>,
}

/// Joins an agent to a call room's audio.
#[async_trait]
pub trait RoomTransport: Send + Sync {
    async fn join(&self, room: &str, identity: &str) -> Result<MediaLink, SessionError>;
}

/// Room audio over a WebSocket bridge that exchanges binary little-endian PCM16 frames.
pub struct WsAudioBridge {
    base_url: String,
    livekit: Arc<LiveKitClient>,
}

impl WsAudioBridge {
    pub fn new(base_url: impl Into<String>, livekit: Arc<LiveKitClient>) -> Self {
        Self {
            base_url: base_url.into(),
            livekit,
        }
    }
}

#[async_trait]
impl RoomTransport for WsAudioBridge {
    async fn join(&self, room: &str, identity: &str) -> Result<MediaLink, SessionError> {
        let token = self
            .livekit
            .join_token(room, identity)
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        let uri = format!(
            "{}/rooms/{room}/audio?identity={identity}",
            self.base_url.trim_end_matches('/')
        );
        let mut rq = uri
            .into_client_request()
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        let auth = http::HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        rq.headers_mut().insert(http::header::AUTHORIZATION, auth);

        trace!(room = %room, "connecting to media bridge");
        let (ws_stream, _) = connect_async(rq)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        let (mut bridge_sink, mut bridge_stream) = ws_stream.split();

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<AudioFrame>(OUTBOUND_CAPACITY);

        let room_name = room.to_string();
        tokio::spawn(async move {
            while let Some(msg) = bridge_stream.next().await {
                match msg {
                    Ok(tungstenite::Message::Binary(bytes)) => {
                        let frame = AudioFrame::new(le_bytes_to_pcm(&bytes));
                        if inbound_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(tungstenite::Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error=%e, room=%room_name, "media bridge receive failed");
                        break;
                    }
                }
            }
            debug!(room=%room_name, "media bridge inbound stream ended");
        });

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let msg = tungstenite::Message::Binary(pcm_to_le_bytes(&frame.samples));
                if let Err(e) = bridge_sink.send(msg).await {
                    warn!(error=%e, "media bridge send failed");
                    break;
                }
            }
            let _ = bridge_sink.close().await;
        });

        Ok(MediaLink {
            inbound: inbound_rx,
            outbound: outbound_tx,
        })
    }
}
