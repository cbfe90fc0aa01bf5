//! JSON shapes of the LiveKit Twirp endpoints and of the egress segment manifest.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

#[derive(Serialize, Debug, Clone)]
pub struct CreateSipParticipantRequest {
    pub sip_trunk_id: String,
    pub sip_call_to: String,
    pub room_name: String,
    pub participant_identity: String,
    pub participant_name: String,
    /// Block until the callee answers or the call definitively fails.
    pub wait_until_answered: bool,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SipParticipantInfo {
    #[serde(default)]
    pub participant_id: String,
    #[serde(default)]
    pub participant_identity: String,
    #[serde(default)]
    pub room_name: String,
    #[serde(default)]
    pub sip_call_id: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct RoomCompositeEgressRequest {
    pub room_name: String,
    pub audio_only: bool,
    pub segment_outputs: Vec<SegmentedFileOutput>,
}

#[derive(Serialize, Debug, Clone)]
pub struct SegmentedFileOutput {
    pub filename_prefix: String,
    pub playlist_name: String,
    pub live_playlist_name: String,
    pub segment_duration: u32,
    pub azure: AzureBlobUpload,
}

#[derive(Serialize, Clone)]
pub struct AzureBlobUpload {
    pub account_name: String,
    pub account_key: String,
    pub container_name: String,
}

impl std::fmt::Debug for AzureBlobUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureBlobUpload")
            .field("account_name", &self.account_name)
            .field("account_key", &"[REDACTED]")
            .field("container_name", &self.container_name)
            .finish()
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct StopEgressRequest {
    pub egress_id: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct EgressInfo {
    #[serde(default)]
    pub egress_id: String,
    #[serde(default)]
    pub room_name: String,
    #[serde(default)]
    pub status: Option<serde_json::Value>,
}

/// Error body of a failed Twirp call.
#[derive(Deserialize, Debug, Clone)]
pub struct TwirpErrorBody {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

/// Presence of a room participant, as reported by the room service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantState {
    Joining,
    Joined,
    Active,
    Disconnected,
}

impl ParticipantState {
    pub fn from_proto(state: i32) -> Self {
        match state {
            1 => ParticipantState::Joined,
            2 => ParticipantState::Active,
            3 => ParticipantState::Disconnected,
            _ => ParticipantState::Joining,
        }
    }

    /// The participant's media is flowing.
    pub fn is_present(self) -> bool {
        matches!(self, ParticipantState::Joined | ParticipantState::Active)
    }
}

/// Manifest the egress service uploads next to the segments once a recording completes.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct EgressManifest {
    #[serde(default)]
    pub egress_id: Option<String>,
    #[serde(default)]
    pub room_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_nanos")]
    pub started_at: Option<i64>,
    #[serde(default, deserialize_with = "lenient_nanos")]
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub playlists: Vec<ManifestPlaylist>,
}

impl EgressManifest {
    /// Segment locations in playlist order.
    pub fn segment_locations(&self) -> impl Iterator<Item = &str> {
        self.playlists
            .iter()
            .flat_map(|p| p.segments.iter())
            .map(|s| s.location.as_str())
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ManifestPlaylist {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub segments: Vec<ManifestSegment>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ManifestSegment {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
}

/// Timestamps are int64 nanoseconds, serialized as either numbers or strings.
fn lenient_nanos<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Nanos {
        Int(i64),
        Text(String),
    }

    Ok(match Option::<Nanos>::deserialize(deserializer)? {
        Some(Nanos::Int(n)) => Some(n),
        Some(Nanos::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}
