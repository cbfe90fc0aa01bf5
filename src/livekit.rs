use crate::config::LiveKitConfig;
use crate::error::LiveKitError;
use crate::livekit_types::{
    CreateSipParticipantRequest, EgressInfo, ParticipantState, RoomCompositeEgressRequest,
    SipParticipantInfo, StopEgressRequest, TwirpErrorBody,
};
use crate::utils::livekit_http_base;

use async_trait::async_trait;
use livekit_api::access_token::{AccessToken, SIPGrants, VideoGrants};
use livekit_api::services::room::RoomClient;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

/// Places outbound SIP calls into a room.
#[async_trait]
pub trait SipDialer: Send + Sync {
    async fn dial(
        &self,
        request: &CreateSipParticipantRequest,
    ) -> Result<SipParticipantInfo, LiveKitError>;
}

/// Who is in a room.
#[async_trait]
pub trait ParticipantDirectory: Send + Sync {
    /// `None` when no participant with `identity` is in the room.
    async fn participant_state(
        &self,
        room: &str,
        identity: &str,
    ) -> Result<Option<ParticipantState>, LiveKitError>;

    async fn remove_participant(&self, room: &str, identity: &str) -> Result<(), LiveKitError>;
}

/// Starts and stops room-composite egress.
#[async_trait]
pub trait RecordingBackend: Send + Sync {
    async fn start_room_composite(
        &self,
        request: &RoomCompositeEgressRequest,
    ) -> Result<EgressInfo, LiveKitError>;

    async fn stop_egress(&self, egress_id: &str) -> Result<EgressInfo, LiveKitError>;
}

/// Server-side LiveKit client: token minting plus the SIP, egress and room services.
pub struct LiveKitClient {
    http_client: reqwest::Client,
    base_url: String,
    config: LiveKitConfig,
    room_client: RoomClient,
}

impl LiveKitClient {
    pub fn new(http_client: reqwest::Client, config: LiveKitConfig) -> Self {
        let base_url = livekit_http_base(&config.url);
        let room_client = RoomClient::with_api_key(&base_url, &config.api_key, &config.api_secret);
        Self {
            http_client,
            base_url,
            config,
            room_client,
        }
    }

    /// Token that lets the agent join `room` and exchange audio.
    pub fn join_token(&self, room: &str, identity: &str) -> Result<String, LiveKitError> {
        let token = AccessToken::with_api_key(&self.config.api_key, &self.config.api_secret)
            .with_identity(identity)
            .with_name(identity)
            .with_grants(VideoGrants {
                room_join: true,
                room: room.to_string(),
                can_publish: true,
                can_subscribe: true,
                can_publish_data: true,
                ..Default::default()
            })
            .with_ttl(self.config.token_ttl);
        Ok(token.to_jwt()?)
    }

    fn service_token(&self, room: &str) -> Result<String, LiveKitError> {
        let token = AccessToken::with_api_key(&self.config.api_key, &self.config.api_secret)
            .with_grants(VideoGrants {
                room_admin: true,
                room_record: true,
                room: room.to_string(),
                ..Default::default()
            })
            .with_sip_grants(SIPGrants {
                admin: true,
                call: true,
            })
            .with_ttl(self.config.token_ttl);
        Ok(token.to_jwt()?)
    }

    async fn twirp<Req, Resp>(
        &self,
        service: &str,
        method: &str,
        room: &str,
        body: &Req,
    ) -> Result<Resp, LiveKitError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/twirp/livekit.{service}/{method}", self.base_url);
        let token = self.service_token(room)?;
        debug!(service, method, room, "livekit twirp request");
        let resp = self
            .http_client
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<Resp>().await?);
        }

        let text = resp.text().await.unwrap_or_default();
        let err = twirp_error(status.as_u16(), &text);
        error!(service, method, error=%err, "livekit twirp call failed");
        Err(err)
    }
}

/// Twirp errors carry SIP failure details in `meta` when a dial is rejected.
fn twirp_error(status: u16, body: &str) -> LiveKitError {
    match serde_json::from_str::<TwirpErrorBody>(body) {
        Ok(mut parsed) => LiveKitError::Twirp {
            code: parsed.code,
            msg: parsed.msg,
            sip_status_code: parsed.meta.remove("sip_status_code"),
            sip_status: parsed.meta.remove("sip_status"),
        },
        Err(_) => LiveKitError::Twirp {
            code: status.to_string(),
            msg: body.to_string(),
            sip_status_code: None,
            sip_status: None,
        },
    }
}

#[async_trait]
impl SipDialer for LiveKitClient {
    async fn dial(
        &self,
        request: &CreateSipParticipantRequest,
    ) -> Result<SipParticipantInfo, LiveKitError> {
        self.twirp(
            "SIP",
            "CreateSIPParticipant",
            &request.room_name,
            request,
        )
        .await
    }
}

#[async_trait]
impl ParticipantDirectory for LiveKitClient {
    async fn participant_state(
        &self,
        room: &str,
        identity: &str,
    ) -> Result<Option<ParticipantState>, LiveKitError> {
        let participants = self
            .room_client
            .list_participants(room)
            .await
            .map_err(|e| LiveKitError::RoomService(e.to_string()))?;
        Ok(participants
            .iter()
            .find(|p| p.identity == identity)
            .map(|p| ParticipantState::from_proto(p.state)))
    }

    async fn remove_participant(&self, room: &str, identity: &str) -> Result<(), LiveKitError> {
        self.room_client
            .remove_participant(room, identity)
            .await
            .map_err(|e| LiveKitError::RoomService(e.to_string()))
    }
}

#[async_trait]
impl RecordingBackend for LiveKitClient {
    async fn start_room_composite(
        &self,
        request: &RoomCompositeEgressRequest,
    ) -> Result<EgressInfo, LiveKitError> {
        self.twirp(
            "Egress",
            "StartRoomCompositeEgress",
            &request.room_name,
            request,
        )
        .await
    }

    async fn stop_egress(&self, egress_id: &str) -> Result<EgressInfo, LiveKitError> {
        let request = StopEgressRequest {
            egress_id: egress_id.to_string(),
        };
        self.twirp("Egress", "StopEgress", "", &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twirp_error_keeps_sip_status() {
        let body = r#"{"code":"unavailable","msg":"twirp error unknown: INVITE failed","meta":{"sip_status_code":"486","sip_status":"Busy Here"}}"#;
        match twirp_error(503, body) {
            LiveKitError::Twirp {
                code,
                sip_status_code,
                sip_status,
                ..
            } => {
                assert_eq!(code, "unavailable");
                assert_eq!(sip_status_code.as_deref(), Some("486"));
                assert_eq!(sip_status.as_deref(), Some("Busy Here"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn non_json_twirp_error_falls_back_to_status() {
        match twirp_error(502, "bad gateway") {
            LiveKitError::Twirp { code, msg, .. } => {
                assert_eq!(code, "502");
                assert_eq!(msg, "bad gateway");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
