use crate::config::BlobStorageConfig;
use crate::consts::{BLOB_HOST_MARKER, RECORDING_SEGMENT_SECS};
use crate::error::RecordingError;
use crate::livekit::RecordingBackend;
use crate::livekit_types::{
    AzureBlobUpload, EgressManifest, RoomCompositeEgressRequest, SegmentedFileOutput,
};
use crate::types::CallJob;

use async_trait::async_trait;
use std::sync::Arc;
use time::{macros::format_description, OffsetDateTime};
use tracing::{info, warn};

/// The recording started (or attempted) for one call.
#[derive(Debug, Clone)]
pub struct RecordingJob {
    recording_id: Option<String>,
    pub started_at: OffsetDateTime,
    pub filename_prefix: String,
    pub manifest_url: Option<String>,
    segments: Option<Vec<String>>,
}

impl RecordingJob {
    pub fn new(filename_prefix: impl Into<String>, started_at: OffsetDateTime) -> Self {
        Self {
            recording_id: None,
            started_at,
            filename_prefix: filename_prefix.into(),
            manifest_url: None,
            segments: None,
        }
    }

    pub fn recording_id(&self) -> Option<&str> {
        self.recording_id.as_deref()
    }

    /// Set the egress id.  Returns false, leaving the id untouched, if one is already set.
    pub fn assign_id(&mut self, recording_id: impl Into<String>) -> bool {
        if self.recording_id.is_some() {
            return false;
        }
        self.recording_id = Some(recording_id.into());
        true
    }

    pub fn segments(&self) -> &[String] {
        self.segments.as_deref().unwrap_or_default()
    }

    /// Record the normalized segment URLs.  Only the first call has any effect.
    pub fn set_segments(&mut self, segments: Vec<String>) -> bool {
        if self.segments.is_some() {
            return false;
        }
        self.segments = Some(segments);
        true
    }
}

/// Starts the audio-only composite recording of a call room and stops it when a call is
/// abandoned.
pub struct RecordingCoordinator {
    backend: Arc<dyn RecordingBackend>,
    storage: BlobStorageConfig,
}

impl RecordingCoordinator {
    pub fn new(backend: Arc<dyn RecordingBackend>, storage: BlobStorageConfig) -> Self {
        Self { backend, storage }
    }

    pub fn storage(&self) -> &BlobStorageConfig {
        &self.storage
    }

    pub async fn start_recording(&self, job: &CallJob) -> Result<RecordingJob, RecordingError> {
        let prefix = filename_prefix(&job.room, job.created_at);
        let request = RoomCompositeEgressRequest {
            room_name: job.room.clone(),
            audio_only: true,
            segment_outputs: vec![SegmentedFileOutput {
                filename_prefix: prefix.clone(),
                playlist_name: format!("{prefix}.m3u8"),
                live_playlist_name: format!("{prefix}-live.m3u8"),
                segment_duration: RECORDING_SEGMENT_SECS,
                azure: AzureBlobUpload {
                    account_name: self.storage.account_name.clone(),
                    account_key: self.storage.account_key.clone(),
                    container_name: self.storage.container_name.clone(),
                },
            }],
        };

        let info = self
            .backend
            .start_room_composite(&request)
            .await
            .map_err(RecordingError::StartFailed)?;

        let mut recording = RecordingJob::new(prefix, job.created_at);
        if info.egress_id.is_empty() {
            warn!(room=%job.room, "egress started without an id; recording cannot be archived");
        } else {
            recording.manifest_url = Some(self.storage.manifest_url(&info.egress_id));
            recording.assign_id(info.egress_id);
        }
        info!(room=%job.room, recording_id=?recording.recording_id(), "recording started");
        Ok(recording)
    }

    pub async fn stop_recording(&self, recording: &RecordingJob) -> Result<(), RecordingError> {
        let Some(recording_id) = recording.recording_id() else {
            return Ok(());
        };
        self.backend
            .stop_egress(recording_id)
            .await
            .map_err(|source| RecordingError::StopFailed {
                recording_id: recording_id.to_string(),
                source,
            })?;
        info!(recording_id, "recording stopped");
        Ok(())
    }
}

/// `call-recording-{room}-{YYYYmmdd_HHMMSS}`, derived from the job's creation time so that a
/// given call always maps to the same blob names.
pub fn filename_prefix(room: &str, created_at: OffsetDateTime) -> String {
    let stamp = created_at
        .format(format_description!(
            "[year][month][day]_[hour][minute][second]"
        ))
        .unwrap_or_else(|_| created_at.unix_timestamp().to_string());
    format!("call-recording-{room}-{stamp}")
}

/// Absolute blob URL of a manifest segment location.
///
/// Relative locations are resolved against the storage account and container.  Absolute blob
/// URLs missing the container get it inserted after the host; other absolute URLs are kept.
/// Applying this to its own output returns the output unchanged.
pub fn normalize_segment_url(location: &str, storage: &BlobStorageConfig) -> Option<String> {
    let location = location.trim();
    if location.is_empty() {
        return None;
    }
    let container = storage.container_name.trim_matches('/');
    let container_prefix = format!("{container}/");

    if location.starts_with("https://") || location.starts_with("http://") {
        let Some((host, path)) = location.split_once(BLOB_HOST_MARKER) else {
            return Some(location.to_string());
        };
        let path = path.trim_start_matches('/');
        if path.starts_with(&container_prefix) {
            return Some(format!("{host}{BLOB_HOST_MARKER}{path}"));
        }
        return Some(format!("{host}{BLOB_HOST_MARKER}{container_prefix}{path}"));
    }

    let path = location.trim_start_matches('/');
    let path = path.strip_prefix(&container_prefix).unwrap_or(path);
    Some(format!("{}/{container_prefix}{path}", storage.base_url()))
}

/// Retrieves the egress manifest a completed recording leaves in blob storage.
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<EgressManifest, RecordingError>;
}

pub struct HttpManifestFetcher {
    http_client: reqwest::Client,
}

impl HttpManifestFetcher {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl ManifestFetcher for HttpManifestFetcher {
    async fn fetch(&self, url: &str) -> Result<EgressManifest, RecordingError> {
        let unavailable = |reason: String| RecordingError::ManifestUnavailable {
            url: url.to_string(),
            reason,
        };
        let resp = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(unavailable(format!("status {}", resp.status())));
        }
        let body = resp.bytes().await.map_err(|e| unavailable(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| RecordingError::ManifestInvalid(e.to_string()))
    }
}
