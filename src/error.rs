use thiserror::Error;
use tracing::error;

/// Errors raised while reading configuration from the environment.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

/// Failure reported by one of the external capability providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{provider} request failed: {source}")]
    Http {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} returned status {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} returned an unusable response: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} audio is not valid WAV: {source}")]
    Audio {
        provider: &'static str,
        #[source]
        source: hound::Error,
    },

    #[error("{provider} could not be initialised: {message}")]
    Init {
        provider: &'static str,
        message: String,
    },
}

/// Errors returned by the LiveKit server API (Twirp).
#[derive(Error, Debug)]
pub enum LiveKitError {
    #[error("failed to mint access token: {0}")]
    Token(#[from] livekit_api::access_token::AccessTokenError),

    #[error("livekit request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("livekit room service error: {0}")]
    RoomService(String),

    #[error("livekit twirp error {code}: {msg}")]
    Twirp {
        code: String,
        msg: String,
        sip_status_code: Option<String>,
        sip_status: Option<String>,
    },
}

/// Errors from the room media transport and the live agent session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("media transport error: {0}")]
    Transport(String),

    #[error("session start was cancelled")]
    Cancelled,

    #[error("voice activity detector unavailable: {0}")]
    Vad(#[source] ProviderError),

    #[error("session task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("failed to start recording: {0}")]
    StartFailed(#[source] LiveKitError),

    #[error("failed to stop recording {recording_id}: {source}")]
    StopFailed {
        recording_id: String,
        #[source]
        source: LiveKitError,
    },

    #[error("recording manifest unavailable at {url}: {reason}")]
    ManifestUnavailable { url: String, reason: String },

    #[error("recording manifest could not be parsed: {0}")]
    ManifestInvalid(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("in-memory store lock poisoned")]
    Poisoned,
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures that end a call from the coordinator's point of view.
#[derive(Error, Debug)]
pub enum CallError {
    #[error("dial failed: {reason}")]
    DialFailed {
        reason: String,
        sip_status: Option<String>,
    },

    #[error("participant {identity} did not join within {waited_secs}s")]
    ParticipantJoinTimeout { identity: String, waited_secs: u64 },

    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("invalid dispatch request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure of one post-call finalizer.  Logged by the finalizer runner, never propagated.
#[derive(Error, Debug)]
pub enum PostCallError {
    #[error("transcript artifact {path}: {source}")]
    TranscriptIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to serialize transcript: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Log an error that terminated a task.
pub async fn handle_error(e: impl std::error::Error) {
    error!("ERROR: {e}")
}
