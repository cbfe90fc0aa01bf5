pub mod capabilities;
pub mod config;
pub mod conversation_state;
pub mod coordinator;
pub mod db_types;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod livekit;
pub mod livekit_types;
pub mod media;
pub mod openai_types;
pub mod post_call;
pub mod providers;
pub mod recording;
pub mod sarvam_types;
pub mod script;
pub mod session;
pub mod store;
pub mod tasks;
pub mod tools;
pub mod transcript;
pub mod types;
pub mod utils;

pub mod consts {
    /// Sample rate of every PCM frame exchanged with the room bridge.
    pub const SAMPLE_RATE_HZ: u32 = 16_000;
    /// 20ms of mono audio at `SAMPLE_RATE_HZ`.
    pub const FRAME_SAMPLES: usize = 320;
    /// Segment length of the composite recording.
    pub const RECORDING_SEGMENT_SECS: u32 = 600;
    /// Passages returned by a knowledge lookup.
    pub const LOOKUP_TOP_K: usize = 10;
    pub const LOOKUP_TARGET_LANGUAGE: &str = "en";
    pub const MAX_TOOL_ROUNDS: usize = 3;
    pub const PARTICIPANT_POLL_MILLIS: u64 = 500;
    pub const BLOB_HOST_MARKER: &str = "blob.core.windows.net/";
}
