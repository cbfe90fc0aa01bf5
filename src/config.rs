use crate::error::ConfigError;

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_TRANSCRIPT_DIR: &str = "/tmp/dialout-agent/transcripts";
const DEFAULT_LANGUAGE: &str = "bn-IN";
const DEFAULT_NAMESPACE: &str = "axis-products";
const DEFAULT_CONTAINER: &str = "recordings";

/// Which optional capabilities a call agent runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    /// Register the knowledge lookup tool.
    pub rag_lookup: bool,
    /// Record the call and archive it after teardown.
    pub recording: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            rag_lookup: true,
            recording: true,
        }
    }
}

/// Who the agent introduces itself as.
#[derive(Debug, Clone)]
pub struct Persona {
    pub agent_name: String,
    pub organization: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            agent_name: "Veena".to_string(),
            organization: "Bank of Status Code 2".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct LiveKitConfig {
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
    pub sip_trunk_id: String,
    /// Identity the agent uses when it joins a call room.
    pub agent_identity: String,
    pub token_ttl: Duration,
}

impl fmt::Debug for LiveKitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveKitConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("sip_trunk_id", &self.sip_trunk_id)
            .field("agent_identity", &self.agent_identity)
            .field("token_ttl", &self.token_ttl)
            .finish()
    }
}

/// Azure blob destination for call recordings.
#[derive(Clone)]
pub struct BlobStorageConfig {
    pub account_name: String,
    pub container_name: String,
    pub account_key: String,
    /// Manifest location; `{recording_id}` is substituted.
    pub manifest_url_template: String,
}

impl BlobStorageConfig {
    pub fn new(account_name: impl Into<String>, container_name: impl Into<String>) -> Self {
        let account_name = account_name.into();
        let container_name = container_name.into();
        let manifest_url_template = format!(
            "https://{account_name}.blob.core.windows.net/{container_name}/{{recording_id}}.json"
        );
        Self {
            account_name,
            container_name,
            account_key: String::new(),
            manifest_url_template,
        }
    }

    pub fn base_url(&self) -> String {
        format!("https://{}.blob.core.windows.net", self.account_name)
    }

    pub fn manifest_url(&self, recording_id: &str) -> String {
        self.manifest_url_template
            .replace("{recording_id}", recording_id)
    }
}

impl fmt::Debug for BlobStorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStorageConfig")
            .field("account_name", &self.account_name)
            .field("container_name", &self.container_name)
            .field("account_key", &"[REDACTED]")
            .field("manifest_url_template", &self.manifest_url_template)
            .finish()
    }
}

/// How the post-call pipeline waits for the recording manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRetryPolicy {
    /// Delay before the first fetch; egress publishes the manifest asynchronously.
    pub settle_delay: Duration,
    /// Total number of fetch attempts, at least one.
    pub max_attempts: u32,
    /// Delay between attempts, doubled after each failure.
    pub backoff: Duration,
}

impl Default for ManifestRetryPolicy {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(20),
            max_attempts: 1,
            backoff: Duration::from_secs(10),
        }
    }
}

#[derive(Clone)]
pub struct PineconeConfig {
    pub api_key: String,
    /// Data-plane host of the index, e.g. `https://products-abc123.svc.pinecone.io`.
    pub index_host: String,
    pub namespace: String,
}

impl fmt::Debug for PineconeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PineconeConfig")
            .field("api_key", &"[REDACTED]")
            .field("index_host", &self.index_host)
            .field("namespace", &self.namespace)
            .finish()
    }
}

#[derive(Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub livekit: LiveKitConfig,
    pub openai_api_key: String,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub embedding_model: String,
    pub sarvam_api_key: String,
    pub stt_model: String,
    pub tts_model: String,
    pub tts_speaker: String,
    pub google_translate_api_key: Option<String>,
    pub pinecone: Option<PineconeConfig>,
    pub storage: Option<BlobStorageConfig>,
    pub transcript_dir: PathBuf,
    pub database_url: Option<String>,
    pub media_bridge_url: String,
    /// Directory holding the raw PCM clips of the ambient "thinking" bed.
    pub ambient_clip_dir: Option<PathBuf>,
    pub participant_join_timeout: Duration,
    pub max_call_duration: Duration,
    pub manifest_retry: ManifestRetryPolicy,
    pub features: Features,
    pub default_language: String,
    pub persona: Persona,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("listen_addr", &self.listen_addr)
            .field("livekit", &self.livekit)
            .field("llm_model", &self.llm_model)
            .field("embedding_model", &self.embedding_model)
            .field("stt_model", &self.stt_model)
            .field("tts_model", &self.tts_model)
            .field("pinecone", &self.pinecone)
            .field("storage", &self.storage)
            .field("transcript_dir", &self.transcript_dir)
            .field("database_configured", &self.database_url.is_some())
            .field("media_bridge_url", &self.media_bridge_url)
            .field("ambient_clip_dir", &self.ambient_clip_dir)
            .field("participant_join_timeout", &self.participant_join_timeout)
            .field("max_call_duration", &self.max_call_duration)
            .field("manifest_retry", &self.manifest_retry)
            .field("features", &self.features)
            .field("default_language", &self.default_language)
            .finish()
    }
}

impl Config {
    /// Build the configuration from process environment variables.
    ///
    /// Call `dotenvy::dotenv()` first if a `.env` file should be honoured.
    pub fn from_env() -> Result<Self, ConfigError> {
        let features = Features {
            rag_lookup: parsed("FEATURE_RAG_LOOKUP", true)?,
            recording: parsed("FEATURE_RECORDING", true)?,
        };

        let livekit = LiveKitConfig {
            url: required("LIVEKIT_URL")?,
            api_key: required("LIVEKIT_API_KEY")?,
            api_secret: required("LIVEKIT_API_SECRET")?,
            sip_trunk_id: required("LIVEKIT_SIP_TRUNK_ID")?,
            agent_identity: optional("LIVEKIT_AGENT_IDENTITY")
                .unwrap_or_else(|| "dialout-agent".to_string()),
            token_ttl: Duration::from_secs(parsed("LIVEKIT_TOKEN_TTL_SECS", 3600)?),
        };

        let pinecone = if features.rag_lookup {
            Some(PineconeConfig {
                api_key: required("PINECONE_API_KEY")?,
                index_host: required("PINECONE_INDEX_HOST")?,
                namespace: optional("PINECONE_NAMESPACE")
                    .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            })
        } else {
            None
        };

        let storage = if features.recording {
            let mut storage = BlobStorageConfig::new(
                required("AZURE_STORAGE_ACCOUNT")?,
                optional("AZURE_STORAGE_CONTAINER").unwrap_or_else(|| DEFAULT_CONTAINER.to_string()),
            );
            storage.account_key = required("AZURE_BLOB_KEY")?;
            if let Some(template) = optional("RECORDING_MANIFEST_URL_TEMPLATE") {
                storage.manifest_url_template = template;
            }
            Some(storage)
        } else {
            None
        };

        let manifest_retry = ManifestRetryPolicy {
            settle_delay: Duration::from_secs(parsed("MANIFEST_SETTLE_DELAY_SECS", 20)?),
            max_attempts: parsed::<u32>("MANIFEST_MAX_ATTEMPTS", 1)?.max(1),
            backoff: Duration::from_secs(parsed("MANIFEST_BACKOFF_SECS", 10)?),
        };

        let persona = Persona {
            agent_name: optional("AGENT_NAME").unwrap_or_else(|| Persona::default().agent_name),
            organization: optional("AGENT_ORGANIZATION")
                .unwrap_or_else(|| Persona::default().organization),
        };

        Ok(Self {
            listen_addr: parsed_or("LISTEN_ADDR", DEFAULT_LISTEN_ADDR)?,
            livekit,
            openai_api_key: required("OPENAI_API_KEY")?,
            llm_model: optional("LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            llm_temperature: parsed("LLM_TEMPERATURE", 0.4)?,
            embedding_model: optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-ada-002".to_string()),
            sarvam_api_key: required("SARVAM_API_KEY")?,
            stt_model: optional("STT_MODEL").unwrap_or_else(|| "saarika:v2.5".to_string()),
            tts_model: optional("TTS_MODEL").unwrap_or_else(|| "bulbul:v2".to_string()),
            tts_speaker: optional("TTS_SPEAKER").unwrap_or_else(|| "manisha".to_string()),
            google_translate_api_key: optional("GOOGLE_TRANSLATE_API_KEY"),
            pinecone,
            storage,
            transcript_dir: optional("TRANSCRIPT_DIR")
                .unwrap_or_else(|| DEFAULT_TRANSCRIPT_DIR.to_string())
                .into(),
            database_url: optional("DATABASE_URL"),
            media_bridge_url: required("MEDIA_BRIDGE_URL")?,
            ambient_clip_dir: optional("AMBIENT_CLIP_DIR").map(PathBuf::from),
            participant_join_timeout: Duration::from_secs(parsed(
                "PARTICIPANT_JOIN_TIMEOUT_SECS",
                30,
            )?),
            max_call_duration: Duration::from_secs(parsed("MAX_CALL_DURATION_SECS", 1800)?),
            manifest_retry,
            features,
            default_language: optional("DEFAULT_LANGUAGE")
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            persona,
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::MissingEnvVar(key))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_or<T>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = optional(key).unwrap_or_else(|| default.to_string());
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        message: e.to_string(),
    })
}

fn parsed<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match optional(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_url_substitutes_recording_id() {
        let storage = BlobStorageConfig::new("ringstorage", "recordings");
        assert_eq!(
            storage.manifest_url("EG_R1"),
            "https://ringstorage.blob.core.windows.net/recordings/EG_R1.json"
        );
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut storage = BlobStorageConfig::new("acct", "recordings");
        storage.account_key = "super-secret".to_string();
        let rendered = format!("{storage:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn default_listen_addr_parses() {
        let addr: SocketAddr = DEFAULT_LISTEN_ADDR.parse().unwrap();
        assert_eq!(addr.port(), 8000);
    }

    #[test]
    fn default_retry_policy_is_single_attempt_after_settle() {
        let policy = ManifestRetryPolicy::default();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.settle_delay, Duration::from_secs(20));
    }
}
