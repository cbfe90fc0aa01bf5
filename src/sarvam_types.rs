use serde::{Deserialize, Serialize};

#[derive(Deserialize, Debug, Clone)]
pub struct SpeechToTextResponse {
    #[serde(default)]
    pub request_id: Option<String>,
    pub transcript: String,
    #[serde(default)]
    pub language_code: Option<String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct TextToSpeechRequest<'a> {
    pub inputs: Vec<&'a str>,
    pub target_language_code: &'a str,
    pub speaker: &'a str,
    pub model: &'a str,
    pub enable_preprocessing: bool,
    pub speech_sample_rate: u32,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TextToSpeechResponse {
    #[serde(default)]
    pub request_id: Option<String>,
    /// Base64 WAV files, one per input.
    pub audios: Vec<String>,
}
