use super::{ensure_success, http_error};
use crate::capabilities::{SpeechToText, TextToSpeech};
use crate::consts::SAMPLE_RATE_HZ;
use crate::error::ProviderError;
use crate::sarvam_types::{SpeechToTextResponse, TextToSpeechRequest, TextToSpeechResponse};
use crate::utils::{b64_decode_to_buf, pcm_to_wav, wav_to_pcm};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tracing::trace;

const PROVIDER: &str = "sarvam";
const STT_URL: &str = "https://api.sarvam.ai/speech-to-text";
const TTS_URL: &str = "https://api.sarvam.ai/text-to-speech";
const API_KEY_HEADER: &str = "api-subscription-key";

pub struct SarvamStt {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
}

impl SarvamStt {
    pub fn new(
        http_client: reqwest::Client,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl SpeechToText for SarvamStt {
    async fn transcribe(&self, audio: &[i16], language: &str) -> Result<String, ProviderError> {
        let wav = pcm_to_wav(audio).map_err(|source| ProviderError::Audio {
            provider: PROVIDER,
            source,
        })?;
        let file = Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(http_error(PROVIDER))?;
        let form = Form::new()
            .text("model", self.model.clone())
            .text("language_code", language.to_string())
            .part("file", file);
        let resp = self
            .http_client
            .post(STT_URL)
            .header(API_KEY_HEADER, &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(http_error(PROVIDER))?;
        let resp = ensure_success(PROVIDER, resp)
            .await?
            .json::<SpeechToTextResponse>()
            .await
            .map_err(http_error(PROVIDER))?;
        trace!(request_id=?resp.request_id, transcript=%resp.transcript, "sarvam transcript");
        Ok(resp.transcript.trim().to_string())
    }
}

pub struct SarvamTts {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
    speaker: String,
}

impl SarvamTts {
    pub fn new(
        http_client: reqwest::Client,
        api_key: impl Into<String>,
        model: impl Into<String>,
        speaker: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            api_key: api_key.into(),
            model: model.into(),
            speaker: speaker.into(),
        }
    }
}

#[async_trait]
impl TextToSpeech for SarvamTts {
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<i16>, ProviderError> {
        let payload = TextToSpeechRequest {
            inputs: vec![text],
            target_language_code: language,
            speaker: &self.speaker,
            model: &self.model,
            enable_preprocessing: true,
            speech_sample_rate: SAMPLE_RATE_HZ,
        };
        let resp = self
            .http_client
            .post(TTS_URL)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(http_error(PROVIDER))?;
        let resp = ensure_success(PROVIDER, resp)
            .await?
            .json::<TextToSpeechResponse>()
            .await
            .map_err(http_error(PROVIDER))?;
        decode_audios(&resp)
    }
}

fn decode_audios(resp: &TextToSpeechResponse) -> Result<Vec<i16>, ProviderError> {
    if resp.audios.is_empty() {
        return Err(ProviderError::InvalidResponse {
            provider: PROVIDER,
            message: "no audio returned".to_string(),
        });
    }
    let mut samples = Vec::new();
    for audio in &resp.audios {
        let mut wav = Vec::new();
        b64_decode_to_buf(audio, &mut wav).map_err(|e| ProviderError::InvalidResponse {
            provider: PROVIDER,
            message: format!("audio is not valid base64: {e}"),
        })?;
        let pcm = wav_to_pcm(&wav).map_err(|source| ProviderError::Audio {
            provider: PROVIDER,
            source,
        })?;
        samples.extend(pcm);
    }
    Ok(samples)
}
