use super::{ensure_success, http_error};
use crate::capabilities::Translator;
use crate::error::ProviderError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const PROVIDER: &str = "google-translate";
const TRANSLATE_URL: &str = "https://translation.googleapis.com/language/translate/v2";

#[derive(Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    target: &'a str,
    format: &'static str,
}

#[derive(Deserialize, Debug)]
struct TranslateResponse {
    data: TranslateData,
}

#[derive(Deserialize, Debug)]
struct TranslateData {
    translations: Vec<Translation>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Translation {
    translated_text: String,
    #[serde(default)]
    detected_source_language: Option<String>,
}

pub struct GoogleTranslate {
    http_client: reqwest::Client,
    api_key: String,
}

impl GoogleTranslate {
    pub fn new(http_client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            http_client,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Translator for GoogleTranslate {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String, ProviderError> {
        let resp = self
            .http_client
            .post(TRANSLATE_URL)
            .query(&[("key", self.api_key.as_str())])
            .json(&TranslateRequest {
                q: text,
                target: target_language,
                format: "text",
            })
            .send()
            .await
            .map_err(http_error(PROVIDER))?;
        let resp = ensure_success(PROVIDER, resp)
            .await?
            .json::<TranslateResponse>()
            .await
            .map_err(http_error(PROVIDER))?;
        let translation = resp.data.translations.into_iter().next().ok_or_else(|| {
            ProviderError::InvalidResponse {
                provider: PROVIDER,
                message: "no translations returned".to_string(),
            }
        })?;
        tracing::trace!(source=?translation.detected_source_language, "translated lookup query");
        Ok(translation.translated_text)
    }
}
