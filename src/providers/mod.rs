//! HTTP adapters for the capability traits, plus the in-process voice activity detector.

pub mod google_translate;
pub mod openai;
pub mod pinecone;
pub mod sarvam;
pub mod vad;

use crate::error::ProviderError;

use reqwest::Response;
use tracing::error;

/// Pass a successful response through; turn anything else into `ProviderError::Status`.
pub(crate) async fn ensure_success(
    provider: &'static str,
    resp: Response,
) -> Result<Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    error!(provider, status = status.as_u16(), body = %body, "provider request rejected");
    Err(ProviderError::Status {
        provider,
        status: status.as_u16(),
        body,
    })
}

pub(crate) fn http_error(provider: &'static str) -> impl Fn(reqwest::Error) -> ProviderError {
    move |source| ProviderError::Http { provider, source }
}
