use super::{ensure_success, http_error};
use crate::capabilities::{Passage, VectorIndex};
use crate::config::PineconeConfig;
use crate::error::ProviderError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const PROVIDER: &str = "pinecone";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    namespace: &'a str,
}

#[derive(Deserialize, Debug)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize, Debug)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

/// Data-plane client for one Pinecone index.
pub struct PineconeIndex {
    http_client: reqwest::Client,
    config: PineconeConfig,
}

impl PineconeIndex {
    pub fn new(http_client: reqwest::Client, config: PineconeConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: &str,
    ) -> Result<Vec<Passage>, ProviderError> {
        let url = format!("{}/query", self.config.index_host.trim_end_matches('/'));
        let body = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            namespace,
        };
        let resp = self
            .http_client
            .post(url)
            .header("Api-Key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(http_error(PROVIDER))?;
        let resp = ensure_success(PROVIDER, resp)
            .await?
            .json::<QueryResponse>()
            .await
            .map_err(http_error(PROVIDER))?;
        Ok(into_passages(resp))
    }
}

/// Matches without a text payload carry nothing to read back and are dropped.
fn into_passages(resp: QueryResponse) -> Vec<Passage> {
    let mut passages: Vec<Passage> = resp
        .matches
        .into_iter()
        .filter_map(|m| {
            let text = m
                .metadata
                .as_ref()
                .and_then(|md| md.get("text"))
                .and_then(Value::as_str)?
                .to_string();
            Some(Passage {
                id: m.id,
                score: m.score,
                text,
            })
        })
        .collect();
    passages.sort_by(|a, b| b.score.total_cmp(&a.score));
    passages
}
