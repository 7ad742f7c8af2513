use quern_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::openai::OpenAiClient;

/// [`Embedder`] backed by the OpenAI-style `/v1/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: OpenAiClient,
}

impl OpenAiEmbedder {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl Embedder for OpenAiEmbedder {
    fn embed_batch(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        let url = format!("{}/v1/embeddings", self.client.base_url());
        let req = EmbeddingsRequest { model, input: inputs };
        let resp = ureq::post(&url)
            .set("Authorization", &self.client.bearer())
            .timeout(std::time::Duration::from_secs(30))
            .send_json(serde_json::to_value(req).map_err(|e| {
                AppError::new("KB_EMBEDDINGS_FAILED", "Failed to encode embeddings request")
                    .with_details(e.to_string())
            })?);

        match resp {
            Ok(r) if r.status() == 200 => {
                let v: EmbeddingsResponse = r.into_json().map_err(|e| {
                    AppError::new("KB_EMBEDDINGS_FAILED", "Failed to decode embeddings response")
                        .with_details(e.to_string())
                })?;
                if v.data.len() != inputs.len() {
                    return Err(AppError::new(
                        "KB_EMBEDDINGS_FAILED",
                        "Embeddings response item count mismatch",
                    )
                    .with_details(format!(
                        "expected={}; got={}",
                        inputs.len(),
                        v.data.len()
                    )));
                }
                // Order by the reported index rather than trusting
                // response order.
                let mut items = v.data;
                items.sort_by_key(|d| d.index);
                Ok(items.into_iter().map(|d| d.embedding).collect())
            }
            Ok(r) => Err(
                AppError::new("KB_EMBEDDINGS_FAILED", "Embeddings request failed")
                    .with_details(format!("status={}", r.status())),
            ),
            Err(e) => Err(
                AppError::new("KB_EMBEDDINGS_FAILED", "Failed to call embeddings endpoint")
                    .with_details(e.to_string())
                    .with_retryable(true),
            ),
        }
    }
}
