use crate::embedding::{normalize_in_place, EmbeddingService};
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Embedding client for an Ollama host. Implements [`EmbeddingService`] over the
/// `/api/embeddings` endpoint with a blocking HTTP client.
#[derive(Clone)]
pub struct OllamaEmbedder {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| EngineError::EmbeddingError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }
}

impl EmbeddingService for OllamaEmbedder {
    fn encode(&self, text: &str, normalize: bool) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let payload = EmbeddingsRequest {
            model: &self.model,
            prompt: text,
        };

        let res = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .map_err(|e| EngineError::EmbeddingError(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let err_text = res.text().unwrap_or_default();
            return Err(EngineError::EmbeddingError(format!(
                "Ollama API error (status {}): {}",
                status, err_text
            )));
        }

        let body: EmbeddingsResponse = res
            .json()
            .map_err(|e| EngineError::EmbeddingError(e.to_string()))?;

        let mut vector = body.embedding;
        if normalize {
            normalize_in_place(&mut vector);
        }
        Ok(vector)
    }
}
