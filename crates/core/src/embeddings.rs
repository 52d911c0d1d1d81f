use crate::IndexError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

pub const OPENAI_EMBEDDING_DIMENSIONS: usize = 1_536;

/// Embedding function. One call may carry many chunk texts; failures propagate.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| IndexError::Request("embedding backend returned no vector".to_string()))
    }
}

/// Deterministic hashed trigram embedder, usable offline.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let mut hash = 1469598103934665603u64;
            for ch in window {
                let mut buffer = [0u8; 4];
                for byte in ch.encode_utf8(&mut buffer).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Client for OpenAI-compatible `/embeddings` endpoints.
pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: api_key.into(),
            model: "text-embedding-3-small".to_string(),
            dimensions: OPENAI_EMBEDDING_DIMENSIONS,
            batch_size: 512,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>, dimensions: usize) -> Self {
        self.model = model.into();
        self.dimensions = dimensions;
        self
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "input": batch,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(IndexError::BackendResponse {
                backend: "openai-embeddings".to_string(),
                status: status.as_u16(),
                details,
            });
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        if parsed.data.len() != batch.len() {
            return Err(IndexError::Request(format!(
                "embedding count {} doesn't match input count {}",
                parsed.data.len(),
                batch.len()
            )));
        }

        parsed.data.sort_by_key(|datum| datum.index);
        parsed
            .data
            .into_iter()
            .map(|datum| {
                if datum.embedding.len() != self.dimensions {
                    return Err(IndexError::Request(format!(
                        "embedding dimension {} != {}",
                        datum.embedding.len(),
                        self.dimensions
                    )));
                }
                Ok(datum.embedding)
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            debug!(model = %self.model, batch = batch.len(), "requesting embeddings");
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }
}
