//! Embedding client abstraction.
//!
//! The schema mapping stage ranks vocabulary types by cosine similarity of
//! embeddings; this module provides the trait and an OpenAI-compatible
//! implementation.

use async_trait::async_trait;
use serde_json::json;

use textkg_types::KgError;

/// A vector embedding (f32 components).
pub type Embedding = Vec<f32>;

/// Trait for text-to-vector embedding clients.
#[async_trait]
pub trait EmbedderClient: Send + Sync {
    /// Generate an embedding for a single text string.
    async fn embed(&self, text: &str) -> Result<Embedding, KgError>;

    /// Generate embeddings for a batch of texts.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, KgError>;

    /// Dimensionality of embeddings produced by this client.
    fn dim(&self) -> usize;
}

/// Return the embedding dimension for a given model name.
///
/// Falls back to 1536 (the `text-embedding-3-small` dimension) for
/// unrecognised models.
fn model_dim(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

// ---------------------------------------------------------------------------
// OpenAiEmbedder
// ---------------------------------------------------------------------------

/// Embeddings adapter for OpenAI-compatible endpoints.
pub struct OpenAiEmbedder {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    dim: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        let dim = model_dim(&model);
        Self {
            api_key: api_key.into(),
            client: reqwest::Client::new(),
            base_url: "https://api.openai.com".to_string(),
            model,
            dim,
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self, KgError> {
        let key = std::env::var("OPENAI_API_KEY").map_err(|_| KgError::AuthError {
            provider: "openai".into(),
        })?;
        Ok(Self::new(key, model))
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    async fn request_embeddings(&self, inputs: &[&str]) -> Result<Vec<Embedding>, KgError> {
        let body = json!({
            "model": self.model,
            "input": inputs,
        });

        let resp = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| KgError::ProviderError {
                provider: "openai".into(),
                status: 0,
                message: e.to_string(),
                retryable: true,
            })?;

        let status = resp.status();
        let json: serde_json::Value = resp.json().await.map_err(|e| KgError::ProviderError {
            provider: "openai".into(),
            status: status.as_u16(),
            message: e.to_string(),
            retryable: false,
        })?;

        if !status.is_success() {
            let message = json["error"]["message"]
                .as_str()
                .unwrap_or("embeddings request failed")
                .to_string();
            return Err(KgError::ProviderError {
                provider: "openai".into(),
                status: status.as_u16(),
                message,
                retryable: status.is_server_error() || status.as_u16() == 429,
            });
        }

        let data = json["data"].as_array().ok_or_else(|| KgError::ProviderError {
            provider: "openai".into(),
            status: status.as_u16(),
            message: "embeddings response missing data array".into(),
            retryable: false,
        })?;

        let mut embeddings = Vec::with_capacity(data.len());
        for item in data {
            let vector: Embedding = item["embedding"]
                .as_array()
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect()
                })
                .unwrap_or_default();
            embeddings.push(vector);
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbedderClient for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding, KgError> {
        let mut embeddings = self.request_embeddings(&[text]).await?;
        embeddings.pop().ok_or_else(|| KgError::ProviderError {
            provider: "openai".into(),
            status: 0,
            message: "embeddings response was empty".into(),
            retryable: false,
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, KgError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_embeddings(texts).await
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_dim_defaults_to_small() {
        assert_eq!(model_dim("text-embedding-3-small"), 1536);
        assert_eq!(model_dim("text-embedding-3-large"), 3072);
        assert_eq!(model_dim("something-else"), 1536);
    }

    #[test]
    fn embedder_reports_dim() {
        let embedder = OpenAiEmbedder::new("sk-test", "text-embedding-3-large");
        assert_eq!(embedder.dim(), 3072);
    }

    struct FixedEmbedder;

    #[async_trait]
    impl EmbedderClient for FixedEmbedder {
        async fn embed(&self, text: &str) -> Result<Embedding, KgError> {
            Ok(vec![text.len() as f32, 1.0])
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, KgError> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }

        fn dim(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn trait_object_usable() {
        let embedder: Box<dyn EmbedderClient> = Box::new(FixedEmbedder);
        let vector = embedder.embed("abc").await.unwrap();
        assert_eq!(vector, vec![3.0, 1.0]);

        let batch = embedder.embed_batch(&["a", "ab"]).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1][0], 2.0);
    }
}
