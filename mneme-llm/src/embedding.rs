//! Embedding providers
//!
//! The engine treats embedding as an opaque producer of fixed-dimension
//! unit vectors. The OpenAI implementation is the production default; the
//! hash embedder is deterministic and local, for tests and keyless
//! development.

use async_trait::async_trait;
use mneme_core::{EmbeddingVector, EngineError, MnemeResult};
use sha2::{Digest, Sha256};

// ============================================================================
// TRAIT
// ============================================================================

/// Async trait for embedding providers.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate a unit-length embedding for a single text.
    async fn embed(&self, text: &str) -> MnemeResult<EmbeddingVector>;

    /// Generate embeddings for multiple texts in a batch.
    async fn embed_batch(&self, texts: &[&str]) -> MnemeResult<Vec<EmbeddingVector>>;

    /// Get the number of dimensions this provider produces.
    fn dimensions(&self) -> i32;

    /// Get the model identifier for this provider.
    fn model_id(&self) -> &str;
}

// ============================================================================
// OPENAI PROVIDER
// ============================================================================

#[derive(serde::Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
    dimensions: i32,
}

#[derive(serde::Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(serde::Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI embedding provider using text-embedding-3-small or custom model.
pub struct OpenAiEmbeddingProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: i32,
}

impl OpenAiEmbeddingProvider {
    /// Create a new OpenAI embedding provider.
    ///
    /// # Arguments
    /// * `api_key` - OpenAI API key
    /// * `model` - Model name (e.g., "text-embedding-3-small")
    /// * `dimensions` - Embedding dimensions (512/1536 for 3-small)
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimensions: i32) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.into(),
            dimensions,
        }
    }

    /// Create provider with default text-embedding-3-small model.
    pub fn with_default_model(api_key: impl Into<String>) -> Self {
        Self::new(api_key, "text-embedding-3-small", 1536)
    }

    /// Override the base URL (proxies, test stubs).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn request(&self, input: Vec<String>) -> MnemeResult<Vec<EmbeddingVector>> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            input,
            dimensions: self.dimensions,
        };

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::EmbeddingFailed {
                reason: format!("HTTP request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(EngineError::EmbeddingFailed {
                reason: format!("Embedding endpoint returned status {}", status),
            }
            .into());
        }

        let parsed: EmbeddingResponse =
            response
                .json()
                .await
                .map_err(|e| EngineError::EmbeddingFailed {
                    reason: format!("Failed to parse response: {}", e),
                })?;

        Ok(parsed
            .data
            .into_iter()
            .map(|d| EmbeddingVector::new(d.embedding, self.model.clone()).normalized())
            .collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> MnemeResult<EmbeddingVector> {
        let mut vectors = self.request(vec![text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            EngineError::EmbeddingFailed {
                reason: "No embedding data in response".to_string(),
            }
            .into()
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> MnemeResult<Vec<EmbeddingVector>> {
        let vectors = self
            .request(texts.iter().map(|s| s.to_string()).collect())
            .await?;

        if vectors.len() != texts.len() {
            return Err(EngineError::EmbeddingFailed {
                reason: format!(
                    "Expected {} embeddings but got {}",
                    texts.len(),
                    vectors.len()
                ),
            }
            .into());
        }

        Ok(vectors)
    }

    fn dimensions(&self) -> i32 {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for OpenAiEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbeddingProvider")
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

// ============================================================================
// HASH EMBEDDER
// ============================================================================

/// Deterministic local embedder.
///
/// Seeds an xorshift generator from the SHA-256 of the text and emits a
/// unit vector. Identical text always produces the identical vector.
/// No semantic meaning - tests and keyless development only.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: i32,
}

impl HashEmbedder {
    pub fn new(dimensions: i32) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn vector_for(&self, text: &str) -> EmbeddingVector {
        let digest = Sha256::digest(text.as_bytes());
        let mut state = u64::from_le_bytes(digest[..8].try_into().expect("digest is 32 bytes"));
        // Zero state would stick; fold in the rest of the digest
        if state == 0 {
            state = u64::from_le_bytes(digest[8..16].try_into().expect("digest is 32 bytes"))
                | 1;
        }

        let data: Vec<f32> = (0..self.dimensions)
            .map(|_| {
                // xorshift64
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state as f64 / u64::MAX as f64 * 2.0 - 1.0) as f32
            })
            .collect();

        EmbeddingVector::new(data, "hash-embedder".to_string()).normalized()
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> MnemeResult<EmbeddingVector> {
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> MnemeResult<Vec<EmbeddingVector>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimensions(&self) -> i32 {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        "hash-embedder"
    }
}

// ============================================================================
// TESTS
// ============================================================================
