use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;

// --- Embedder trait ---

pub trait Embedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
    fn dimension(&self) -> usize;
    fn model_name(&self) -> &str;
}

impl<T: Embedder + ?Sized> Embedder for &T {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        (**self).embed(text)
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Model name that selects the offline `HashEmbedder`; no API key needed.
pub const HASH_EMBEDDING_MODEL: &str = "fnv1a-hash";

pub fn embedder_from_config(config: &EmbeddingConfig) -> Result<Option<Box<dyn Embedder>>> {
    if config.model == HASH_EMBEDDING_MODEL {
        return Ok(Some(Box::new(HashEmbedder::new(config.dimension))));
    }
    match config.api_key.as_deref() {
        Some(key) if !key.trim().is_empty() => {
            let embedder = OpenAIEmbedder::new(key.to_string(), config.model.clone(), config.dimension)?;
            Ok(Some(Box::new(embedder)))
        }
        _ => Ok(None),
    }
}

// --- OpenAI embeddings ---

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

#[derive(Debug, Serialize)]
struct OpenAIEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
}

#[derive(Debug)]
pub struct OpenAIEmbedder {
    api_key: String,
    model_id: String,
    dimension: usize,
    client: reqwest::blocking::Client,
}

impl OpenAIEmbedder {
    pub fn new(api_key: String, model_id: String, dimension: usize) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to create embedding HTTP client")?;
        Ok(Self {
            api_key,
            model_id,
            dimension,
            client,
        })
    }
}

impl Embedder for OpenAIEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = OpenAIEmbeddingRequest {
            model: &self.model_id,
            input: text,
            dimensions: self.dimension,
        };

        let response = self
            .client
            .post(OPENAI_EMBEDDINGS_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(EmbeddingError::Status { status, body });
        }

        let api_response: OpenAIEmbeddingResponse = response
            .json()
            .map_err(|e| EmbeddingError::Malformed(e.to_string()))?;

        let vector = api_response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::Malformed("no embedding in response".to_string()))?;

        if vector.len() != self.dimension {
            return Err(EmbeddingError::Malformed(format!(
                "expected {} dimensions, got {}",
                self.dimension,
                vector.len()
            )));
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Hash embeddings ---

/// Deterministic bag-of-words embedder: each lowercase token is FNV-1a hashed
/// into a bucket, then the vector is L2-normalized. No network, no model.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a(token.to_lowercase().as_bytes());
            let bucket = (hash % self.dim as u64) as usize;
            // high bit picks the sign so unrelated tokens tend to cancel
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        HASH_EMBEDDING_MODEL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_embedder_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("Rust backend engineer").unwrap();
        let b = embedder.embed("rust BACKEND engineer").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedder_empty_text_is_zero_vector() {
        let embedder = HashEmbedder::new(8);
        assert_eq!(embedder.embed("  ...  ").unwrap(), vec![0.0; 8]);
    }

    #[test]
    fn test_embedder_from_config_without_key() {
        let config = EmbeddingConfig {
            api_key: None,
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
        };
        assert!(embedder_from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_embedder_from_config_offline_model() {
        let config = EmbeddingConfig {
            api_key: None,
            model: HASH_EMBEDDING_MODEL.to_string(),
            dimension: 32,
        };
        let embedder = embedder_from_config(&config).unwrap().unwrap();
        assert_eq!(embedder.model_name(), HASH_EMBEDDING_MODEL);
        assert_eq!(embedder.dimension(), 32);
        assert_eq!(embedder.embed("rust engineer").unwrap().len(), 32);
    }

    #[test]
    fn test_embedder_from_config_with_key() {
        let config = EmbeddingConfig {
            api_key: Some("test-key".to_string()),
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
        };
        let embedder = embedder_from_config(&config).unwrap().unwrap();
        assert_eq!(embedder.dimension(), 1536);
        assert_eq!(embedder.model_name(), "text-embedding-3-small");
    }
}
