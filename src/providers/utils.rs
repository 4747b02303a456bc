use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::traits::Embedder;

/// Offline embedder: feature-hashes lowercase word tokens into a fixed
/// number of buckets and L2-normalizes the result. Buckets come from
/// SHA-256, so vectors stay comparable across builds and toolchains and
/// texts sharing words land close together.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = token_hash(&token.to_lowercase());
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

fn token_hash(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_info(&self) -> String {
        format!("hash-{}", self.dimensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::cosine_similarity;

    #[tokio::test]
    async fn test_hash_embedding_shape_and_norm() {
        let embedder = HashEmbedder::new(64);
        let vector = embedder.embed("Invoice total due").await.unwrap();
        assert_eq!(vector.len(), 64);
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let vector = HashEmbedder::new(8).embed("  ").await.unwrap();
        assert!(vector.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_shared_words_score_higher() {
        let embedder = HashEmbedder::new(256);
        let query = embedder.embed_text("what is the invoice total");
        let related = embedder.embed_text("Invoice total: 42 EUR");
        let unrelated = embedder.embed_text("photosynthesis in green plants");
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_buckets_are_pinned() {
        let vector = HashEmbedder::new(16).embed_text("Invoice TOTAL");
        let half = std::f32::consts::FRAC_1_SQRT_2;
        let mut expected = vec![0.0f32; 16];
        expected[2] = half;
        expected[10] = half;
        for (got, want) in vector.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-6, "{:?}", vector);
        }
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let embedder = HashEmbedder::new(32);
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch[0], embedder.embed_text("alpha"));
        assert_eq!(batch[1], embedder.embed_text("beta"));
    }
}
