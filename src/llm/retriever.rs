use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::database::VectorIndex;
use crate::document::Document;
use crate::error::PipelineError;
use crate::providers::Embedder;
use crate::retry::RetryPolicy;

pub const DEFAULT_TOP_K: usize = 3;

/// Embeds a query and fetches its nearest documents, best-first.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    cache: Option<Mutex<LruCache<String, Vec<f32>>>>,
    retry: RetryPolicy,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embedder,
            index,
            cache: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Keeps up to `size` query embeddings; 0 disables caching.
    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache = NonZeroUsize::new(size).map(|capacity| Mutex::new(LruCache::new(capacity)));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Document>, PipelineError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.query_vector(query).await?;
        let documents = self
            .retry
            .run("search index", || self.index.search(&vector, k))
            .await
            .map_err(PipelineError::RetrievalFailure)?;
        log::debug!("Retrieved {} documents for k={}", documents.len(), k);
        Ok(documents)
    }

    async fn query_vector(&self, query: &str) -> Result<Vec<f32>, PipelineError> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.lock().get(query) {
                return Ok(hit.clone());
            }
        }

        let vector = self
            .retry
            .run("embed query", || self.embedder.embed(query))
            .await
            .map_err(PipelineError::RetrievalFailure)?;

        if let Some(cache) = &self.cache {
            cache.lock().put(query.to_string(), vector.clone());
        }
        Ok(vector)
    }
}
