//! Collaborator fakes shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::database::{InMemoryIndex, VectorIndex, VectorRecord};
use crate::document::Document;
use crate::providers::{Embedder, Generator, HashEmbedder};

pub struct CountingEmbedder {
    inner: HashEmbedder,
    batch_calls: AtomicUsize,
}

impl CountingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            inner: HashEmbedder::new(dimensions),
            batch_calls: AtomicUsize::new(0),
        }
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_info(&self) -> String {
        "counting".to_string()
    }
}

#[derive(Default)]
pub struct CountingIndex {
    inner: InMemoryIndex,
    upserts: AtomicUsize,
    searches: AtomicUsize,
    deletes: AtomicUsize,
}

impl CountingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &InMemoryIndex {
        &self.inner
    }

    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorIndex for CountingIndex {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(records).await
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<Document>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner.search(vector, k).await
    }

    async fn delete_by_source_except(&self, source: &str, keep: &[Uuid]) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_by_source_except(source, keep).await
    }

    fn name(&self) -> &str {
        "counting"
    }
}

/// Fails the first `failures` calls of every operation, then delegates.
pub struct FlakyIndex {
    inner: InMemoryIndex,
    failures: usize,
    attempts: AtomicUsize,
}

impl FlakyIndex {
    pub fn failing_first(failures: usize) -> Self {
        Self {
            inner: InMemoryIndex::new(),
            failures,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Direct access that bypasses the injected failures, for seeding.
    pub fn inner(&self) -> &InMemoryIndex {
        &self.inner
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(anyhow!("index unavailable (attempt {})", attempt + 1));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for FlakyIndex {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        self.check()?;
        self.inner.upsert(records).await
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<Document>> {
        self.check()?;
        self.inner.search(vector, k).await
    }

    async fn delete_by_source_except(&self, source: &str, keep: &[Uuid]) -> Result<()> {
        self.check()?;
        self.inner.delete_by_source_except(source, keep).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// Records every prompt and answers with a fixed reply, or fails.
pub struct RecordingGenerator {
    reply: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl RecordingGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());
        self.reply
            .clone()
            .ok_or_else(|| anyhow!("model endpoint returned 503"))
    }

    fn model_info(&self) -> String {
        "recording".to_string()
    }
}
