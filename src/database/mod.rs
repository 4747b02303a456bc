pub mod memory;
pub mod qdrant_config;
pub mod vector_db;

pub use memory::InMemoryIndex;
pub use vector_db::QdrantIndex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::document::Document;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Operation failed: {0}")]
    Operation(String),
    #[error("Embedding has {actual} dimensions, collection expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Stored point is missing its '{0}' payload field")]
    MissingPayload(&'static str),
}

/// A document together with its embedding, ready to be upserted.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: Uuid,
    pub embedding: Vec<f32>,
    pub document: Document,
    pub ingested_at: DateTime<Utc>,
}

impl VectorRecord {
    pub fn new(document: Document, embedding: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            embedding,
            document,
            ingested_at: Utc::now(),
        }
    }
}

/// Vector store holding indexed documents.
///
/// `search` returns at most `k` documents ordered best-first.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()>;

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<Document>>;

    /// Removes every record whose `source` equals `source`, except the ones
    /// whose id is in `keep`.
    async fn delete_by_source_except(&self, source: &str, keep: &[Uuid]) -> Result<()>;

    fn name(&self) -> &str;
}
