use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

use uuid::Uuid;

use super::{IndexError, VectorIndex, VectorRecord};
use crate::document::Document;

/// Process-local index for offline runs and tests. Nothing is persisted.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    records: RwLock<Vec<VectorRecord>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn documents(&self) -> Vec<Document> {
        self.records.read().iter().map(|r| r.document.clone()).collect()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        let mut stored = self.records.write();
        let dims = stored.first().map(|r| r.embedding.len());
        for record in records {
            if let Some(expected) = dims {
                if record.embedding.len() != expected {
                    return Err(IndexError::DimensionMismatch {
                        expected,
                        actual: record.embedding.len(),
                    }
                    .into());
                }
            }
            match stored.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => stored.push(record),
            }
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<Document>> {
        let stored = self.records.read();
        let mut scored: Vec<(f32, &VectorRecord)> = stored
            .iter()
            .map(|r| (cosine_similarity(vector, &r.embedding), r))
            .collect();
        // Stable sort keeps insertion order between equal scores.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, r)| r.document.clone())
            .collect())
    }

    async fn delete_by_source_except(&self, source: &str, keep: &[Uuid]) -> Result<()> {
        let mut stored = self.records.write();
        let before = stored.len();
        stored.retain(|r| r.document.metadata.source != source || keep.contains(&r.id));
        log::debug!("Removed {} records for source {}", before - stored.len(), source);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
