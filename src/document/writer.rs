use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Document, DocumentType, ExtractedContent, TextSplitter};
use crate::database::{VectorIndex, VectorRecord};
use crate::error::PipelineError;
use crate::providers::Embedder;
use crate::retry::RetryPolicy;

/// What to do with records already indexed under the same source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Keep everything; re-uploads add a second copy.
    #[default]
    Append,
    /// Once the new records are stored, drop the source's older ones.
    ReplaceBySource,
}

impl FromStr for DedupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(DedupPolicy::Append),
            "replace_by_source" | "replace" => Ok(DedupPolicy::ReplaceBySource),
            other => Err(format!("unknown dedup policy '{}'", other)),
        }
    }
}

impl fmt::Display for DedupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupPolicy::Append => write!(f, "append"),
            DedupPolicy::ReplaceBySource => write!(f, "replace_by_source"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub fragments: usize,
    pub tables: usize,
    /// Unicode scalar values, not bytes.
    pub markdown_chars: usize,
    pub markdown_chunks: usize,
    pub documents_stored: usize,
}

/// Turns an extraction into provenance-tagged documents and writes them to
/// the index in one embed call and one upsert call.
pub struct DocumentWriter {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    splitter: TextSplitter,
    dedup: DedupPolicy,
    retry: RetryPolicy,
}

impl DocumentWriter {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, splitter: TextSplitter) -> Self {
        Self {
            embedder,
            index,
            splitter,
            dedup: DedupPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_dedup(mut self, dedup: DedupPolicy) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn splitter(&self) -> &TextSplitter {
        &self.splitter
    }

    /// Text documents first, in fragment order, then markdown chunks.
    ///
    /// A scan that is a single line yields one fragment, and the markdown is
    /// that same line; its lone chunk is left out so the text is stored once.
    pub fn documents(&self, extracted: &ExtractedContent, source: &str) -> Vec<Document> {
        let mut documents: Vec<Document> = extracted
            .fragments
            .iter()
            .filter(|f| !f.trim().is_empty())
            .map(|f| Document::text(f.as_str(), source))
            .collect();

        if extracted.markdown.is_empty() {
            return documents;
        }
        let chunks = self.splitter.split(&extracted.markdown);
        let repeats_only_fragment = matches!(
            (chunks.as_slice(), extracted.fragments.as_slice()),
            ([chunk], [fragment]) if *chunk == extracted.markdown && chunk == fragment
        );
        if !repeats_only_fragment {
            documents.extend(chunks.into_iter().map(|chunk| Document::markdown(chunk, source)));
        }
        documents
    }

    pub async fn write(&self, extracted: &ExtractedContent, source: &str) -> Result<IngestReport, PipelineError> {
        let documents = self.documents(extracted, source);
        let markdown_chunks = documents
            .iter()
            .filter(|d| d.metadata.doc_type == DocumentType::Markdown)
            .count();
        let mut report = IngestReport {
            fragments: extracted.fragments.len(),
            tables: extracted.tables.len(),
            markdown_chars: extracted.markdown.chars().count(),
            markdown_chunks,
            documents_stored: 0,
        };

        if documents.is_empty() {
            log::info!("Nothing extracted from {}, index untouched", source);
            return Ok(report);
        }

        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let embeddings = self
            .retry
            .run("embed documents", || self.embedder.embed_batch(&texts))
            .await
            .map_err(PipelineError::IndexWriteFailure)?;
        if embeddings.len() != documents.len() {
            return Err(PipelineError::IndexWriteFailure(anyhow::anyhow!(
                "embedder returned {} vectors for {} documents",
                embeddings.len(),
                documents.len()
            )));
        }

        let records: Vec<VectorRecord> = documents
            .into_iter()
            .zip(embeddings)
            .map(|(document, embedding)| VectorRecord::new(document, embedding))
            .collect();
        let count = records.len();
        let fresh: Vec<Uuid> = records.iter().map(|r| r.id).collect();

        self.retry
            .run("upsert documents", || self.index.upsert(records.clone()))
            .await
            .map_err(PipelineError::IndexWriteFailure)?;

        // Old records go only after the new ones are in, so a failed write
        // never leaves the source empty.
        if self.dedup == DedupPolicy::ReplaceBySource {
            self.retry
                .run("delete previous records", || {
                    self.index.delete_by_source_except(source, &fresh)
                })
                .await
                .map_err(PipelineError::IndexWriteFailure)?;
        }

        report.documents_stored = count;
        log::info!(
            "Stored {} documents from {} ({} fragments, {} markdown chunks) in {}",
            count,
            source,
            report.fragments,
            report.markdown_chunks,
            self.index.name()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingEmbedder, CountingIndex, FlakyIndex};

    fn splitter() -> TextSplitter {
        TextSplitter::new(vec!["\n\n".into(), "\n".into(), " ".into()], 500, 100).unwrap()
    }

    fn writer(embedder: Arc<CountingEmbedder>, index: Arc<CountingIndex>) -> DocumentWriter {
        DocumentWriter::new(embedder, index, splitter()).with_retry(RetryPolicy::none())
    }

    fn hello_world() -> ExtractedContent {
        ExtractedContent {
            fragments: vec!["Hello World".into()],
            tables: vec![],
            markdown: "Hello World".into(),
        }
    }

    #[tokio::test]
    async fn test_empty_extraction_touches_nothing() {
        let embedder = Arc::new(CountingEmbedder::new(8));
        let index = Arc::new(CountingIndex::new());
        let report = writer(embedder.clone(), index.clone())
            .write(&ExtractedContent::default(), "blank.png")
            .await
            .unwrap();

        assert_eq!(report, IngestReport::default());
        assert_eq!(embedder.batch_calls(), 0);
        assert_eq!(index.upsert_calls(), 0);
    }

    #[tokio::test]
    async fn test_single_clean_line_stores_one_document() {
        let embedder = Arc::new(CountingEmbedder::new(8));
        let index = Arc::new(CountingIndex::new());
        let report = writer(embedder.clone(), index.clone())
            .write(&hello_world(), "hello.png")
            .await
            .unwrap();

        assert_eq!(report.fragments, 1);
        assert_eq!(report.markdown_chars, 11);
        assert_eq!(report.documents_stored, 1);
        assert_eq!(embedder.batch_calls(), 1);
        assert_eq!(index.upsert_calls(), 1);

        let stored = index.inner().documents();
        assert_eq!(stored, vec![Document::text("Hello World", "hello.png")]);
    }

    #[tokio::test]
    async fn test_markdown_chunks_are_tagged_and_batched() {
        let embedder = Arc::new(CountingEmbedder::new(8));
        let index = Arc::new(CountingIndex::new());
        let fragments: Vec<String> = (0..40).map(|i| format!("line number {} of the scan", i)).collect();
        let extracted = ExtractedContent {
            markdown: fragments.join("\n"),
            fragments,
            tables: vec![serde_json::json!({"html": "<table/>"})],
        };

        let report = writer(embedder.clone(), index.clone())
            .write(&extracted, "long.png")
            .await
            .unwrap();

        assert_eq!(report.tables, 1);
        assert!(report.markdown_chunks > 1);
        assert_eq!(report.documents_stored, 40 + report.markdown_chunks);
        assert_eq!(embedder.batch_calls(), 1);
        assert_eq!(index.upsert_calls(), 1);

        let stored = index.inner().documents();
        assert!(stored[..40].iter().all(|d| d.metadata.doc_type == DocumentType::Text));
        assert!(stored[40..].iter().all(|d| d.metadata.doc_type == DocumentType::Markdown));
        assert!(stored.iter().all(|d| d.metadata.source == "long.png"));
    }

    #[tokio::test]
    async fn test_append_keeps_previous_upload() {
        let embedder = Arc::new(CountingEmbedder::new(8));
        let index = Arc::new(CountingIndex::new());
        let writer = writer(embedder, index.clone());
        writer.write(&hello_world(), "hello.png").await.unwrap();
        writer.write(&hello_world(), "hello.png").await.unwrap();
        assert_eq!(index.inner().len(), 2);
        assert_eq!(index.delete_calls(), 0);
    }

    #[tokio::test]
    async fn test_replace_by_source_keeps_only_latest_upload() {
        let embedder = Arc::new(CountingEmbedder::new(8));
        let index = Arc::new(CountingIndex::new());
        let writer = writer(embedder, index.clone()).with_dedup(DedupPolicy::ReplaceBySource);

        writer.write(&hello_world(), "hello.png").await.unwrap();
        writer.write(&hello_world(), "hello.png").await.unwrap();
        writer.write(&hello_world(), "other.png").await.unwrap();

        assert_eq!(index.delete_calls(), 3);
        assert_eq!(index.inner().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_replacement_keeps_previous_records() {
        let embedder = Arc::new(CountingEmbedder::new(8));
        let index = Arc::new(FlakyIndex::failing_first(usize::MAX));
        let previous = VectorRecord::new(Document::text("Total 42.00", "scan.png"), vec![1.0; 8]);
        index.inner().upsert(vec![previous]).await.unwrap();

        let writer = DocumentWriter::new(embedder, index.clone(), splitter())
            .with_retry(RetryPolicy::none())
            .with_dedup(DedupPolicy::ReplaceBySource);
        let err = writer.write(&hello_world(), "scan.png").await.unwrap_err();

        assert!(matches!(err, PipelineError::IndexWriteFailure(_)));
        assert_eq!(index.inner().documents(), vec![Document::text("Total 42.00", "scan.png")]);
    }

    #[tokio::test]
    async fn test_long_first_line_keeps_its_markdown_chunk() {
        let embedder = Arc::new(CountingEmbedder::new(8));
        let index = Arc::new(CountingIndex::new());
        let first = "a".repeat(400);
        let second = "b".repeat(200);
        let extracted = ExtractedContent {
            markdown: format!("{}\n{}", first, second),
            fragments: vec![first.clone(), second],
            tables: vec![],
        };

        let report = writer(embedder, index.clone())
            .write(&extracted, "wide.png")
            .await
            .unwrap();

        let markdown: Vec<Document> = index
            .inner()
            .documents()
            .into_iter()
            .filter(|d| d.metadata.doc_type == DocumentType::Markdown)
            .collect();
        assert_eq!(report.markdown_chunks, 2);
        assert_eq!(markdown.len(), report.markdown_chunks);
        assert_eq!(markdown[0].content, first);
        assert_eq!(report.documents_stored, 2 + report.markdown_chunks);
    }

    #[tokio::test]
    async fn test_transient_upsert_failure_is_retried() {
        let embedder = Arc::new(CountingEmbedder::new(8));
        let index = Arc::new(FlakyIndex::failing_first(1));
        let retry = RetryPolicy {
            max_attempts: 2,
            base_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(2),
        };
        let writer = DocumentWriter::new(embedder, index.clone(), splitter()).with_retry(retry);

        let report = writer.write(&hello_world(), "hello.png").await.unwrap();
        assert_eq!(report.documents_stored, 1);
        assert_eq!(index.attempts(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_as_index_write_failure() {
        let embedder = Arc::new(CountingEmbedder::new(8));
        let index = Arc::new(FlakyIndex::failing_first(usize::MAX));
        let writer = DocumentWriter::new(embedder, index, splitter()).with_retry(RetryPolicy::none());

        let err = writer.write(&hello_world(), "hello.png").await.unwrap_err();
        assert!(matches!(err, PipelineError::IndexWriteFailure(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_dedup_policy_parsing() {
        assert_eq!("append".parse::<DedupPolicy>().unwrap(), DedupPolicy::Append);
        assert_eq!(
            "Replace_By_Source".parse::<DedupPolicy>().unwrap(),
            DedupPolicy::ReplaceBySource
        );
        assert!("upsert".parse::<DedupPolicy>().is_err());
        assert_eq!(DedupPolicy::ReplaceBySource.to_string(), "replace_by_source");
    }
}
