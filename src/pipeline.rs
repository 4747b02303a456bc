use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::config::{AppConfig, EmbeddingBackend, GenerationBackend, VectorBackend};
use crate::database::{InMemoryIndex, QdrantIndex, VectorIndex};
use crate::document::{DedupPolicy, DocumentWriter, ExtractedContent, IngestReport, TextSplitter};
use crate::error::PipelineError;
use crate::llm::{Answer, AnswerComposer, Retriever, DEFAULT_TOP_K};
use crate::ocr::{normalize_outcome, EngineCommand, OcrIsolator, RawImage};
use crate::providers::deepseek::DeepSeekProvider;
use crate::providers::openai::{OpenAIProvider, OpenAiEmbedder};
use crate::providers::{Embedder, Generator, HashEmbedder};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub dedup: DedupPolicy,
    pub retry: RetryPolicy,
    pub top_k: usize,
    pub query_cache_size: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            dedup: DedupPolicy::default(),
            retry: RetryPolicy::default(),
            top_k: DEFAULT_TOP_K,
            query_cache_size: 256,
        }
    }
}

/// Everything a request needs, built once at startup and shared by
/// reference. Holds no per-request state.
pub struct RagPipeline {
    isolator: OcrIsolator,
    writer: DocumentWriter,
    retriever: Retriever,
    composer: AnswerComposer,
    top_k: usize,
    index_name: String,
}

impl RagPipeline {
    pub fn new(
        isolator: OcrIsolator,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn Generator>,
        splitter: TextSplitter,
        options: PipelineOptions,
    ) -> Self {
        let index_name = index.name().to_string();
        let writer = DocumentWriter::new(embedder.clone(), index.clone(), splitter)
            .with_dedup(options.dedup)
            .with_retry(options.retry.clone());
        let retriever = Retriever::new(embedder, index)
            .with_cache_size(options.query_cache_size)
            .with_retry(options.retry.clone());
        let composer = AnswerComposer::new(generator).with_retry(options.retry);

        Self {
            isolator,
            writer,
            retriever,
            composer,
            top_k: options.top_k.max(1),
            index_name,
        }
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = match config.embedding.backend {
            EmbeddingBackend::OpenAi => Arc::new(OpenAiEmbedder::new(
                config.require_openai_key()?,
                &config.openai_api_base,
                &config.embedding.model,
                config.embedding.dimensions,
                config.provider_timeout,
            )?),
            EmbeddingBackend::Hash => Arc::new(HashEmbedder::new(config.embedding.dimensions)),
        };

        let generator: Arc<dyn Generator> = match config.generation.backend {
            GenerationBackend::OpenAi => Arc::new(OpenAIProvider::new(
                config.require_openai_key()?,
                &config.openai_api_base,
                &config.generation.openai_model,
                config.generation.temperature,
                config.provider_timeout,
            )?),
            GenerationBackend::DeepSeek => Arc::new(DeepSeekProvider::new(
                config.require_deepseek_key()?,
                &config.generation.deepseek_model,
                config.generation.temperature,
                config.provider_timeout,
            )?),
        };

        let index: Arc<dyn VectorIndex> = match config.index.backend {
            VectorBackend::Qdrant => {
                let index = QdrantIndex::connect(
                    &config.index.qdrant_url,
                    &config.index.collection,
                    config.provider_timeout,
                )
                .await?;
                index.ensure_collection(embedder.dimensions() as u64).await?;
                Arc::new(index)
            }
            VectorBackend::Memory => {
                log::warn!("Using the in-memory index; nothing survives a restart");
                Arc::new(InMemoryIndex::new())
            }
        };

        let command = match &config.ocr.command {
            Some(command) => command.clone(),
            None => EngineCommand::builtin().context("cannot locate own executable for the OCR worker")?,
        };
        let mut isolator = OcrIsolator::new(config.ocr.engine, command, config.ocr.timeout)
            .with_language(config.ocr.language.clone())
            .with_max_concurrent(config.ocr.max_concurrent);
        if let Some(dir) = &config.ocr.scratch_dir {
            isolator = isolator.with_scratch_dir(dir.clone());
        }

        let splitter = TextSplitter::new(
            config.chunk.separators.clone(),
            config.chunk.size,
            config.chunk.overlap,
        )?;

        log::info!(
            "Pipeline ready: engine={} embedder={} generator={} index={} dedup={}",
            config.ocr.engine,
            embedder.model_info(),
            generator.model_info(),
            index.name(),
            config.index.dedup
        );

        Ok(Self::new(
            isolator,
            embedder,
            index,
            generator,
            splitter,
            PipelineOptions {
                dedup: config.index.dedup,
                retry: config.retry.clone(),
                top_k: config.top_k,
                query_cache_size: config.query_cache_size,
            },
        ))
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Decode, recognize and normalize one image. A timeout yields an empty
    /// extraction, not an error.
    pub async fn extract(&self, bytes: Vec<u8>) -> Result<ExtractedContent, PipelineError> {
        let image = tokio::task::spawn_blocking(move || RawImage::decode(&bytes))
            .await
            .map_err(|e| PipelineError::InvalidInput(format!("image decoding aborted: {}", e)))??;

        let started = Instant::now();
        let outcome = self.isolator.run(image).await;
        let extracted = normalize_outcome(outcome)?;
        log::debug!(
            "Extracted {} fragments, {} tables in {:?}",
            extracted.fragments.len(),
            extracted.tables.len(),
            started.elapsed()
        );
        Ok(extracted)
    }

    pub async fn ingest_image(&self, bytes: Vec<u8>, source: &str) -> Result<IngestReport, PipelineError> {
        let source = validate_source(source)?;
        let extracted = self.extract(bytes).await?;
        self.ingest_extracted(&extracted, source).await
    }

    pub async fn ingest_extracted(
        &self,
        extracted: &ExtractedContent,
        source: &str,
    ) -> Result<IngestReport, PipelineError> {
        let source = validate_source(source)?;
        self.writer.write(extracted, source).await
    }

    /// `k` falls back to the configured top-k.
    pub async fn answer(&self, query: &str, k: Option<usize>) -> Result<Answer, PipelineError> {
        if query.trim().is_empty() {
            return Err(PipelineError::InvalidInput("query must not be empty".to_string()));
        }
        let k = k.unwrap_or(self.top_k);
        if k == 0 {
            return Err(PipelineError::InvalidInput("k must be at least 1".to_string()));
        }

        let documents = self.retriever.retrieve(query, k).await?;
        self.composer.compose(query, &documents).await
    }
}

fn validate_source(source: &str) -> Result<&str, PipelineError> {
    let source = source.trim();
    if source.is_empty() {
        return Err(PipelineError::InvalidInput("source name must not be empty".to_string()));
    }
    Ok(source)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::ocr::EngineKind;
    use crate::testing::{CountingEmbedder, CountingIndex, RecordingGenerator};
    use image::{DynamicImage, ImageOutputFormat, RgbImage};
    use std::io::Cursor;
    use std::time::Duration;

    struct Harness {
        pipeline: RagPipeline,
        embedder: Arc<CountingEmbedder>,
        index: Arc<CountingIndex>,
        generator: Arc<RecordingGenerator>,
    }

    fn harness(engine_script: &str, deadline: Duration) -> Harness {
        let command = EngineCommand::new("sh", vec!["-c".to_string(), engine_script.to_string()]);
        let isolator = OcrIsolator::new(EngineKind::Lines, command, deadline);
        let embedder = Arc::new(CountingEmbedder::new(128));
        let index = Arc::new(CountingIndex::new());
        let generator = Arc::new(RecordingGenerator::replying("The total is 42."));
        let splitter = TextSplitter::new(EngineKind::Lines.default_separators(), 500, 100).unwrap();
        let options = PipelineOptions {
            retry: RetryPolicy::none(),
            ..PipelineOptions::default()
        };
        let pipeline = RagPipeline::new(
            isolator,
            embedder.clone(),
            index.clone(),
            generator.clone(),
            splitter,
            options,
        );
        Harness {
            pipeline,
            embedder,
            index,
            generator,
        }
    }

    fn png() -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(8, 8))
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    fn three_documents() -> ExtractedContent {
        ExtractedContent {
            fragments: vec![
                "Invoice total: 42 EUR".into(),
                "Due date: 1 March".into(),
                "Vendor: ACME Ltd".into(),
            ],
            tables: vec![],
            markdown: String::new(),
        }
    }

    #[tokio::test]
    async fn test_hello_world_image_stores_one_document() {
        let h = harness(r#"printf '%s' '[[[[[0,0],[9,0],[9,9],[0,9]],["Hello World",0.99]]]]'"#, Duration::from_secs(10));
        let report = h.pipeline.ingest_image(png(), "hello.png").await.unwrap();

        assert_eq!(report.fragments, 1);
        assert_eq!(report.tables, 0);
        assert_eq!(report.markdown_chars, 11);
        assert_eq!(report.documents_stored, 1);
        assert_eq!(h.index.upsert_calls(), 1);
    }

    #[tokio::test]
    async fn test_hanging_engine_stores_nothing_and_returns_in_time() {
        let h = harness("sleep 30", Duration::from_millis(300));
        let started = Instant::now();
        let report = h.pipeline.ingest_image(png(), "stuck.png").await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report, IngestReport::default());
        assert_eq!(h.embedder.batch_calls(), 0);
        assert_eq!(h.index.upsert_calls(), 0);
    }

    #[tokio::test]
    async fn test_engine_crash_is_recognition_failure() {
        let h = harness("echo boom >&2; exit 139", Duration::from_secs(10));
        let err = h.pipeline.ingest_image(png(), "crash.png").await.unwrap_err();
        assert_eq!(err.kind(), "recognition_failure");
        assert!(!err.is_retryable());
        assert_eq!(h.index.upsert_calls(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_upload_is_invalid_input() {
        let h = harness("echo '[]'", Duration::from_secs(10));
        let err = h.pipeline.ingest_image(b"%PDF-1.4".to_vec(), "doc.pdf").await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));

        let err = h.pipeline.ingest_image(png(), "  ").await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_answer_uses_all_three_documents() {
        let h = harness("echo '[]'", Duration::from_secs(10));
        let report = h.pipeline.ingest_extracted(&three_documents(), "invoice.png").await.unwrap();
        assert_eq!(report.documents_stored, 3);

        let answer = h.pipeline.answer("What is the invoice total?", Some(3)).await.unwrap();
        assert_eq!(answer.query, "What is the invoice total?");
        assert_eq!(answer.answer, "The total is 42.");

        let prompts = h.generator.prompts();
        assert_eq!(prompts.len(), 1);
        for fragment in &three_documents().fragments {
            assert!(prompts[0].contains(fragment.as_str()));
        }
        assert!(prompts[0].ends_with("Question: What is the invoice total?\n"));
    }

    #[tokio::test]
    async fn test_answer_on_empty_index_still_asks_model() {
        let h = harness("echo '[]'", Duration::from_secs(10));
        let answer = h.pipeline.answer("Anything there?", None).await.unwrap();
        assert_eq!(answer.answer, "The total is 42.");
        assert_eq!(
            h.generator.prompts(),
            vec!["Answer using this context only:\n\n\n\nQuestion: Anything there?\n"]
        );
    }

    #[tokio::test]
    async fn test_blank_query_is_rejected() {
        let h = harness("echo '[]'", Duration::from_secs(10));
        let err = h.pipeline.answer("   ", None).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
        assert!(h.generator.prompts().is_empty());
    }
}
