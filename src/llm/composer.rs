use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::PipelineError;
use crate::providers::Generator;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub query: String,
    pub answer: String,
}

/// Retrieved contents in rank order, separated by a blank line.
pub fn build_context(documents: &[Document]) -> String {
    documents
        .iter()
        .map(|d| d.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_prompt(context: &str, query: &str) -> String {
    format!(
        "Answer using this context only:\n\n{}\n\nQuestion: {}\n",
        context, query
    )
}

pub struct AnswerComposer {
    generator: Arc<dyn Generator>,
    retry: RetryPolicy,
}

impl AnswerComposer {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Exactly one successful generation call, even with no context. The
    /// model text is returned as is.
    pub async fn compose(&self, query: &str, documents: &[Document]) -> Result<Answer, PipelineError> {
        let prompt = build_prompt(&build_context(documents), query);
        let answer = self
            .retry
            .run("generate answer", || self.generator.generate(&prompt))
            .await
            .map_err(PipelineError::GenerationFailure)?;

        Ok(Answer {
            query: query.to_string(),
            answer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingGenerator;

    #[tokio::test]
    async fn test_prompt_embeds_ranked_context_and_query() {
        let generator = Arc::new(RecordingGenerator::replying("  It is 42.\n"));
        let composer = AnswerComposer::new(generator.clone());
        let docs = vec![Document::text("first", "a.png"), Document::markdown("second", "a.png")];

        let answer = composer.compose("What is the total?", &docs).await.unwrap();

        assert_eq!(answer.query, "What is the total?");
        assert_eq!(answer.answer, "  It is 42.\n");
        assert_eq!(
            generator.prompts(),
            vec!["Answer using this context only:\n\nfirst\n\nsecond\n\nQuestion: What is the total?\n"]
        );
    }

    #[tokio::test]
    async fn test_empty_context_still_calls_model() {
        let generator = Arc::new(RecordingGenerator::replying("I don't know."));
        let answer = AnswerComposer::new(generator.clone())
            .compose("Anything?", &[])
            .await
            .unwrap();
        assert_eq!(answer.answer, "I don't know.");
        assert_eq!(generator.prompts().len(), 1);
        assert!(generator.prompts()[0].starts_with("Answer using this context only:\n\n\n\nQuestion:"));
    }

    #[tokio::test]
    async fn test_generator_failure() {
        let generator = Arc::new(RecordingGenerator::failing());
        let err = AnswerComposer::new(generator)
            .with_retry(RetryPolicy::none())
            .compose("q", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::GenerationFailure(_)));
    }
}
