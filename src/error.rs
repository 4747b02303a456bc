use thiserror::Error;

use crate::ocr::OcrError;

/// Failures surfaced at the pipeline boundary.
///
/// Recognition timeouts never show up here: they are folded into an empty
/// extraction before the writer runs.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Recognition failed: {0}")]
    RecognitionFailure(#[source] OcrError),
    #[error("Index write failed: {0:#}")]
    IndexWriteFailure(#[source] anyhow::Error),
    #[error("Retrieval failed: {0:#}")]
    RetrievalFailure(#[source] anyhow::Error),
    #[error("Generation failed: {0:#}")]
    GenerationFailure(#[source] anyhow::Error),
}

impl PipelineError {
    /// Stable machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidInput(_) => "invalid_input",
            PipelineError::RecognitionFailure(_) => "recognition_failure",
            PipelineError::IndexWriteFailure(_) => "index_write_failure",
            PipelineError::RetrievalFailure(_) => "retrieval_failure",
            PipelineError::GenerationFailure(_) => "generation_failure",
        }
    }

    /// Network-bound collaborator failures are transient; malformed input and
    /// engine crashes are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::IndexWriteFailure(_)
                | PipelineError::RetrievalFailure(_)
                | PipelineError::GenerationFailure(_)
        )
    }
}

impl From<OcrError> for PipelineError {
    fn from(err: OcrError) -> Self {
        match err {
            OcrError::InvalidImage(msg) => PipelineError::InvalidInput(msg),
            other => PipelineError::RecognitionFailure(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_retryable_classification() {
        assert!(PipelineError::IndexWriteFailure(anyhow::anyhow!("503")).is_retryable());
        assert!(PipelineError::RetrievalFailure(anyhow::anyhow!("reset")).is_retryable());
        assert!(PipelineError::GenerationFailure(anyhow::anyhow!("429")).is_retryable());
        assert!(!PipelineError::InvalidInput("empty".into()).is_retryable());
        assert!(!PipelineError::RecognitionFailure(OcrError::TimedOut(Duration::from_secs(1))).is_retryable());
    }

    #[test]
    fn test_invalid_image_maps_to_invalid_input() {
        let err: PipelineError = OcrError::InvalidImage("not a png".into()).into();
        assert_eq!(err.kind(), "invalid_input");
    }
}
