mod chunker;
mod writer;

pub use chunker::{split, ChunkError, TextSplitter};
pub use writer::{DedupPolicy, DocumentWriter, IngestReport};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical result of one recognition pass.
///
/// `markdown` is empty exactly when nothing usable was recognized, and
/// `fragments` never holds blank entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub fragments: Vec<String>,
    pub tables: Vec<serde_json::Value>,
    pub markdown: String,
}

impl ExtractedContent {
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty() && self.markdown.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Text,
    Markdown,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Text => "text",
            DocumentType::Markdown => "markdown",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(DocumentType::Text),
            "markdown" => Ok(DocumentType::Markdown),
            other => Err(format!("unknown document type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source: String,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
}

/// Unit of indexing. Owned by the vector index once upserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(content: impl Into<String>, source: impl Into<String>, doc_type: DocumentType) -> Self {
        Self {
            content: content.into(),
            metadata: DocumentMetadata {
                source: source.into(),
                doc_type,
            },
        }
    }

    pub fn text(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(content, source, DocumentType::Text)
    }

    pub fn markdown(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(content, source, DocumentType::Markdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_serializes_type_field() {
        let doc = Document::markdown("## Intro", "scan.png");
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["metadata"]["type"], "markdown");
        assert_eq!(value["metadata"]["source"], "scan.png");
    }

    #[test]
    fn test_document_type_parsing() {
        assert_eq!("text".parse::<DocumentType>().unwrap(), DocumentType::Text);
        assert!("pdf".parse::<DocumentType>().is_err());
    }
}
