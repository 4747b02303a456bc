use serde_json::Value;

use super::{EngineKind, OcrError, RecognitionOutput};
use crate::document::ExtractedContent;

/// Deep enough for `pages -> boxes -> [bbox, [text, conf]]` plus slack.
const MAX_LINE_DEPTH: usize = 8;

/// Maps engine output onto the canonical extraction. `None` means the
/// engine timed out. Never fails: missing or malformed fields are empty.
pub fn normalize(output: Option<RecognitionOutput>) -> ExtractedContent {
    let Some(output) = output else {
        return ExtractedContent::default();
    };
    match output.engine {
        EngineKind::Lines => normalize_lines(&output.raw),
        EngineKind::Layout => normalize_layout(&output.raw, &output.markdown_artifacts),
    }
}

/// Folds a timeout into the empty extraction; every other failure surfaces.
pub fn normalize_outcome(
    outcome: Result<RecognitionOutput, OcrError>,
) -> Result<ExtractedContent, OcrError> {
    match outcome {
        Ok(output) => Ok(normalize(Some(output))),
        Err(OcrError::TimedOut(deadline)) => {
            log::warn!("OCR timed out after {:?}, nothing extracted", deadline);
            Ok(normalize(None))
        }
        Err(e) => Err(e),
    }
}

fn normalize_lines(raw: &Value) -> ExtractedContent {
    let mut fragments = Vec::new();
    collect_line_texts(raw, 0, &mut fragments);
    let markdown = fragments.join("\n");
    ExtractedContent {
        fragments,
        tables: Vec::new(),
        markdown,
    }
}

/// Walks `[[ [bbox, [text, confidence]], ... ], ...]`. Coordinates are
/// numbers and confidences are dropped, so every string met is a text span.
/// Page objects carrying `rec_texts` or `text` are accepted as well.
fn collect_line_texts(value: &Value, depth: usize, out: &mut Vec<String>) {
    if depth > MAX_LINE_DEPTH {
        return;
    }
    match value {
        Value::String(text) => push_fragment(out, text),
        Value::Array(items) => {
            for item in items {
                collect_line_texts(item, depth + 1, out);
            }
        }
        Value::Object(map) => {
            if let Some(Value::Array(texts)) = map.get("rec_texts") {
                for text in texts.iter().filter_map(Value::as_str) {
                    push_fragment(out, text);
                }
            } else if let Some(text) = map.get("text").and_then(Value::as_str) {
                push_fragment(out, text);
            }
        }
        _ => {}
    }
}

fn normalize_layout(raw: &Value, artifacts: &[String]) -> ExtractedContent {
    let pages: Vec<&Value> = match raw {
        Value::Array(pages) => pages.iter().collect(),
        Value::Object(_) => vec![raw],
        _ => Vec::new(),
    };

    let mut fragments = Vec::new();
    let mut tables = Vec::new();
    let mut inline_markdown = Vec::new();

    for page in pages {
        let layout = page.get("layout_parsing_result").unwrap_or(page);

        match layout.get("text") {
            Some(Value::String(text)) => push_fragment(&mut fragments, text),
            Some(Value::Array(texts)) => {
                for text in texts.iter().filter_map(Value::as_str) {
                    push_fragment(&mut fragments, text);
                }
            }
            _ => {}
        }

        for key in ["regions", "parsing_res_list"] {
            if let Some(Value::Array(regions)) = layout.get(key) {
                for region in regions {
                    let text = region
                        .get("text")
                        .or_else(|| region.get("block_content"))
                        .and_then(Value::as_str);
                    if let Some(text) = text {
                        push_fragment(&mut fragments, text);
                    }
                }
            }
        }

        if let Some(Value::Array(found)) = layout.get("tables") {
            tables.extend(found.iter().filter(|t| !t.is_null()).cloned());
        }

        let markdown = match page.get("markdown") {
            Some(Value::String(md)) => Some(md.as_str()),
            Some(md) => md.get("markdown_texts").and_then(Value::as_str),
            None => None,
        };
        if let Some(md) = markdown.filter(|md| !md.trim().is_empty()) {
            inline_markdown.push(md.to_string());
        }
    }

    let rendered: Vec<&str> = artifacts
        .iter()
        .map(String::as_str)
        .filter(|md| !md.trim().is_empty())
        .collect();
    let markdown = if !rendered.is_empty() {
        rendered.join("\n\n")
    } else if !inline_markdown.is_empty() {
        inline_markdown.join("\n\n")
    } else {
        fragments.join("\n\n")
    };

    ExtractedContent {
        fragments,
        tables,
        markdown: if markdown.trim().is_empty() {
            String::new()
        } else {
            markdown
        },
    }
}

/// Spans are kept exactly as recognized; only blank ones are dropped.
fn push_fragment(out: &mut Vec<String>, text: &str) {
    if !text.trim().is_empty() {
        out.push(text.to_string());
    }
}
