//! Body of the hidden `ocr-worker` subcommand: the isolated side of the
//! built-in Tesseract engine. Prints line-format JSON on stdout, logs go to
//! stderr.

use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use tesseract::Tesseract;

pub fn run_worker(image: &Path, language: &str) -> Result<()> {
    let (lines, confidence) = recognize_lines(image, language)?;
    log::debug!("Tesseract recognized {} lines", lines.len());

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer(&mut out, &lines_payload(&lines, confidence))?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

fn recognize_lines(image: &Path, language: &str) -> Result<(Vec<String>, f32)> {
    let path = image
        .to_str()
        .ok_or_else(|| anyhow!("Image path is not valid UTF-8: {}", image.display()))?;

    let mut engine = Tesseract::new(None, Some(language))?
        .set_image(path)?
        .recognize()?;
    let confidence = engine.mean_text_conf() as f32 / 100.0;
    let text = engine.get_text()?;

    let lines = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    Ok((lines, confidence))
}

/// One page of `[bbox, [text, confidence]]` boxes. Tesseract's plain text
/// API has no per-line boxes, so `bbox` is null.
pub fn lines_payload(lines: &[String], confidence: f32) -> Value {
    let boxes: Vec<Value> = lines
        .iter()
        .map(|line| json!([null, [line, confidence]]))
        .collect();
    json!([boxes])
}
