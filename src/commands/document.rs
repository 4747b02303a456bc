use colored::Colorize;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

use crate::document::IngestReport;
use crate::pipeline::RagPipeline;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp", "webp", "gif"];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub files: usize,
    pub failed: usize,
    pub documents_stored: usize,
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// The file name, as an HTTP upload of the same file would report it.
pub fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub async fn ingest_file(pipeline: &RagPipeline, path: &Path) -> Result<IngestReport, String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    pipeline
        .ingest_image(bytes, &source_name(path))
        .await
        .map_err(|e| format!("Failed to ingest {}: {}", path.display(), e))
}

pub fn print_report(source: &str, report: &IngestReport) {
    println!("\n📄 {}", source.bright_yellow());
    println!("  Text fragments:   {}", report.fragments.to_string().bright_cyan());
    println!("  Tables:           {}", report.tables.to_string().bright_cyan());
    println!("  Markdown chars:   {}", report.markdown_chars.to_string().bright_cyan());
    println!("  Documents stored: {}", report.documents_stored.to_string().bright_green());
    if report.documents_stored == 0 {
        println!("  {}", "No text recognized, nothing indexed".yellow());
    }
}

pub async fn collect_images(dir: &Path) -> Result<Vec<PathBuf>, String> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| format!("Failed to read directory: {}", e))?;

    let mut images = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| format!("Failed to read entry: {}", e))?
    {
        let path = entry.path();
        if path.is_file() && is_image(&path) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

pub async fn ingest_dir(pipeline: &RagPipeline, dir: &Path, concurrency: usize) -> Result<BatchSummary, String> {
    println!("📁 Ingesting images in: {}", dir.display().to_string().bright_yellow());

    let images = collect_images(dir).await?;
    if images.is_empty() {
        println!("{}", "No images found".yellow());
        return Ok(BatchSummary::default());
    }

    let pb = ProgressBar::new(images.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .map_err(|e| format!("Invalid progress template: {}", e))?,
    );

    let mut summary = BatchSummary {
        files: images.len(),
        ..BatchSummary::default()
    };
    let mut results = stream::iter(images)
        .map(|path| async move {
            let result = ingest_file(pipeline, &path).await;
            (path, result)
        })
        .buffer_unordered(concurrency.max(1));

    while let Some((path, result)) = results.next().await {
        match result {
            Ok(report) => {
                summary.documents_stored += report.documents_stored;
                pb.set_message(format!("{} (+{})", source_name(&path), report.documents_stored));
            }
            Err(e) => {
                summary.failed += 1;
                pb.println(format!("{} {}", "✗".red(), e));
            }
        }
        pb.inc(1);
    }

    pb.finish_with_message("Ingestion complete");
    println!(
        "\n✅ {} files, {} failed, {} documents stored",
        summary.files,
        summary.failed.to_string().red(),
        summary.documents_stored.to_string().bright_green()
    );
    Ok(summary)
}

pub async fn ask(pipeline: &RagPipeline, query: &str, k: Option<usize>) -> Result<(), String> {
    let answer = pipeline
        .answer(query, k)
        .await
        .map_err(|e| format!("Failed to answer: {}", e))?;

    println!("\n💡 Answer:");
    println!("{}", answer.answer.bright_green());
    Ok(())
}
