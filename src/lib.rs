pub mod api;
pub mod commands;
pub mod config;
pub mod database;
pub mod document;
pub mod error;
pub mod llm;
pub mod ocr;
pub mod pipeline;
pub mod providers;
pub mod retry;

#[cfg(test)]
mod testing;

// Re-export commonly used items
pub use config::AppConfig;
pub use error::PipelineError;
pub use pipeline::RagPipeline;
