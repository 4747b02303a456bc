use clap::{Parser, Subcommand};
use colored::Colorize;
use dotenv::dotenv;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use scan_rag::api::{self, ApiSettings};
use scan_rag::commands::{self, document};
use scan_rag::config::AppConfig;
use scan_rag::ocr::worker;
use scan_rag::pipeline::RagPipeline;

#[derive(Parser, Debug)]
#[command(author, version, about = "OCR ingestion and retrieval-augmented answering", long_about = None)]
struct Args {
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    bind: IpAddr,

    #[arg(long, env = "PORT", default_value = "8000")]
    port: u16,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the HTTP API (default)
    Serve,
    /// Recognize and index one image
    Ingest { image: PathBuf },
    /// Recognize and index every image in a folder
    IngestDir {
        dir: PathBuf,
        #[arg(long, default_value = "4")]
        concurrency: usize,
    },
    /// Answer a question from the indexed documents
    Ask {
        query: String,
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Interactive ask/ingest shell
    Repl {
        #[arg(long, default_value = "4")]
        concurrency: usize,
    },
    /// Isolated Tesseract run; spawned by the service itself
    #[command(hide = true)]
    OcrWorker {
        #[arg(long)]
        image: PathBuf,
        #[arg(long, default_value = "eng")]
        lang: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let command = args.command.unwrap_or(Cmd::Serve);

    // Runs before any pipeline setup: the worker must not touch collaborators.
    if let Cmd::OcrWorker { image, lang } = &command {
        return worker::run_worker(image, lang);
    }

    let config = AppConfig::from_env()?;
    let pipeline = Arc::new(RagPipeline::from_config(&config).await?);

    match command {
        Cmd::Serve => {
            let settings = ApiSettings {
                max_concurrent: config.http_max_concurrent,
                upload_limit_bytes: config.upload_limit_bytes,
            };
            let router = api::create_api(pipeline, &settings);
            api::serve(router, SocketAddr::new(args.bind, args.port)).await?;
        }
        Cmd::Ingest { image } => {
            let report = document::ingest_file(&pipeline, &image)
                .await
                .map_err(anyhow::Error::msg)?;
            document::print_report(&document::source_name(&image), &report);
        }
        Cmd::IngestDir { dir, concurrency } => {
            let summary = document::ingest_dir(&pipeline, &dir, concurrency)
                .await
                .map_err(anyhow::Error::msg)?;
            if summary.failed > 0 {
                println!("{}", format!("{} files failed", summary.failed).red());
            }
        }
        Cmd::Ask { query, k } => {
            document::ask(&pipeline, &query, k)
                .await
                .map_err(anyhow::Error::msg)?;
        }
        Cmd::Repl { concurrency } => commands::run_repl(pipeline, concurrency).await?,
        Cmd::OcrWorker { .. } => {}
    }
    Ok(())
}
