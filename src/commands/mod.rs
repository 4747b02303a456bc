use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;
use std::path::Path;
use std::sync::Arc;

use crate::pipeline::RagPipeline;

pub mod document;
pub mod system;

/// What the REPL should do after a line has been handled.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Empty,
    Help,
    Exit,
    Ingest(&'a str),
    IngestDir(&'a str),
    SetK(&'a str),
    Ask(&'a str),
}

fn parse(input: &str) -> Command<'_> {
    let input = input.trim();
    match input.to_lowercase().as_str() {
        "" => return Command::Empty,
        "help" => return Command::Help,
        "exit" | "quit" => return Command::Exit,
        _ => {}
    }

    let (head, rest) = match input.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (input, ""),
    };
    match head.to_lowercase().as_str() {
        "ingest" if !rest.is_empty() => Command::Ingest(rest),
        "ingest-dir" if !rest.is_empty() => Command::IngestDir(rest),
        "k" if !rest.is_empty() => Command::SetK(rest),
        "ask" if !rest.is_empty() => Command::Ask(rest),
        _ => Command::Ask(input),
    }
}

pub struct CommandHandler {
    pipeline: Arc<RagPipeline>,
    k: Option<usize>,
    concurrency: usize,
}

impl CommandHandler {
    pub fn new(pipeline: Arc<RagPipeline>, concurrency: usize) -> Self {
        Self {
            pipeline,
            k: None,
            concurrency,
        }
    }

    pub async fn handle_command(&mut self, input: &str) -> Result<Flow, String> {
        match parse(input) {
            Command::Empty => {}
            Command::Help => system::print_help(),
            Command::Exit => {
                println!("👋 Goodbye!");
                return Ok(Flow::Exit);
            }
            Command::Ingest(path) => {
                let path = Path::new(path);
                let report = document::ingest_file(&self.pipeline, path).await?;
                document::print_report(&document::source_name(path), &report);
            }
            Command::IngestDir(dir) => {
                document::ingest_dir(&self.pipeline, Path::new(dir), self.concurrency).await?;
            }
            Command::SetK(value) => {
                let k: usize = value
                    .parse()
                    .map_err(|_| format!("Invalid k '{}', expected a positive number", value))?;
                if k == 0 {
                    return Err("k must be at least 1".to_string());
                }
                self.k = Some(k);
                println!("Retrieving {} documents per question", k.to_string().bright_cyan());
            }
            Command::Ask(query) => document::ask(&self.pipeline, query, self.k).await?,
        }
        Ok(Flow::Continue)
    }
}

pub async fn run_repl(pipeline: Arc<RagPipeline>, concurrency: usize) -> anyhow::Result<()> {
    println!("{}", "scan-rag interactive mode. Type 'help' for commands.".bright_blue());
    let mut handler = CommandHandler::new(pipeline, concurrency);
    let mut rl = Editor::<(), DefaultHistory>::new()?;

    loop {
        match rl.readline("🔎 ") {
            Ok(line) => {
                let input = line.trim();
                if !input.is_empty() {
                    let _ = rl.add_history_entry(input);
                }
                match handler.handle_command(input).await {
                    Ok(Flow::Exit) => break,
                    Ok(Flow::Continue) => {}
                    Err(e) => println!("{}", e.red()),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                log::error!("Readline error: {:?}", err);
                break;
            }
        }
    }
    Ok(())
}
