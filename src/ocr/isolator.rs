use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::ImageFormat;
use log::{debug, info, warn};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::Instant as Deadline;

use super::{EngineKind, OcrError, RawImage, RecognitionOutput};

const IMAGE_PLACEHOLDER: &str = "{image}";
const OUTPUT_DIR_PLACEHOLDER: &str = "{output_dir}";
const LANG_PLACEHOLDER: &str = "{lang}";
const MAX_STDERR_CHARS: usize = 2000;

/// Program plus argument template of the recognition engine.
///
/// Arguments may contain `{image}`, `{output_dir}` and `{lang}`, which are
/// replaced per invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl EngineCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-executes the current binary as the Tesseract worker.
    pub fn builtin() -> std::io::Result<Self> {
        let exe = std::env::current_exe()?;
        Ok(Self::new(
            exe,
            vec![
                "ocr-worker".to_string(),
                "--image".to_string(),
                IMAGE_PLACEHOLDER.to_string(),
                "--lang".to_string(),
                LANG_PLACEHOLDER.to_string(),
            ],
        ))
    }

    /// Whitespace-separated command line, e.g. `python pp_structure.py {image} {output_dir}`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    fn render(&self, image: &Path, output_dir: &Path, lang: &str) -> Vec<OsString> {
        self.args
            .iter()
            .map(|arg| match arg.as_str() {
                IMAGE_PLACEHOLDER => image.as_os_str().to_os_string(),
                OUTPUT_DIR_PLACEHOLDER => output_dir.as_os_str().to_os_string(),
                _ => OsString::from(
                    arg.replace(IMAGE_PLACEHOLDER, &image.to_string_lossy())
                        .replace(OUTPUT_DIR_PLACEHOLDER, &output_dir.to_string_lossy())
                        .replace(LANG_PLACEHOLDER, lang),
                ),
            })
            .collect()
    }
}

/// Runs the engine in a child process under a hard deadline.
///
/// Every invocation gets its own temporary workspace holding the input image
/// and an `artifacts/` directory; the workspace is removed on every exit path.
pub struct OcrIsolator {
    engine: EngineKind,
    command: EngineCommand,
    language: String,
    deadline: Duration,
    scratch_dir: Option<PathBuf>,
    permits: Arc<Semaphore>,
}

impl OcrIsolator {
    pub fn new(engine: EngineKind, command: EngineCommand, deadline: Duration) -> Self {
        Self {
            engine,
            command,
            language: "eng".to_string(),
            deadline,
            scratch_dir: None,
            permits: Arc::new(Semaphore::new(4)),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Caps the number of engine processes alive at once.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// The deadline covers queueing for a slot as well as the engine run.
    pub async fn run(&self, image: RawImage) -> Result<RecognitionOutput, OcrError> {
        let deadline = Deadline::now() + self.deadline;
        let _permit = match tokio::time::timeout_at(deadline, self.permits.acquire()).await {
            Ok(permit) => permit.map_err(|_| OcrError::Closed)?,
            Err(_) => {
                info!("No OCR slot became free within {:?}", self.deadline);
                return Err(OcrError::TimedOut(self.deadline));
            }
        };

        let workspace = self.workspace()?;
        let image_path = workspace.path().join("input.png");
        let artifact_dir = workspace.path().join("artifacts");
        tokio::fs::create_dir(&artifact_dir)
            .await
            .map_err(OcrError::Workspace)?;
        write_png(image, image_path.clone()).await?;

        let started = Instant::now();
        let stdout = self.execute(&image_path, &artifact_dir, deadline).await?;
        debug!("OCR engine finished in {:?}", started.elapsed());

        let raw = parse_engine_stdout(&stdout);
        let markdown_artifacts = read_markdown_artifacts(&artifact_dir).await?;

        if let Err(e) = workspace.close() {
            warn!("Failed to remove OCR workspace: {}", e);
        }

        Ok(RecognitionOutput {
            engine: self.engine,
            raw,
            markdown_artifacts,
        })
    }

    fn workspace(&self) -> Result<TempDir, OcrError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("scan-rag-ocr-");
        match &self.scratch_dir {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        }
        .map_err(OcrError::Workspace)
    }

    async fn execute(
        &self,
        image_path: &Path,
        artifact_dir: &Path,
        deadline: Deadline,
    ) -> Result<Vec<u8>, OcrError> {
        let mut command = std::process::Command::new(&self.command.program);
        command
            .args(self.command.render(image_path, artifact_dir, &self.language))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);

        let mut child = Command::from(command)
            .kill_on_drop(true)
            .spawn()
            .map_err(OcrError::Spawn)?;
        // Dropped on every exit path, taking any helpers the engine forked with it.
        let group = ProcessGroup::of(child.id());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let outcome = tokio::time::timeout_at(deadline, async {
            tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr))
        })
        .await;

        let (status, stdout, stderr) = match outcome {
            Ok(collected) => collected,
            Err(_) => {
                info!(
                    "OCR engine exceeded {:?}, terminating process group {:?}",
                    self.deadline,
                    child.id()
                );
                drop(group);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill OCR engine: {}", e);
                }
                return Err(OcrError::TimedOut(self.deadline));
            }
        };

        let status = status.map_err(OcrError::Spawn)?;
        let stderr = stderr.unwrap_or_default();
        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            let stderr: String = stderr.trim().chars().take(MAX_STDERR_CHARS).collect();
            return Err(OcrError::EngineFailed {
                status: status.to_string(),
                stderr,
            });
        }
        stdout.map_err(OcrError::Spawn)
    }
}

/// SIGKILLs the engine's process group when dropped.
#[cfg(unix)]
struct ProcessGroup(Option<nix::unistd::Pid>);

#[cfg(unix)]
impl ProcessGroup {
    fn of(leader: Option<u32>) -> Self {
        Self(leader.and_then(|pid| i32::try_from(pid).ok()).map(nix::unistd::Pid::from_raw))
    }
}

#[cfg(unix)]
impl Drop for ProcessGroup {
    fn drop(&mut self) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};

        if let Some(group) = self.0.take() {
            match killpg(group, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!("Failed to kill OCR process group {}: {}", group, e),
            }
        }
    }
}

#[cfg(not(unix))]
struct ProcessGroup;

#[cfg(not(unix))]
impl ProcessGroup {
    fn of(_leader: Option<u32>) -> Self {
        ProcessGroup
    }
}

async fn write_png(image: RawImage, path: PathBuf) -> Result<(), OcrError> {
    let image = image.into_inner();
    tokio::task::spawn_blocking(move || image.save_with_format(&path, ImageFormat::Png))
        .await
        .map_err(|e| OcrError::Workspace(std::io::Error::new(std::io::ErrorKind::Other, e)))?
        .map_err(|e| {
            OcrError::Workspace(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Engines that log to stdout still end with their JSON document on the
/// last line; anything unreadable becomes `Null` and normalizes to nothing.
fn parse_engine_stdout(stdout: &[u8]) -> serde_json::Value {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    if text.is_empty() {
        return serde_json::Value::Null;
    }
    if let Ok(value) = serde_json::from_str(text) {
        return value;
    }
    let last_line = text.lines().rev().find(|l| !l.trim().is_empty());
    match last_line.map(serde_json::from_str::<serde_json::Value>) {
        Some(Ok(value)) => value,
        _ => {
            warn!("OCR engine printed {} bytes of non-JSON output", stdout.len());
            serde_json::Value::Null
        }
    }
}

async fn read_markdown_artifacts(dir: &Path) -> Result<Vec<String>, OcrError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(OcrError::Workspace)?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(OcrError::Workspace)? {
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "md") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut artifacts = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(&path).await.map_err(OcrError::Workspace)?;
        artifacts.push(String::from_utf8_lossy(&bytes).into_owned());
    }
    Ok(artifacts)
}
