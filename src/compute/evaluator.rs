//! External evaluator gateway.
//!
//! Each evaluation stages the artifact in a named temporary file, runs the
//! evaluator on it as a blocking child process and extracts the summary line.
//! The temporary file is removed when the staging guard drops, on every path.

use std::env;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempPath;

use super::MatrixArtifact;
use crate::schema::{DEFAULT_MARKER, EvaluatorConfig};

/// How often a child with a deadline is polled.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Output of a successful evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationResult {
    /// Full standard output.
    pub stdout: String,
    /// Full standard error.
    pub stderr: String,
    /// First stdout line starting with the marker, trimmed.
    pub summary: Option<String>,
}

impl EvaluationResult {
    pub fn from_output(stdout: String, stderr: String, marker: &str) -> Self {
        let summary = extract_summary(&stdout, marker);
        Self {
            stdout,
            stderr,
            summary,
        }
    }

    /// Summary text, empty when the evaluator printed no marker line.
    pub fn summary_text(&self) -> &str {
        self.summary.as_deref().unwrap_or("")
    }
}

/// First line of `stdout` that begins with `marker`, trimmed.
pub fn extract_summary(stdout: &str, marker: &str) -> Option<String> {
    stdout
        .lines()
        .find(|line| line.starts_with(marker))
        .map(|line| line.trim().to_string())
}

/// Scores one artifact.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, artifact: &MatrixArtifact) -> Result<EvaluationResult, EvaluatorError>;
}

/// Runs an external executable with the staged artifact path as last argument.
#[derive(Debug, Clone)]
pub struct ProcessEvaluator {
    program: PathBuf,
    args: Vec<String>,
    marker: String,
    timeout: Option<Duration>,
}

impl ProcessEvaluator {
    /// Locate the executable. Fails if it cannot be found.
    pub fn new(program: impl AsRef<Path>) -> Result<Self, EvaluatorError> {
        let program = locate(program.as_ref())?;
        Ok(Self {
            program,
            args: Vec::new(),
            marker: DEFAULT_MARKER.to_string(),
            timeout: None,
        })
    }

    /// Build from configuration.
    pub fn from_config(config: &EvaluatorConfig) -> Result<Self, EvaluatorError> {
        let evaluator = Self::new(&config.program)?
            .with_args(config.args.clone())
            .with_marker(config.marker.clone());
        Ok(match config.timeout_secs {
            Some(secs) => evaluator.with_timeout(Duration::from_secs(secs)),
            None => evaluator,
        })
    }

    /// Arguments placed before the artifact path.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_marker(mut self, marker: String) -> Self {
        self.marker = marker;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolved executable path.
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn run(&self, artifact_path: &Path) -> Result<Output, EvaluatorError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(artifact_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    EvaluatorError::Unavailable {
                        path: self.program.clone(),
                    }
                } else {
                    EvaluatorError::Spawn(e)
                }
            })?;

        match self.timeout {
            Some(limit) => wait_with_deadline(child, limit),
            None => child.wait_with_output().map_err(EvaluatorError::Spawn),
        }
    }
}

impl Evaluator for ProcessEvaluator {
    fn evaluate(&self, artifact: &MatrixArtifact) -> Result<EvaluationResult, EvaluatorError> {
        let staged = stage(artifact)?;
        let output = self.run(&staged)?;
        drop(staged);

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() || stdout.trim().is_empty() {
            return Err(EvaluatorError::NoOutput {
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(EvaluationResult::from_output(stdout, stderr, &self.marker))
    }
}

/// Write the artifact to a uniquely named temporary file.
fn stage(artifact: &MatrixArtifact) -> Result<TempPath, EvaluatorError> {
    let mut file = tempfile::Builder::new()
        .prefix("matrix-")
        .suffix(".dat")
        .tempfile()
        .map_err(EvaluatorError::Staging)?;
    file.write_all(artifact.as_str().as_bytes())
        .and_then(|()| file.flush())
        .map_err(EvaluatorError::Staging)?;
    // Close the handle so the evaluator can open the file on every platform.
    Ok(file.into_temp_path())
}

/// Wait for the child and for both pipes to close, all within `limit`.
///
/// A background process that inherits the pipes and outlives the child
/// also counts against the limit.
fn wait_with_deadline(mut child: Child, limit: Duration) -> Result<Output, EvaluatorError> {
    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    let deadline = Instant::now() + limit;
    let status = loop {
        if let Some(status) = child.try_wait().map_err(EvaluatorError::Spawn)? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EvaluatorError::Timeout(limit));
        }
        thread::sleep(POLL_INTERVAL);
    };

    let collect = |reader: mpsc::Receiver<Vec<u8>>| {
        match reader.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(buf) => Ok(buf),
            Err(RecvTimeoutError::Timeout) => Err(EvaluatorError::Timeout(limit)),
            Err(RecvTimeoutError::Disconnected) => Ok(Vec::new()),
        }
    };

    Ok(Output {
        status,
        stdout: collect(stdout_reader)?,
        stderr: collect(stderr_reader)?,
    })
}

/// Drain a pipe on its own thread. The thread ends when the pipe closes.
fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(drain(pipe));
    });
    rx
}

fn drain<R: Read>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}

/// Resolve an executable: explicit paths must exist, bare names are looked
/// up in the working directory and then on `PATH`.
fn locate(program: &Path) -> Result<PathBuf, EvaluatorError> {
    let unavailable = || EvaluatorError::Unavailable {
        path: program.to_path_buf(),
    };

    if program.components().count() > 1 || program.is_absolute() {
        return program
            .is_file()
            .then(|| program.to_path_buf())
            .ok_or_else(unavailable);
    }

    if program.is_file() {
        return Ok(Path::new(".").join(program));
    }

    env::var_os("PATH")
        .and_then(|paths| {
            env::split_paths(&paths)
                .map(|dir| dir.join(program))
                .find(|candidate| candidate.is_file())
        })
        .ok_or_else(unavailable)
}

/// Evaluator errors. Only [`EvaluatorError::Unavailable`] is fatal to a run.
#[derive(Debug, thiserror::Error)]
pub enum EvaluatorError {
    #[error("Evaluator executable not found at {path:?}")]
    Unavailable { path: PathBuf },
    #[error("Evaluator could not be run: {0}")]
    Spawn(#[source] io::Error),
    #[error("Failed to stage matrix artifact: {0}")]
    Staging(#[source] io::Error),
    #[error("Evaluator exited with {status} and produced no usable output")]
    NoOutput { status: String, stderr: String },
    #[error("Evaluator timed out after {0:?}")]
    Timeout(Duration),
}

impl EvaluatorError {
    /// Whether every later evaluation would fail the same way.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Captured standard error, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::NoOutput { stderr, .. } if !stderr.trim().is_empty() => Some(stderr),
            _ => None,
        }
    }
}
