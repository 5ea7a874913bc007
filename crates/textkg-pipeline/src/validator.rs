//! Adapter around the external graph validator executable.
//!
//! The validator is a separate process invoked once per generated document.
//! Its exit status carries the verdict tier; violation details arrive on
//! stdout, one per line.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use textkg_types::{GraphDocument, KgError, Verdict, Violation};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Something that can judge a graph document against the vocabulary.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, document: &GraphDocument) -> Result<Verdict, KgError>;
}

/// Validator backed by an external executable.
///
/// Exit status mapping: 0 means the document conforms, 1 means recoverable
/// content violations (parsed from stdout), anything else is treated as an
/// infrastructure failure. Unknown statuses are never retried.
#[derive(Debug)]
pub struct ProcessValidator {
    executable: PathBuf,
    vocabulary_file: PathBuf,
    timeout: Duration,
}

impl ProcessValidator {
    /// Both the executable and the vocabulary file must exist up front.
    pub fn new(
        executable: impl Into<PathBuf>,
        vocabulary_file: impl Into<PathBuf>,
    ) -> Result<Self, KgError> {
        let executable = executable.into();
        let vocabulary_file = vocabulary_file.into();
        if !executable.exists() {
            return Err(KgError::ConfigError(format!(
                "validator executable not found at {}",
                executable.display()
            )));
        }
        if !vocabulary_file.exists() {
            return Err(KgError::ConfigError(format!(
                "validator vocabulary file not found at {}",
                vocabulary_file.display()
            )));
        }
        Ok(Self {
            executable,
            vocabulary_file,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run_once(&self, document: &GraphDocument) -> Result<Verdict, KgError> {
        let dir = tempfile::tempdir()?;
        let doc_path = dir.path().join("document.jsonld");
        tokio::fs::write(&doc_path, document.to_json()).await?;

        let mut child = match Command::new(&self.executable)
            .arg("-schema-file")
            .arg(&self.vocabulary_file)
            .arg(&doc_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return Ok(Verdict::InfrastructureFailure {
                    reason: format!("failed to spawn validator: {e}"),
                })
            }
        };

        let pid = child.id();
        // Drain pipes concurrently with the wait: a validator emitting more
        // than a pipe buffer of violations must not stall the child.
        let stdout_task = drain_pipe(child.stdout.take());
        let stderr_task = drain_pipe(child.stderr.take());

        let status = tokio::select! {
            status = child.wait() => status,
            _ = tokio::time::sleep(self.timeout) => {
                terminate_group(pid);
                if tokio::time::timeout(Duration::from_secs(2), child.wait())
                    .await
                    .is_err()
                {
                    kill_group(pid);
                    let _ = child.wait().await;
                }
                return Ok(Verdict::InfrastructureFailure {
                    reason: format!(
                        "validator timed out after {}ms",
                        self.timeout.as_millis()
                    ),
                });
            }
        };

        let status = match status {
            Ok(s) => s,
            Err(e) => {
                return Ok(Verdict::InfrastructureFailure {
                    reason: format!("failed to wait for validator: {e}"),
                })
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        match status.code() {
            Some(0) => Ok(Verdict::Valid),
            Some(1) => {
                let violations = parse_violations(&stdout);
                if violations.is_empty() {
                    // Violation status with nothing to act on is unusable output.
                    Ok(Verdict::InfrastructureFailure {
                        reason: "validator reported violations but produced no parseable output"
                            .to_string(),
                    })
                } else {
                    Ok(Verdict::RecoverableErrors { violations })
                }
            }
            Some(code) => Ok(Verdict::InfrastructureFailure {
                reason: format!(
                    "validator exited with status {code}: {}",
                    stderr.trim()
                ),
            }),
            None => Ok(Verdict::InfrastructureFailure {
                reason: "validator terminated by signal".to_string(),
            }),
        }
    }
}

#[async_trait]
impl Validator for ProcessValidator {
    async fn validate(&self, document: &GraphDocument) -> Result<Verdict, KgError> {
        self.run_once(document).await
    }
}

fn drain_pipe<R>(pipe: Option<R>) -> tokio::task::JoinHandle<String>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buf).await;
        }
        buf
    })
}

fn terminate_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::killpg(pid as i32, libc::SIGTERM);
        }
    }
}

fn kill_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::killpg(pid as i32, libc::SIGKILL);
        }
    }
}

/// Parse violation lines of the form `CODE /node/path: message`.
///
/// Lines that do not match still produce a violation with code `unknown`, so
/// a slightly off validator build does not lose information.
fn parse_violations(stdout: &str) -> Vec<Violation> {
    stdout
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let (head, message) = match line.split_once(": ") {
                Some((head, message)) => (head.trim(), message.trim()),
                None => {
                    return Some(Violation {
                        code: "unknown".to_string(),
                        path: String::new(),
                        message: line.to_string(),
                    })
                }
            };
            let (code, path) = match head.split_once(' ') {
                Some((code, path)) => (code.to_string(), path.trim().to_string()),
                None => (head.to_string(), String::new()),
            };
            Some(Violation {
                code,
                path,
                message: message.to_string(),
            })
        })
        .collect()
}
