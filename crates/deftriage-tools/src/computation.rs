//! Optional capabilities: sandboxed computation and external research

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use deftriage_utils::error::CapabilityError;

pub const RUN_COMPUTATION: &str = "run_computation";
pub const EXTERNAL_RESEARCH: &str = "external_research";

/// Output kept per stream
const OUTPUT_CAP_BYTES: usize = 16 * 1024;

/// Runs a snippet of code for the analysis role.
#[async_trait]
pub trait Computation: Send + Sync {
    /// Execute `code` and return its combined output.
    ///
    /// A snippet that fails at runtime is not a capability error; its exit
    /// status and stderr are part of the returned text.
    async fn run(&self, code: &str) -> Result<String, CapabilityError>;
}

/// Looks things up outside the codebase (documentation, advisories).
#[async_trait]
pub trait ExternalResearch: Send + Sync {
    async fn research(&self, query: &str) -> Result<String, CapabilityError>;
}

/// [`Computation`] running an interpreter on a script in a scratch directory.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    interpreter: PathBuf,
    timeout: Duration,
}

impl ProcessSandbox {
    /// Resolve `interpreter` on PATH.
    ///
    /// # Errors
    ///
    /// `BackendUnavailable` when the interpreter cannot be found.
    pub fn new(interpreter: &str, timeout: Duration) -> Result<Self, CapabilityError> {
        let interpreter = which::which(interpreter).map_err(|e| CapabilityError::BackendUnavailable {
            backend: interpreter.to_string(),
            reason: format!("interpreter not found in PATH: {e}"),
        })?;
        Ok(Self {
            interpreter,
            timeout,
        })
    }
}

#[async_trait]
impl Computation for ProcessSandbox {
    async fn run(&self, code: &str) -> Result<String, CapabilityError> {
        let unavailable = |reason: String| CapabilityError::BackendUnavailable {
            backend: self.interpreter.display().to_string(),
            reason,
        };

        // Scratch directory is removed when dropped
        let scratch = tempfile::tempdir().map_err(|e| unavailable(format!("scratch dir: {e}")))?;
        let script = scratch.path().join("snippet");
        tokio::fs::write(&script, code)
            .await
            .map_err(|e| unavailable(format!("write snippet: {e}")))?;

        let child = Command::new(&self.interpreter)
            .arg(&script)
            .current_dir(scratch.path())
            .env_clear()
            .env("PATH", std::env::var_os("PATH").unwrap_or_default())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| unavailable(format!("spawn: {e}")))?;

        debug!(interpreter = %self.interpreter.display(), "Running computation");
        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(unavailable(format!("wait: {e}"))),
            Err(_) => {
                return Err(CapabilityError::Timeout {
                    capability: RUN_COMPUTATION.to_string(),
                    duration: self.timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut text = String::new();
        if !output.status.success() {
            text.push_str(&format!("exit status: {}\n", output.status));
        }
        text.push_str(cap(&stdout));
        if !stderr.trim().is_empty() {
            text.push_str("\nstderr:\n");
            text.push_str(cap(&stderr));
        }
        Ok(text)
    }
}

fn cap(s: &str) -> &str {
    if s.len() <= OUTPUT_CAP_BYTES {
        return s;
    }
    let mut end = OUTPUT_CAP_BYTES;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
