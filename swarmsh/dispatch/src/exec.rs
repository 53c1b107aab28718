use std::{path::PathBuf, process::Stdio, time::Duration};

use serde::Serialize;
use tokio::{process::Command, time::{timeout, Instant}};

/// Default per-call timeout for external invocations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_OUTPUT_BYTES: usize = 16 * 1024;

/// Fully resolved external invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// Deadline for the whole call.
    pub timeout: Duration,
}

impl ExecSpec {
    /// Creates a spec with the default timeout and no working directory.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Terminal status of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    /// Exit code zero.
    Success,
    /// Non-zero exit code or signal.
    Failed,
    /// Deadline expired; the child was killed.
    Timeout,
    /// The process could not be started or awaited.
    Error,
}

/// Outcome of one external invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ExecRecord {
    /// Program that ran.
    pub program: String,
    /// Status.
    pub status: ExecStatus,
    /// Exit code, when the process exited normally.
    pub exit_code: Option<i32>,
    /// Wall time in milliseconds.
    pub duration_ms: u64,
    /// Captured stdout (truncated).
    pub stdout: String,
    /// Captured stderr (truncated).
    pub stderr: String,
    /// Spawn or wait failure.
    pub error: Option<String>,
}

impl ExecRecord {
    fn new(spec: &ExecSpec, status: ExecStatus) -> Self {
        Self {
            program: spec.program.clone(),
            status,
            exit_code: None,
            duration_ms: 0,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
        }
    }
}

/// Runs `spec` to completion or until its timeout expires.
pub async fn execute(spec: &ExecSpec) -> ExecRecord {
    let mut record = ExecRecord::new(spec, ExecStatus::Success);
    let mut command = Command::new(&spec.program);
    command.args(&spec.args);
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);

    let child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            record.status = ExecStatus::Error;
            record.error = Some(err.to_string());
            return record;
        }
    };

    let start = Instant::now();
    match timeout(spec.timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            record.duration_ms = elapsed_ms(start);
            record.exit_code = output.status.code();
            record.stdout = sanitize_output(&output.stdout);
            record.stderr = sanitize_output(&output.stderr);
            if !output.status.success() {
                record.status = ExecStatus::Failed;
            }
        }
        Ok(Err(err)) => {
            record.status = ExecStatus::Error;
            record.duration_ms = elapsed_ms(start);
            record.error = Some(err.to_string());
        }
        Err(_) => {
            record.status = ExecStatus::Timeout;
            record.duration_ms = u64::try_from(spec.timeout.as_millis()).unwrap_or(u64::MAX);
            record.error = Some("command timed out".into());
        }
    }
    record
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn sanitize_output(bytes: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if text.len() > MAX_OUTPUT_BYTES {
        let mut cut = MAX_OUTPUT_BYTES;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("\n...[truncated]");
    }
    text
}
