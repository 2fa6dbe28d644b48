use crate::error::{ProbeError, Result};
use crate::lookup::resolve_executable;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::info;

/// Output of a command that ran to completion
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CapturedOutput {
    /// Stdout decoded lossily with surrounding whitespace removed
    pub fn stdout_trimmed(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }
}

/// Runs `program` to completion and captures its output.
///
/// A non-zero exit is reported through `status`, not as an error. The
/// child is killed if `bound` expires.
pub async fn run_captured(program: &str, args: &[String], bound: Duration) -> Result<CapturedOutput> {
    let path = resolve_executable(program)?;
    info!("Running {} {:?}", program, args);

    let mut command = Command::new(&path);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|source| ProbeError::Start {
        command: path.clone(),
        source,
    })?;

    match timeout(bound, child.wait_with_output()).await {
        Ok(output) => {
            let output = output?;
            Ok(CapturedOutput {
                status: output.status,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
        Err(_) => Err(ProbeError::Timeout {
            what: "command execution",
            bound,
        }),
    }
}
