use crate::error::{ProbeError, Result};
use crate::lookup::resolve_executable;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Configuration for launching an external process
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Command to execute, resolved against the search path
    pub command: String,
    /// Arguments for the command
    pub args: Vec<String>,
    /// How long to wait for the child to be reaped after SIGKILL
    pub reap_timeout: Duration,
}

impl LaunchConfig {
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Renders the command line for log messages
    pub fn display(&self) -> String {
        let mut line = self.command.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            reap_timeout: Duration::from_secs(2),
        }
    }
}

/// State of a launched process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Stopped,
}

/// Information about a launched process
#[derive(Debug)]
pub struct ProcessInfo {
    pub state: ProcessState,
    pub pid: Pid,
    pub start_time: Instant,
    /// Exit status once the child has been reaped
    pub exit_status: Option<ExitStatus>,
}

/// Exclusive handle to a launched process.
///
/// The process leads its own process group so that termination also reaches
/// anything it forked, which would otherwise keep the stdout pipe open.
pub struct ManagedProcess {
    config: LaunchConfig,
    info: ProcessInfo,
    child: Option<Child>,
    /// Set once SIGKILL went to the group
    group_killed: bool,
}

/// Starts the configured process with stdout piped back to the caller.
///
/// # Returns
/// * The process handle and the read side of its standard output
pub async fn launch(config: &LaunchConfig) -> Result<(ManagedProcess, ChildStdout)> {
    let program = resolve_executable(&config.command)?;
    info!("Launching process: {}", config.display());

    let mut command = Command::new(&program);
    command.args(&config.args);
    // process_group(0) makes the child the leader of a fresh group
    command.process_group(0);
    command.kill_on_drop(true);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::inherit());

    let mut child = command.spawn().map_err(|source| ProbeError::Start {
        command: program.clone(),
        source,
    })?;

    let pid = match child.id() {
        Some(pid) => Pid::from_raw(pid as i32),
        None => {
            return Err(ProbeError::Start {
                command: program,
                source: std::io::Error::other("process exited before its PID was read"),
            })
        }
    };

    let stdout = match child.stdout.take() {
        Some(stdout) => stdout,
        None => {
            return Err(ProbeError::Start {
                command: program,
                source: std::io::Error::other("stdout was not captured"),
            })
        }
    };

    info!("Process spawned with PID: {}", pid);
    let process = ManagedProcess {
        config: config.clone(),
        info: ProcessInfo {
            state: ProcessState::Running,
            pid,
            start_time: Instant::now(),
            exit_status: None,
        },
        child: Some(child),
        group_killed: false,
    };
    Ok((process, stdout))
}

impl ManagedProcess {
    pub fn pid(&self) -> Pid {
        self.info.pid
    }

    pub fn process_info(&self) -> &ProcessInfo {
        &self.info
    }

    pub fn state(&self) -> ProcessState {
        self.info.state
    }

    /// Polls for exit without blocking, reaping the child if it has exited
    pub fn try_exit_status(&mut self) -> Result<Option<ExitStatus>> {
        if let Some(ref mut child) = self.child {
            if let Some(status) = child.try_wait()? {
                self.mark_stopped(status);
            }
        }
        Ok(self.info.exit_status)
    }

    /// Waits for the process to exit on its own
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(ref mut child) = self.child {
            let status = child.wait().await?;
            self.mark_stopped(status);
        }
        self.info
            .exit_status
            .ok_or_else(|| ProbeError::Io(std::io::Error::other("process has no exit status")))
    }

    /// Force kills the process group and reaps the child.
    ///
    /// The group is signalled even when the leader already exited, since
    /// forked members may still hold the stdout pipe. An empty group is a
    /// success, and a repeated call returns the recorded status without blocking.
    pub async fn terminate(&mut self) -> Result<ExitStatus> {
        info!(
            "Force killing process group {} after {:?}",
            self.info.pid,
            self.info.start_time.elapsed()
        );
        self.kill_group()?;

        if let Some(status) = self.try_exit_status()? {
            debug!("Process {} already exited with {:?}", self.info.pid, status);
            return Ok(status);
        }

        let bound = self.config.reap_timeout;
        match timeout(bound, self.wait()).await {
            Ok(status) => {
                let status = status?;
                info!("Process killed, exit status: {:?}", status);
                Ok(status)
            }
            Err(_) => Err(ProbeError::Timeout {
                what: "process reaping",
                bound,
            }),
        }
    }

    fn kill_group(&mut self) -> Result<()> {
        match kill(Pid::from_raw(-self.info.pid.as_raw()), Signal::SIGKILL) {
            Ok(()) => {}
            Err(Errno::ESRCH) => debug!("Process group {} already gone", self.info.pid),
            Err(e) => return Err(ProbeError::Io(e.into())),
        }
        self.group_killed = true;
        Ok(())
    }

    fn mark_stopped(&mut self, status: ExitStatus) {
        self.info.exit_status = Some(status);
        self.info.state = ProcessState::Stopped;
        self.child = None;
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        // Owner never terminated us; kill the group so nothing keeps listening.
        // A reaped leader may still have live group members.
        if !self.group_killed {
            if self.info.state == ProcessState::Running {
                warn!(
                    "ManagedProcess dropped with running child (PID: {}), emergency cleanup",
                    self.info.pid
                );
            }
            match kill(Pid::from_raw(-self.info.pid.as_raw()), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!("Failed to send SIGKILL during emergency cleanup: {}", e),
            }
        }
    }
}
