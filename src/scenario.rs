use crate::drain::OutputDrain;
use crate::error::{check, Result};
use crate::launcher::{launch, LaunchConfig, ManagedProcess};
use crate::stimulus::{send_payload, wait_until_listening};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_PAYLOAD: &str = "hello";

/// States of a netcat scenario run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioState {
    NotStarted,
    ProcessRunning,
    StimulusSent,
    Terminating,
    DrainComplete,
    DrainTimedOut,
    Verified,
    Failed,
}

impl ScenarioState {
    /// Whether the run is allowed to move from `self` to `next`.
    ///
    /// Every non-terminal state may fail. Terminating is reachable straight
    /// from ProcessRunning when the listener is killed before any stimulus.
    pub fn can_transition_to(self, next: ScenarioState) -> bool {
        use ScenarioState::*;
        match (self, next) {
            (Verified, _) | (Failed, _) => false,
            (_, Failed) => true,
            (NotStarted, ProcessRunning) => true,
            (ProcessRunning, StimulusSent) | (ProcessRunning, Terminating) => true,
            (StimulusSent, Terminating) => true,
            (Terminating, DrainComplete) | (Terminating, DrainTimedOut) => true,
            (DrainComplete, Verified) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ScenarioState::Verified | ScenarioState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScenarioState::NotStarted => "not-started",
            ScenarioState::ProcessRunning => "process-running",
            ScenarioState::StimulusSent => "stimulus-sent",
            ScenarioState::Terminating => "terminating",
            ScenarioState::DrainComplete => "drain-complete",
            ScenarioState::DrainTimedOut => "drain-timed-out",
            ScenarioState::Verified => "verified",
            ScenarioState::Failed => "failed",
        }
    }
}

/// When the listener gets killed relative to the stimulus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationPoint {
    /// After the payload reached the listener's stdout (normal run)
    AfterDelivery,
    /// Right after launch, before any client connects
    BeforeConnect,
    /// Never; the completion wait is expected to time out
    Never,
}

/// Configuration for a netcat scenario run
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Address the listener binds and the client connects to
    pub addr: SocketAddr,
    /// Bytes the client sends and the capture must equal
    pub payload: Vec<u8>,
    /// Listener process to launch
    pub listener: LaunchConfig,
    /// Bound on waiting for the listener to accept connections
    pub startup_timeout: Duration,
    /// Interval between readiness probes
    pub poll_interval: Duration,
    /// Bound on the client connect
    pub connect_timeout: Duration,
    /// Bound on waiting for the payload to show up on the listener's stdout
    pub propagation_timeout: Duration,
    /// Bound on waiting for the drain after termination
    pub completion_timeout: Duration,
    pub termination: TerminationPoint,
}

impl ScenarioConfig {
    /// Configuration using `nc -lk` bound to `addr`
    pub fn with_netcat(addr: SocketAddr) -> Self {
        Self {
            addr,
            listener: netcat_listener(addr),
            ..Default::default()
        }
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT);
        Self {
            addr,
            payload: DEFAULT_PAYLOAD.as_bytes().to_vec(),
            listener: netcat_listener(addr),
            startup_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(25),
            connect_timeout: Duration::from_millis(500),
            propagation_timeout: Duration::from_secs(1),
            completion_timeout: Duration::from_secs(1),
            termination: TerminationPoint::AfterDelivery,
        }
    }
}

/// Launch configuration for `nc -lk IP PORT`
pub fn netcat_listener(addr: SocketAddr) -> LaunchConfig {
    LaunchConfig::new(
        "nc",
        ["-lk".to_string(), addr.ip().to_string(), addr.port().to_string()],
    )
}

/// Outcome of a verified run
#[derive(Debug)]
pub struct ScenarioReport {
    pub captured: Vec<u8>,
    /// Time from issuing termination to the drain completing
    pub completion_latency: Duration,
    pub states: Vec<ScenarioState>,
}

/// Drives one run: listener, drain, stimulus, termination, comparison
pub struct Scenario {
    config: ScenarioConfig,
    state: ScenarioState,
    history: Vec<ScenarioState>,
    process: Option<ManagedProcess>,
}

impl Scenario {
    pub fn new(config: ScenarioConfig) -> Self {
        Self {
            config,
            state: ScenarioState::NotStarted,
            history: vec![ScenarioState::NotStarted],
            process: None,
        }
    }

    pub fn state(&self) -> ScenarioState {
        self.state
    }

    /// Runs the scenario to a terminal state.
    ///
    /// The listener is terminated on every path out of this method.
    pub async fn run(mut self) -> Result<ScenarioReport> {
        info!(
            "Running netcat scenario against {} with {}",
            self.config.addr,
            self.config.listener.display()
        );
        let outcome = self.drive().await;

        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.terminate().await {
                warn!("Failed to terminate listener during cleanup: {}", e);
            }
        }

        match outcome {
            Ok((captured, completion_latency)) => {
                self.transition(ScenarioState::Verified);
                info!("Scenario verified in {:?} after termination", completion_latency);
                Ok(ScenarioReport {
                    captured,
                    completion_latency,
                    states: self.history,
                })
            }
            Err(e) => {
                self.transition(ScenarioState::Failed);
                warn!("Scenario failed: {}", e);
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Result<(Vec<u8>, Duration)> {
        let (process, stdout) = launch(&self.config.listener).await?;
        self.process = Some(process);
        self.transition(ScenarioState::ProcessRunning);

        let mut drain = OutputDrain::spawn(stdout);

        if self.config.termination == TerminationPoint::BeforeConnect {
            self.transition(ScenarioState::Terminating);
            self.terminate_listener().await?;
        } else {
            // A killed listener never becomes ready; the single connect below fails fast
            wait_until_listening(
                self.config.addr,
                self.config.startup_timeout,
                self.config.poll_interval,
            )
            .await?;
        }

        // Held open until after termination so the listener never sees EOF first
        let _client = send_payload(self.config.addr, &self.config.payload, self.config.connect_timeout).await?;
        self.transition(ScenarioState::StimulusSent);

        let delivered = drain
            .wait_for_bytes(self.config.payload.len(), self.config.propagation_timeout)
            .await;
        debug!(
            "payload delivered: {} ({} bytes drained)",
            delivered,
            drain.bytes_received()
        );

        let terminated_at = Instant::now();
        match self.config.termination {
            TerminationPoint::AfterDelivery => {
                self.transition(ScenarioState::Terminating);
                self.terminate_listener().await?;
            }
            // Nothing will close the listener's stdout
            TerminationPoint::Never => self.transition(ScenarioState::Terminating),
            TerminationPoint::BeforeConnect => {}
        }

        let captured = match drain.wait(self.config.completion_timeout).await {
            Ok(captured) => captured,
            Err(e) => {
                if e.is_timeout() {
                    self.transition(ScenarioState::DrainTimedOut);
                }
                return Err(e);
            }
        };
        let completion_latency = terminated_at.elapsed();
        self.transition(ScenarioState::DrainComplete);

        check(&captured, &self.config.payload)?;
        Ok((captured, completion_latency))
    }

    async fn terminate_listener(&mut self) -> Result<()> {
        if let Some(ref mut process) = self.process {
            process.terminate().await?;
        }
        Ok(())
    }

    fn transition(&mut self, next: ScenarioState) {
        if !self.state.can_transition_to(next) {
            warn!("Unexpected scenario transition {:?} -> {:?}", self.state, next);
        }
        debug!("scenario {} -> {}", self.state.as_str(), next.as_str());
        self.state = next;
        self.history.push(next);
    }
}

/// Maps a failed run to whether a missing listener tool caused it
pub fn skipped_for_missing_tool(result: &Result<ScenarioReport>) -> bool {
    matches!(result, Err(e) if e.is_missing_tool())
}
