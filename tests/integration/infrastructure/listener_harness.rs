use anyhow::{Context, Result};
use procprobe::command::run_captured;
use procprobe::launcher::LaunchConfig;
use procprobe::scenario::{ScenarioConfig, TerminationPoint};
use procprobe::stimulus::free_local_port;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Path of the procprobe binary built for this test run
pub fn probe_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_procprobe"))
}

/// Hands out a free loopback address and listener configurations bound to it
pub struct ListenerHarness {
    pub addr: SocketAddr,
}

impl ListenerHarness {
    pub fn new() -> Result<Self> {
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let port = free_local_port(ip).context("Failed to find a free port")?;
        Ok(Self {
            addr: SocketAddr::new(ip, port),
        })
    }

    /// Launch configuration for the built-in `procprobe listen`
    pub fn listener_config(&self) -> LaunchConfig {
        LaunchConfig::new(
            probe_binary().to_string_lossy().into_owned(),
            ["listen".to_string(), "--addr".to_string(), self.addr.to_string()],
        )
    }

    /// Scenario configuration driving the built-in listener
    pub fn scenario_config(&self, termination: TerminationPoint) -> ScenarioConfig {
        ScenarioConfig {
            addr: self.addr,
            listener: self.listener_config(),
            startup_timeout: Duration::from_secs(5),
            termination,
            ..Default::default()
        }
    }

    /// True when `nc` on PATH is the OpenBSD flavour that understands `-lk ADDR PORT`
    pub async fn openbsd_netcat_available() -> bool {
        match run_captured("nc", &["-h".to_string()], Duration::from_secs(2)).await {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                text.contains("OpenBSD")
            }
            Err(_) => false,
        }
    }
}
