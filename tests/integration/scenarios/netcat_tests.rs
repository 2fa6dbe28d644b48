use crate::integration::infrastructure::{probe_binary, ListenerHarness};
use anyhow::Result;
use procprobe::scenario::{Scenario, ScenarioConfig, ScenarioState, TerminationPoint};
use procprobe::stimulus::connect;
use procprobe::ProbeError;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::info;

/// Payload sent through the listener comes back on its stdout exactly
#[tokio::test]
async fn test_payload_round_trip_through_listener() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = ListenerHarness::new()?;
    let report = Scenario::new(harness.scenario_config(TerminationPoint::AfterDelivery))
        .run()
        .await?;

    assert_eq!(report.captured, b"hello");
    assert!(
        report.completion_latency < Duration::from_secs(1),
        "drain took {:?} after termination",
        report.completion_latency
    );
    assert_eq!(
        report.states,
        vec![
            ScenarioState::NotStarted,
            ScenarioState::ProcessRunning,
            ScenarioState::StimulusSent,
            ScenarioState::Terminating,
            ScenarioState::DrainComplete,
            ScenarioState::Verified,
        ]
    );
    Ok(())
}

/// Killing the listener before any client connects fails without hanging
#[tokio::test]
async fn test_termination_before_connect_fails_deterministically() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = ListenerHarness::new()?;
    // Generous startup bound: a dead listener must not be polled until it expires
    let config = harness.scenario_config(TerminationPoint::BeforeConnect);
    assert_eq!(config.startup_timeout, Duration::from_secs(5));

    let started = Instant::now();
    let err = Scenario::new(config).run().await.unwrap_err();
    let elapsed = started.elapsed();
    info!("failed after {:?}: {}", elapsed, err);

    assert!(matches!(err, ProbeError::Connect { .. }), "got: {}", err);
    assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
    Ok(())
}

/// Withholding termination ends in a timeout, and the listener is still cleaned up
#[tokio::test]
async fn test_withheld_termination_times_out() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = ListenerHarness::new()?;
    let mut config = harness.scenario_config(TerminationPoint::Never);
    config.completion_timeout = Duration::from_millis(300);

    let started = Instant::now();
    let err = Scenario::new(config).run().await.unwrap_err();
    assert!(matches!(err, ProbeError::Timeout { .. }), "got: {}", err);
    assert!(started.elapsed() < Duration::from_secs(5));

    // Nothing may still be listening once the run returned
    let reconnect = connect(harness.addr, Duration::from_millis(200)).await;
    assert!(reconnect.is_err(), "listener survived the failed scenario");
    Ok(())
}

/// Longer payloads are waited for in full before the listener is killed
#[tokio::test]
async fn test_longer_payload_round_trip() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = ListenerHarness::new()?;
    let config = ScenarioConfig {
        payload: b"a somewhat longer payload".to_vec(),
        ..harness.scenario_config(TerminationPoint::AfterDelivery)
    };

    let report = Scenario::new(config).run().await?;
    assert_eq!(report.captured, b"a somewhat longer payload");
    Ok(())
}

/// The same scenario driven through the binary
#[tokio::test]
async fn test_netcat_subcommand_with_builtin_listener() -> Result<()> {
    let harness = ListenerHarness::new()?;
    let addr = harness.addr.to_string();
    let listener_addr = format!("--addr={}", addr);
    let binary = probe_binary();

    let output = Command::new(&binary)
        .args(["netcat", "--addr", &addr, "--startup-timeout-ms", "5000", "--listener"])
        .arg(&binary)
        .args(["--listener-arg", "listen", "--listener-arg", &listener_addr])
        .output()
        .await?;

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("verified \"hello\""));
    Ok(())
}

/// Round trip through `nc -lk`, when the host has a compatible nc
#[tokio::test]
async fn test_payload_round_trip_through_netcat() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    if !ListenerHarness::openbsd_netcat_available().await {
        eprintln!("skipping: OpenBSD nc not found in PATH");
        return Ok(());
    }

    let harness = ListenerHarness::new()?;
    let mut config = ScenarioConfig::with_netcat(harness.addr);
    config.startup_timeout = Duration::from_secs(5);

    let report = Scenario::new(config).run().await?;
    assert_eq!(report.captured, b"hello");
    Ok(())
}
