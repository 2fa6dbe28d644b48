use anyhow::Result;
use procprobe::launcher::{launch, LaunchConfig, ProcessState};
use procprobe::ProbeError;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use tempfile::TempDir;

/// An executable whose interpreter does not exist is refused by the OS
#[tokio::test]
async fn test_spawn_refusal_is_start_error() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let script = temp_dir.path().join("broken-interpreter");
    std::fs::write(&script, "#!/nonexistent/procprobe-interpreter\n")?;
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;

    let config = LaunchConfig::new(script.to_string_lossy().into_owned(), Vec::<String>::new());
    let err = launch(&config).await.err().expect("launch must fail");
    assert!(matches!(err, ProbeError::Start { .. }), "got: {}", err);
    Ok(())
}

/// Terminating a child that forked keeps no writer on the stdout pipe
#[tokio::test]
async fn test_terminate_reaches_process_group() -> Result<()> {
    use procprobe::drain::OutputDrain;

    let config = LaunchConfig::new("sh", ["-c", "sleep 30 & sleep 30"]);
    let (mut process, stdout) = launch(&config).await?;
    let drain = OutputDrain::spawn(stdout);

    tokio::time::sleep(Duration::from_millis(100)).await;
    process.terminate().await?;
    assert_eq!(process.state(), ProcessState::Stopped);

    // Both sleeps held stdout; the drain only finishes if both died
    let captured = drain.wait(Duration::from_secs(1)).await?;
    assert!(captured.is_empty());
    Ok(())
}

/// A leader that already exited still has its forked children killed
#[tokio::test]
async fn test_terminate_after_leader_exit_kills_group() -> Result<()> {
    use procprobe::drain::OutputDrain;

    let config = LaunchConfig::new("sh", ["-c", "sleep 30 & exit 0"]);
    let (mut process, stdout) = launch(&config).await?;
    let drain = OutputDrain::spawn(stdout);

    // Let the shell exit while its background sleep keeps stdout open
    tokio::time::sleep(Duration::from_millis(300)).await;
    let status = process.terminate().await?;
    assert!(status.success());
    assert_eq!(process.state(), ProcessState::Stopped);

    let captured = drain.wait(Duration::from_secs(1)).await?;
    assert!(captured.is_empty());
    Ok(())
}
