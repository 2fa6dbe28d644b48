type Result<T> = color_eyre::eyre::Result<T>;

mod cli;

use clap::Parser;
use eyre::{bail, WrapErr};
use std::time::Duration;
use tokio::select;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{parse_addr, Cli, Commands};
use procprobe::command::run_captured;
use procprobe::launcher::LaunchConfig;
use procprobe::lines::stream_lines;
use procprobe::listener;
use procprobe::lookup::resolve_executable;
use procprobe::scenario::Scenario;
use procprobe::signals::Signals;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;

    // stdout carries captured data, so logs go to stderr
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            expect,
            timeout_ms,
            program,
            args,
        } => {
            let output = run_captured(&program, &args, Duration::from_millis(timeout_ms)).await?;
            let trimmed = output.stdout_trimmed();
            println!("{}", trimmed);
            if !output.status.success() {
                warn!("{} exited with {:?}", program, output.status);
            }
            if let Some(expected) = expect {
                procprobe::error::check(trimmed.as_bytes(), expected.as_bytes())?;
                info!("output matched expectation");
            }
        }
        Commands::Which { name } => {
            let path = resolve_executable(&name)?;
            println!("{}", path.display());
        }
        Commands::Netcat(args) => {
            let config = args.into_config()?;
            let report = Scenario::new(config).run().await?;
            println!(
                "verified {:?} (drain completed {:?} after termination)",
                String::from_utf8_lossy(&report.captured),
                report.completion_latency
            );
        }
        Commands::Stream { program, args } => {
            run_stream(LaunchConfig::new(program, args)).await?;
        }
        Commands::Listen { addr } => {
            listener::serve(parse_addr(&addr)?).await?;
        }
    }

    Ok(())
}

/// Prints each line of the streamed command until it exits or a signal arrives
async fn run_stream(config: LaunchConfig) -> Result<()> {
    let mut signals = Signals::new()?;

    select! {
        summary = stream_lines(&config, |line| println!("{}", line)) => {
            let summary = summary.wrap_err_with(|| format!("streaming {} failed", config.command))?;
            info!("{} lines streamed", summary.lines);
            if !summary.status.success() {
                bail!("{} exited with {:?}", config.command, summary.status);
            }
        }
        _ = signals.next() => {
            // Dropping the stream future drops the process handle, which kills the group
            info!("signal received, stopping {}", config.command);
        }
    }

    Ok(())
}
