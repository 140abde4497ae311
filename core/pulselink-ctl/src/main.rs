//! pulselink: command line control surface for the bridge.
//!
//! Wraps the engine facade for interactive use: producer lifecycle,
//! status inspection, synthetic state injection, and log tailing.

use std::path::PathBuf;
use std::process::Command;

use clap::{Parser, Subcommand};
use pulselink_core::{BridgeEngine, BridgePaths, PulselinkError, StartOutcome, StopOutcome};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pulselink")]
#[command(about = "Biometric state bridge controller")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the producer daemon
    Start,

    /// Stop the producer daemon
    Stop,

    /// Show producer and signal status
    ///
    /// Prints the current verdict and record. Exits non-zero when the
    /// producer is not running, so scripts can branch on the exit code.
    Status {
        /// Emit the full status report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Publish a synthetic state record (for testing consumers)
    Simulate {
        /// Stress index in [0.0, 1.0]
        #[arg(long)]
        stress: f64,

        /// Confidence in [0.0, 1.0]
        #[arg(long, default_value_t = 1.0)]
        confidence: f64,

        /// Source label recorded on the state
        #[arg(long, default_value = "simulation")]
        source: String,
    },

    /// Print the tail of the bridge log
    Logs {
        /// Number of lines to print
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PULSELINK_DEBUG_LOG")
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli.command) {
        eprintln!("pulselink: {}", err);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<(), PulselinkError> {
    let paths = BridgePaths::resolve()?;
    let engine = BridgeEngine::new(paths);

    match command {
        Commands::Start => {
            let mut daemon = Command::new(daemon_binary());
            match engine.start_producer(&mut daemon)? {
                StartOutcome::Started { pid, healthy: true } => {
                    println!("Producer started (pid {})", pid);
                }
                StartOutcome::Started { pid, healthy: false } => {
                    println!(
                        "Producer started (pid {}) but the socket did not come up; check `pulselink logs`",
                        pid
                    );
                    std::process::exit(1);
                }
                StartOutcome::AlreadyRunning { pid } => {
                    println!("Producer already running (pid {})", pid);
                }
            }
        }
        Commands::Stop => match engine.stop_producer()? {
            StopOutcome::Stopped { pid, forced } => {
                if forced {
                    println!("Producer (pid {}) did not exit cleanly and was killed", pid);
                } else {
                    println!("Producer stopped (pid {})", pid);
                }
            }
            StopOutcome::NotRunning => println!("Producer is not running"),
        },
        Commands::Status { json } => {
            let report = engine.status();
            if json {
                let rendered = serde_json::to_string_pretty(&report)
                    .map_err(|err| PulselinkError::json("serialize status report", err))?;
                println!("{}", rendered);
            } else {
                println!("{}", report.describe());
                if let Some(pid) = report.producer_pid {
                    println!("  pid:        {}", pid);
                }
                println!("  verdict:    {}", report.verdict.as_str());
                println!("  channel:    {}", report.channel.as_str());
                println!("  stress:     {:.2}", report.record.stress_index);
                println!("  flow state: {}", report.record.flow_state.as_str());
                println!("  source:     {}", report.record.source);
            }
            if !report.producer_running {
                std::process::exit(1);
            }
        }
        Commands::Simulate {
            stress,
            confidence,
            source,
        } => {
            let record = engine.inject(stress, confidence, &source)?;
            println!(
                "Published {} (stress {:.2}, confidence {:.2}, source {})",
                record.flow_state.as_str(),
                record.stress_index,
                record.confidence,
                record.source
            );
        }
        Commands::Logs { lines } => {
            let log_file = engine.paths().log_file.clone();
            if !log_file.exists() {
                println!("No log file at {}", log_file.display());
                return Ok(());
            }
            let content = fs_err::read_to_string(&log_file)
                .map_err(|err| PulselinkError::io("read log file", err))?;
            for line in tail(&content, lines) {
                println!("{}", line);
            }
        }
    }
    Ok(())
}

/// Prefers the daemon binary installed next to this one, then PATH.
fn daemon_binary() -> PathBuf {
    if let Ok(own) = std::env::current_exe() {
        if let Some(dir) = own.parent() {
            let sibling = dir.join("pulselink-daemon");
            if sibling.exists() {
                return sibling;
            }
        }
    }
    PathBuf::from("pulselink-daemon")
}

fn tail(content: &str, lines: usize) -> Vec<&str> {
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].to_vec()
}
