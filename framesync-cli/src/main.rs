//! FrameSync CLI
//!
//! Drives a frame buffer with synthetic decoder threads and a single
//! consumer, and validates buffer configuration files.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use framesync_core::BufferConfig;

mod simulate;

use simulate::SimulateOptions;

const USAGE: &str = "\
Usage:
  framesync simulate [--config PATH] [--frames N] [--seek-at N] [--json]
  framesync check-config PATH
  framesync default-config

Logging is controlled with RUST_LOG (default: framesync=info).";

#[derive(Debug, PartialEq)]
enum Command {
    Simulate(SimulateOptions),
    CheckConfig(PathBuf),
    DefaultConfig,
    Help,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("framesync=info,framesync_core=info")
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = match parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };
    debug!("Command: {:?}", command);

    match command {
        Command::Simulate(options) => simulate::run(&options),
        Command::CheckConfig(path) => check_config(&path),
        Command::DefaultConfig => {
            println!("{}", BufferConfig::default().to_json()?);
            Ok(())
        }
        Command::Help => {
            println!("FrameSync v{}\n\n{}", framesync_core::VERSION, USAGE);
            Ok(())
        }
    }
}

fn check_config(path: &Path) -> Result<()> {
    let config = BufferConfig::load(path)
        .with_context(|| format!("loading {}", path.display()))?;
    let buffer = framesync_core::FrameBuffer::from_config(&config)
        .with_context(|| format!("invalid stream set in {}", path.display()))?;

    info!(
        "Config OK: timebase={}, max_duration={}ms ({} ticks)",
        buffer.timebase(),
        config.max_duration_ms,
        buffer.max_duration()
    );
    for stream in &config.streams {
        println!(
            "stream #{}: timebase={} kind={:?}",
            stream.index,
            stream.timebase,
            stream.kind_or_data()
        );
    }
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Command> {
    let Some(sub) = args.get(1) else {
        return Ok(Command::Help);
    };

    match sub.as_str() {
        "simulate" => parse_simulate_args(&args[2..]).map(Command::Simulate),
        "check-config" => {
            let path = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("Missing config path for check-config"))?;
            Ok(Command::CheckConfig(PathBuf::from(path)))
        }
        "default-config" => Ok(Command::DefaultConfig),
        "help" | "--help" | "-h" => Ok(Command::Help),
        other => Err(anyhow::anyhow!("Unknown command: {:?}", other)),
    }
}

fn parse_simulate_args(args: &[String]) -> Result<SimulateOptions> {
    let mut options = SimulateOptions::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --config"))?;
                options.config = Some(PathBuf::from(value));
                i += 2;
            }
            "--frames" | "-n" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --frames"))?;
                options.frames = value
                    .parse()
                    .with_context(|| format!("Invalid --frames value: {}", value))?;
                i += 2;
            }
            "--seek-at" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --seek-at"))?;
                options.seek_at = Some(
                    value
                        .parse()
                        .with_context(|| format!("Invalid --seek-at value: {}", value))?,
                );
                i += 2;
            }
            "--json" => {
                options.json = true;
                i += 1;
            }
            other => {
                return Err(anyhow::anyhow!("Unknown simulate option: {}", other));
            }
        }
    }

    Ok(options)
}
