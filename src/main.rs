use std::path::PathBuf;

use clap::Parser;
use rover_drive_runtime::config::RuntimeConfig;
use tracing_subscriber::EnvFilter;

/// Six-wheel rover drive runtime
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// JSON config file; built-in defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Servo bus serial port (enables motor control)
    #[arg(long)]
    port: Option<String>,

    /// Simulate wheels even if the config enables motors
    #[arg(long, conflicts_with = "port")]
    sim: bool,
}

fn load_config(args: &Args) -> Result<RuntimeConfig, rover_drive_runtime::config::ConfigError> {
    let mut config = match &args.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    if let Some(port) = &args.port {
        config.motor.port = port.clone();
        config.motor.enabled = true;
    }
    if args.sim {
        config.motor.enabled = false;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = rover_drive_runtime::runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
