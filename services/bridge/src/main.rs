// bridge: MQTT/SignalR telemetry bridge daemon.

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "bridge", version, about = "IoT data bridge")]
struct Args {
    /// Config file path (falls back to $BRIDGE_CONFIG, then the default).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level override (also honors RUST_LOG).
    #[arg(long)]
    log_level: Option<String>,
}

fn main() {
    let args = Args::parse();
    let config_path = args
        .config
        .or_else(|| std::env::var_os("BRIDGE_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(bridge::config::DEFAULT_CONFIG_PATH));

    let config = match bridge::config::load_config_from_path(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(2);
        }
    };

    let level = args.log_level.unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        app = %config.app_name,
        config = %config_path.display(),
        "bridge starting"
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build runtime");
            std::process::exit(1);
        }
    };

    match runtime.block_on(bridge::supervisor::run(config)) {
        Ok(()) => info!("clean shutdown"),
        Err(e) => {
            error!(error = %e, "bridge failed");
            std::process::exit(e.exit_code());
        }
    }
}
