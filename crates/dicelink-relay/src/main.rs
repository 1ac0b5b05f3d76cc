//! Standalone relay hub.
//!
//! Usage:
//!   relay [--bind <ADDR>]
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use dicelink_relay::{RelayConfig, RelayServer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = parse_args();
    let server = match RelayServer::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Failed to start relay: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        eprintln!("Relay stopped: {e}");
        std::process::exit(1);
    }
}

fn parse_args() -> RelayConfig {
    let mut config = RelayConfig::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bind" => {
                config.bind_addr = args.next().unwrap_or_else(|| {
                    eprintln!("--bind requires an address");
                    std::process::exit(1);
                });
            }
            "--help" | "-h" => {
                println!("Usage: relay [--bind <ADDR>]");
                println!("  --bind <ADDR>   Listen address (default: {})", config.bind_addr);
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                std::process::exit(1);
            }
        }
    }

    config
}
