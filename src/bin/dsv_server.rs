//! dsv-server: the broker daemon owning the authoritative variable store.
//!
//! Binds the ingest, fan-out, and request endpoints, speaks the discovery
//! beacon, and runs the single-threaded forward pipeline until SIGINT or
//! SIGTERM. Refuses to start when another broker already answers on the
//! network.
//!
//! Configuration comes from `DSV_*` environment variables with command-line
//! overrides; logging is controlled by `DSV_LOG` (default `info`).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dsv::broker::Broker;
use dsv::config::LOG_ENV_VAR;
use dsv::DsvConfig;

#[derive(Parser)]
#[command(name = "dsv-server", about = "dsv broker daemon")]
struct Args {
    /// Port of the request (reply) endpoint.
    #[arg(long)]
    request_port: Option<u16>,

    /// Port of the fan-out (subscriber) endpoint.
    #[arg(long)]
    fanout_port: Option<u16>,

    /// Port of the ingest (publish) endpoint.
    #[arg(long)]
    ingest_port: Option<u16>,

    /// UDP port for the discovery beacon.
    #[arg(long)]
    beacon_port: Option<u16>,

    /// Save-file path for persistence.
    #[arg(long)]
    save_file: Option<PathBuf>,

    /// Run without the discovery beacon (clients must connect by address).
    #[arg(long)]
    no_beacon: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = DsvConfig::from_env();
    if let Some(port) = args.request_port {
        config.request_port = port;
    }
    if let Some(port) = args.fanout_port {
        config.fanout_port = port;
    }
    if let Some(port) = args.ingest_port {
        config.ingest_port = port;
    }
    if let Some(port) = args.beacon_port {
        config.beacon_port = port;
    }
    if let Some(path) = args.save_file {
        config.save_path = path;
    }
    if args.no_beacon {
        config.beacon_enabled = false;
    }

    info!("starting dsv server");
    let mut broker = match Broker::bind(config) {
        Ok(broker) => broker,
        Err(err) => {
            error!(error = %err, "failed to start dsv server");
            return ExitCode::FAILURE;
        }
    };

    match broker.run() {
        Ok(()) => {
            info!("dsv server exited");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "dsv server failed");
            ExitCode::FAILURE
        }
    }
}
