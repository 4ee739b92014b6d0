use clap::Parser;
use log::info;
use server::network::{ChatServer, ServerConfig};
use shared::{DEFAULT_KEY, DEFAULT_PORT, DEFAULT_SERVER_HOST};
use std::time::Duration;

/// Main-method of the relay server.
/// Parses command-line arguments, binds the listener and serves until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = DEFAULT_SERVER_HOST)]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Maximum number of concurrent clients
        #[clap(short, long, default_value = "64")]
        max_clients: usize,
        /// Drop clients silent for this many seconds (0 disables)
        #[clap(long, default_value = "0")]
        idle_timeout: u64,
    }

    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        max_clients: args.max_clients,
        idle_timeout: (args.idle_timeout > 0).then(|| Duration::from_secs(args.idle_timeout)),
        key: DEFAULT_KEY,
    };

    let server = ChatServer::bind(config).await?;
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            shutdown.shutdown();
        }
    });

    server.run().await?;

    Ok(())
}
