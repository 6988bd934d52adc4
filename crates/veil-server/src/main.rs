//! veil relay server binary.
//!
//! # Usage
//!
//! ```bash
//! veil-server --bind 0.0.0.0:4040
//! ```

use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use veil_server::{Server, ServerConfig};

/// veil session relay server
#[derive(Parser, Debug)]
#[command(name = "veil-server")]
#[command(about = "Relay server for passphrase-guarded chat sessions")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4040")]
    bind: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("veil relay starting");

    let config = ServerConfig { bind_address: args.bind };
    let server = Server::bind(config).await?;

    server.run().await?;

    Ok(())
}
