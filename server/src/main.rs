use clap::Parser;
use log::info;
use server::config::{RegistryConfig, ServerConfig};
use server::network::Server;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8000")]
    port: u16,

    /// Broadcast ticks per second
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,

    /// Version clients must present; also sent with every snapshot
    #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
    server_version: String,

    /// Maximum number of concurrently connected clients
    #[arg(short, long, default_value = "20")]
    max_clients: usize,

    /// Seconds without a valid update before a client is dropped
    #[arg(long, default_value = "60")]
    inactivity_timeout: u64,

    /// Minutes a single connection may stay open
    #[arg(long, default_value = "30")]
    max_session_minutes: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let bind_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    let config = ServerConfig {
        bind_addr,
        tick_rate: args.tick_rate,
        registry: RegistryConfig {
            version: args.server_version,
            max_clients: args.max_clients,
            inactivity_timeout: Duration::from_secs(args.inactivity_timeout),
            max_session_age: Duration::from_secs(args.max_session_minutes * 60),
            ..RegistryConfig::default()
        },
        ..ServerConfig::default()
    };

    info!("Starting sync server on {}", config.bind_addr);
    Server::new(config)?.run().await?;

    Ok(())
}
