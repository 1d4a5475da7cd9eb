use clap::Parser;
use client::{CircularMotion, Client, ClientError};
use log::{error, info};
use rand::Rng;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket endpoint of the sync server
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:8000/ws")]
    server: String,

    /// Session to join
    #[arg(short = 'k', long, default_value = "lobby")]
    session_key: String,

    /// Display name; a random one is generated when omitted
    #[arg(short = 'n', long)]
    display_name: Option<String>,

    /// Version presented to the server
    #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
    client_version: String,

    /// State updates sent per second
    #[arg(short = 'r', long, default_value = "20")]
    send_rate: u32,

    /// Disconnect after this many seconds; runs until Ctrl+C when omitted
    #[arg(short = 'd', long)]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let (display_name, motion) = {
        let mut rng = rand::thread_rng();
        let name = args
            .display_name
            .unwrap_or_else(|| format!("bot-{:04}", rng.gen_range(0..10_000)));
        (name, CircularMotion::random(&mut rng))
    };

    info!("Starting bot {} in session {}", display_name, args.session_key);
    info!(
        "Walking a {:.1}m circle at {:.1}m/s",
        motion.radius,
        motion.speed()
    );

    let mut client = Client::connect(
        &args.server,
        &args.session_key,
        &display_name,
        &args.client_version,
    )
    .await?;

    let mut ticker = interval(Duration::from_secs_f64(1.0 / args.send_rate.max(1) as f64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let started = Instant::now();
    let deadline = args.duration.map(|secs| started + Duration::from_secs(secs));
    let mut received: u64 = 0;

    loop {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            info!("Run time elapsed");
            break;
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving session...");
                break;
            }
            _ = ticker.tick() => {
                let state = motion.state_at(started.elapsed().as_secs_f64());
                client.send_state(&state).await?;
            }
            result = client.next_snapshots() => match result {
                Ok(snapshots) => {
                    for snapshot in snapshots {
                        received += 1;
                        // Log once per second at the default rate
                        if received % 60 == 0 {
                            info!(
                                "Snapshot #{}: {} players (server {})",
                                received,
                                snapshot.len(),
                                snapshot.server_version
                            );
                        }
                    }
                }
                Err(ClientError::Closed) => {
                    info!("Server closed the connection");
                    return Ok(());
                }
                Err(e) => {
                    error!("Connection error: {}", e);
                    return Err(e.into());
                }
            }
        }
    }

    info!("Received {} snapshots", received);
    client.close().await?;
    Ok(())
}
