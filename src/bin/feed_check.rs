//! Binary to run the full engine against live credentials and watch it
//! subscribe, decode, and publish for a bounded window.
//!
//! # Usage
//!
//! ```sh
//! export SMARTSTREAM_API_KEY="your-api-key"
//! export SMARTSTREAM_CLIENT_CODE="your-client-code"
//! export SMARTSTREAM_JWT="your-jwt"
//! export SMARTSTREAM_FEED_TOKEN="your-feed-token"
//! cargo run --bin feed_check --features cli
//! ```

use std::sync::Arc;
use std::time::Duration;

use smartstream::config::Config;
use smartstream::session::StaticSessionProvider;
use smartstream::Engine;
use tokio::time;

#[tokio::main]
async fn main() -> smartstream::error::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = Config::from_env()?;
    let session = Arc::new(StaticSessionProvider::from_env()?);

    println!("Starting smartstream engine…");
    let engine = Engine::start(cfg, session).await?;

    println!("Running for 60 seconds…");
    println!("(Note: data only arrives during market hours 9:15–15:30 IST)\n");

    let deadline = time::sleep(Duration::from_secs(60));
    tokio::pin!(deadline);
    let mut report = time::interval(Duration::from_secs(10));

    loop {
        tokio::select! {
            _ = &mut deadline => {
                println!("\n60 seconds elapsed — shutting down…");
                break;
            }
            _ = report.tick() => {
                let health = engine.health();
                for conn in &health.connections {
                    println!(
                        "{:>5}: state={:?} epoch={} reconnects={} frames={} decode_errors={}",
                        conn.mode, conn.state, conn.epoch, conn.reconnects,
                        conn.frames, conn.decode_errors,
                    );
                }
                println!(
                    "tokens={} dropped_ticks={}",
                    health.subscribed_tokens, health.dropped_ticks
                );
            }
        }
    }

    engine.shutdown().await;
    println!("Done.");
    Ok(())
}
