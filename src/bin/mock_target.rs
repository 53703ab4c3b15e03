use anyhow::Result;
use idburst::mock::{Behavior, MockTarget};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("idburst=debug,info")
        .init();

    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|p| p.parse().ok())
        .unwrap_or(8089);
    let behavior: Behavior = match std::env::args().nth(2) {
        Some(raw) => raw.parse()?,
        None => Behavior::Accept,
    };

    let target = MockTarget::bind(SocketAddr::from(([127, 0, 0, 1], port)), behavior).await?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, stopping mock target");
                trigger.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    target.run(shutdown).await
}
