//! Baton Node binary
//!
//! Runs one ring peer configured from `BATON_*` environment variables.

use baton_node::{NodeConfig, RingNode};
use baton_protocol::{MessageKind, Payload};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "baton_node=info,baton_protocol=info,baton_transfer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = NodeConfig::from_env()?;
    tracing::info!(
        peer = config.peer_id,
        ring_size = config.ring_size,
        "Starting Baton node"
    );
    let report_every = config.heartbeat_interval;

    let mut node = RingNode::bind(config).await?;
    node.register_handler(MessageKind::Game, |node, msg| {
        if let Payload::Game(game) = &msg.payload {
            tracing::info!(
                peer = node.peer_id(),
                from = msg.from,
                action = %game.action,
                data = %game.data,
                "Game message"
            );
        }
    });
    node.start()?;

    let mut report = tokio::time::interval(report_every);
    report.tick().await;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = report.tick() => {
                let stats = node.stats();
                tracing::info!(
                    state = %node.token_state(),
                    stats = %serde_json::to_string(&stats)?,
                    "Node statistics"
                );
            }
        }
    }

    tracing::info!("Shutting down");
    node.stop().await?;
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
