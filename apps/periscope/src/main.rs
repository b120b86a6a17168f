mod cli;
mod config;
mod grid;
mod sink;
mod telemetry;

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use periscope_session::{HttpSignaling, WebRtcPeerFactory};
use tracing::{info, warn};

use crate::cli::Cli;
use crate::config::AppConfig;
use crate::grid::CameraGrid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    telemetry::init(&cli.logging.to_config())?;

    let mut config = AppConfig::from_env()?;
    cli.apply(&mut config);

    let sources = config.source_ids();
    if sources.is_empty() {
        bail!("no camera sources configured; set --source or --total-cameras");
    }

    let signaling = HttpSignaling::with_request_timeout(
        config.signaling_base()?,
        config.request_timeout(),
    )
    .context("failed to build signaling client")?;
    let factory = WebRtcPeerFactory::new().context("failed to build webrtc api")?;

    info!(
        target = "periscope::main",
        sources = ?sources,
        ice_servers = ?config.ice_server_urls(),
        max_attempts = config.max_attempts,
        "starting periscope"
    );

    let grid = CameraGrid::launch(&config, Arc::new(factory), Arc::new(signaling));
    let summary = grid
        .run_until(
            async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(target = "periscope::main", error = %err, "failed to listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            },
            config.summary_interval(),
        )
        .await;

    info!(target = "periscope::main", %summary, "periscope stopped");
    Ok(())
}
