//! Multiplay Game Server SDK Demo
//!
//! Minimal dedicated server: answers SQP probes, listens for allocations and
//! marks itself ready when allocated.

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use multiplay_gsdk::{
    ModuleDescriptor, MultiplaySdk, SdkConfig, ServerLifecycleEvent, ServerQueryHandler, VERSION,
};

fn init_logger() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("multiplay_gsdk=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).compact())
        .init();
}

/// Fill the SQP server info from the environment.
async fn configure_server_info(handler: &ServerQueryHandler, port: u16) -> anyhow::Result<()> {
    let name =
        std::env::var("MULTIPLAY_SERVER_NAME").unwrap_or_else(|_| "multiplay-gsdk".to_string());
    let game_type = std::env::var("MULTIPLAY_GAME_TYPE").unwrap_or_default();
    let map = std::env::var("MULTIPLAY_MAP").unwrap_or_default();
    let max_players = match std::env::var("MULTIPLAY_MAX_PLAYERS") {
        Ok(value) => value
            .parse::<i64>()
            .with_context(|| format!("MULTIPLAY_MAX_PLAYERS is not an integer: {}", value))?,
        Err(_) => 16,
    };

    handler.set_server_name(&name).await?;
    handler.set_game_type(&game_type).await?;
    handler.set_map(&map).await?;
    handler.set_build_id(VERSION).await?;
    handler.set_max_players(max_players).await?;
    handler.set_port(i64::from(port)).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    info!("Multiplay Game Server SDK v{}", VERSION);

    let descriptor = ModuleDescriptor::default();
    descriptor.validate()?;
    descriptor.startup();
    info!("Module {} ({:?})", descriptor.name, descriptor.target.platform);

    let sdk = MultiplaySdk::initialize(SdkConfig::from_env())?;
    let query_handler = sdk.query_handler();
    let game_server = sdk.game_server();

    query_handler
        .connect()
        .await
        .context("failed to start the query handler")?;
    configure_server_info(&query_handler, sdk.server_config().port).await?;

    let mut events = game_server.events();
    game_server.subscribe_to_server_events().await;

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(ServerLifecycleEvent::Allocate(allocation)) => {
                        info!("Allocated: {}", allocation.allocation_id);
                        match game_server.ready_server_for_players().await {
                            Ok(()) => info!("Server is ready for players"),
                            Err(e) => error!("Failed to ready server: {}", e),
                        }
                    }
                    Ok(ServerLifecycleEvent::Deallocate(deallocation)) => {
                        info!("Deallocated: {}", deallocation.allocation_id);
                        if let Err(e) = game_server.unready_server().await {
                            error!("Failed to unready server: {}", e);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} lifecycle events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutdown signal received");
                break;
            }
        }
    }

    drop(query_handler);
    drop(game_server);
    sdk.deinitialize().await;

    Ok(())
}
