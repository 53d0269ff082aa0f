//! SDK Lifecycle
//!
//! Owns the per-process SDK state: server configuration, query handler and
//! game server, created in that order and torn down in reverse.

use std::sync::Arc;
use tracing::info;

use crate::config::{SdkConfig, ServerConfig};
use crate::query::ServerQueryHandler;
use crate::server::{GameServer, GameServerError};

/// Initialized SDK.
pub struct MultiplaySdk {
    sdk_config: SdkConfig,
    server_config: ServerConfig,
    query_handler: Arc<ServerQueryHandler>,
    game_server: Arc<GameServer>,
}

impl MultiplaySdk {
    /// Load server.json and build the SDK components.
    ///
    /// A missing or invalid server.json is logged and replaced by an all-zero
    /// configuration.
    pub fn initialize(sdk_config: SdkConfig) -> Result<Self, GameServerError> {
        let path = sdk_config.server_json_path();
        info!("Loading server configuration from {}", path.display());
        let server_config = ServerConfig::load_or_default(&path);

        let query_handler = Arc::new(ServerQueryHandler::new(server_config.query_port));
        let game_server = Arc::new(GameServer::new(server_config.clone(), &sdk_config)?);

        info!(
            "Multiplay SDK initialized for server {} (daemon {})",
            server_config.server_id,
            sdk_config.http_base_url()
        );

        Ok(Self {
            sdk_config,
            server_config,
            query_handler,
            game_server,
        })
    }

    /// SDK settings in use.
    pub fn sdk_config(&self) -> &SdkConfig {
        &self.sdk_config
    }

    /// Server configuration read at initialization.
    pub fn server_config(&self) -> &ServerConfig {
        &self.server_config
    }

    /// Query handler.
    pub fn query_handler(&self) -> Arc<ServerQueryHandler> {
        self.query_handler.clone()
    }

    /// Game server.
    pub fn game_server(&self) -> Arc<GameServer> {
        self.game_server.clone()
    }

    /// Tear down in reverse order of initialization.
    pub async fn deinitialize(self) {
        self.game_server.shutdown().await;
        self.query_handler.disconnect().await;
        info!("Multiplay SDK deinitialized");
    }
}
