//! # Multiplay Game Server SDK
//!
//! Integration layer between a dedicated game server and the Multiplay
//! hosting platform.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    MULTIPLAY GAME SERVER SDK                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  module.rs       - Build descriptor and module startup      │
//! │  sdk.rs          - Lifecycle aggregate                      │
//! │                                                             │
//! │  config/         - Configuration                            │
//! │  ├── mod.rs      - ServerConfig, SdkConfig (environment)    │
//! │  └── server_json.rs - server.json parsing                   │
//! │                                                             │
//! │  query/          - Server Query Protocol (UDP)              │
//! │  ├── protocol.rs - Big-endian wire format                   │
//! │  └── handler.rs  - Challenge/query responder                │
//! │                                                             │
//! │  centrifuge/     - Realtime client (WebSocket)              │
//! │  ├── messages.rs - JSON commands, replies and pushes        │
//! │  └── client.rs   - Connection state and frame decoding      │
//! │                                                             │
//! │  server/         - Allocation lifecycle                     │
//! │  ├── events.rs   - Allocate/deallocate events               │
//! │  ├── responses.rs- Public response types                    │
//! │  ├── api.rs      - SDK daemon HTTP API                      │
//! │  └── mod.rs      - GameServer                               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! [`MultiplaySdk::initialize`] reads `server.json`, then builds the query
//! handler and the game server. The game keeps the query handler's
//! [`ServerInfo`](query::ServerInfo) current, subscribes to server events and
//! calls [`GameServer::ready_server_for_players`] once allocated.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod centrifuge;
pub mod config;
pub mod module;
pub mod query;
pub mod sdk;
pub mod server;

// Re-export commonly used types
pub use config::{
    ConfigError, SdkConfig, ServerConfig, DEFAULT_DAEMON_HOST, DEFAULT_DAEMON_PORT,
};
pub use module::{ModuleDescriptor, TargetInfo, TargetPlatform};
pub use query::{QueryError, ServerInfo, ServerQueryHandler};
pub use sdk::MultiplaySdk;
pub use server::{
    Allocation, Deallocation, ErrorResponse, GameServer, GameServerError,
    PayloadAllocationErrorResponse, PayloadTokenResponse, ServerLifecycleEvent,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
