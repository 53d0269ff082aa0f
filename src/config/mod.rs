//! Server Configuration
//!
//! Session configuration written by the hosting platform (`server.json`) and
//! SDK settings read from the environment.

pub mod server_json;

pub use server_json::{parse_c_integer, ServerJson};

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::module::TargetPlatform;

/// Default SDK daemon host.
pub const DEFAULT_DAEMON_HOST: &str = "localhost";

/// Default SDK daemon port (HTTP and websocket).
pub const DEFAULT_DAEMON_PORT: u16 = 8086;

/// Default timeout for daemon HTTP requests.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// File name of the session configuration.
pub const SERVER_JSON_FILE: &str = "server.json";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// server.json could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// server.json is not valid.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

/// Server configuration for the current session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfig {
    /// Server ID (0 when server.json could not be read).
    pub server_id: i64,
    /// Allocation ID as written in server.json.
    pub allocation_id: String,
    /// Server Query Protocol port (0 binds an ephemeral port).
    pub query_port: u16,
    /// Connection port for the session.
    pub port: u16,
    /// Directory logs will be written to.
    pub server_log_directory: String,
}

impl From<ServerJson> for ServerConfig {
    fn from(json: ServerJson) -> Self {
        Self {
            server_id: json.server_id,
            allocation_id: json.allocation_id,
            query_port: json.query_port,
            port: json.port,
            server_log_directory: json.server_log_directory,
        }
    }
}

impl ServerConfig {
    /// Location of server.json for a platform.
    ///
    /// Windows uses HOMEDRIVE + HOMEPATH, Unix-likes use HOME, anything else
    /// resolves relative to the working directory.
    pub fn default_path(platform: TargetPlatform) -> PathBuf {
        let home = match platform {
            TargetPlatform::Windows => {
                let drive = std::env::var("HOMEDRIVE").unwrap_or_default();
                let path = std::env::var("HOMEPATH").unwrap_or_default();
                PathBuf::from(format!("{}{}", drive, path))
            }
            TargetPlatform::Linux | TargetPlatform::Mac => {
                PathBuf::from(std::env::var("HOME").unwrap_or_default())
            }
            TargetPlatform::Other => PathBuf::new(),
        };
        home.join(SERVER_JSON_FILE)
    }

    /// Read and parse server.json.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let json = ServerJson::from_json(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        info!("Retrieved Server Id: {}", json.server_id);
        info!("Retrieved Allocation Id: {}", json.allocation_id);
        info!("Retrieved Query Port: {}", json.query_port);
        info!("Retrieved Port: {}", json.port);
        info!("Retrieved Server Log Directory: {}", json.server_log_directory);

        Ok(json.into())
    }

    /// Read server.json, falling back to an invalid (all-zero) config.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{}", e);
                error!(
                    "Failed to read server ID from {}, defaulting to invalid server ID 0",
                    path.display()
                );
                error!(
                    "Failed to read query port from {}, defaulting to an ephemeral port",
                    path.display()
                );
                Self::default()
            }
        }
    }
}

/// SDK settings.
#[derive(Debug, Clone)]
pub struct SdkConfig {
    /// SDK daemon host.
    pub daemon_host: String,
    /// SDK daemon port.
    pub daemon_port: u16,
    /// Explicit server.json path. If None, the platform default is used.
    pub server_json_path: Option<PathBuf>,
    /// Timeout for daemon HTTP requests.
    pub http_timeout: Duration,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            daemon_host: DEFAULT_DAEMON_HOST.to_string(),
            daemon_port: DEFAULT_DAEMON_PORT,
            server_json_path: None,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl SdkConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            daemon_host: std::env::var("MULTIPLAY_SDK_DAEMON_HOST")
                .unwrap_or(defaults.daemon_host),
            daemon_port: env_parse("MULTIPLAY_SDK_DAEMON_PORT").unwrap_or(defaults.daemon_port),
            server_json_path: std::env::var("MULTIPLAY_SERVER_JSON").ok().map(PathBuf::from),
            http_timeout: env_parse("MULTIPLAY_HTTP_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
        }
    }

    /// Base URL of the daemon's HTTP API.
    pub fn http_base_url(&self) -> String {
        format!("http://{}:{}", self.daemon_host, self.daemon_port)
    }

    /// URL of the daemon's Centrifuge websocket endpoint.
    pub fn centrifuge_url(&self) -> String {
        format!(
            "ws://{}:{}/v1/connection/websocket",
            self.daemon_host, self.daemon_port
        )
    }

    /// server.json path to use on this platform.
    pub fn server_json_path(&self) -> PathBuf {
        self.server_json_path
            .clone()
            .unwrap_or_else(|| ServerConfig::default_path(TargetPlatform::current()))
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    let value = std::env::var(var).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Ignoring invalid value {:?} for {}", value, var);
            None
        }
    }
}
