//! Game Server Lifecycle
//!
//! Receives allocation events from the SDK daemon over Centrifuge and exposes
//! the daemon's ready/unready and payload endpoints.

pub mod api;
pub mod events;
pub mod responses;

pub use api::DaemonApi;
pub use events::{server_channel, EventBody, ServerEvent};
pub use responses::{
    Allocation, Deallocation, ErrorResponse, PayloadAllocationErrorResponse, PayloadTokenResponse,
    ServerLifecycleEvent, TokenClaims,
};

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::centrifuge::{
    CentrifugeClient, CentrifugeEvent, ConnectRequest, ConnectionStatus, Push, Reply,
    SubscribeRequest,
};
use crate::config::{SdkConfig, ServerConfig};

/// Capacity of the lifecycle event channel.
const LIFECYCLE_CHANNEL_CAPACITY: usize = 32;

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// The HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Game server session state.
pub struct GameServer {
    config: ServerConfig,
    api: DaemonApi,
    centrifuge: Arc<CentrifugeClient>,
    allocation_id: Arc<RwLock<Option<Uuid>>>,
    events_tx: broadcast::Sender<ServerLifecycleEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl GameServer {
    /// Create a game server talking to the daemon described by `sdk`.
    pub fn new(config: ServerConfig, sdk: &SdkConfig) -> Result<Self, GameServerError> {
        Self::with_endpoints(config, &sdk.http_base_url(), &sdk.centrifuge_url(), sdk.http_timeout)
    }

    /// Create a game server with explicit HTTP and websocket endpoints.
    pub fn with_endpoints(
        config: ServerConfig,
        http_base_url: &str,
        centrifuge_url: &str,
        http_timeout: Duration,
    ) -> Result<Self, GameServerError> {
        let (events_tx, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            api: DaemonApi::new(http_base_url, http_timeout)?,
            centrifuge: Arc::new(CentrifugeClient::new(centrifuge_url)),
            allocation_id: Arc::new(RwLock::new(None)),
            events_tx,
            pump: Mutex::new(None),
        })
    }

    /// Session configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Subscribe to allocate/deallocate notifications.
    pub fn events(&self) -> broadcast::Receiver<ServerLifecycleEvent> {
        self.events_tx.subscribe()
    }

    /// Current allocation, if any.
    pub async fn allocation_id(&self) -> Option<Uuid> {
        *self.allocation_id.read().await
    }

    /// Status of the Centrifuge connection.
    pub async fn connection_status(&self) -> ConnectionStatus {
        self.centrifuge.status().await
    }

    /// Connect to the daemon and subscribe to this server's event channel.
    #[instrument(skip(self), fields(server_id = self.config.server_id))]
    pub async fn subscribe_to_server_events(&self) {
        self.ensure_pump().await;
        self.centrifuge.connect(ConnectRequest::default()).await;
    }

    /// Disconnect from the daemon's event stream.
    pub async fn unsubscribe_from_server_events(&self) {
        self.centrifuge.disconnect().await;
    }

    async fn ensure_pump(&self) {
        let mut pump = self.pump.lock().await;
        if pump.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let rx = self.centrifuge.events();
        let centrifuge = self.centrifuge.clone();
        let server_id = self.config.server_id;
        let allocation_id = self.allocation_id.clone();
        let events_tx = self.events_tx.clone();

        *pump = Some(tokio::spawn(async move {
            Self::run_event_pump(rx, centrifuge, server_id, allocation_id, events_tx).await;
        }));
    }

    async fn run_event_pump(
        mut rx: broadcast::Receiver<CentrifugeEvent>,
        centrifuge: Arc<CentrifugeClient>,
        server_id: i64,
        allocation_id: Arc<RwLock<Option<Uuid>>>,
        events_tx: broadcast::Sender<ServerLifecycleEvent>,
    ) {
        loop {
            match rx.recv().await {
                Ok(CentrifugeEvent::Reply { reply: Reply::Connect(_), .. }) => {
                    let channel = server_channel(server_id);
                    info!("Connected to SDK daemon, subscribing to {}", channel);
                    if let Err(e) = centrifuge.subscribe(SubscribeRequest::channel(channel)).await {
                        error!("Failed to subscribe to server events: {}", e);
                    }
                }
                Ok(CentrifugeEvent::Push { push: Push::Publication(publication), .. }) => {
                    apply_server_event(&publication.data, &allocation_id, &events_tx).await;
                }
                Ok(CentrifugeEvent::StatusChanged(status)) => {
                    debug!("Centrifuge connection is {}", status);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Server event pump lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Tell the daemon the server is ready for players.
    ///
    /// Fails without contacting the daemon when there is no allocation or the
    /// allocation id is nil.
    pub async fn ready_server_for_players(&self) -> Result<(), ErrorResponse> {
        let Some(allocation_id) = self.allocation_id().await.filter(|id| !id.is_nil()) else {
            return Err(ErrorResponse {
                status: 400,
                detail: "Attempted invoke ReadyServerForPlayers() with an invalid allocation ID."
                    .to_string(),
                title: "Invalid Allocation ID".to_string(),
            });
        };

        self.api.ready_server(self.config.server_id, allocation_id).await
    }

    /// Tell the daemon the server no longer accepts players.
    pub async fn unready_server(&self) -> Result<(), ErrorResponse> {
        self.api.unready_server(self.config.server_id).await
    }

    /// Fetch the payload of the current allocation (nil id when unallocated).
    pub async fn payload_allocation(&self) -> Result<String, PayloadAllocationErrorResponse> {
        let allocation_id = self.allocation_id().await.unwrap_or_else(Uuid::nil);
        self.api.payload_allocation(allocation_id).await
    }

    /// Fetch a payload token.
    pub async fn payload_token(&self) -> Result<PayloadTokenResponse, PayloadTokenResponse> {
        self.api.payload_token().await
    }

    /// Disconnect and stop the event pump.
    pub async fn shutdown(&self) {
        self.centrifuge.close().await;
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        info!("Game server shut down");
    }
}

/// Apply a publication's data to the allocation state and notify listeners.
async fn apply_server_event(
    data: &Value,
    allocation_id: &RwLock<Option<Uuid>>,
    events_tx: &broadcast::Sender<ServerLifecycleEvent>,
) -> Option<ServerLifecycleEvent> {
    let event = match ServerEvent::from_value(data) {
        Ok(event) => event,
        Err(e) => {
            warn!("Failed to parse push into an event: {}", e);
            return None;
        }
    };

    let lifecycle = match &event {
        ServerEvent::Allocate(body) => {
            info!("Server allocated: {}", body.allocation_id);
            *allocation_id.write().await = Some(body.allocation_id);
            ServerLifecycleEvent::Allocate(Allocation::from(body))
        }
        ServerEvent::Deallocate(body) => {
            info!("Server deallocated: {}", body.allocation_id);
            *allocation_id.write().await = None;
            ServerLifecycleEvent::Deallocate(Deallocation::from(body))
        }
    };

    let _ = events_tx.send(lifecycle.clone());
    Some(lifecycle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::api::tests::serve_once;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, tungstenite::Message};

    const ALLOCATION_ID: &str = "e3e455f8-f977-11e9-bccf-2a222222f222";

    fn allocate_json(event_type: &str) -> Value {
        json!({
            "EventID": "e3e455f8-f977-11e9-bccf-1a111111f111",
            "EventType": event_type,
            "ServerID": 77,
            "AllocationID": ALLOCATION_ID,
        })
    }

    fn server_config() -> ServerConfig {
        ServerConfig {
            server_id: 77,
            ..Default::default()
        }
    }

    async fn closed_port_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("127.0.0.1:{}", addr.port())
    }

    #[tokio::test]
    async fn test_apply_allocate_then_deallocate() {
        let allocation_id = RwLock::new(None);
        let (tx, mut rx) = broadcast::channel(4);

        let event =
            apply_server_event(&allocate_json("AllocateEventType"), &allocation_id, &tx).await;
        assert!(matches!(event, Some(ServerLifecycleEvent::Allocate(ref a)) if a.server_id == 77));
        assert_eq!(
            allocation_id.read().await.map(|id| id.to_string()).as_deref(),
            Some(ALLOCATION_ID)
        );

        apply_server_event(&allocate_json("DeallocateEventType"), &allocation_id, &tx).await;
        assert!(allocation_id.read().await.is_none());

        assert!(matches!(rx.recv().await.unwrap(), ServerLifecycleEvent::Allocate(_)));
        assert!(matches!(rx.recv().await.unwrap(), ServerLifecycleEvent::Deallocate(_)));
    }

    #[tokio::test]
    async fn test_apply_ignores_other_data() {
        let allocation_id = RwLock::new(None);
        let (tx, _rx) = broadcast::channel(4);

        let event = apply_server_event(&json!({"hello": "world"}), &allocation_id, &tx).await;
        assert!(event.is_none());
        assert!(allocation_id.read().await.is_none());
    }

    #[tokio::test]
    async fn test_ready_without_allocation_fails_locally() {
        let addr = closed_port_url().await;
        let server = GameServer::with_endpoints(
            server_config(),
            &format!("http://{}", addr),
            &format!("ws://{}/v1/connection/websocket", addr),
            Duration::from_secs(1),
        )
        .unwrap();

        let error = server.ready_server_for_players().await.unwrap_err();
        assert_eq!(error.status, 400);
        assert_eq!(error.title, "Invalid Allocation ID");
        assert_eq!(
            error.detail,
            "Attempted invoke ReadyServerForPlayers() with an invalid allocation ID."
        );
    }

    #[tokio::test]
    async fn test_payload_allocation_uses_nil_id_when_unallocated() {
        let (base_url, http) = serve_once("200 OK", "{}").await;
        let server = GameServer::with_endpoints(
            server_config(),
            &base_url,
            "ws://127.0.0.1:1/v1/connection/websocket",
            Duration::from_secs(5),
        )
        .unwrap();

        server.payload_allocation().await.unwrap();
        let request = http.await.unwrap();
        assert!(request.starts_with(&format!("GET /payload/{} ", Uuid::nil())));
    }

    #[tokio::test]
    async fn test_allocation_flow_over_websocket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_addr = listener.local_addr().unwrap();

        let daemon = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let connect: Value =
                serde_json::from_str(ws.next().await.unwrap().unwrap().to_text().unwrap()).unwrap();
            assert_eq!(connect["method"], 0);
            let reply = json!({"id": connect["id"], "result": {"client": "gs"}});
            ws.send(Message::Text(reply.to_string())).await.unwrap();

            let subscribe: Value =
                serde_json::from_str(ws.next().await.unwrap().unwrap().to_text().unwrap()).unwrap();
            assert_eq!(subscribe["method"], 1);
            assert_eq!(subscribe["params"]["channel"], "server#77");
            let reply = json!({"id": subscribe["id"], "result": {}});
            ws.send(Message::Text(reply.to_string())).await.unwrap();

            let push = json!({
                "result": {
                    "channel": "server#77",
                    "data": {"data": allocate_json("AllocateEventType"), "offset": 1}
                }
            });
            ws.send(Message::Text(push.to_string())).await.unwrap();

            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });

        let (http_url, http) = serve_once("200 OK", "").await;
        let server = GameServer::with_endpoints(
            server_config(),
            &http_url,
            &format!("ws://{}/v1/connection/websocket", ws_addr),
            Duration::from_secs(5),
        )
        .unwrap();

        let mut events = server.events();
        server.subscribe_to_server_events().await;

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ServerLifecycleEvent::Allocate(allocation) => {
                assert_eq!(allocation.allocation_id, ALLOCATION_ID);
                assert_eq!(allocation.server_id, 77);
            }
            other => panic!("unexpected {:?}", other),
        }

        server.ready_server_for_players().await.unwrap();
        let request = http.await.unwrap();
        assert!(request.starts_with("POST /v1/server/77/ready-for-players"));
        assert!(request.contains(ALLOCATION_ID));

        server.shutdown().await;
        daemon.await.unwrap();
    }

    #[tokio::test]
    async fn test_ready_with_nil_allocation_fails_locally() {
        let addr = closed_port_url().await;
        let server = GameServer::with_endpoints(
            server_config(),
            &format!("http://{}", addr),
            &format!("ws://{}/v1/connection/websocket", addr),
            Duration::from_secs(1),
        )
        .unwrap();

        let mut event = allocate_json("AllocateEventType");
        event["AllocationID"] = json!(Uuid::nil().to_string());
        apply_server_event(&event, &server.allocation_id, &server.events_tx).await;
        assert_eq!(server.allocation_id().await, Some(Uuid::nil()));

        let error = server.ready_server_for_players().await.unwrap_err();
        assert_eq!(error.status, 400);
        assert_eq!(error.title, "Invalid Allocation ID");
    }

    #[tokio::test]
    async fn test_shutdown_while_connecting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_addr = listener.local_addr().unwrap();

        // slow handshake; collect whatever the client sends afterwards
        let daemon = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
            let Ok(mut ws) = accept_async(stream).await else {
                return Vec::new();
            };
            let mut seen = Vec::new();
            while let Ok(Some(Ok(msg))) =
                tokio::time::timeout(Duration::from_millis(500), ws.next()).await
            {
                if msg.is_text() {
                    seen.push(msg.to_string());
                }
            }
            seen
        });

        let addr = closed_port_url().await;
        let server = GameServer::with_endpoints(
            server_config(),
            &format!("http://{}", addr),
            &format!("ws://{}/v1/connection/websocket", ws_addr),
            Duration::from_secs(1),
        )
        .unwrap();

        server.subscribe_to_server_events().await;
        assert_eq!(server.connection_status().await, ConnectionStatus::Connecting);

        server.shutdown().await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(server.connection_status().await, ConnectionStatus::Disconnected);
        assert!(daemon.await.unwrap().is_empty());
    }
}
