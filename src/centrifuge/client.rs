//! Centrifuge WebSocket Client
//!
//! Maintains one websocket to the SDK daemon and turns inbound frames into
//! [`CentrifugeEvent`]s on a broadcast channel.

use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use super::messages::{
    encode_command, Command, ConnectRequest, Error as ProtocolErrorBody, HistoryRequest,
    MethodType, PingRequest, PresenceRequest, PresenceStatsRequest, PublishRequest, Push,
    PushType, RefreshRequest, Reply, RpcRequest, SendRequest, SubRefreshRequest,
    SubscribeRequest, UnsubscribeRequest,
};

/// Id reserved for pushes.
const PUSH_ID: u32 = 0;

/// First id handed out.
const INITIAL_MESSAGE_ID: u32 = 1;

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long `close` waits for the server to answer a close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No socket.
    Disconnected,
    /// Socket opening.
    Connecting,
    /// Socket open, commands accepted.
    Connected,
    /// Close frame sent.
    Disconnecting,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// Centrifuge client errors.
#[derive(Debug, Error)]
pub enum CentrifugeError {
    /// Command issued while the socket is not open.
    #[error("Centrifuge client is {0}")]
    NotConnected(ConnectionStatus),

    /// Command could not be serialized.
    #[error("Failed to serialize command: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The connection task dropped its outbound queue.
    #[error("Connection closed")]
    ChannelClosed,
}

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to a command.
    Reply {
        /// Id of the originating command.
        id: u32,
        /// Typed result.
        reply: Reply,
    },
    /// Server-initiated push.
    Push {
        /// Channel the push belongs to, if given.
        channel: Option<String>,
        /// Typed push body.
        push: Push,
    },
    /// Error reply.
    Error {
        /// Id of the failed command, if any.
        id: Option<u32>,
        /// Error body.
        error: ProtocolErrorBody,
    },
}

/// Events broadcast by [`CentrifugeClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum CentrifugeEvent {
    /// Connection status changed.
    StatusChanged(ConnectionStatus),
    /// Reply to a command.
    Reply {
        /// Id of the originating command.
        id: u32,
        /// Typed result.
        reply: Reply,
    },
    /// Server-initiated push.
    Push {
        /// Channel the push belongs to, if given.
        channel: Option<String>,
        /// Typed push body.
        push: Push,
    },
    /// Error reply from the server.
    Error {
        /// Id of the failed command, if any.
        id: Option<u32>,
        /// Error body.
        error: ProtocolErrorBody,
    },
    /// The websocket could not be opened.
    ConnectionError(String),
}

impl From<Inbound> for CentrifugeEvent {
    fn from(inbound: Inbound) -> Self {
        match inbound {
            Inbound::Reply { id, reply } => CentrifugeEvent::Reply { id, reply },
            Inbound::Push { channel, push } => CentrifugeEvent::Push { channel, push },
            Inbound::Error { id, error } => CentrifugeEvent::Error { id, error },
        }
    }
}

// ============================================================================
// Frame Decoding
// ============================================================================

/// Decode one websocket text frame, which may hold several `\n`-separated
/// messages. Replies are matched against (and removed from) `pending`.
pub fn decode_frame(frame: &str, pending: &mut HashMap<u32, MethodType>) -> Vec<Inbound> {
    frame
        .split('\n')
        .filter(|segment| !segment.trim().is_empty())
        .filter_map(|segment| decode_message(segment, pending))
        .collect()
}

fn decode_message(text: &str, pending: &mut HashMap<u32, MethodType>) -> Option<Inbound> {
    let object = match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(object)) => object,
        Ok(_) => {
            error!("Centrifuge message is not a JSON object: {}", text);
            return None;
        }
        Err(e) => {
            error!("Failed to parse Centrifuge message {}: {}", text, e);
            return None;
        }
    };

    let id = object
        .get("id")
        .and_then(Value::as_u64)
        .and_then(|id| u32::try_from(id).ok())
        .filter(|id| *id != PUSH_ID);

    if let Some(inbound) = try_error(&object, id, pending) {
        return Some(inbound);
    }

    if let Some(id) = id {
        match pending.remove(&id) {
            Some(method) => return try_reply(&object, id, method),
            None => error!("Failed to locate request with ID {}", id),
        }
    }

    if let Some(inbound) = try_push(&object) {
        return Some(inbound);
    }

    error!(
        "Failed to convert Centrifuge message into an ERROR, REPLY, or PUSH: {}",
        text
    );
    None
}

fn try_error(
    object: &Map<String, Value>,
    id: Option<u32>,
    pending: &mut HashMap<u32, MethodType>,
) -> Option<Inbound> {
    let error = object.get("error")?;
    let error: ProtocolErrorBody = serde_json::from_value(error.clone()).ok()?;

    error!("Encountered a Centrifuge error: {} - {}", error.code, error.message);
    if let Some(id) = id {
        pending.remove(&id);
    }

    Some(Inbound::Error { id, error })
}

fn try_reply(object: &Map<String, Value>, id: u32, method: MethodType) -> Option<Inbound> {
    let Some(result) = object.get("result") else {
        error!("Reply {} to {} has no result", id, method);
        return None;
    };

    match Reply::parse(method, result.clone()) {
        Ok(Some(reply)) => Some(Inbound::Reply { id, reply }),
        Ok(None) => None,
        Err(e) => {
            error!("Failed to parse {}Result: {}", method, e);
            None
        }
    }
}

fn try_push(object: &Map<String, Value>) -> Option<Inbound> {
    let result = object.get("result")?.as_object()?;
    let data = result.get("data")?;

    let push_type = match result.get("type").and_then(Value::as_i64) {
        // the daemon omits "type" on publications
        None => PushType::Publication,
        Some(code) => match PushType::from_code(code) {
            Some(push_type) => push_type,
            None => {
                error!("Encountered unrecognized push type {}", code);
                return None;
            }
        },
    };

    let channel = result
        .get("channel")
        .and_then(Value::as_str)
        .map(str::to_owned);

    match Push::parse(push_type, data.clone()) {
        Ok(push) => Some(Inbound::Push { channel, push }),
        Err(e) => {
            error!("Failed to parse {:?} push: {}", push_type, e);
            None
        }
    }
}

// ============================================================================
// Client
// ============================================================================

struct ClientState {
    status: ConnectionStatus,
    next_id: u32,
    pending: HashMap<u32, MethodType>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
}

impl ClientState {
    fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            next_id: INITIAL_MESSAGE_ID,
            pending: HashMap::new(),
            outbound: None,
        }
    }

    fn next_message_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == PUSH_ID {
            self.next_id = INITIAL_MESSAGE_ID;
        }
        id
    }

    fn change_status(
        &mut self,
        status: ConnectionStatus,
        events: &broadcast::Sender<CentrifugeEvent>,
    ) {
        debug!("Changing connection status from {} to {}", self.status, status);
        self.status = status;
        let _ = events.send(CentrifugeEvent::StatusChanged(status));
    }

    /// Assign an id, record the pending method and queue the command.
    fn queue_command<C: Command>(&mut self, params: &C) -> Result<u32, CentrifugeError> {
        let outbound = self
            .outbound
            .clone()
            .ok_or(CentrifugeError::NotConnected(self.status))?;

        let id = self.next_message_id();
        let text = encode_command(id, params)?;

        if C::METHOD != MethodType::Send {
            self.pending.insert(id, C::METHOD);
        }
        if outbound.send(Message::Text(text)).is_err() {
            self.pending.remove(&id);
            return Err(CentrifugeError::ChannelClosed);
        }

        Ok(id)
    }
}

/// Centrifuge client for one websocket URL.
pub struct CentrifugeClient {
    url: String,
    state: Arc<Mutex<ClientState>>,
    events_tx: broadcast::Sender<CentrifugeEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CentrifugeClient {
    /// Create a disconnected client.
    pub fn new(url: impl Into<String>) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            url: url.into(),
            state: Arc::new(Mutex::new(ClientState::new())),
            events_tx,
            task: Mutex::new(None),
        }
    }

    /// Websocket URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Subscribe to client events.
    pub fn events(&self) -> broadcast::Receiver<CentrifugeEvent> {
        self.events_tx.subscribe()
    }

    /// Current status.
    pub async fn status(&self) -> ConnectionStatus {
        self.state.lock().await.status
    }

    /// Open the websocket. `request` is sent once the socket is up.
    pub async fn connect(&self, request: ConnectRequest) {
        // lock order: task, then state
        let mut task = self.task.lock().await;
        let mut state = self.state.lock().await;
        if state.status != ConnectionStatus::Disconnected {
            warn!(
                "Attempted to initiate a connection when the Centrifuge client is {}",
                state.status
            );
            return;
        }
        state.change_status(ConnectionStatus::Connecting, &self.events_tx);
        drop(state);

        let url = self.url.clone();
        let shared = self.state.clone();
        let events = self.events_tx.clone();
        *task = Some(tokio::spawn(async move {
            Self::run_connection(url, shared, events, request).await;
        }));
    }

    /// Stop the connection task in any state and end up `Disconnected`.
    ///
    /// An open socket gets a close frame and up to one second to finish the
    /// close handshake before the task is aborted.
    pub async fn close(&self) {
        let mut task = self.task.lock().await;

        if let Some(mut handle) = task.take() {
            let graceful = {
                let mut state = self.state.lock().await;
                match (state.status, state.outbound.clone()) {
                    (ConnectionStatus::Connected, Some(outbound)) => {
                        state.change_status(ConnectionStatus::Disconnecting, &self.events_tx);
                        outbound.send(Message::Close(None)).is_ok()
                    }
                    (ConnectionStatus::Disconnecting, Some(_)) => true,
                    _ => false,
                }
            };

            let finished =
                graceful && tokio::time::timeout(CLOSE_TIMEOUT, &mut handle).await.is_ok();
            if !finished {
                debug!("Aborting Centrifuge connection task");
                handle.abort();
                let _ = handle.await;
            }
        }

        let mut state = self.state.lock().await;
        state.outbound = None;
        state.pending.clear();
        if state.status != ConnectionStatus::Disconnected {
            state.change_status(ConnectionStatus::Disconnected, &self.events_tx);
        }
    }

    /// Send a close frame.
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        if state.status != ConnectionStatus::Connected {
            warn!(
                "Attempted to disconnect when the Centrifuge client is {}",
                state.status
            );
            return;
        }
        state.change_status(ConnectionStatus::Disconnecting, &self.events_tx);

        if let Some(outbound) = &state.outbound {
            let _ = outbound.send(Message::Close(None));
        }
    }

    #[instrument(skip(state, events, request))]
    async fn run_connection(
        url: String,
        state: Arc<Mutex<ClientState>>,
        events: broadcast::Sender<CentrifugeEvent>,
        request: ConnectRequest,
    ) {
        let ws_stream = match connect_async(url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                error!("Centrifuge connection error: {}", e);
                let _ = events.send(CentrifugeEvent::ConnectionError(e.to_string()));
                state
                    .lock()
                    .await
                    .change_status(ConnectionStatus::Disconnected, &events);
                return;
            }
        };

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        {
            let mut state = state.lock().await;
            state.outbound = Some(outbound_tx);
            state.change_status(ConnectionStatus::Connected, &events);
            info!("Connected to {}", url);

            if let Err(e) = state.queue_command(&request) {
                error!("Failed to send connect request: {}", e);
            }
        }

        loop {
            tokio::select! {
                outgoing = outbound_rx.recv() => {
                    let Some(msg) = outgoing else { break };
                    if let Message::Text(text) = &msg {
                        debug!("Sending {}", text);
                    }
                    if let Err(e) = ws_sender.send(msg).await {
                        warn!("Centrifuge send error: {}", e);
                        break;
                    }
                }
                incoming = ws_receiver.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            debug!("Received {}", text);
                            let decoded = {
                                let mut state = state.lock().await;
                                decode_frame(&text, &mut state.pending)
                            };
                            for inbound in decoded {
                                let _ = events.send(inbound.into());
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("Centrifuge socket closed: {:?}", frame);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Centrifuge socket error: {}", e);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        let mut state = state.lock().await;
        state.outbound = None;
        state.pending.clear();
        state.change_status(ConnectionStatus::Disconnected, &events);
    }

    async fn send_command<C: Command>(&self, params: &C) -> Result<u32, CentrifugeError> {
        let mut state = self.state.lock().await;
        if state.status != ConnectionStatus::Connected {
            return Err(CentrifugeError::NotConnected(state.status));
        }
        state.queue_command(params)
    }

    /// Subscribe to a channel.
    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<u32, CentrifugeError> {
        self.send_command(&request).await
    }

    /// Unsubscribe from a channel.
    pub async fn unsubscribe(&self, request: UnsubscribeRequest) -> Result<u32, CentrifugeError> {
        self.send_command(&request).await
    }

    /// Publish into a channel.
    pub async fn publish(&self, request: PublishRequest) -> Result<u32, CentrifugeError> {
        self.send_command(&request).await
    }

    /// Query channel presence.
    pub async fn presence(&self, request: PresenceRequest) -> Result<u32, CentrifugeError> {
        self.send_command(&request).await
    }

    /// Query channel presence counts.
    pub async fn presence_stats(
        &self,
        request: PresenceStatsRequest,
    ) -> Result<u32, CentrifugeError> {
        self.send_command(&request).await
    }

    /// Query channel history.
    pub async fn history(&self, request: HistoryRequest) -> Result<u32, CentrifugeError> {
        self.send_command(&request).await
    }

    /// Ping the server.
    pub async fn ping(&self, request: PingRequest) -> Result<u32, CentrifugeError> {
        self.send_command(&request).await
    }

    /// Send an asynchronous message. No reply will arrive.
    pub async fn send(&self, request: SendRequest) -> Result<u32, CentrifugeError> {
        self.send_command(&request).await
    }

    /// Call a server RPC.
    pub async fn rpc(&self, request: RpcRequest) -> Result<u32, CentrifugeError> {
        self.send_command(&request).await
    }

    /// Refresh the connection token.
    pub async fn refresh(&self, request: RefreshRequest) -> Result<u32, CentrifugeError> {
        self.send_command(&request).await
    }

    /// Refresh a subscription token.
    pub async fn sub_refresh(&self, request: SubRefreshRequest) -> Result<u32, CentrifugeError> {
        self.send_command(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::centrifuge::messages::ConnectResult;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn next_event(rx: &mut broadcast::Receiver<CentrifugeEvent>) -> CentrifugeEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_message_id_skips_zero() {
        let mut state = ClientState::new();
        assert_eq!(state.next_message_id(), 1);
        assert_eq!(state.next_message_id(), 2);

        state.next_id = u32::MAX;
        assert_eq!(state.next_message_id(), u32::MAX);
        assert_eq!(state.next_message_id(), 1);
    }

    #[test]
    fn test_decode_reply_and_push_in_one_frame() {
        let mut pending = HashMap::new();
        pending.insert(1, MethodType::Connect);

        let frame = concat!(
            r#"{"id":1,"result":{"client":"abc","version":"0.1"}}"#,
            "\n",
            r#"{"result":{"channel":"server#1","data":{"data":{"k":"v"},"offset":4}}}"#
        );
        let decoded = decode_frame(frame, &mut pending);

        assert_eq!(decoded.len(), 2);
        assert!(matches!(
            &decoded[0],
            Inbound::Reply { id: 1, reply: Reply::Connect(r) } if r.client.as_deref() == Some("abc")
        ));
        match &decoded[1] {
            Inbound::Push { channel, push: Push::Publication(p) } => {
                assert_eq!(channel.as_deref(), Some("server#1"));
                assert_eq!(p.data, json!({"k": "v"}));
                assert_eq!(p.offset, 4);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(pending.is_empty());
    }

    #[test]
    fn test_decode_error_clears_pending() {
        let mut pending = HashMap::new();
        pending.insert(5, MethodType::Subscribe);

        let decoded = decode_frame(
            r#"{"id":5,"error":{"code":103,"message":"permission denied"}}"#,
            &mut pending,
        );
        assert_eq!(
            decoded,
            vec![Inbound::Error {
                id: Some(5),
                error: ProtocolErrorBody {
                    code: 103,
                    message: "permission denied".to_string()
                }
            }]
        );
        assert!(pending.is_empty());
    }

    #[test]
    fn test_decode_unknown_id_falls_through_to_push() {
        let mut pending = HashMap::new();
        let decoded = decode_frame(
            r#"{"id":9,"result":{"type":4,"data":{"data":"hello"}}}"#,
            &mut pending,
        );
        assert!(matches!(&decoded[..], [Inbound::Push { push: Push::Message(_), .. }]));
    }

    #[test]
    fn test_decode_unknown_push_type_dropped() {
        let mut pending = HashMap::new();
        let decoded = decode_frame(
            r#"{"result":{"type":42,"channel":"server#1","data":{"data":{}}}}"#,
            &mut pending,
        );
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_decode_skips_garbage() {
        let mut pending = HashMap::new();
        let frame = "not json\n\n[1,2]\n{\"foo\":1}";
        assert!(decode_frame(frame, &mut pending).is_empty());
    }

    #[test]
    fn test_decode_push_requires_data() {
        let mut pending = HashMap::new();
        assert!(decode_frame(r#"{"result":{"type":0}}"#, &mut pending).is_empty());
    }

    #[tokio::test]
    async fn test_commands_rejected_when_disconnected() {
        let client = CentrifugeClient::new("ws://127.0.0.1:1/v1/connection/websocket");
        let result = client.ping(PingRequest::default()).await;
        assert!(matches!(
            result,
            Err(CentrifugeError::NotConnected(ConnectionStatus::Disconnected))
        ));

        client.disconnect().await;
        assert_eq!(client.status().await, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_connection_error_returns_to_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = CentrifugeClient::new(format!("ws://{}/v1/connection/websocket", addr));
        let mut events = client.events();
        client.connect(ConnectRequest::default()).await;

        assert_eq!(
            next_event(&mut events).await,
            CentrifugeEvent::StatusChanged(ConnectionStatus::Connecting)
        );
        assert!(matches!(
            next_event(&mut events).await,
            CentrifugeEvent::ConnectionError(_)
        ));
        assert_eq!(
            next_event(&mut events).await,
            CentrifugeEvent::StatusChanged(ConnectionStatus::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_round_trip_against_fake_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let first = ws.next().await.unwrap().unwrap();
            let command: Value = serde_json::from_str(first.to_text().unwrap()).unwrap();
            assert_eq!(command["method"], 0);
            assert_eq!(command["params"]["name"], "test");
            let id = command["id"].as_u64().unwrap();

            let reply = format!(r#"{{"id":{},"result":{{"client":"c-1"}}}}"#, id);
            ws.send(Message::Text(reply)).await.unwrap();

            let second = ws.next().await.unwrap().unwrap();
            let command: Value = serde_json::from_str(second.to_text().unwrap()).unwrap();
            assert_eq!(command["method"], 1);
            assert_eq!(command["params"]["channel"], "server#7");

            // drain until the client closes
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });

        let client = CentrifugeClient::new(format!("ws://{}/v1/connection/websocket", addr));
        let mut events = client.events();
        client
            .connect(ConnectRequest {
                name: Some("test".to_string()),
                ..Default::default()
            })
            .await;

        assert_eq!(
            next_event(&mut events).await,
            CentrifugeEvent::StatusChanged(ConnectionStatus::Connecting)
        );
        assert_eq!(
            next_event(&mut events).await,
            CentrifugeEvent::StatusChanged(ConnectionStatus::Connected)
        );

        match next_event(&mut events).await {
            CentrifugeEvent::Reply { id, reply } => {
                assert_eq!(id, 1);
                assert_eq!(
                    reply,
                    Reply::Connect(ConnectResult {
                        client: Some("c-1".to_string()),
                        ..Default::default()
                    })
                );
            }
            other => panic!("unexpected {:?}", other),
        }

        let id = client
            .subscribe(SubscribeRequest::channel("server#7"))
            .await
            .unwrap();
        assert_eq!(id, 2);

        client.disconnect().await;
        assert_eq!(
            next_event(&mut events).await,
            CentrifugeEvent::StatusChanged(ConnectionStatus::Disconnecting)
        );
        assert_eq!(
            next_event(&mut events).await,
            CentrifugeEvent::StatusChanged(ConnectionStatus::Disconnected)
        );

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_ignored_unless_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // accept TCP but never answer the websocket handshake
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let client = CentrifugeClient::new(format!("ws://{}/v1/connection/websocket", addr));
        let mut events = client.events();
        client.connect(ConnectRequest::default()).await;
        assert_eq!(
            next_event(&mut events).await,
            CentrifugeEvent::StatusChanged(ConnectionStatus::Connecting)
        );

        client.connect(ConnectRequest::default()).await;
        assert_eq!(client.status().await, ConnectionStatus::Connecting);
        assert!(events.try_recv().is_err());

        client.close().await;
        assert_eq!(client.status().await, ConnectionStatus::Disconnected);
        assert_eq!(
            next_event(&mut events).await,
            CentrifugeEvent::StatusChanged(ConnectionStatus::Disconnected)
        );

        server.abort();
    }

    #[tokio::test]
    async fn test_close_while_connecting_stops_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
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

        let client = CentrifugeClient::new(format!("ws://{}/v1/connection/websocket", addr));
        client.connect(ConnectRequest::default()).await;
        assert_eq!(client.status().await, ConnectionStatus::Connecting);

        client.close().await;
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(client.status().await, ConnectionStatus::Disconnected);
        assert!(server.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_when_connected_sends_close_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    return true;
                }
            }
            false
        });

        let client = CentrifugeClient::new(format!("ws://{}/v1/connection/websocket", addr));
        let mut events = client.events();
        client.connect(ConnectRequest::default()).await;
        assert_eq!(
            next_event(&mut events).await,
            CentrifugeEvent::StatusChanged(ConnectionStatus::Connecting)
        );
        assert_eq!(
            next_event(&mut events).await,
            CentrifugeEvent::StatusChanged(ConnectionStatus::Connected)
        );

        client.close().await;
        assert_eq!(client.status().await, ConnectionStatus::Disconnected);
        assert!(server.await.unwrap());
    }
}
