//! SQP Responder
//!
//! Answers challenge and query packets from the hosting platform's health
//! probes. [`Responder`] holds the protocol state and is socket-free;
//! [`ServerQueryHandler`] drives it from a tokio UDP socket.

use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use super::protocol::{
    Header, MessageType, QueryRequest, QueryResponse, ServerInfoData, HEADER_SIZE, MAX_STRING_LEN,
};

/// Largest datagram the receive loop accepts.
const MAX_DATAGRAM_SIZE: usize = 2048;

/// Query handler errors.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The UDP socket could not be bound.
    #[error("Failed to bind query socket: {0}")]
    Bind(#[from] std::io::Error),

    /// Numeric field outside `0..=65535`.
    #[error("{field} value {value} is out of range 0..=65535")]
    OutOfRange {
        /// Field being set.
        field: &'static str,
        /// Rejected value.
        value: i64,
    },

    /// String field longer than a length byte allows.
    #[error("{field} is {len} bytes, limit is 255")]
    StringTooLong {
        /// Field being set.
        field: &'static str,
        /// UTF-8 length of the rejected value.
        len: usize,
    },

    /// Player count already at its bound.
    #[error("current players already at {0}")]
    PlayerCountSaturated(u16),
}

// ============================================================================
// Server Info
// ============================================================================

/// Values reported in the server info chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    current_players: u16,
    max_players: u16,
    server_name: String,
    game_type: String,
    build_id: String,
    map: String,
    port: u16,
}

fn checked_u16(field: &'static str, value: i64) -> Result<u16, QueryError> {
    u16::try_from(value).map_err(|_| {
        warn!("Rejecting {} {}: outside 0..=65535", field, value);
        QueryError::OutOfRange { field, value }
    })
}

fn checked_str(field: &'static str, value: &str) -> Result<String, QueryError> {
    if value.len() > MAX_STRING_LEN {
        warn!(
            "Rejecting {} of {} bytes: longer than {} bytes",
            field,
            value.len(),
            MAX_STRING_LEN
        );
        return Err(QueryError::StringTooLong {
            field,
            len: value.len(),
        });
    }
    Ok(value.to_string())
}

impl ServerInfo {
    /// Players currently connected.
    pub fn current_players(&self) -> u16 {
        self.current_players
    }

    /// Player capacity.
    pub fn max_players(&self) -> u16 {
        self.max_players
    }

    /// Server name.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Game type.
    pub fn game_type(&self) -> &str {
        &self.game_type
    }

    /// Build identifier.
    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    /// Map name.
    pub fn map(&self) -> &str {
        &self.map
    }

    /// Game port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Set the current player count.
    pub fn set_current_players(&mut self, value: i64) -> Result<(), QueryError> {
        self.current_players = checked_u16("current players", value)?;
        Ok(())
    }

    /// Set the player capacity.
    pub fn set_max_players(&mut self, value: i64) -> Result<(), QueryError> {
        self.max_players = checked_u16("max players", value)?;
        Ok(())
    }

    /// Set the game port.
    pub fn set_port(&mut self, value: i64) -> Result<(), QueryError> {
        self.port = checked_u16("port", value)?;
        Ok(())
    }

    /// Set the server name.
    pub fn set_server_name(&mut self, value: &str) -> Result<(), QueryError> {
        self.server_name = checked_str("server name", value)?;
        Ok(())
    }

    /// Set the game type.
    pub fn set_game_type(&mut self, value: &str) -> Result<(), QueryError> {
        self.game_type = checked_str("game type", value)?;
        Ok(())
    }

    /// Set the build identifier.
    pub fn set_build_id(&mut self, value: &str) -> Result<(), QueryError> {
        self.build_id = checked_str("build id", value)?;
        Ok(())
    }

    /// Set the map name.
    pub fn set_map(&mut self, value: &str) -> Result<(), QueryError> {
        self.map = checked_str("map", value)?;
        Ok(())
    }

    /// Add one player, saturating at 65535.
    pub fn increment_current_players(&mut self) -> Result<u16, QueryError> {
        match self.current_players.checked_add(1) {
            Some(next) => {
                self.current_players = next;
                Ok(next)
            }
            None => {
                warn!("Current players already at maximum {}", u16::MAX);
                Err(QueryError::PlayerCountSaturated(u16::MAX))
            }
        }
    }

    /// Remove one player, saturating at 0.
    pub fn decrement_current_players(&mut self) -> Result<u16, QueryError> {
        match self.current_players.checked_sub(1) {
            Some(next) => {
                self.current_players = next;
                Ok(next)
            }
            None => {
                warn!("Current players already at 0");
                Err(QueryError::PlayerCountSaturated(0))
            }
        }
    }

    /// Wire representation of the current values.
    pub fn to_data(&self) -> ServerInfoData {
        ServerInfoData {
            current_players: self.current_players,
            max_players: self.max_players,
            server_name: self.server_name.clone(),
            game_type: self.game_type.clone(),
            build_id: self.build_id.clone(),
            map: self.map.clone(),
            port: self.port,
        }
    }
}

// ============================================================================
// Responder
// ============================================================================

/// Outstanding challenges kept before the oldest is evicted.
pub const MAX_PENDING_CHALLENGES: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Challenge {
    token: u32,
    issued: u64,
}

/// Challenge/query state machine keyed by peer address.
#[derive(Debug, Default)]
pub struct Responder {
    challenges: HashMap<SocketAddr, Challenge>,
    issued: u64,
}

impl Responder {
    /// Create a responder with no outstanding challenges.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of addresses holding an unanswered challenge.
    pub fn pending_challenges(&self) -> usize {
        self.challenges.len()
    }

    /// Handle one datagram, returning the reply to send, if any.
    pub fn handle(
        &mut self,
        packet: &[u8],
        from: SocketAddr,
        info: &ServerInfo,
    ) -> Option<Vec<u8>> {
        if packet.len() < HEADER_SIZE {
            warn!("Packet too small ({} bytes) from {}", packet.len(), from);
            return None;
        }

        match MessageType::from_u8(packet[0]) {
            Some(MessageType::Challenge) => self.handle_challenge(from),
            Some(MessageType::Query) => self.handle_query(packet, from, info),
            None => {
                warn!("Unrecognized packet type {} from {}", packet[0], from);
                None
            }
        }
    }

    fn handle_challenge(&mut self, from: SocketAddr) -> Option<Vec<u8>> {
        if self.challenges.contains_key(&from) {
            warn!("Challenge already issued to {}", from);
            return None;
        }

        if self.challenges.len() >= MAX_PENDING_CHALLENGES {
            self.evict_oldest_challenge();
        }

        let token = rand::thread_rng().gen_range(0..i32::MAX as u32);
        self.issued += 1;
        self.challenges.insert(
            from,
            Challenge {
                token,
                issued: self.issued,
            },
        );

        Some(Header::challenge(token).to_bytes())
    }

    fn evict_oldest_challenge(&mut self) {
        let oldest = self
            .challenges
            .iter()
            .min_by_key(|(_, challenge)| challenge.issued)
            .map(|(addr, _)| *addr);
        if let Some(addr) = oldest {
            debug!("Challenge table full, dropping challenge for {}", addr);
            self.challenges.remove(&addr);
        }
    }

    fn handle_query(
        &mut self,
        packet: &[u8],
        from: SocketAddr,
        info: &ServerInfo,
    ) -> Option<Vec<u8>> {
        if !self.challenges.contains_key(&from) {
            warn!("Query from {} without a prior challenge", from);
            return None;
        }

        let request = match QueryRequest::from_bytes(packet) {
            Ok(request) => request,
            Err(e) => {
                warn!("Malformed query from {}: {}", from, e);
                return None;
            }
        };

        let expected = self.challenges.remove(&from)?.token;
        if request.header.challenge_token != expected {
            warn!(
                "Challenge token mismatch from {}: expected {}, got {}",
                from, expected, request.header.challenge_token
            );
            return None;
        }

        match QueryResponse::answer(&request, info.to_data()).to_bytes() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!("Failed to encode query response: {}", e);
                None
            }
        }
    }
}

// ============================================================================
// Server Query Handler
// ============================================================================

struct Listener {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// UDP query endpoint.
pub struct ServerQueryHandler {
    query_port: u16,
    info: Arc<RwLock<ServerInfo>>,
    listener: Mutex<Option<Listener>>,
}

impl ServerQueryHandler {
    /// Create a handler for `query_port` (0 binds an ephemeral port).
    pub fn new(query_port: u16) -> Self {
        Self {
            query_port,
            info: Arc::new(RwLock::new(ServerInfo::default())),
            listener: Mutex::new(None),
        }
    }

    /// Bind the socket and start answering queries.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<SocketAddr, QueryError> {
        let mut listener = self.listener.lock().await;
        if let Some(existing) = listener.as_ref() {
            return Ok(existing.local_addr);
        }

        let socket = match UdpSocket::bind(("0.0.0.0", self.query_port)).await {
            Ok(socket) => socket,
            Err(e) => {
                error!("Failed to bind query port {}: {}", self.query_port, e);
                return Err(e.into());
            }
        };
        let local_addr = socket.local_addr()?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let info = self.info.clone();
        let task = tokio::spawn(async move {
            Self::run_receive_loop(socket, info, shutdown_rx).await;
        });

        info!("Listening on port {}", local_addr.port());
        *listener = Some(Listener {
            local_addr,
            shutdown_tx,
            task,
        });

        Ok(local_addr)
    }

    /// Stop answering queries and close the socket.
    pub async fn disconnect(&self) {
        let Some(listener) = self.listener.lock().await.take() else {
            return;
        };

        let _ = listener.shutdown_tx.send(());
        if let Err(e) = listener.task.await {
            warn!("Query receive loop ended abnormally: {}", e);
        }
        info!("Stopped listening on port {}", listener.local_addr.port());
    }

    /// True while the socket is bound.
    pub async fn is_connected(&self) -> bool {
        self.listener.lock().await.is_some()
    }

    /// Bound address, if connected.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().await.as_ref().map(|l| l.local_addr)
    }

    async fn run_receive_loop(
        socket: UdpSocket,
        info: Arc<RwLock<ServerInfo>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut responder = Responder::new();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    let (len, from) = match result {
                        Ok(received) => received,
                        Err(e) => {
                            warn!("Query socket receive error: {}", e);
                            continue;
                        }
                    };
                    let packet = &buf[..len];
                    trace!("Received {} bytes from {}: {}", len, from, hex::encode(packet));

                    let reply = {
                        let info = info.read().await;
                        responder.handle(packet, from, &info)
                    };

                    if let Some(reply) = reply {
                        trace!(
                            "Sending {} bytes to {}: {}",
                            reply.len(),
                            from,
                            hex::encode(&reply)
                        );
                        if let Err(e) = socket.send_to(&reply, from).await {
                            warn!("Failed to send query reply to {}: {}", from, e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }
    }

    /// Copy of the current server info.
    pub async fn server_info(&self) -> ServerInfo {
        self.info.read().await.clone()
    }

    /// Players currently connected.
    pub async fn current_players(&self) -> u16 {
        self.info.read().await.current_players()
    }

    /// Player capacity.
    pub async fn max_players(&self) -> u16 {
        self.info.read().await.max_players()
    }

    /// Server name.
    pub async fn server_name(&self) -> String {
        self.info.read().await.server_name().to_string()
    }

    /// Game type.
    pub async fn game_type(&self) -> String {
        self.info.read().await.game_type().to_string()
    }

    /// Build identifier.
    pub async fn build_id(&self) -> String {
        self.info.read().await.build_id().to_string()
    }

    /// Map name.
    pub async fn map(&self) -> String {
        self.info.read().await.map().to_string()
    }

    /// Game port.
    pub async fn port(&self) -> u16 {
        self.info.read().await.port()
    }

    /// See [`ServerInfo::set_current_players`].
    pub async fn set_current_players(&self, value: i64) -> Result<(), QueryError> {
        self.info.write().await.set_current_players(value)
    }

    /// See [`ServerInfo::set_max_players`].
    pub async fn set_max_players(&self, value: i64) -> Result<(), QueryError> {
        self.info.write().await.set_max_players(value)
    }

    /// See [`ServerInfo::set_port`].
    pub async fn set_port(&self, value: i64) -> Result<(), QueryError> {
        self.info.write().await.set_port(value)
    }

    /// See [`ServerInfo::set_server_name`].
    pub async fn set_server_name(&self, value: &str) -> Result<(), QueryError> {
        self.info.write().await.set_server_name(value)
    }

    /// See [`ServerInfo::set_game_type`].
    pub async fn set_game_type(&self, value: &str) -> Result<(), QueryError> {
        self.info.write().await.set_game_type(value)
    }

    /// See [`ServerInfo::set_build_id`].
    pub async fn set_build_id(&self, value: &str) -> Result<(), QueryError> {
        self.info.write().await.set_build_id(value)
    }

    /// See [`ServerInfo::set_map`].
    pub async fn set_map(&self, value: &str) -> Result<(), QueryError> {
        self.info.write().await.set_map(value)
    }

    /// See [`ServerInfo::increment_current_players`].
    pub async fn increment_current_players(&self) -> Result<u16, QueryError> {
        self.info.write().await.increment_current_players()
    }

    /// See [`ServerInfo::decrement_current_players`].
    pub async fn decrement_current_players(&self) -> Result<u16, QueryError> {
        self.info.write().await.decrement_current_players()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::protocol::chunk;
    use std::time::Duration;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn challenge(responder: &mut Responder, from: SocketAddr) -> u32 {
        let reply = responder
            .handle(&Header::challenge(0).to_bytes(), from, &ServerInfo::default())
            .unwrap();
        let header = Header::from_bytes(&reply).unwrap();
        assert_eq!(header.message_type, 0);
        header.challenge_token
    }

    #[test]
    fn test_setters_validate_range() {
        let mut info = ServerInfo::default();
        info.set_max_players(64).unwrap();

        assert!(matches!(
            info.set_max_players(70000),
            Err(QueryError::OutOfRange { value: 70000, .. })
        ));
        assert!(info.set_port(-1).is_err());
        assert_eq!(info.max_players(), 64);
        assert_eq!(info.port(), 0);

        info.set_port(65535).unwrap();
        assert_eq!(info.port(), 65535);
    }

    #[test]
    fn test_string_setters_limit() {
        let mut info = ServerInfo::default();
        info.set_map("dust").unwrap();

        let result = info.set_map(&"m".repeat(256));
        assert!(matches!(result, Err(QueryError::StringTooLong { len: 256, .. })));
        assert_eq!(info.map(), "dust");

        info.set_server_name(&"n".repeat(255)).unwrap();
        assert_eq!(info.server_name().len(), 255);
    }

    #[test]
    fn test_player_count_saturates() {
        let mut info = ServerInfo::default();
        assert!(info.decrement_current_players().is_err());
        assert_eq!(info.current_players(), 0);

        assert_eq!(info.increment_current_players().unwrap(), 1);
        assert_eq!(info.decrement_current_players().unwrap(), 0);

        info.set_current_players(65535).unwrap();
        assert!(info.increment_current_players().is_err());
        assert_eq!(info.current_players(), 65535);
    }

    #[test]
    fn test_small_packet_dropped() {
        let mut responder = Responder::new();
        assert!(responder.handle(&[0, 0, 0, 0], addr(1), &ServerInfo::default()).is_none());
        assert_eq!(responder.pending_challenges(), 0);
    }

    #[test]
    fn test_challenge_token_range() {
        let mut responder = Responder::new();
        for port in 1..50 {
            let token = challenge(&mut responder, addr(port));
            assert!(token < i32::MAX as u32);
        }
        assert_eq!(responder.pending_challenges(), 49);
    }

    #[test]
    fn test_challenge_table_evicts_oldest() {
        let mut responder = Responder::new();
        let first = SocketAddr::from(([10, 0, 0, 1], 1));
        challenge(&mut responder, first);

        for i in 0..MAX_PENDING_CHALLENGES as u32 {
            let peer = SocketAddr::from(([10, 1, (i >> 8) as u8, i as u8], 2));
            challenge(&mut responder, peer);
        }
        assert_eq!(responder.pending_challenges(), MAX_PENDING_CHALLENGES);

        // the first peer lost its challenge and may ask again
        challenge(&mut responder, first);
        assert_eq!(responder.pending_challenges(), MAX_PENDING_CHALLENGES);
    }

    #[test]
    fn test_duplicate_challenge_ignored() {
        let mut responder = Responder::new();
        challenge(&mut responder, addr(1));
        let challenge = Header::challenge(0).to_bytes();
        let second = responder.handle(&challenge, addr(1), &ServerInfo::default());
        assert!(second.is_none());
    }

    #[test]
    fn test_query_without_challenge_dropped() {
        let mut responder = Responder::new();
        let request = QueryRequest::new(5, 1, chunk::SERVER_INFO).to_bytes();
        assert!(responder.handle(&request, addr(1), &ServerInfo::default()).is_none());
    }

    #[test]
    fn test_query_answered_once() {
        let mut responder = Responder::new();
        let mut info = ServerInfo::default();
        info.set_server_name("alpha").unwrap();
        info.set_max_players(8).unwrap();

        let token = challenge(&mut responder, addr(1));
        let request = QueryRequest::new(token, 1, chunk::SERVER_INFO).to_bytes();

        let reply = responder.handle(&request, addr(1), &info).unwrap();
        let response = QueryResponse::from_bytes(&reply).unwrap();
        assert_eq!(response.header.header.challenge_token, token);
        assert_eq!(response.header.version, 1);
        let data = response.server_info.unwrap();
        assert_eq!(data.server_name, "alpha");
        assert_eq!(data.max_players, 8);

        // token consumed
        assert!(responder.handle(&request, addr(1), &info).is_none());
        assert_eq!(responder.pending_challenges(), 0);
    }

    #[test]
    fn test_wrong_token_consumes_challenge() {
        let mut responder = Responder::new();
        let token = challenge(&mut responder, addr(1));
        let request = QueryRequest::new(token.wrapping_add(1), 1, chunk::SERVER_INFO).to_bytes();

        assert!(responder.handle(&request, addr(1), &ServerInfo::default()).is_none());
        assert_eq!(responder.pending_challenges(), 0);
    }

    #[test]
    fn test_truncated_query_keeps_challenge() {
        let mut responder = Responder::new();
        let token = challenge(&mut responder, addr(1));
        let mut request = QueryRequest::new(token, 1, chunk::SERVER_INFO).to_bytes();
        request.truncate(6);

        assert!(responder.handle(&request, addr(1), &ServerInfo::default()).is_none());
        assert_eq!(responder.pending_challenges(), 1);
    }

    #[test]
    fn test_unknown_type_dropped() {
        let mut responder = Responder::new();
        assert!(responder.handle(&[9, 0, 0, 0, 0], addr(1), &ServerInfo::default()).is_none());
    }

    #[tokio::test]
    async fn test_loopback_query() {
        let handler = ServerQueryHandler::new(0);
        handler.set_server_name("loopback").await.unwrap();
        handler.set_current_players(2).await.unwrap();

        let bound = handler.connect().await.unwrap();
        assert!(handler.is_connected().await);
        assert_eq!(handler.connect().await.unwrap(), bound);

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = addr(bound.port());
        let mut buf = [0u8; 512];

        client.send_to(&Header::challenge(0).to_bytes(), target).await.unwrap();
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let token = Header::from_bytes(&buf[..n]).unwrap().challenge_token;

        let request = QueryRequest::new(token, 1, chunk::SERVER_INFO);
        client.send_to(&request.to_bytes(), target).await.unwrap();
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();

        let response = QueryResponse::from_bytes(&buf[..n]).unwrap();
        let data = response.server_info.unwrap();
        assert_eq!(data.server_name, "loopback");
        assert_eq!(data.current_players, 2);

        handler.disconnect().await;
        assert!(!handler.is_connected().await);
        handler.disconnect().await;
    }
}
