//! Centrifuge Protocol Messages
//!
//! JSON form of the Centrifuge client protocol. Commands are written as
//! `{"id":u32,"method":i32,"params":{...}}`; replies and pushes arrive as
//! objects carrying `id`, `result` and `error`.
//!
//! `bytes` fields of the protocol are carried as raw JSON values. Field names
//! match the protocol's JSON keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Codes
// ============================================================================

/// Command method codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MethodType {
    /// Authenticate a new connection.
    Connect = 0,
    /// Subscribe to a channel.
    Subscribe = 1,
    /// Leave a channel.
    Unsubscribe = 2,
    /// Publish into a channel.
    Publish = 3,
    /// List channel presence.
    Presence = 4,
    /// Count channel presence.
    PresenceStats = 5,
    /// Read channel history.
    History = 6,
    /// Keepalive.
    Ping = 7,
    /// Fire-and-forget message.
    Send = 8,
    /// Server RPC.
    Rpc = 9,
    /// Refresh the connection token.
    Refresh = 10,
    /// Refresh a subscription token.
    SubRefresh = 11,
}

impl fmt::Display for MethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Push type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PushType {
    /// Channel publication.
    Publication = 0,
    /// Client joined a channel.
    Join = 1,
    /// Client left a channel.
    Leave = 2,
    /// Server-side unsubscribe.
    Unsubscribe = 3,
    /// Message sent to this client.
    Message = 4,
    /// Server-side subscribe.
    Subscribe = 5,
    /// Server-side connect.
    Connect = 6,
    /// Server is closing the connection.
    Disconnect = 7,
    /// Server-side token refresh.
    Refresh = 8,
}

impl PushType {
    /// Map a push type code, if known.
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => PushType::Publication,
            1 => PushType::Join,
            2 => PushType::Leave,
            3 => PushType::Unsubscribe,
            4 => PushType::Message,
            5 => PushType::Subscribe,
            6 => PushType::Connect,
            7 => PushType::Disconnect,
            8 => PushType::Refresh,
            _ => return None,
        })
    }
}

/// Disconnect codes sent by the server in a Disconnect push.
pub struct DisconnectCode;

impl DisconnectCode {
    /// Clean disconnect.
    pub const NORMAL: u32 = 3000;
    /// Server is shutting down.
    pub const SHUTDOWN: u32 = 3001;
    /// Connection token is invalid.
    pub const INVALID_TOKEN: u32 = 3002;
    /// Client sent a malformed request.
    pub const BAD_REQUEST: u32 = 3003;
    /// Internal server error.
    pub const SERVER_ERROR: u32 = 3004;
    /// Connection token expired.
    pub const EXPIRED: u32 = 3005;
    /// Subscription token expired.
    pub const SUB_EXPIRED: u32 = 3006;
    /// Connection went stale.
    pub const STALE: u32 = 3007;
    /// Client is too slow to read.
    pub const SLOW: u32 = 3008;
    /// Server failed to write to the client.
    pub const WRITE_ERROR: u32 = 3009;
    /// Server detected inconsistent state.
    pub const INSUFFICIENT_STATE: u32 = 3010;
    /// Server forced a reconnect.
    pub const FORCE_RECONNECT: u32 = 3011;
    /// Server forced a disconnect without reconnect.
    pub const FORCE_NO_RECONNECT: u32 = 3012;
    /// Per-user connection limit exceeded.
    pub const CONNECTION_LIMIT: u32 = 3013;
    /// Channel limit exceeded. Shares its code with [`Self::CONNECTION_LIMIT`].
    pub const CHANNEL_LIMIT: u32 = 3013;
}

// ============================================================================
// Commands
// ============================================================================

/// Request parameters that can be sent as a command.
pub trait Command: Serialize {
    /// Method code written alongside the params.
    const METHOD: MethodType;
}

#[derive(Serialize)]
struct CommandFrame<'a, C: Serialize> {
    id: u32,
    method: i32,
    params: &'a C,
}

/// Serialize a command frame.
pub fn encode_command<C: Command>(id: u32, params: &C) -> Result<String, serde_json::Error> {
    serde_json::to_string(&CommandFrame {
        id,
        method: C::METHOD as i32,
        params,
    })
}

macro_rules! command {
    ($ty:ty, $method:ident) => {
        impl Command for $ty {
            const METHOD: MethodType = MethodType::$method;
        }
    };
}

/// Connect params, sent as the first command on a new socket.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectRequest {
    /// Connection token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Custom connect data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Client name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Client version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Subscribe to a channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubscribeRequest {
    /// Channel name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Subscription token for private channels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Recover missed publications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recover: Option<bool>,
    /// Stream epoch to recover from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epoch: Option<String>,
    /// Stream offset to recover from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl SubscribeRequest {
    /// Plain subscription to `channel`.
    pub fn channel(channel: impl Into<String>) -> Self {
        Self {
            channel: Some(channel.into()),
            ..Default::default()
        }
    }
}

/// Leave a channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UnsubscribeRequest {
    /// Channel name.
    pub channel: String,
}

/// Publish into a channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishRequest {
    /// Channel name.
    pub channel: String,
    /// Publication payload.
    pub data: Value,
}

/// List clients present in a channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PresenceRequest {
    /// Channel name.
    pub channel: String,
}

/// Count clients present in a channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PresenceStatsRequest {
    /// Channel name.
    pub channel: String,
}

/// Position in a channel's history stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPosition {
    /// Offset within the epoch.
    pub offset: u64,
    /// Stream epoch.
    pub epoch: String,
}

/// Read a channel's history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryRequest {
    /// Channel name.
    pub channel: String,
    /// Maximum publications to return.
    pub limit: i32,
    /// Start position.
    pub since: StreamPosition,
    /// Newest first.
    pub reverse: bool,
}

/// Keepalive.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PingRequest {}

/// Asynchronous message to the server. The server never replies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendRequest {
    /// Message payload.
    pub data: Value,
}

/// Call a server RPC.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcRequest {
    /// RPC payload.
    pub data: Value,
    /// RPC method name.
    pub method: String,
}

/// Refresh the connection token.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshRequest {
    /// New connection token.
    pub token: String,
}

/// Refresh a subscription token.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubRefreshRequest {
    /// Channel name.
    pub channel: String,
    /// New subscription token.
    pub token: String,
}

command!(ConnectRequest, Connect);
command!(SubscribeRequest, Subscribe);
command!(UnsubscribeRequest, Unsubscribe);
command!(PublishRequest, Publish);
command!(PresenceRequest, Presence);
command!(PresenceStatsRequest, PresenceStats);
command!(HistoryRequest, History);
command!(PingRequest, Ping);
command!(SendRequest, Send);
command!(RpcRequest, Rpc);
command!(RefreshRequest, Refresh);
command!(SubRefreshRequest, SubRefresh);

// ============================================================================
// Shared Types
// ============================================================================

/// Error object attached to a reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Error {
    /// Centrifuge error code.
    pub code: u32,
    /// Human-readable message.
    pub message: String,
}

/// Identity of a connected client.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ClientInfo {
    /// User id.
    pub user: Option<String>,
    /// Client id.
    pub client: Option<String>,
    /// Connection info attached by the server.
    pub conn_info: Option<Value>,
    /// Channel info attached by the server.
    pub chan_info: Option<Value>,
}

/// Message published into a channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Publication {
    /// Payload. For server channels this is the server event.
    pub data: Value,
    /// Publisher, if known.
    pub info: Option<ClientInfo>,
    /// Offset in the channel stream.
    pub offset: u64,
}

// ============================================================================
// Results
// ============================================================================

/// Reply to [`ConnectRequest`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConnectResult {
    /// Client id assigned by the server.
    pub client: Option<String>,
    /// Server version.
    pub version: Option<String>,
    /// Connection expires and needs refreshing.
    pub expires: Option<bool>,
    /// Seconds until expiry.
    pub ttl: Option<u32>,
    /// Custom connect data.
    pub data: Option<Value>,
}

/// Reply to [`SubscribeRequest`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubscribeResult {
    /// Subscription expires and needs refreshing.
    pub expires: Option<bool>,
    /// Seconds until expiry.
    pub ttl: Option<u32>,
    /// Channel supports recovery.
    pub recoverable: Option<bool>,
    /// Stream epoch.
    pub epoch: Option<String>,
    /// Recovered publications.
    #[serde(default)]
    pub publications: Vec<Publication>,
    /// All missed publications were recovered.
    pub recovered: Option<bool>,
    /// Current stream offset.
    pub offset: Option<u64>,
    /// Channel is positioned.
    pub positioned: Option<bool>,
    /// Custom subscribe data.
    pub data: Option<Value>,
}

/// Reply to [`UnsubscribeRequest`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UnsubscribeResult {}

/// Reply to [`PublishRequest`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PublishResult {}

/// Reply to [`PresenceRequest`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PresenceResult {
    /// Present clients keyed by client id.
    #[serde(default)]
    pub presence: HashMap<String, ClientInfo>,
}

/// Reply to [`PresenceStatsRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PresenceStatsResult {
    /// Connected clients.
    pub num_clients: u32,
    /// Distinct users.
    pub num_users: u32,
}

/// Reply to [`HistoryRequest`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HistoryResult {
    /// Publications in the requested range.
    #[serde(default)]
    pub publications: Vec<Publication>,
    /// Stream epoch.
    pub epoch: String,
    /// Current stream offset.
    pub offset: u64,
}

/// Reply to [`PingRequest`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PingResult {}

/// Reply to [`RpcRequest`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RpcResult {
    /// RPC response payload.
    pub data: Option<Value>,
}

/// Reply to [`RefreshRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RefreshResult {
    /// Client id.
    pub client: String,
    /// Server version.
    pub version: String,
    /// Connection still expires.
    pub expires: bool,
    /// Seconds until expiry.
    pub ttl: u32,
}

/// Reply to [`SubRefreshRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SubRefreshResult {
    /// Subscription still expires.
    pub expires: bool,
    /// Seconds until expiry.
    pub ttl: u32,
}

/// Typed reply, selected by the method of the originating command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Connect reply.
    Connect(ConnectResult),
    /// Subscribe reply.
    Subscribe(SubscribeResult),
    /// Unsubscribe reply.
    Unsubscribe(UnsubscribeResult),
    /// Publish reply.
    Publish(PublishResult),
    /// Presence reply.
    Presence(PresenceResult),
    /// Presence stats reply.
    PresenceStats(PresenceStatsResult),
    /// History reply.
    History(HistoryResult),
    /// Ping reply.
    Ping(PingResult),
    /// RPC reply.
    Rpc(RpcResult),
    /// Refresh reply.
    Refresh(RefreshResult),
    /// Subscription refresh reply.
    SubRefresh(SubRefreshResult),
}

impl Reply {
    /// Parse `result` for a command sent with `method`.
    ///
    /// Returns `Ok(None)` for [`MethodType::Send`], which has no reply.
    pub fn parse(method: MethodType, result: Value) -> Result<Option<Self>, serde_json::Error> {
        use serde_json::from_value;

        Ok(Some(match method {
            MethodType::Connect => Reply::Connect(from_value(result)?),
            MethodType::Subscribe => Reply::Subscribe(from_value(result)?),
            MethodType::Unsubscribe => Reply::Unsubscribe(from_value(result)?),
            MethodType::Publish => Reply::Publish(from_value(result)?),
            MethodType::Presence => Reply::Presence(from_value(result)?),
            MethodType::PresenceStats => Reply::PresenceStats(from_value(result)?),
            MethodType::History => Reply::History(from_value(result)?),
            MethodType::Ping => Reply::Ping(from_value(result)?),
            MethodType::Send => return Ok(None),
            MethodType::Rpc => Reply::Rpc(from_value(result)?),
            MethodType::Refresh => Reply::Refresh(from_value(result)?),
            MethodType::SubRefresh => Reply::SubRefresh(from_value(result)?),
        }))
    }
}

// ============================================================================
// Pushes
// ============================================================================

/// A client joined a channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Join {
    /// Joining client.
    pub info: ClientInfo,
}

/// A client left a channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Leave {
    /// Leaving client.
    pub info: ClientInfo,
}

/// The server unsubscribed this client.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Unsubscribe {}

/// Message addressed to this client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessagePush {
    /// Message payload.
    pub data: Value,
}

/// The server subscribed this client.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Subscribe {
    /// Channel supports recovery.
    pub recoverable: Option<bool>,
    /// Stream epoch.
    pub epoch: Option<String>,
    /// Current stream offset.
    pub offset: Option<u64>,
    /// Channel is positioned.
    pub positioned: Option<bool>,
    /// Custom subscribe data.
    pub data: Option<Value>,
}

/// The server connected this client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Connect {
    /// Client id.
    pub client: String,
    /// Server version.
    pub version: String,
    /// Custom connect data.
    pub data: Option<Value>,
    /// Connection expires.
    pub expires: bool,
    /// Seconds until expiry.
    pub ttl: u32,
}

/// The server is closing the connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Disconnect {
    /// See [`DisconnectCode`].
    pub code: u32,
    /// Reason text.
    pub reason: String,
    /// The client may reconnect.
    pub reconnect: bool,
}

/// The server refreshed the connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Refresh {
    /// Connection still expires.
    pub expires: Option<bool>,
    /// Seconds until expiry.
    pub ttl: Option<u32>,
}

/// Typed push body.
#[derive(Debug, Clone, PartialEq)]
pub enum Push {
    /// Channel publication.
    Publication(Publication),
    /// Join notification.
    Join(Join),
    /// Leave notification.
    Leave(Leave),
    /// Server-side unsubscribe.
    Unsubscribe(Unsubscribe),
    /// Direct message.
    Message(MessagePush),
    /// Server-side subscribe.
    Subscribe(Subscribe),
    /// Server-side connect.
    Connect(Connect),
    /// Disconnect notice.
    Disconnect(Disconnect),
    /// Server-side refresh.
    Refresh(Refresh),
}

impl Push {
    /// Parse the `data` of a push result according to its type.
    pub fn parse(push_type: PushType, data: Value) -> Result<Self, serde_json::Error> {
        use serde_json::from_value;

        Ok(match push_type {
            PushType::Publication => Push::Publication(from_value(data)?),
            PushType::Join => Push::Join(from_value(data)?),
            PushType::Leave => Push::Leave(from_value(data)?),
            PushType::Unsubscribe => Push::Unsubscribe(from_value(data)?),
            PushType::Message => Push::Message(from_value(data)?),
            PushType::Subscribe => Push::Subscribe(from_value(data)?),
            PushType::Connect => Push::Connect(from_value(data)?),
            PushType::Disconnect => Push::Disconnect(from_value(data)?),
            PushType::Refresh => Push::Refresh(from_value(data)?),
        })
    }
}
