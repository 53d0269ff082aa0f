//! Centrifuge Client
//!
//! Realtime messaging client used to receive allocation events from the SDK
//! daemon.

pub mod client;
pub mod messages;

pub use client::{
    decode_frame, CentrifugeClient, CentrifugeError, CentrifugeEvent, ConnectionStatus, Inbound,
};
pub use messages::{
    ConnectRequest, MethodType, Publication, Push, PushType, Reply, SubscribeRequest,
};
