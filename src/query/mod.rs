//! Server Query Protocol
//!
//! Wire codec and UDP responder for SQP health probes.

pub mod handler;
pub mod protocol;

pub use handler::{QueryError, Responder, ServerInfo, ServerQueryHandler};
pub use protocol::{
    chunk, DynamicType, Header, MessageType, ProtocolError, QueryRequest, QueryResponse,
    QueryResponseHeader, ServerInfoData,
};
