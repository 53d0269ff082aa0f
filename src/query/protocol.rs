//! SQP Wire Format
//!
//! Big-endian packet layouts for the Server Query Protocol.
//!
//! ```text
//! Header            = Type:u8 ChallengeToken:u32
//! QueryRequest      = Header Version:u16 RequestedChunks:u8
//! QueryResponseHdr  = Header Version:u16 CurrentPacket:u8 LastPacket:u8 PacketLength:u16
//! QueryResponse     = QueryResponseHdr [ ChunkLength:u32 ServerInfoData ]
//! ```

use thiserror::Error;

/// Size of [`Header`] on the wire.
pub const HEADER_SIZE: usize = 5;

/// Size of [`QueryRequest`] on the wire.
pub const QUERY_REQUEST_SIZE: usize = HEADER_SIZE + 3;

/// Size of [`QueryResponseHeader`] on the wire.
pub const QUERY_RESPONSE_HEADER_SIZE: usize = HEADER_SIZE + 6;

/// Longest string a length byte can describe.
pub const MAX_STRING_LEN: usize = u8::MAX as usize;

/// Packet type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Challenge request and response.
    Challenge = 0,
    /// Query request and response.
    Query = 1,
}

impl MessageType {
    /// Map a type byte, if known.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessageType::Challenge),
            1 => Some(MessageType::Query),
            _ => None,
        }
    }
}

/// Requested chunk bit flags.
pub mod chunk {
    /// Server info (players, name, map).
    pub const SERVER_INFO: u8 = 1;
    /// Server rules.
    pub const SERVER_RULES: u8 = 2;
    /// Player info.
    pub const PLAYER_INFO: u8 = 4;
    /// Team info.
    pub const TEAM_INFO: u8 = 8;
}

/// Value type codes used by the rules, player and team chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DynamicType {
    /// u8
    Byte = 0,
    /// u16
    Uint16 = 1,
    /// u32
    Uint32 = 2,
    /// u64
    Uint64 = 3,
    /// Length-prefixed string
    String = 4,
}

/// Wire codec errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Input ended early.
    #[error("Truncated packet: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes required by the field.
        needed: usize,
        /// Bytes left in the input.
        remaining: usize,
    },

    /// String bytes are not UTF-8.
    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    /// String does not fit a length byte.
    #[error("String of {0} bytes exceeds 255 byte limit")]
    StringTooLong(usize),
}

// ============================================================================
// Reader / Writer
// ============================================================================

/// Big-endian packet writer.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Write a byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Write a u16.
    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a u32.
    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) -> Result<(), ProtocolError> {
        let len = u8::try_from(value.len()).map_err(|_| ProtocolError::StringTooLong(value.len()))?;
        self.buf.push(len);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Big-endian packet reader over a borrowed buffer.
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Start reading at the beginning of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    /// Read a byte.
    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    /// Read a u16.
    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Read a u32.
    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_u8()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }
}

// ============================================================================
// Packets
// ============================================================================

/// Common packet header.
///
/// A challenge packet is exactly a header, in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Packet type byte.
    pub message_type: u8,
    /// Challenge token.
    pub challenge_token: u32,
}

impl Header {
    /// Challenge packet carrying `token`.
    pub fn challenge(token: u32) -> Self {
        Self {
            message_type: MessageType::Challenge as u8,
            challenge_token: token,
        }
    }

    /// Append to a writer.
    pub fn write(&self, w: &mut PacketWriter) {
        w.write_u8(self.message_type);
        w.write_u32(self.challenge_token);
    }

    /// Read from a reader.
    pub fn read(r: &mut PacketReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            message_type: r.read_u8()?,
            challenge_token: r.read_u32()?,
        })
    }

    /// Encode as a standalone packet.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = PacketWriter::with_capacity(HEADER_SIZE);
        self.write(&mut w);
        w.into_bytes()
    }

    /// Decode from the start of `data`.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Self::read(&mut PacketReader::new(data))
    }
}

/// Query request from a prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryRequest {
    /// Header (type 1).
    pub header: Header,
    /// Protocol version, echoed in the response.
    pub version: u16,
    /// Bit set of [`chunk`] flags.
    pub requested_chunks: u8,
}

impl QueryRequest {
    /// Build a query request.
    pub fn new(challenge_token: u32, version: u16, requested_chunks: u8) -> Self {
        Self {
            header: Header {
                message_type: MessageType::Query as u8,
                challenge_token,
            },
            version,
            requested_chunks,
        }
    }

    /// True if the server info chunk was requested.
    pub fn wants_server_info(&self) -> bool {
        self.requested_chunks & chunk::SERVER_INFO != 0
    }

    /// Encode.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = PacketWriter::with_capacity(QUERY_REQUEST_SIZE);
        self.header.write(&mut w);
        w.write_u16(self.version);
        w.write_u8(self.requested_chunks);
        w.into_bytes()
    }

    /// Decode.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = PacketReader::new(data);
        Ok(Self {
            header: Header::read(&mut r)?,
            version: r.read_u16()?,
            requested_chunks: r.read_u8()?,
        })
    }
}

/// Response header preceding any chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryResponseHeader {
    /// Header (type 1, echoed token).
    pub header: Header,
    /// Echoed protocol version.
    pub version: u16,
    /// Index of this packet.
    pub current_packet: u8,
    /// Index of the final packet.
    pub last_packet: u8,
    /// Bytes following this header.
    pub packet_length: u16,
}

impl QueryResponseHeader {
    fn write(&self, w: &mut PacketWriter) {
        self.header.write(w);
        w.write_u16(self.version);
        w.write_u8(self.current_packet);
        w.write_u8(self.last_packet);
        w.write_u16(self.packet_length);
    }

    fn read(r: &mut PacketReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            header: Header::read(r)?,
            version: r.read_u16()?,
            current_packet: r.read_u8()?,
            last_packet: r.read_u8()?,
            packet_length: r.read_u16()?,
        })
    }
}

/// Server info chunk body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfoData {
    /// Players currently connected.
    pub current_players: u16,
    /// Player capacity.
    pub max_players: u16,
    /// Server name.
    pub server_name: String,
    /// Game type.
    pub game_type: String,
    /// Build identifier.
    pub build_id: String,
    /// Map name.
    pub map: String,
    /// Game port.
    pub port: u16,
}

impl ServerInfoData {
    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        2 + 2
            + [&self.server_name, &self.game_type, &self.build_id, &self.map]
                .iter()
                .map(|s| 1 + s.len())
                .sum::<usize>()
            + 2
    }

    fn write(&self, w: &mut PacketWriter) -> Result<(), ProtocolError> {
        w.write_u16(self.current_players);
        w.write_u16(self.max_players);
        w.write_str(&self.server_name)?;
        w.write_str(&self.game_type)?;
        w.write_str(&self.build_id)?;
        w.write_str(&self.map)?;
        w.write_u16(self.port);
        Ok(())
    }

    fn read(r: &mut PacketReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            current_players: r.read_u16()?,
            max_players: r.read_u16()?,
            server_name: r.read_str()?,
            game_type: r.read_str()?,
            build_id: r.read_str()?,
            map: r.read_str()?,
            port: r.read_u16()?,
        })
    }
}

/// Full query response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    /// Response header.
    pub header: QueryResponseHeader,
    /// Server info chunk, present when requested.
    pub server_info: Option<ServerInfoData>,
}

impl QueryResponse {
    /// Answer `request`, echoing its version and token.
    ///
    /// `server_info` is only included when the request asked for it.
    pub fn answer(request: &QueryRequest, server_info: ServerInfoData) -> Self {
        let server_info = request.wants_server_info().then_some(server_info);
        let packet_length = server_info
            .as_ref()
            .map(|info| 4 + info.encoded_len())
            .unwrap_or(0);

        Self {
            header: QueryResponseHeader {
                header: Header {
                    message_type: MessageType::Query as u8,
                    challenge_token: request.header.challenge_token,
                },
                version: request.version,
                current_packet: 0,
                last_packet: 0,
                // ServerInfoData tops out well below u16::MAX
                packet_length: packet_length as u16,
            },
            server_info,
        }
    }

    /// Encode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut w = PacketWriter::with_capacity(
            QUERY_RESPONSE_HEADER_SIZE + self.header.packet_length as usize,
        );
        self.header.write(&mut w);

        if let Some(info) = &self.server_info {
            w.write_u32(info.encoded_len() as u32);
            info.write(&mut w)?;
        }

        Ok(w.into_bytes())
    }

    /// Decode. The server info chunk is read when `packet_length` is non-zero.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = PacketReader::new(data);
        let header = QueryResponseHeader::read(&mut r)?;

        let server_info = if header.packet_length > 0 {
            let _chunk_len = r.read_u32()?;
            Some(ServerInfoData::read(&mut r)?)
        } else {
            None
        };

        Ok(Self {
            header,
            server_info,
        })
    }
}
