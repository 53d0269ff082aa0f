//! server.json Parsing
//!
//! The hosting platform writes `server.json` into the server's home directory
//! before launch. Numeric fields may be JSON integers or strings holding an
//! integer, depending on which control plane produced the file.

use serde::{de, Deserialize, Deserializer};

/// Raw contents of `server.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerJson {
    /// Server identifier.
    #[serde(rename = "serverID", deserialize_with = "flexible_i64")]
    pub server_id: i64,
    /// Allocation identifier, kept verbatim.
    #[serde(rename = "allocatedUUID")]
    pub allocation_id: String,
    /// Server Query Protocol port.
    #[serde(rename = "queryPort", deserialize_with = "flexible_port")]
    pub query_port: u16,
    /// Game connection port.
    #[serde(rename = "port", deserialize_with = "flexible_port")]
    pub port: u16,
    /// Directory logs should be written to.
    #[serde(rename = "serverLogDir")]
    pub server_log_directory: String,
}

impl ServerJson {
    /// Parse `server.json` contents.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntOrString {
    Str(String),
    Int(i64),
}

fn flexible_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match IntOrString::deserialize(deserializer)? {
        IntOrString::Int(value) => Ok(value),
        IntOrString::Str(s) => parse_c_integer(&s)
            .ok_or_else(|| de::Error::custom(format!("invalid integer string {:?}", s))),
    }
}

fn flexible_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let value = flexible_i64(deserializer)?;
    u16::try_from(value).map_err(|_| de::Error::custom(format!("port {} out of range", value)))
}

/// Parse an integer string the way `strtoll(s, &end, 0)` does, requiring the
/// whole string to be consumed.
///
/// Accepts leading whitespace, an optional sign, `0x`/`0X` for hex and a
/// leading `0` for octal.
pub fn parse_c_integer(s: &str) -> Option<i64> {
    let trimmed = s.trim_start();

    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let (radix, digits) = if rest.starts_with("0x") || rest.starts_with("0X") {
        (16, &rest[2..])
    } else if rest.len() > 1 && rest.starts_with('0') {
        (8, &rest[1..])
    } else {
        (10, rest)
    };

    // from_str_radix tolerates its own leading sign
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }

    let magnitude = u64::from_str_radix(digits, radix).ok()?;

    if negative {
        if magnitude == 1u64 << 63 {
            Some(i64::MIN)
        } else {
            i64::try_from(magnitude).ok().map(|v| -v)
        }
    } else {
        i64::try_from(magnitude).ok()
    }
}
