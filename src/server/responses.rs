//! Public Response Types
//!
//! Values handed to game code: allocation notifications and the bodies the
//! SDK daemon returns from its HTTP API.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::events::EventBody;

/// The server was allocated to a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    /// Hyphenated event id.
    pub event_id: String,
    /// Server id.
    pub server_id: i64,
    /// Hyphenated allocation id.
    pub allocation_id: String,
}

/// The server's allocation ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deallocation {
    /// Hyphenated event id.
    pub event_id: String,
    /// Server id.
    pub server_id: i64,
    /// Hyphenated allocation id.
    pub allocation_id: String,
}

impl From<&EventBody> for Allocation {
    fn from(body: &EventBody) -> Self {
        Self {
            event_id: body.event_id.to_string(),
            server_id: body.server_id,
            allocation_id: body.allocation_id.to_string(),
        }
    }
}

impl From<&EventBody> for Deallocation {
    fn from(body: &EventBody) -> Self {
        Self {
            event_id: body.event_id.to_string(),
            server_id: body.server_id,
            allocation_id: body.allocation_id.to_string(),
        }
    }
}

/// Allocation lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerLifecycleEvent {
    /// Server allocated.
    Allocate(Allocation),
    /// Server deallocated.
    Deallocate(Deallocation),
}

/// Failure body of the ready/unready endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{status} {title}: {detail}")]
pub struct ErrorResponse {
    /// HTTP-style status code. 0 when no response was received.
    pub status: i32,
    /// Human-readable detail.
    pub detail: String,
    /// Short title.
    pub title: String,
}

/// Failure body of the payload allocation endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("payload allocation failed ({error_code}): {error_message}")]
pub struct PayloadAllocationErrorResponse {
    /// Always false on failure.
    pub success: bool,
    /// Always true on failure.
    pub error: bool,
    /// Error code. 0 when no response was received.
    #[serde(rename = "errorCode")]
    pub error_code: i32,
    /// Error text.
    #[serde(rename = "errorMessage")]
    pub error_message: String,
}

/// Body of the payload token endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("payload token request failed: {error}")]
pub struct PayloadTokenResponse {
    /// Signed JWT.
    pub token: String,
    /// Error text, empty on success.
    #[serde(default)]
    pub error: String,
}

/// Claims carried in a payload token.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TokenClaims {
    /// Expiry (seconds since epoch).
    pub exp: Option<i64>,
    /// Issued-at (seconds since epoch).
    pub iat: Option<i64>,
    /// Subject.
    pub sub: Option<String>,
    /// All other claims.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PayloadTokenResponse {
    /// Decode the token's claims without verifying its signature or expiry.
    ///
    /// The daemon is local and trusted; this is for reading fields, not for
    /// authenticating the token.
    pub fn claims(&self) -> Result<TokenClaims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<TokenClaims>(&self.token, &DecodingKey::from_secret(&[]), &validation)?;
        Ok(data.claims)
    }
}
