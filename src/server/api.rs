//! SDK Daemon HTTP API
//!
//! Ready/unready and payload endpoints of the local SDK daemon. Failure bodies
//! are mapped onto the public response types, with fixed fallbacks when the
//! daemon's body cannot be read.

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use super::responses::{ErrorResponse, PayloadAllocationErrorResponse, PayloadTokenResponse};

/// Title used when a failure body cannot be read.
const PARSING_FAILED_TITLE: &str = "Parsing failed error";

#[derive(Serialize)]
struct ReadyServerBody {
    #[serde(rename = "allocationId")]
    allocation_id: Uuid,
}

/// Outcome of reading a response body as `T`.
enum BodyParse<T> {
    /// Body matched `T`.
    Parsed(T),
    /// Body is JSON of another shape.
    WrongShape,
    /// Body is not JSON.
    NotJson,
}

impl<T> BodyParse<T> {
    /// Verb used in fallback messages.
    fn failure_verb(&self) -> &'static str {
        match self {
            BodyParse::NotJson => "deserialize",
            _ => "parse",
        }
    }
}

fn parse_body<T: DeserializeOwned>(body: &str) -> BodyParse<T> {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => match serde_json::from_value(value) {
            Ok(parsed) => BodyParse::Parsed(parsed),
            Err(_) => BodyParse::WrongShape,
        },
        Err(_) => BodyParse::NotJson,
    }
}

/// Map a ready/unready failure body.
pub fn map_error_response(operation: &str, body: &str) -> ErrorResponse {
    match parse_body::<ErrorResponse>(body) {
        BodyParse::Parsed(response) => response,
        other => ErrorResponse {
            status: 500,
            detail: format!(
                "Failed to {} {} JSON response body on failure",
                other.failure_verb(),
                operation
            ),
            title: PARSING_FAILED_TITLE.to_string(),
        },
    }
}

/// Map a payload allocation failure body.
pub fn map_payload_allocation_error(body: &str) -> PayloadAllocationErrorResponse {
    match parse_body::<PayloadAllocationErrorResponse>(body) {
        BodyParse::Parsed(response) => response,
        other => PayloadAllocationErrorResponse {
            success: false,
            error: true,
            error_code: 500,
            error_message: format!(
                "Failed to {} JSON response body on failure",
                other.failure_verb()
            ),
        },
    }
}

/// Map a successful payload token body.
pub fn map_payload_token_success(body: &str) -> Result<PayloadTokenResponse, PayloadTokenResponse> {
    match parse_body::<PayloadTokenResponse>(body) {
        BodyParse::Parsed(response) => Ok(response),
        other => Err(PayloadTokenResponse {
            token: String::new(),
            error: format!(
                "Succeeded retrieving token but failed to {} the response",
                other.failure_verb()
            ),
        }),
    }
}

/// Map a payload token failure body.
pub fn map_payload_token_error(body: &str) -> PayloadTokenResponse {
    match parse_body::<PayloadTokenResponse>(body) {
        BodyParse::Parsed(response) => response,
        other => PayloadTokenResponse {
            token: String::new(),
            error: format!(
                "Failed to {} Json response body on failure",
                other.failure_verb()
            ),
        },
    }
}

/// Response status and body.
struct RawResponse {
    status: u16,
    success: bool,
    body: String,
}

/// Client for the SDK daemon's HTTP API.
#[derive(Debug, Clone)]
pub struct DaemonApi {
    http: Client,
    base_url: String,
}

impl DaemonApi {
    /// Create a client for `base_url` (for example `http://localhost:8086`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn execute(&self, request: RequestBuilder) -> Result<RawResponse, reqwest::Error> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(RawResponse {
            status: status.as_u16(),
            success: status.is_success(),
            body,
        })
    }

    fn log_failure(operation: &str, response: &RawResponse) {
        error!(
            "{}() was unsuccessful, response status code is '{}' and response body is '{}'",
            operation, response.status, response.body
        );
    }

    /// Mark the server ready to accept players.
    pub async fn ready_server(
        &self,
        server_id: i64,
        allocation_id: Uuid,
    ) -> Result<(), ErrorResponse> {
        let url = format!("{}/v1/server/{}/ready-for-players", self.base_url, server_id);
        let request = self.http.post(url).json(&ReadyServerBody { allocation_id });
        self.ready_request("ReadyServer", request).await
    }

    /// Mark the server as no longer accepting players.
    pub async fn unready_server(&self, server_id: i64) -> Result<(), ErrorResponse> {
        let url = format!("{}/v1/server/{}/ready-for-players", self.base_url, server_id);
        self.ready_request("UnreadyServer", self.http.delete(url)).await
    }

    async fn ready_request(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<(), ErrorResponse> {
        let response = self.execute(request).await.map_err(|e| {
            error!("{}() request failed: {}", operation, e);
            ErrorResponse {
                status: 0,
                detail: e.to_string(),
                title: format!("{} request failed", operation),
            }
        })?;

        if response.success {
            info!("{}() was successful", operation);
            return Ok(());
        }

        Self::log_failure(operation, &response);
        Err(map_error_response(operation, &response.body))
    }

    /// Fetch the allocation payload. Success returns the raw body.
    pub async fn payload_allocation(
        &self,
        allocation_id: Uuid,
    ) -> Result<String, PayloadAllocationErrorResponse> {
        let url = format!("{}/payload/{}", self.base_url, allocation_id);
        let response = self.execute(self.http.get(url)).await.map_err(|e| {
            error!("PayloadAllocation() request failed: {}", e);
            PayloadAllocationErrorResponse {
                success: false,
                error: true,
                error_code: 0,
                error_message: e.to_string(),
            }
        })?;

        if response.success {
            info!("PayloadAllocation() was successful");
            return Ok(response.body);
        }

        Self::log_failure("PayloadAllocation", &response);
        Err(map_payload_allocation_error(&response.body))
    }

    /// Fetch a payload token.
    pub async fn payload_token(&self) -> Result<PayloadTokenResponse, PayloadTokenResponse> {
        let url = format!("{}/token", self.base_url);
        let response = self.execute(self.http.get(url)).await.map_err(|e| {
            error!("PayloadToken() request failed: {}", e);
            PayloadTokenResponse {
                token: String::new(),
                error: e.to_string(),
            }
        })?;

        if response.success {
            info!("PayloadToken() was successful");
            return map_payload_token_success(&response.body);
        }

        Self::log_failure("PayloadToken", &response);
        Err(map_payload_token_error(&response.body))
    }
}
