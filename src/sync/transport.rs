use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, header};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use crate::{config::SyncConfig, op::Operation, op::Session};

/// Request body of the batch endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationBatch {
    /// Squashed operations in send order.
    pub operations: Vec<Operation>,
}

/// Per-operation failure reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    /// HTTP-style status.
    pub status: u16,
    /// Server message.
    #[serde(default)]
    pub message: String,
}

/// One entry of a structured batch response: the original operation plus an
/// optional error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    /// The operation as sent.
    #[serde(flatten)]
    pub operation: Operation,
    /// Present when this operation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
}

/// Outcome of a batch that reached the server.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchResponse {
    /// Every operation was applied.
    Accepted,
    /// The server enumerated per-operation results.
    Partial(Vec<OperationResult>),
}

/// Failure to get a usable answer from the server.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be sent or the connection dropped.
    #[error("error in request: {0}")]
    Request(String),
    /// Non-success status without per-operation results.
    #[error("unexpected status: {0}")]
    Status(u16),
    /// No answer within the client-side timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The response body could not be decoded.
    #[error("unexpected response content: {0}")]
    Decode(String),
}

/// Remote batch endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `batch` on behalf of `session`.
    async fn send(
        &self,
        batch: &OperationBatch,
        session: &Session,
    ) -> Result<BatchResponse, TransportError>;
}

#[derive(Deserialize)]
struct PartialBody {
    operations: Vec<OperationResult>,
}

/// [`Transport`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpTransport {
    /// Transport for `config.base_url`.
    pub fn new(config: &SyncConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Transport reusing an existing client.
    pub fn with_client(client: reqwest::Client, config: &SyncConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout(),
        }
    }

    /// Fetches the server status document, giving up after the configured
    /// request timeout.
    ///
    /// The batch send is never timed out this way; only data fetches are.
    pub async fn get_status(&self) -> Result<JsonValue, TransportError> {
        let url = format!("{}/", self.base_url);
        let request = async {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|err| TransportError::Request(format!("{err}")))?;
            if !response.status().is_success() {
                return Err(TransportError::Status(response.status().as_u16()));
            }
            response
                .json::<JsonValue>()
                .await
                .map_err(|err| TransportError::Decode(format!("{err}")))
        };

        tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| TransportError::Timeout(self.request_timeout))?
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        batch: &OperationBatch,
        session: &Session,
    ) -> Result<BatchResponse, TransportError> {
        let mut request = self
            .client
            .post(format!("{}/operations", self.base_url))
            .header("User-Id", session.user_id.as_str())
            .json(batch);
        if let Some(key) = session.api_key.as_deref() {
            request = request.header(header::AUTHORIZATION, key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| TransportError::Request(format!("{err}")))?;

        let status = response.status();
        if status.is_success() {
            debug!(count = batch.operations.len(), "operations ok");
            return Ok(BatchResponse::Accepted);
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError::Request(format!("{err}")))?;
        partial_from_body(status, &body)
    }
}

fn partial_from_body(status: StatusCode, body: &[u8]) -> Result<BatchResponse, TransportError> {
    match serde_json::from_slice::<PartialBody>(body) {
        Ok(parsed) => Ok(BatchResponse::Partial(parsed.operations)),
        Err(_) => Err(TransportError::Status(status.as_u16())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_error_body_becomes_partial() {
        let body = serde_json::json!({
            "operations": [
                {
                    "name": "removeCard",
                    "body": { "id": "c1" },
                    "operationId": "op-1",
                    "spaceId": "s",
                    "userId": "u",
                    "clientCreatedAt": 3,
                    "error": { "status": 404, "message": "not found" }
                },
                {
                    "name": "removeCard",
                    "body": { "id": "c2" },
                    "operationId": "op-2",
                    "spaceId": "s",
                    "userId": "u",
                    "clientCreatedAt": 3
                }
            ]
        });
        let bytes = serde_json::to_vec(&body).expect("encode");
        let BatchResponse::Partial(results) =
            partial_from_body(StatusCode::BAD_REQUEST, &bytes).expect("partial")
        else {
            panic!("expected partial response");
        };
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].error.as_ref().map(|e| e.status), Some(404));
        assert_eq!(results[1].operation.operation_id, "op-2");
        assert!(results[1].error.is_none());
    }

    #[test]
    fn unstructured_error_body_is_a_status_error() {
        let err = partial_from_body(StatusCode::BAD_GATEWAY, b"<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, TransportError::Status(502)));
    }
}
