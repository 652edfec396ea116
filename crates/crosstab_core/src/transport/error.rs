//! Transport errors.

use crate::transport::endpoint::EndpointId;
use serde_json::Value;
use thiserror::Error;

pub type TransportResult<T> = Result<T, TransportError>;

/// Errors returned to the specific caller; never broadcast.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// The endpoint that would carry the response went away. Retry by
    /// issuing a new call.
    #[error("transport disconnected before response to {request_id}")]
    Disconnected { request_id: String },
    #[error("remote handler returned an error: {0}")]
    Remote(Value),
    #[error("request {request_id} expired without a response")]
    Expired { request_id: String },
    #[error("no upstream endpoint connected")]
    NoUpstream,
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(EndpointId),
    #[error("endpoint {0} is closed")]
    EndpointClosed(EndpointId),
    #[error("no pending request {0}")]
    UnknownRequest(String),
    #[error("transport dropped before the call settled")]
    Dropped,
    #[error("frame codec error: {0}")]
    Codec(String),
}

impl TransportError {
    /// Whether issuing the same call again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Disconnected { .. } | Self::Expired { .. } | Self::EndpointClosed(_)
        )
    }
}
