//! Cross-context RPC and broadcast transport.
//!
//! Calls keep their asynchronous, failure-prone nature visible: every call
//! returns a [`PendingCall`] that may reject with
//! [`TransportError::Disconnected`].

mod endpoint;
mod error;
mod frame;
mod rpc;

pub use endpoint::{ChannelEndpoint, Endpoint, EndpointId};
pub use error::{TransportError, TransportResult};
pub use frame::{decode_frame, encode_frame, Frame};
pub use rpc::{
    CallResult, PendingCall, PendingRequest, PushMessage, Reply, RequestHandler, Transport,
};
