//! Channel endpoints to peer contexts.

use crate::transport::frame::Frame;
use std::fmt::{Display, Formatter};
use tokio::sync::mpsc;

/// Identifier assigned by the transport when an endpoint connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointId(pub(crate) u64);

impl EndpointId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for EndpointId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ep-{}", self.0)
    }
}

/// Outbound half of a live bidirectional channel to one peer context.
///
/// Inbound frames are fed to the transport by whoever owns the receiving
/// half, through `Transport::receive`.
pub trait Endpoint: Send + Sync {
    /// Sends one frame; returns `false` when the peer is gone.
    fn send(&self, frame: Frame) -> bool;
}

/// Endpoint backed by an in-process tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelEndpoint {
    sender: mpsc::UnboundedSender<Frame>,
}

impl ChannelEndpoint {
    /// Creates an endpoint and the receiver that observes what it sends.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Endpoint for ChannelEndpoint {
    fn send(&self, frame: Frame) -> bool {
        self.sender.send(frame).is_ok()
    }
}
