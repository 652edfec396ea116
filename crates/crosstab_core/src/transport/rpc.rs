//! Cross-context request/response correlation and push fan-out.
//!
//! # Responsibility
//! - Allocate request ids and track one pending record per outstanding call.
//! - Settle a call only from the endpoint that carried its request.
//! - Fail in-flight calls when their endpoint disconnects.
//! - Fan push frames out to every connected endpoint, best-effort.
//!
//! # Invariants
//! - At most one pending record exists per request id.
//! - Responses with unknown or already-settled ids are discarded.
//! - No ordering is implied between calls; each settles independently.

use crate::clock::now_epoch_ms;
use crate::transport::endpoint::{Endpoint, EndpointId};
use crate::transport::error::{TransportError, TransportResult};
use crate::transport::frame::Frame;
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

const DEFAULT_PUSH_CAPACITY: usize = 64;

pub type CallResult = TransportResult<Value>;

/// Bookkeeping for one outstanding call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub request_id: String,
    pub origin_endpoint: EndpointId,
    pub created_at_ms: u64,
}

struct Outstanding {
    record: PendingRequest,
    reply: oneshot::Sender<CallResult>,
}

/// Deferred result of one call.
#[derive(Debug)]
#[must_use = "a call result is only observable through its PendingCall"]
pub struct PendingCall {
    request_id: String,
    receiver: oneshot::Receiver<CallResult>,
}

impl PendingCall {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Waits until the call settles.
    pub async fn wait(self) -> CallResult {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Dropped),
        }
    }

    /// Returns the result once it is available, without waiting.
    pub fn try_result(&mut self) -> Option<CallResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(TransportError::Dropped)),
        }
    }
}

/// How a request handler answers one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok(Value),
    Err(Value),
    /// The handler answers later through `Transport::respond`.
    Deferred,
}

/// Serves requests received from peer contexts.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, from: EndpointId, request_id: &str, payload: Value) -> Reply;
}

impl<F> RequestHandler for F
where
    F: Fn(EndpointId, &str, Value) -> Reply + Send + Sync,
{
    fn handle(&self, from: EndpointId, request_id: &str, payload: Value) -> Reply {
        self(from, request_id, payload)
    }
}

/// Push payload received from a peer.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub from: EndpointId,
    pub payload: Value,
}

/// Transport for one execution context.
pub struct Transport {
    context_id: String,
    next_request: u64,
    next_endpoint: u64,
    endpoints: BTreeMap<EndpointId, Box<dyn Endpoint>>,
    upstream: Option<EndpointId>,
    pending: HashMap<String, Outstanding>,
    handler: Option<Box<dyn RequestHandler>>,
    pushes: broadcast::Sender<PushMessage>,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    /// Creates a transport with a fresh random context id.
    pub fn new() -> Self {
        Self::with_context_id(Uuid::new_v4().to_string())
    }

    /// Creates a transport whose request ids are prefixed by `context_id`.
    pub fn with_context_id(context_id: impl Into<String>) -> Self {
        let (pushes, _) = broadcast::channel(DEFAULT_PUSH_CAPACITY);
        Self {
            context_id: context_id.into(),
            next_request: 0,
            next_endpoint: 0,
            endpoints: BTreeMap::new(),
            upstream: None,
            pending: HashMap::new(),
            handler: None,
            pushes,
        }
    }

    /// Replaces the push subscription buffer size.
    pub fn with_push_capacity(mut self, capacity: usize) -> Self {
        let (pushes, _) = broadcast::channel(capacity.max(1));
        self.pushes = pushes;
        self
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Installs the handler that serves inbound requests.
    pub fn set_handler(&mut self, handler: impl RequestHandler + 'static) {
        self.handler = Some(Box::new(handler));
    }

    /// Adds a downstream peer endpoint.
    pub fn connect(&mut self, endpoint: impl Endpoint + 'static) -> EndpointId {
        self.next_endpoint += 1;
        let id = EndpointId(self.next_endpoint);
        self.endpoints.insert(id, Box::new(endpoint));
        info!(
            "event=endpoint_connect module=transport status=ok context={} endpoint={id}",
            self.context_id
        );
        id
    }

    /// Adds the endpoint that `call` uses, e.g. a leaf's link to the host.
    pub fn connect_upstream(&mut self, endpoint: impl Endpoint + 'static) -> EndpointId {
        let id = self.connect(endpoint);
        self.upstream = Some(id);
        id
    }

    pub fn upstream(&self) -> Option<EndpointId> {
        self.upstream
    }

    pub fn endpoint_ids(&self) -> Vec<EndpointId> {
        self.endpoints.keys().copied().collect()
    }

    pub fn is_connected(&self, endpoint: EndpointId) -> bool {
        self.endpoints.contains_key(&endpoint)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Pending records sorted by request id.
    pub fn pending_requests(&self) -> Vec<PendingRequest> {
        let mut records: Vec<PendingRequest> = self
            .pending
            .values()
            .map(|outstanding| outstanding.record.clone())
            .collect();
        records.sort_by(|left, right| left.request_id.cmp(&right.request_id));
        records
    }

    /// Removes an endpoint and fails every call that was sent through it.
    ///
    /// Returns how many calls were failed.
    pub fn disconnect(&mut self, endpoint: EndpointId) -> usize {
        if self.endpoints.remove(&endpoint).is_none() {
            return 0;
        }
        if self.upstream == Some(endpoint) {
            self.upstream = None;
        }

        let orphaned: Vec<String> = self
            .pending
            .values()
            .filter(|outstanding| outstanding.record.origin_endpoint == endpoint)
            .map(|outstanding| outstanding.record.request_id.clone())
            .collect();
        for request_id in &orphaned {
            if let Some(outstanding) = self.pending.remove(request_id) {
                let _ = outstanding.reply.send(Err(TransportError::Disconnected {
                    request_id: request_id.clone(),
                }));
            }
        }

        info!(
            "event=endpoint_disconnect module=transport status=ok context={} endpoint={endpoint} failed_calls={}",
            self.context_id,
            orphaned.len()
        );
        orphaned.len()
    }

    /// Sends a request over the upstream endpoint.
    pub fn call(&mut self, payload: Value) -> TransportResult<PendingCall> {
        let upstream = self.upstream.ok_or(TransportError::NoUpstream)?;
        self.call_on(upstream, payload)
    }

    /// Sends a request over a specific endpoint.
    pub fn call_on(&mut self, endpoint: EndpointId, payload: Value) -> TransportResult<PendingCall> {
        let Some(link) = self.endpoints.get(&endpoint) else {
            return Err(TransportError::UnknownEndpoint(endpoint));
        };

        self.next_request += 1;
        let request_id = format!("{}:{}", self.context_id, self.next_request);
        if !link.send(Frame::request(request_id.clone(), payload)) {
            warn!(
                "event=rpc_call module=transport status=error context={} endpoint={endpoint} request_id={request_id} error_code=endpoint_closed",
                self.context_id
            );
            return Err(TransportError::EndpointClosed(endpoint));
        }

        let (reply, receiver) = oneshot::channel();
        self.pending.insert(
            request_id.clone(),
            Outstanding {
                record: PendingRequest {
                    request_id: request_id.clone(),
                    origin_endpoint: endpoint,
                    created_at_ms: now_epoch_ms(),
                },
                reply,
            },
        );
        debug!(
            "event=rpc_call module=transport status=sent context={} endpoint={endpoint} request_id={request_id}",
            self.context_id
        );
        Ok(PendingCall {
            request_id,
            receiver,
        })
    }

    /// Sends a push frame to every connected endpoint.
    ///
    /// Returns how many endpoints accepted the frame.
    pub fn push(&self, payload: Value) -> usize {
        let mut delivered = 0;
        for (id, endpoint) in &self.endpoints {
            if endpoint.send(Frame::push(payload.clone())) {
                delivered += 1;
            } else {
                warn!(
                    "event=push module=transport status=dropped context={} endpoint={id}",
                    self.context_id
                );
            }
        }
        delivered
    }

    /// Subscribes to push payloads received from peers.
    pub fn subscribe_pushes(&self) -> broadcast::Receiver<PushMessage> {
        self.pushes.subscribe()
    }

    /// Answers a request that the handler deferred.
    pub fn respond(
        &self,
        endpoint: EndpointId,
        request_id: &str,
        result: Result<Value, Value>,
    ) -> TransportResult<()> {
        let link = self
            .endpoints
            .get(&endpoint)
            .ok_or(TransportError::UnknownEndpoint(endpoint))?;
        let frame = match result {
            Ok(value) => Frame::success(request_id, value),
            Err(error) => Frame::failure(request_id, error),
        };
        if link.send(frame) {
            Ok(())
        } else {
            Err(TransportError::EndpointClosed(endpoint))
        }
    }

    /// Feeds one inbound frame received from `from`.
    pub fn receive(&mut self, from: EndpointId, frame: Frame) {
        if !self.endpoints.contains_key(&from) {
            debug!(
                "event=frame_receive module=transport status=discarded context={} endpoint={from} kind={} reason=unknown_endpoint",
                self.context_id,
                frame.kind()
            );
            return;
        }

        match frame {
            Frame::Request {
                request_id,
                payload,
            } => self.serve(from, &request_id, payload),
            Frame::Response {
                request_id,
                result,
                error,
            } => {
                let outcome = match error {
                    Some(error) => Err(TransportError::Remote(error)),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                self.settle(from, &request_id, outcome);
            }
            Frame::Push { payload } => {
                let _ = self.pushes.send(PushMessage { from, payload });
            }
        }
    }

    /// Rejects calls older than `max_age_ms` with `TransportError::Expired`.
    ///
    /// The transport never expires calls on its own; callers decide when to
    /// sweep. Returns how many calls were rejected.
    pub fn fail_expired(&mut self, now_ms: u64, max_age_ms: u64) -> usize {
        let expired: Vec<String> = self
            .pending
            .values()
            .filter(|outstanding| now_ms.saturating_sub(outstanding.record.created_at_ms) > max_age_ms)
            .map(|outstanding| outstanding.record.request_id.clone())
            .collect();
        for request_id in &expired {
            if let Some(outstanding) = self.pending.remove(request_id) {
                let _ = outstanding.reply.send(Err(TransportError::Expired {
                    request_id: request_id.clone(),
                }));
            }
        }
        if !expired.is_empty() {
            info!(
                "event=rpc_expire module=transport status=ok context={} expired={}",
                self.context_id,
                expired.len()
            );
        }
        expired.len()
    }

    fn serve(&self, from: EndpointId, request_id: &str, payload: Value) {
        let reply = match &self.handler {
            Some(handler) => handler.handle(from, request_id, payload),
            None => Reply::Err(Value::String("no request handler registered".to_string())),
        };
        let result = match reply {
            Reply::Ok(value) => Ok(value),
            Reply::Err(error) => Err(error),
            Reply::Deferred => return,
        };
        if let Err(err) = self.respond(from, request_id, result) {
            warn!(
                "event=rpc_respond module=transport status=error context={} endpoint={from} request_id={request_id} error={err}",
                self.context_id
            );
        }
    }

    fn settle(&mut self, from: EndpointId, request_id: &str, outcome: CallResult) {
        let owned_by_sender = self
            .pending
            .get(request_id)
            .is_some_and(|outstanding| outstanding.record.origin_endpoint == from);
        if !owned_by_sender {
            debug!(
                "event=rpc_response module=transport status=discarded context={} endpoint={from} request_id={request_id}",
                self.context_id
            );
            return;
        }

        if let Some(outstanding) = self.pending.remove(request_id) {
            debug!(
                "event=rpc_response module=transport status=settled context={} endpoint={from} request_id={request_id}",
                self.context_id
            );
            // The caller may have dropped its PendingCall.
            let _ = outstanding.reply.send(outcome);
        }
    }
}
