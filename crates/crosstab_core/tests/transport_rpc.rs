use crosstab_core::clock::now_epoch_ms;
use crosstab_core::transport::{
    decode_frame, encode_frame, ChannelEndpoint, EndpointId, Frame, PushMessage, Reply, Transport,
    TransportError,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Both directions of one host <-> leaf channel.
struct Wire {
    /// The leaf as seen by the host.
    host_side: EndpointId,
    /// The host as seen by the leaf.
    leaf_side: EndpointId,
    to_host: UnboundedReceiver<Frame>,
    to_leaf: UnboundedReceiver<Frame>,
}

impl Wire {
    fn connect(host: &mut Transport, leaf: &mut Transport) -> Self {
        let (leaf_out, to_host) = ChannelEndpoint::pair();
        let (host_out, to_leaf) = ChannelEndpoint::pair();
        Self {
            host_side: host.connect(host_out),
            leaf_side: leaf.connect_upstream(leaf_out),
            to_host,
            to_leaf,
        }
    }

    fn deliver_to_host(&mut self, host: &mut Transport) -> usize {
        drain(&mut self.to_host, host, self.host_side)
    }

    fn deliver_to_leaf(&mut self, leaf: &mut Transport) -> usize {
        drain(&mut self.to_leaf, leaf, self.leaf_side)
    }
}

fn drain(inbox: &mut UnboundedReceiver<Frame>, target: &mut Transport, from: EndpointId) -> usize {
    let mut delivered = 0;
    while let Ok(frame) = inbox.try_recv() {
        target.receive(from, frame);
        delivered += 1;
    }
    delivered
}

/// Host whose handler defers every request and records it.
fn deferring_host(seen: &Arc<Mutex<Vec<(String, Value)>>>) -> Transport {
    let seen = seen.clone();
    let mut host = Transport::with_context_id("host");
    host.set_handler(move |_from: EndpointId, request_id: &str, payload: Value| {
        seen.lock().push((request_id.to_string(), payload));
        Reply::Deferred
    });
    host
}

#[test]
fn replies_in_reverse_order_settle_their_own_calls() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut host = deferring_host(&seen);
    let mut leaf = Transport::with_context_id("leaf");
    let mut wire = Wire::connect(&mut host, &mut leaf);

    let mut first = leaf.call(json!({"op": "dial"})).unwrap();
    let mut second = leaf.call(json!({"op": "hangup"})).unwrap();
    assert_eq!(first.request_id(), "leaf:1");
    assert_eq!(second.request_id(), "leaf:2");
    assert_eq!(wire.deliver_to_host(&mut host), 2);

    let requests = seen.lock().clone();
    assert_eq!(requests[0], ("leaf:1".to_string(), json!({"op": "dial"})));
    host.respond(wire.host_side, "leaf:2", Ok(json!("hung up")))
        .unwrap();
    host.respond(wire.host_side, "leaf:1", Ok(json!("dialing")))
        .unwrap();
    wire.deliver_to_leaf(&mut leaf);

    assert_eq!(second.try_result(), Some(Ok(json!("hung up"))));
    assert_eq!(first.try_result(), Some(Ok(json!("dialing"))));
    assert_eq!(leaf.pending_count(), 0);
}

#[test]
fn handler_replies_and_errors_reach_the_caller() {
    let mut host = Transport::with_context_id("host");
    host.set_handler(|_from: EndpointId, _id: &str, payload: Value| {
        match payload.get("n").and_then(Value::as_i64) {
            Some(n) => Reply::Ok(json!(n * 2)),
            None => Reply::Err(json!({"code": "bad_request"})),
        }
    });
    let mut leaf = Transport::with_context_id("leaf");
    let mut wire = Wire::connect(&mut host, &mut leaf);

    let mut doubled = leaf.call(json!({"n": 21})).unwrap();
    let mut rejected = leaf.call(json!({})).unwrap();
    wire.deliver_to_host(&mut host);
    wire.deliver_to_leaf(&mut leaf);

    assert_eq!(doubled.try_result(), Some(Ok(json!(42))));
    assert_eq!(
        rejected.try_result(),
        Some(Err(TransportError::Remote(json!({"code": "bad_request"}))))
    );
}

#[test]
fn duplicate_and_unknown_responses_are_ignored() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut host = deferring_host(&seen);
    let mut leaf = Transport::with_context_id("leaf");
    let mut wire = Wire::connect(&mut host, &mut leaf);

    let mut call = leaf.call(json!("ping")).unwrap();
    let mut untouched = leaf.call(json!("other")).unwrap();
    wire.deliver_to_host(&mut host);
    host.respond(wire.host_side, "leaf:1", Ok(json!("pong")))
        .unwrap();
    host.respond(wire.host_side, "leaf:1", Ok(json!("late duplicate")))
        .unwrap();
    host.respond(wire.host_side, "leaf:99", Ok(json!("unknown")))
        .unwrap();
    assert_eq!(wire.deliver_to_leaf(&mut leaf), 3);

    assert_eq!(call.try_result(), Some(Ok(json!("pong"))));
    assert_eq!(untouched.try_result(), None);
    assert_eq!(leaf.pending_count(), 1);
}

#[test]
fn response_from_another_endpoint_does_not_settle() {
    let mut leaf = Transport::with_context_id("leaf");
    let (upstream_out, _upstream_inbox) = ChannelEndpoint::pair();
    let (other_out, _other_inbox) = ChannelEndpoint::pair();
    let upstream = leaf.connect_upstream(upstream_out);
    let other = leaf.connect(other_out);

    let mut call = leaf.call(json!("q")).unwrap();
    leaf.receive(other, Frame::success("leaf:1", json!("spoofed")));
    assert_eq!(call.try_result(), None);

    leaf.receive(upstream, Frame::success("leaf:1", json!("real")));
    assert_eq!(call.try_result(), Some(Ok(json!("real"))));
}

#[test]
fn disconnect_fails_only_calls_sent_through_that_endpoint() {
    let mut leaf = Transport::with_context_id("leaf");
    let (host_out, _host_inbox) = ChannelEndpoint::pair();
    let (peer_out, _peer_inbox) = ChannelEndpoint::pair();
    let host = leaf.connect_upstream(host_out);
    let peer = leaf.connect(peer_out);

    let mut via_host = leaf.call(json!("a")).unwrap();
    let mut via_peer = leaf.call_on(peer, json!("b")).unwrap();

    assert_eq!(leaf.disconnect(host), 1);

    let err = via_host.try_result().unwrap().unwrap_err();
    assert_eq!(
        err,
        TransportError::Disconnected {
            request_id: "leaf:1".to_string()
        }
    );
    assert!(err.is_retryable());
    assert_eq!(via_peer.try_result(), None);
    assert_eq!(leaf.upstream(), None);
    assert!(matches!(
        leaf.call(json!("retry")),
        Err(TransportError::NoUpstream)
    ));

    leaf.receive(peer, Frame::success("leaf:2", Value::Null));
    assert_eq!(via_peer.try_result(), Some(Ok(Value::Null)));
}

#[test]
fn push_fans_out_to_every_live_endpoint() {
    let mut host = Transport::with_context_id("host");
    let mut left = Transport::with_context_id("left");
    let mut right = Transport::with_context_id("right");
    let mut left_wire = Wire::connect(&mut host, &mut left);
    let right_wire = Wire::connect(&mut host, &mut right);
    let mut left_pushes = left.subscribe_pushes();

    assert_eq!(host.push(json!({"event": "incoming_call"})), 2);
    left_wire.deliver_to_leaf(&mut left);
    assert_eq!(
        left_pushes.try_recv().unwrap(),
        PushMessage {
            from: left_wire.leaf_side,
            payload: json!({"event": "incoming_call"})
        }
    );

    drop(right_wire);
    assert_eq!(host.push(json!({"event": "ended"})), 1);
}

#[test]
fn expired_calls_are_rejected_on_request() {
    let mut leaf = Transport::with_context_id("leaf");
    let (out, _inbox) = ChannelEndpoint::pair();
    leaf.connect_upstream(out);

    let mut stale = leaf.call(json!("slow")).unwrap();
    assert_eq!(leaf.fail_expired(now_epoch_ms(), 60_000), 0);
    assert_eq!(leaf.fail_expired(now_epoch_ms() + 120_000, 60_000), 1);

    assert_eq!(
        stale.try_result(),
        Some(Err(TransportError::Expired {
            request_id: "leaf:1".to_string()
        }))
    );
}

#[test]
fn frames_survive_a_string_channel() {
    let raw = encode_frame(&Frame::request("ctx:7", json!({"op": "mute"}))).unwrap();
    let parsed: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(
        parsed,
        json!({"type": "request", "requestId": "ctx:7", "payload": {"op": "mute"}})
    );

    let response = decode_frame(r#"{"type":"response","requestId":"ctx:7","result":null}"#).unwrap();
    assert_eq!(response.request_id(), Some("ctx:7"));
    assert!(matches!(
        decode_frame(r#"{"type":"gossip"}"#),
        Err(TransportError::Codec(_))
    ));
}

#[tokio::test]
async fn pending_call_can_be_awaited() {
    let mut host = Transport::with_context_id("host");
    host.set_handler(|_from: EndpointId, _id: &str, payload: Value| Reply::Ok(payload));
    let mut leaf = Transport::with_context_id("leaf");
    let mut wire = Wire::connect(&mut host, &mut leaf);

    let call = leaf.call(json!({"echo": true})).unwrap();
    wire.deliver_to_host(&mut host);
    wire.deliver_to_leaf(&mut leaf);

    assert_eq!(call.wait().await, Ok(json!({"echo": true})));
}

#[tokio::test]
async fn dropping_the_transport_rejects_waiting_calls() {
    let mut leaf = Transport::with_context_id("leaf");
    let (out, _inbox) = ChannelEndpoint::pair();
    leaf.connect_upstream(out);
    let call = leaf.call(json!("never answered")).unwrap();

    drop(leaf);

    assert_eq!(call.wait().await, Err(TransportError::Dropped));
}
