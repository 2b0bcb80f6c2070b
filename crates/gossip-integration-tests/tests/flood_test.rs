//! End-to-end flood tests over the in-memory network.
//!
//! Covers:
//! 1. Two-hop delivery with origin exclusion
//! 2. Exactly-once delivery across a ring
//! 3. Forged and malformed traffic
//! 4. Handshake-driven peer discovery

use onion_gossip::{
    Envelope, GossipConfig, GossipEngine, Identity, MemoryNetwork, PeerAddress, serve,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;
use tokio::task::JoinHandle;

// ============================================================================
// Helper Functions
// ============================================================================

struct Node {
    engine: Arc<GossipEngine>,
    address: PeerAddress,
    _server: JoinHandle<()>,
}

async fn spawn_node(network: &MemoryNetwork, config: &GossipConfig) -> Node {
    let (transport, inbox) = network.endpoint();
    let engine = Arc::new(GossipEngine::new(config.clone(), Arc::new(transport)).unwrap());
    let address = engine.start().await.unwrap();
    let server = serve(Arc::clone(&engine), inbox);
    Node {
        engine,
        address,
        _server: server,
    }
}

fn fast_config() -> GossipConfig {
    GossipConfig::default().with_retry(3, Duration::from_millis(10))
}

async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

fn drain(rx: &mut Receiver<Envelope>) -> Vec<Envelope> {
    let mut out = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        out.push(envelope);
    }
    out
}

fn carries(body: &[u8], id: &str) -> bool {
    Envelope::decode(body).is_ok_and(|e| e.id() == id)
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test]
async fn message_crosses_two_hops_without_returning_to_origin() {
    let network = MemoryNetwork::new();
    let config = fast_config();
    let a = spawn_node(&network, &config).await;
    let b = spawn_node(&network, &config).await;
    let c = spawn_node(&network, &config).await;

    a.engine.ping_peer(b.address.as_str()).await.unwrap();
    b.engine.ping_peer(c.address.as_str()).await.unwrap();
    eventually(|| b.engine.peers().contains(&a.address)).await;
    eventually(|| c.engine.peers().contains(&b.address)).await;

    let mut b_messages = b.engine.subscribe_messages();
    let mut c_messages = c.engine.subscribe_messages();

    let envelope = a.engine.publish("chat", "hi").unwrap();
    eventually(|| c.engine.stats().delivered == 1).await;
    settle().await;

    let at_b = drain(&mut b_messages);
    assert_eq!(at_b.len(), 1);
    assert_eq!(at_b[0].payload(), "hi");
    assert_eq!(at_b[0].origin(), a.address.as_str());
    assert_eq!(drain(&mut c_messages).len(), 1);

    // Nobody forwards the message back to its origin.
    assert!(
        network
            .sent_to(&a.address)
            .iter()
            .all(|r| !carries(&r.body, envelope.id()))
    );
}

#[tokio::test]
async fn ring_delivers_exactly_once_everywhere() {
    let network = MemoryNetwork::new();
    let config = fast_config();
    let mut nodes = Vec::new();
    for _ in 0..6 {
        nodes.push(spawn_node(&network, &config).await);
    }
    for i in 0..nodes.len() {
        let next = nodes[(i + 1) % nodes.len()].address.clone();
        nodes[i].engine.ping_peer(next.as_str()).await.unwrap();
    }
    settle().await;

    let mut subscribers: Vec<_> = nodes.iter().map(|n| n.engine.subscribe_messages()).collect();
    let envelope = nodes[0].engine.publish("chat", "ring").unwrap();

    eventually(|| nodes[1..].iter().all(|n| n.engine.stats().delivered == 1)).await;
    settle().await;

    for (i, rx) in subscribers.iter_mut().enumerate() {
        let got = drain(rx);
        if i == 0 {
            assert!(got.is_empty(), "origin must not deliver its own message");
        } else {
            assert_eq!(got.len(), 1, "node {i}");
            assert_eq!(got[0].id(), envelope.id());
        }
    }
}

#[tokio::test]
async fn redelivered_body_is_ingested_once() {
    let network = MemoryNetwork::new();
    let config = fast_config();
    let a = spawn_node(&network, &config).await;
    let b = spawn_node(&network, &config).await;
    a.engine.add_peer(b.address.as_str()).unwrap();

    let mut messages = b.engine.subscribe_messages();
    let envelope = a.engine.publish("chat", "once").unwrap();
    eventually(|| b.engine.stats().delivered == 1).await;

    let body = envelope.encode().unwrap();
    b.engine.on_envelope_received(&body);
    b.engine.on_envelope_received(&body);

    assert_eq!(drain(&mut messages).len(), 1);
    assert_eq!(b.engine.stats().duplicates, 2);
}

// ============================================================================
// Hostile Input
// ============================================================================

#[tokio::test]
async fn tampered_payload_is_rejected_without_side_effects() {
    let network = MemoryNetwork::new();
    let config = fast_config();
    let b = spawn_node(&network, &config).await;
    let c = spawn_node(&network, &config).await;
    b.engine.add_peer(c.address.as_str()).unwrap();

    let origin = PeerAddress::random();
    let genuine = Envelope::signed("chat", "pay alice", &origin, &Identity::generate());
    let mut wire: serde_json::Value = serde_json::from_slice(&genuine.encode().unwrap()).unwrap();
    wire["payload"] = serde_json::Value::from("pay mallory");
    let forged = serde_json::to_vec(&wire).unwrap();

    let mut messages = b.engine.subscribe_messages();
    b.engine.on_envelope_received(&forged);
    settle().await;

    assert!(drain(&mut messages).is_empty());
    assert!(!b.engine.peers().contains(&origin));
    assert!(network.sent_from(&b.address).is_empty());
    assert_eq!(b.engine.stats().rejected, 1);

    // The genuine envelope still goes through afterwards.
    b.engine.on_envelope_received(&genuine.encode().unwrap());
    assert_eq!(drain(&mut messages).len(), 1);
    assert!(b.engine.peers().contains(&origin));
}

#[tokio::test]
async fn envelope_signed_by_another_key_is_rejected() {
    let network = MemoryNetwork::new();
    let b = spawn_node(&network, &fast_config()).await;

    let origin = PeerAddress::random();
    let genuine = Envelope::signed("chat", "hi", &origin, &Identity::generate());
    let imposter = Envelope::signed("chat", "hi", &origin, &Identity::generate());

    let mut wire: serde_json::Value = serde_json::from_slice(&genuine.encode().unwrap()).unwrap();
    wire["senderPub"] = serde_json::Value::from(imposter.sender_pub());
    b.engine
        .on_envelope_received(&serde_json::to_vec(&wire).unwrap());

    assert_eq!(b.engine.stats().rejected, 1);
    assert_eq!(b.engine.stats().delivered, 0);
}

#[tokio::test]
async fn malformed_bodies_are_acknowledged_and_dropped() {
    let network = MemoryNetwork::new();
    let a = spawn_node(&network, &fast_config()).await;
    let b = spawn_node(&network, &fast_config()).await;

    let (probe, _inbox) = network.endpoint();
    for body in [&b"garbage"[..], &br#"{"id": 7}"#[..], &b"[]"[..]] {
        let status = onion_gossip::Transport::send_envelope(&probe, &b.address, body.to_vec())
            .await
            .unwrap();
        assert!(status.is_success());
    }

    eventually(|| b.engine.stats().rejected == 3).await;
    assert!(b.engine.peers().is_empty());
    assert!(a.engine.peers().is_empty());
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn handshake_introduces_both_sides() {
    let network = MemoryNetwork::new();
    let a = spawn_node(&network, &fast_config()).await;
    let b = spawn_node(&network, &fast_config()).await;

    let mut b_messages = b.engine.subscribe_messages();
    a.engine
        .ping_peer(&format!("http://{}:80/", b.address))
        .await
        .unwrap();

    assert_eq!(a.engine.peers(), vec![b.address.clone()]);
    eventually(|| b.engine.peers() == vec![a.address.clone()]).await;
    assert!(drain(&mut b_messages).is_empty());
}

#[tokio::test]
async fn delivered_message_registers_unknown_origin() {
    let network = MemoryNetwork::new();
    let a = spawn_node(&network, &fast_config()).await;
    let b = spawn_node(&network, &fast_config()).await;
    a.engine.add_peer(b.address.as_str()).unwrap();

    a.engine.publish("chat", "hello").unwrap();
    eventually(|| b.engine.peers().contains(&a.address)).await;
}
