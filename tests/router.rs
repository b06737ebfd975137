//! Router tests over the in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

use axcp_gateway::broker::{MemoryBroker, Published, decode_payload};
use axcp_gateway::core::{CLOSE_DECODE_ERROR, ErrorCode};
use axcp_gateway::envelope::{self, Envelope, PatchOp, TelemetryDatagram};
use axcp_gateway::privacy::BudgetPolicy;
use axcp_gateway::server::{GatewayConfig, GatewayConfigBuilder, MetricsRegistry, Router};
use axcp_gateway::transport::{
    FrameReader, FrameWriter, MemoryConnection, MemoryPeer, encode_telemetry,
};

const MAX_FRAME: usize = 1024 * 1024;

struct Harness {
    router: Router,
    broker: MemoryBroker,
}

impl Harness {
    fn new(config: GatewayConfig) -> Self {
        let broker = MemoryBroker::new();
        let metrics = MetricsRegistry::new().unwrap().gateway_metrics().clone();
        let router = Router::new(config, Arc::new(broker.clone()), metrics);
        Self { router, broker }
    }

    fn connect(&self, label: &str) -> MemoryPeer {
        let (conn, peer) = MemoryConnection::pair(label);
        let router = self.router.clone();
        tokio::spawn(async move {
            let _ = router.serve_connection(conn).await;
        });
        peer
    }
}

struct PeerStream {
    writer: FrameWriter<WriteHalf<DuplexStream>>,
    reader: FrameReader<ReadHalf<DuplexStream>>,
}

impl PeerStream {
    async fn open(peer: &MemoryPeer) -> Self {
        let (write, read) = peer.open_stream().await.unwrap();
        Self {
            writer: FrameWriter::new(write, MAX_FRAME),
            reader: FrameReader::new(read, MAX_FRAME),
        }
    }

    async fn request(&mut self, env: &Envelope) -> Envelope {
        self.writer.send_envelope(env).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), self.reader.next_envelope())
            .await
            .expect("reply timed out")
            .unwrap()
            .expect("stream ended without reply")
    }
}

async fn wait_for_publishes(broker: &MemoryBroker, prefix: &str, count: usize) -> Vec<Published> {
    for _ in 0..500 {
        let published = broker.published_under(prefix);
        if published.len() >= count {
            return published;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    broker.published_under(prefix)
}

fn policy(epsilon: f64, per_sample: f64) -> BudgetPolicy {
    let mut policy = BudgetPolicy::default();
    policy.wildcard_mut().epsilon = epsilon;
    policy.wildcard_mut().epsilon_per_sample = per_sample;
    policy
}

#[tokio::test]
async fn test_negotiation_picks_highest_common_profile() {
    let harness = Harness::new(
        GatewayConfigBuilder::new()
            .supported_profiles(0b1111)
            .minimum_profile(1)
            .build()
            .unwrap(),
    );
    let peer = harness.connect("peer-1");
    let mut stream = PeerStream::open(&peer).await;

    // Intersection 0b1011: the highest common bit is chosen, not an intermediate one.
    let reply = stream.request(&Envelope::negotiation("trace-1", 0b1011, 0)).await;
    assert_eq!(reply.outcome(), ErrorCode::Ok);
    assert_eq!(reply.profile, 3);
    assert_eq!(reply.trace_id, "trace-1");

    let local = reply.negotiate_request().unwrap();
    assert_eq!(local.supported, 0b1111);
    assert_eq!(local.minimum, 1);
}

#[tokio::test]
async fn test_failed_negotiation_can_be_retried() {
    let harness = Harness::new(
        GatewayConfigBuilder::new()
            .supported_profiles(0b0110)
            .minimum_profile(1)
            .build()
            .unwrap(),
    );
    let peer = harness.connect("peer-2");
    let mut stream = PeerStream::open(&peer).await;

    let reply = stream.request(&Envelope::negotiation("t", 0b0011, 2)).await;
    assert_eq!(reply.outcome(), ErrorCode::ProfileNegotiationFailed);

    let reply = stream.request(&Envelope::new("t", 0)).await;
    assert_eq!(reply.outcome(), ErrorCode::NotNegotiated);

    let reply = stream.request(&Envelope::negotiation("t", 0b0110, 0)).await;
    assert_eq!(reply.outcome(), ErrorCode::Ok);
    assert_eq!(reply.profile, 2);
}

#[tokio::test]
async fn test_envelope_validation_codes() {
    let harness = Harness::new(
        GatewayConfigBuilder::new()
            .supported_profiles(0b1011)
            .build()
            .unwrap(),
    );
    let peer = harness.connect("peer-3");
    let mut stream = PeerStream::open(&peer).await;

    let reply = stream.request(&Envelope::negotiation("t", 0b0111, 0)).await;
    assert_eq!(reply.profile, 1);

    assert_eq!(stream.request(&Envelope::new("t", 1)).await.outcome(), ErrorCode::Ok);
    assert_eq!(stream.request(&Envelope::new("t", 0)).await.outcome(), ErrorCode::Ok);
    assert_eq!(
        stream.request(&Envelope::new("t", 3)).await.outcome(),
        ErrorCode::ProfileMismatch
    );

    // Profile 3 session, envelope at profile 2 which the gateway lacks.
    let peer = harness.connect("peer-4");
    let mut stream = PeerStream::open(&peer).await;
    let reply = stream.request(&Envelope::negotiation("u", 0b1111, 0)).await;
    assert_eq!(reply.profile, 3);
    let reply = stream.request(&Envelope::new("u", 2)).await;
    assert_eq!(reply.outcome(), ErrorCode::ProfileUnsupported);
    assert_eq!(reply.profile, 3);
}

#[tokio::test]
async fn test_delta_merge_with_stale_op() {
    let harness = Harness::new(
        GatewayConfigBuilder::new()
            .default_profile(Some(1))
            .build()
            .unwrap(),
    );
    let session = harness.router.open_session("direct").unwrap();

    let seed = Envelope::new("m", 1)
        .with_op(PatchOp::replace("/battery", &json!(80), 10))
        .with_op(PatchOp::replace("/location", &json!("Lab"), 10));
    assert_eq!(harness.router.handle_envelope(&session, &seed).outcome(), ErrorCode::Ok);

    let update = Envelope::new("m", 1)
        .with_op(PatchOp::replace("/battery", &json!(95), 100))
        .with_op(PatchOp::merge("/metrics", &json!({"steps": 1200}), 101));
    assert_eq!(harness.router.handle_envelope(&session, &update).outcome(), ErrorCode::Ok);

    let expected = json!({"battery": 95, "location": "Lab", "metrics": {"steps": 1200}});
    assert_eq!(session.context_snapshot().to_json(), expected);

    let stale = Envelope::new("m", 1).with_op(PatchOp::replace("/battery", &json!(1), 99));
    assert_eq!(harness.router.handle_envelope(&session, &stale).outcome(), ErrorCode::Ok);
    assert_eq!(session.context_snapshot().to_json(), expected);
}

#[tokio::test]
async fn test_budget_exhaustion_drops_telemetry() {
    let harness = Harness::new(
        GatewayConfigBuilder::new()
            .budget_policy(policy(0.35, 0.1))
            .build()
            .unwrap(),
    );
    let peer = harness.connect("peer-5");
    let mut stream = PeerStream::open(&peer).await;
    let reply = stream.request(&Envelope::negotiation("rover-7", 0b0011, 0)).await;
    assert_eq!(reply.profile, 1);

    for cpu in 0..6 {
        peer.send_datagram(encode_telemetry(&TelemetryDatagram::system(1, cpu * 10, 1 << 30, 40)))
            .unwrap();
    }

    let published = wait_for_publishes(&harness.broker, "telemetry/rover-7", 3).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let published_after = harness.broker.published_under("telemetry/");
    assert_eq!(published.len(), 3);
    assert_eq!(published_after.len(), 3);

    for p in &published {
        let raw = decode_payload(&p.payload).unwrap();
        let td: TelemetryDatagram = envelope::decode(&raw).unwrap();
        assert_eq!(td.profile, 1);
        assert!(td.system_stats().unwrap().cpu_percent <= 100);
    }

    let metrics = harness.router.metrics();
    assert_eq!(metrics.telemetry_published(), 3);
    assert_eq!(metrics.budget_rejected(), 3);

    // The stream keeps working after the budget runs out.
    let reply = stream.request(&Envelope::new("rover-7", 1)).await;
    assert_eq!(reply.outcome(), ErrorCode::Ok);
}

#[tokio::test]
async fn test_published_telemetry_is_clipped() {
    let mut budgets = policy(1_000.0, 1.0);
    budgets.wildcard_mut().clip_norm = 10.0;
    let harness = Harness::new(
        GatewayConfigBuilder::new()
            .default_profile(Some(1))
            .budget_policy(budgets)
            .build()
            .unwrap(),
    );
    let peer = harness.connect("peer-clip");

    for _ in 0..20 {
        let td = TelemetryDatagram::system(1, 90, 1 << 30, 4_000);
        peer.send_datagram(encode_telemetry(&td)).unwrap();
    }

    let published = wait_for_publishes(&harness.broker, "telemetry/", 20).await;
    assert_eq!(published.len(), 20);
    for p in &published {
        let raw = decode_payload(&p.payload).unwrap();
        let td: TelemetryDatagram = envelope::decode(&raw).unwrap();
        let stats = td.system_stats().unwrap();
        // Laplace(10) around a vector clipped to L1 norm 10.
        assert!(stats.mem_bytes < 1_000, "mem {}", stats.mem_bytes);
        assert!(stats.temperature_c < 1_000, "temp {}", stats.temperature_c);
    }
}

#[tokio::test]
async fn test_forwarded_envelopes() {
    let harness = Harness::new(
        GatewayConfigBuilder::new()
            .default_profile(Some(2))
            .forward_envelopes(true)
            .build()
            .unwrap(),
    );
    let peer = harness.connect("peer-6");
    let mut stream = PeerStream::open(&peer).await;

    let env = Envelope::new("job-42", 2).with_op(PatchOp::replace("/mode", &json!("auto"), 5));
    assert_eq!(stream.request(&env).await.outcome(), ErrorCode::Ok);

    let published = wait_for_publishes(&harness.broker, "axcp/job-42", 1).await;
    assert_eq!(published.len(), 1);
    let raw = decode_payload(&published[0].payload).unwrap();
    let forwarded: Envelope = envelope::decode(&raw).unwrap();
    assert_eq!(forwarded, env);
}

#[tokio::test]
async fn test_decode_error_closes_connection() {
    let harness = Harness::new(GatewayConfig::default());
    let mut peer = harness.connect("peer-7");

    let (mut write, _read) = peer.open_stream().await.unwrap();
    write
        .write_all(&[5, 0, 0, 0, 0xff, 0xff, 0xff, 0xff, 0xff])
        .await
        .unwrap();

    let info = tokio::time::timeout(Duration::from_secs(5), peer.closed())
        .await
        .expect("connection not closed")
        .unwrap();
    assert_eq!(info.code, CLOSE_DECODE_ERROR);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.router.sessions().is_empty());
}

#[tokio::test]
async fn test_oversize_frame_closes_connection() {
    let config = GatewayConfigBuilder::new().max_frame_size(64).build().unwrap();
    let harness = Harness::new(config);
    let mut peer = harness.connect("peer-8");

    let (mut write, _read) = peer.open_stream().await.unwrap();
    write.write_all(&1000u32.to_le_bytes()).await.unwrap();

    let info = tokio::time::timeout(Duration::from_secs(5), peer.closed())
        .await
        .expect("connection not closed")
        .unwrap();
    assert_eq!(info.code, CLOSE_DECODE_ERROR);
}

#[tokio::test]
async fn test_malformed_datagrams_are_dropped() {
    let harness = Harness::new(
        GatewayConfigBuilder::new()
            .default_profile(Some(1))
            .build()
            .unwrap(),
    );
    let peer = harness.connect("peer-9");

    peer.send_datagram(Bytes::new()).unwrap();
    peer.send_datagram(Bytes::from_static(&[0x42, 1, 2, 3])).unwrap();
    peer.send_datagram(Bytes::from_static(&[0xA0, 0xff, 0xff])).unwrap();
    peer.send_datagram(Bytes::from(vec![0xA0; 4096])).unwrap();
    peer.send_datagram(encode_telemetry(&TelemetryDatagram::tokens(1, 120, 30))).unwrap();

    let published = wait_for_publishes(&harness.broker, "telemetry/", 1).await;
    assert_eq!(published.len(), 1);

    let metrics = harness.router.metrics();
    assert_eq!(metrics.telemetry_received(), 5);
    assert_eq!(metrics.telemetry_dropped("malformed"), 4);
    assert_eq!(metrics.telemetry_published(), 1);

    // The connection survives.
    let mut stream = PeerStream::open(&peer).await;
    assert_eq!(stream.request(&Envelope::new("x", 1)).await.outcome(), ErrorCode::Ok);
}

#[tokio::test]
async fn test_datagram_loss_tolerance() {
    const N: usize = 800;
    const P: f64 = 0.3;

    let harness = Harness::new(
        GatewayConfigBuilder::new()
            .default_profile(Some(1))
            .budget_policy(policy(1_000.0, 0.1))
            .build()
            .unwrap(),
    );
    let peer = harness.connect("peer-10");

    let mut rng = StdRng::seed_from_u64(7);
    let mut sent = 0;
    for i in 0..N {
        if rng.r#gen::<f64>() < P {
            continue;
        }
        let td = TelemetryDatagram::latency(1, i as u32, 5);
        peer.send_datagram(encode_telemetry(&td)).unwrap();
        sent += 1;
    }

    let published = wait_for_publishes(&harness.broker, "telemetry/", sent).await;
    assert_eq!(published.len(), sent);

    let mean = N as f64 * (1.0 - P);
    let sigma = (N as f64 * P * (1.0 - P)).sqrt();
    assert!(
        (published.len() as f64 - mean).abs() < 4.0 * sigma,
        "{} received, expected about {mean}",
        published.len()
    );
}
