//! End-to-end test over a loopback QUIC connection.

#![cfg(feature = "quic")]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use axcp_gateway::broker::{MemoryBroker, decode_payload};
use axcp_gateway::client::{ClientError, GatewayClientBuilder};
use axcp_gateway::core::ErrorCode;
use axcp_gateway::envelope::{self, Envelope, PatchOp, TelemetryDatagram};
use axcp_gateway::negotiation::SessionCapabilities;
use axcp_gateway::server::{Gateway, GatewayConfigBuilder, MetricsRegistry};
use axcp_gateway::transport::TlsIdentity;

async fn start_gateway(broker: &MemoryBroker) -> Arc<Gateway> {
    let config = GatewayConfigBuilder::new()
        .bind_addr("127.0.0.1:0".parse().unwrap())
        .supported_profiles(0b1111)
        .build()
        .unwrap();
    let identity = TlsIdentity::self_signed(vec!["localhost".into()]).unwrap();
    let metrics = MetricsRegistry::new().unwrap().gateway_metrics().clone();
    let gateway =
        Arc::new(Gateway::bind(config, identity, Arc::new(broker.clone()), metrics).unwrap());

    let runner = gateway.clone();
    tokio::spawn(async move {
        let _ = runner.run().await;
    });
    gateway
}

#[tokio::test]
async fn test_quic_session_end_to_end() {
    let broker = MemoryBroker::new();
    let gateway = start_gateway(&broker).await;

    let client = GatewayClientBuilder::new()
        .server_addr(gateway.local_addr().unwrap())
        .server_name("localhost")
        .trust(gateway.certificate_der().clone())
        .connect_timeout(Duration::from_secs(5))
        .connect()
        .await
        .unwrap();

    // Data before negotiation is refused but the connection stays up.
    let err = client.request_ok(&Envelope::new("loop-1", 0)).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Rejected {
            code: ErrorCode::NotNegotiated,
            ..
        }
    ));

    let profile = client
        .negotiate("loop-1", SessionCapabilities::new(0b0111, 1))
        .await
        .unwrap();
    assert_eq!(profile.get(), 2);

    let env = Envelope::new("loop-1", 2)
        .with_op(PatchOp::replace("/battery", &json!(80), 1))
        .with_op(PatchOp::merge("/metrics", &json!({"steps": 10}), 2));
    let reply = client.request_ok(&env).await.unwrap();
    assert_eq!(reply.profile, 2);
    assert_eq!(reply.trace_id, "loop-1");

    let reply = client.request(&Envelope::new("loop-1", 3)).await.unwrap();
    assert_eq!(reply.outcome(), ErrorCode::ProfileMismatch);

    // Datagrams are unreliable; send a few and expect at least one.
    for cpu in [10, 20, 30] {
        client
            .send_telemetry(&TelemetryDatagram::system(2, cpu, 1 << 20, 45))
            .unwrap();
    }
    let mut published = Vec::new();
    for _ in 0..300 {
        published = broker.published_under("telemetry/loop-1");
        if !published.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!published.is_empty(), "no telemetry published");

    let raw = decode_payload(&published[0].payload).unwrap();
    let td: TelemetryDatagram = envelope::decode(&raw).unwrap();
    assert_eq!(td.profile, 2);
    assert!(td.system_stats().is_some());

    client.close().await;
    gateway.shutdown();
}

#[tokio::test]
async fn test_untrusted_certificate_is_refused() {
    let broker = MemoryBroker::new();
    let gateway = start_gateway(&broker).await;
    let other = TlsIdentity::self_signed(vec!["localhost".into()]).unwrap();

    let result = GatewayClientBuilder::new()
        .server_addr(gateway.local_addr().unwrap())
        .trust(other.leaf().unwrap().clone())
        .connect_timeout(Duration::from_secs(5))
        .connect()
        .await;
    assert!(matches!(result, Err(ClientError::ConnectionFailed(_))));

    gateway.shutdown();
}
