//! Concurrent access to one session from many tasks.

use std::sync::Arc;

use serde_json::json;

use axcp_gateway::core::GatewayError;
use axcp_gateway::envelope::PatchOp;
use axcp_gateway::negotiation::NegotiatedProfile;
use axcp_gateway::privacy::{BudgetPolicy, Mechanism, PrivacyError};
use axcp_gateway::server::{LedgerSettings, Session, SessionId};

const TASKS: usize = 64;
const ATTEMPTS_PER_TASK: usize = 4;

fn shared_session(epsilon: f64, per_sample: f64) -> (Arc<Session>, BudgetPolicy) {
    let mut policy = BudgetPolicy::default();
    let wildcard = policy.wildcard_mut();
    wildcard.epsilon = epsilon;
    wildcard.epsilon_per_sample = per_sample;

    let session = Arc::new(Session::new(SessionId::generate(), "shared"));
    session
        .adopt_default(
            NegotiatedProfile::new(2).unwrap(),
            LedgerSettings {
                policy: &policy,
                namespace: "telemetry",
                mechanism: Mechanism::Laplace,
            },
        )
        .unwrap();
    (session, policy)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_parallel_charges_never_overspend() {
    let (epsilon, per_sample) = (1.0, 0.125);
    let (session, _policy) = shared_session(epsilon, per_sample);

    let mut handles = Vec::with_capacity(TASKS);
    for task in 0..TASKS {
        let session = session.clone();
        handles.push(tokio::spawn(async move {
            let mut charged = 0;
            for attempt in 0..ATTEMPTS_PER_TASK {
                match session.charge_sample() {
                    Ok(_) => charged += 1,
                    Err(GatewayError::Privacy(PrivacyError::BudgetExceeded { .. })) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }
                let op = PatchOp::replace(
                    format!("/task{task}"),
                    &json!(attempt),
                    (task * ATTEMPTS_PER_TASK + attempt) as i64,
                );
                assert!(session.apply_delta(&[op]).is_empty());
                tokio::task::yield_now().await;
            }
            charged
        }));
    }

    let mut charged = 0;
    for handle in handles {
        charged += handle.await.unwrap();
    }

    let expected = (epsilon / per_sample).floor() as usize;
    assert_eq!(charged, expected);

    let spent = session.epsilon_spent().unwrap();
    assert!(spent <= epsilon, "spent {spent}");
    assert_eq!(spent, expected as f64 * per_sample);

    // Every task's last write survived.
    let doc = session.context_snapshot().to_json();
    let keys = doc.as_object().unwrap();
    assert_eq!(keys.len(), TASKS);
    for task in 0..TASKS {
        assert_eq!(keys[&format!("task{task}")], json!(ATTEMPTS_PER_TASK - 1));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_charges_on_exhausted_ledger() {
    let (session, _policy) = shared_session(0.5, 0.5);
    assert!(session.charge_sample().is_ok());

    let mut handles = Vec::new();
    for _ in 0..16 {
        let session = session.clone();
        handles.push(tokio::spawn(async move { session.charge_sample().is_ok() }));
    }
    for handle in handles {
        assert!(!handle.await.unwrap());
    }
    assert_eq!(session.epsilon_spent(), Some(0.5));
}
