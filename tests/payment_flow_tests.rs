//! End-to-end intent lifecycle over the in-memory store.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use common::{build, build_with, build_with_config, topup, MockGateway};
use edupay_backend::config::PaymentsConfig;
use edupay_backend::payments::types::{
    IntentKind, PaymentMode, ProviderInstructions,
};
use edupay_backend::services::InitiateRequest;

#[tokio::test]
async fn manual_topup_happy_path_credits_requested_amount() {
    let app = build(PaymentMode::Manual);
    let user = Uuid::new_v4();

    let outcome = app
        .orchestrator
        .initiate(topup(user, 50_000, "key-1"))
        .await
        .unwrap();
    assert_eq!(outcome.intent.status.to_string(), "AWAITING_PAYMENT");
    let allocation = outcome.intent.allocation.expect("manual intent allocates");
    assert_eq!(allocation.final_amount, 50_000);

    match outcome.instructions.expect("instructions present") {
        ProviderInstructions::BankTransfer { final_amount, .. } => {
            assert_eq!(final_amount, 50_000)
        }
        other => panic!("unexpected instructions: {:?}", other),
    }

    app.orchestrator.mark_paid(outcome.intent.id).await.unwrap();
    let confirmed = app.orchestrator.confirm(outcome.intent.id).await.unwrap();
    assert_eq!(confirmed.status.to_string(), "CONFIRMED");

    // The wallet receives the requested amount, never the perturbed sum.
    assert_eq!(app.orchestrator.wallet_balance(user).await.unwrap(), 50_000);
    // Settlement released the amount slot.
    assert_eq!(app.store.reservation_count().await, 0);
}

#[tokio::test]
async fn smallest_perturbation_is_assigned_in_order() {
    let app = build(PaymentMode::Manual);
    let user = Uuid::new_v4();

    let first = app
        .orchestrator
        .initiate(topup(user, 50_000, "k-a"))
        .await
        .unwrap();
    let second = app
        .orchestrator
        .initiate(topup(user, 50_000, "k-b"))
        .await
        .unwrap();
    let third = app
        .orchestrator
        .initiate(topup(user, 50_000, "k-c"))
        .await
        .unwrap();

    assert_eq!(first.intent.payable_amount(), 50_000);
    assert_eq!(second.intent.payable_amount(), 50_001);
    assert_eq!(third.intent.payable_amount(), 50_002);
}

#[tokio::test]
async fn initiate_is_idempotent_on_the_key() {
    let app = build(PaymentMode::Manual);
    let user = Uuid::new_v4();

    let first = app
        .orchestrator
        .initiate(topup(user, 50_000, "same-key"))
        .await
        .unwrap();
    let second = app
        .orchestrator
        .initiate(topup(user, 50_000, "same-key"))
        .await
        .unwrap();

    assert_eq!(first.intent.id, second.intent.id);
    assert!(!first.replayed);
    assert!(second.replayed);
    // The replay held no second amount slot.
    assert_eq!(app.store.reservation_count().await, 1);
}

#[tokio::test]
async fn repeated_confirms_credit_exactly_once() {
    let app = build(PaymentMode::Manual);
    let user = Uuid::new_v4();

    let outcome = app
        .orchestrator
        .initiate(topup(user, 25_000, "k-confirm"))
        .await
        .unwrap();
    for _ in 0..5 {
        app.orchestrator.confirm(outcome.intent.id).await.unwrap();
    }

    assert_eq!(app.orchestrator.wallet_balance(user).await.unwrap(), 25_000);
    assert_eq!(app.store.ledger_entries(user).await.len(), 1);
}

#[tokio::test]
async fn concurrent_confirms_credit_exactly_once() {
    let app = build(PaymentMode::Manual);
    let user = Uuid::new_v4();

    let outcome = app
        .orchestrator
        .initiate(topup(user, 25_000, "k-race"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let orchestrator = app.orchestrator.clone();
        let id = outcome.intent.id;
        handles.push(tokio::spawn(async move { orchestrator.confirm(id).await }));
    }
    for handle in handles {
        // Losing racers either replay the confirmed intent or observe a
        // stale transition; both are acceptable, double credit is not.
        let _ = handle.await.unwrap();
    }

    assert_eq!(app.orchestrator.wallet_balance(user).await.unwrap(), 25_000);
    assert_eq!(app.store.ledger_entries(user).await.len(), 1);
}

#[tokio::test]
async fn course_purchase_confirm_does_not_credit_the_wallet() {
    let app = build(PaymentMode::Manual);
    let user = Uuid::new_v4();

    let outcome = app
        .orchestrator
        .initiate(InitiateRequest {
            user_id: user,
            kind: IntentKind::CoursePurchase,
            reference_id: Some("course-42".to_string()),
            amount: 90_000,
            method: None,
            idempotency_key: "k-course".to_string(),
        })
        .await
        .unwrap();
    app.orchestrator.confirm(outcome.intent.id).await.unwrap();

    assert_eq!(app.orchestrator.wallet_balance(user).await.unwrap(), 0);
}

#[tokio::test]
async fn purchase_without_reference_is_rejected() {
    let app = build(PaymentMode::Manual);
    let err = app
        .orchestrator
        .initiate(InitiateRequest {
            user_id: Uuid::new_v4(),
            kind: IntentKind::CoursePurchase,
            reference_id: None,
            amount: 90_000,
            method: None,
            idempotency_key: "k-noref".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn short_reject_reason_changes_nothing() {
    let app = build(PaymentMode::Manual);
    let user = Uuid::new_v4();

    let outcome = app
        .orchestrator
        .initiate(topup(user, 50_000, "k-reject"))
        .await
        .unwrap();
    app.orchestrator.mark_paid(outcome.intent.id).await.unwrap();

    let err = app
        .orchestrator
        .reject(outcome.intent.id, "too short")
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);

    let intent = app.orchestrator.get(outcome.intent.id).await.unwrap();
    assert_eq!(intent.status.to_string(), "PENDING_REVIEW");
    assert_eq!(app.store.reservation_count().await, 1);
}

#[tokio::test]
async fn valid_rejection_fails_the_intent_and_frees_the_slot() {
    let app = build(PaymentMode::Manual);
    let user = Uuid::new_v4();

    let outcome = app
        .orchestrator
        .initiate(topup(user, 50_000, "k-reject2"))
        .await
        .unwrap();
    app.orchestrator.mark_paid(outcome.intent.id).await.unwrap();

    let rejected = app
        .orchestrator
        .reject(outcome.intent.id, "duplicate of an earlier transfer")
        .await
        .unwrap();
    assert_eq!(rejected.status.to_string(), "FAILED");
    assert_eq!(
        rejected.status_reason.as_deref(),
        Some("duplicate of an earlier transfer")
    );
    assert_eq!(app.store.reservation_count().await, 0);
    assert_eq!(app.orchestrator.wallet_balance(user).await.unwrap(), 0);
}

#[tokio::test]
async fn cancel_frees_the_reservation() {
    let app = build(PaymentMode::Manual);
    let outcome = app
        .orchestrator
        .initiate(topup(Uuid::new_v4(), 50_000, "k-cancel"))
        .await
        .unwrap();

    let cancelled = app.orchestrator.cancel(outcome.intent.id).await.unwrap();
    assert_eq!(cancelled.status.to_string(), "CANCELLED");
    assert_eq!(app.store.reservation_count().await, 0);

    // Cancelling again conflicts
    let err = app.orchestrator.cancel(outcome.intent.id).await.unwrap_err();
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn mark_paid_is_refused_on_gateway_channels() {
    let gateway = Arc::new(MockGateway::succeeding());
    let app = build_with(
        PaymentMode::Integration,
        Some(gateway),
        Duration::from_secs(900),
    );

    let outcome = app
        .orchestrator
        .initiate(InitiateRequest {
            method: Some("payme".to_string()),
            ..topup(Uuid::new_v4(), 50_000, "k-gw")
        })
        .await
        .unwrap();
    assert!(outcome.intent.allocation.is_none());
    match outcome.instructions.expect("instructions present") {
        ProviderInstructions::Gateway { pay_url } => {
            assert!(pay_url.contains(&outcome.intent.id.to_string()))
        }
        other => panic!("unexpected instructions: {:?}", other),
    }

    let err = app
        .orchestrator
        .mark_paid(outcome.intent.id)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn gateway_failure_fails_the_intent_and_holds_no_slot() {
    let gateway = Arc::new(MockGateway::failing());
    let app = build_with(
        PaymentMode::Integration,
        Some(gateway.clone()),
        Duration::from_secs(900),
    );

    let err = app
        .orchestrator
        .initiate(InitiateRequest {
            method: Some("payme".to_string()),
            ..topup(Uuid::new_v4(), 50_000, "k-gwfail")
        })
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 502);
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    assert_eq!(app.store.reservation_count().await, 0);

    // The intent is parked as FAILED; a replay reports it without
    // instructions.
    let replay = app
        .orchestrator
        .initiate(InitiateRequest {
            method: Some("payme".to_string()),
            ..topup(Uuid::new_v4(), 50_000, "k-gwfail")
        })
        .await
        .unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.intent.status.to_string(), "FAILED");
    assert!(replay.instructions.is_none());
}

#[tokio::test]
async fn exhausted_allocation_fails_the_intent_instead_of_stranding_it() {
    let app = build_with_config(
        PaymentsConfig {
            active_mode: PaymentMode::Manual,
            max_unique_add: 0,
            ..PaymentsConfig::default()
        },
        None,
    );
    let user = Uuid::new_v4();

    let holder = app
        .orchestrator
        .initiate(topup(user, 10_000, "k-holder"))
        .await
        .unwrap();

    let err = app
        .orchestrator
        .initiate(topup(user, 10_000, "k-loser"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 503);
    assert!(err.is_retryable());

    // The losing attempt is parked FAILED rather than stranded in CREATED;
    // its key replays the dead intent instead of blocking forever.
    let replay = app
        .orchestrator
        .initiate(topup(user, 10_000, "k-loser"))
        .await
        .unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.intent.status.to_string(), "FAILED");
    assert!(replay.instructions.is_none());
    assert_eq!(app.store.reservation_count().await, 1);

    // Once the amount space frees, a fresh attempt completes.
    app.orchestrator.cancel(holder.intent.id).await.unwrap();
    let next = app
        .orchestrator
        .initiate(topup(user, 10_000, "k-retry"))
        .await
        .unwrap();
    assert_eq!(next.intent.payable_amount(), 10_000);
    assert_eq!(next.intent.status.to_string(), "AWAITING_PAYMENT");
}

#[tokio::test]
async fn wallet_purchase_debits_idempotently_and_refuses_overdraft() {
    let app = build(PaymentMode::Manual);
    let user = Uuid::new_v4();

    let outcome = app
        .orchestrator
        .initiate(topup(user, 100_000, "k-fund"))
        .await
        .unwrap();
    app.orchestrator.confirm(outcome.intent.id).await.unwrap();

    let balance = app
        .orchestrator
        .purchase_with_balance(user, 60_000, "buy-1")
        .await
        .unwrap();
    assert_eq!(balance, 40_000);

    // Replaying the same purchase moves nothing
    let balance = app
        .orchestrator
        .purchase_with_balance(user, 60_000, "buy-1")
        .await
        .unwrap();
    assert_eq!(balance, 40_000);

    let err = app
        .orchestrator
        .purchase_with_balance(user, 60_000, "buy-2")
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 402);
    assert_eq!(app.orchestrator.wallet_balance(user).await.unwrap(), 40_000);
}
