//! Expiry, sweeping and transfer matching.

mod common;

use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

use common::{build, build_with, topup};
use edupay_backend::payments::types::{PaymentChannel, PaymentMode};

#[tokio::test]
async fn live_final_amounts_stay_unique_under_concurrency() {
    let app = build(PaymentMode::Manual);

    let mut handles = Vec::new();
    for i in 0..40 {
        let orchestrator = app.orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .initiate(topup(Uuid::new_v4(), 50_000, &format!("k-{i}")))
                .await
                .unwrap()
                .intent
                .payable_amount()
        }));
    }

    let mut amounts = HashSet::new();
    for handle in handles {
        assert!(amounts.insert(handle.await.unwrap()));
    }
    assert_eq!(app.store.reservation_count().await, 40);
}

#[tokio::test]
async fn conservation_credits_sum_requested_amounts() {
    let app = build(PaymentMode::Manual);
    let user = Uuid::new_v4();

    let first = app
        .orchestrator
        .initiate(topup(user, 50_000, "c-1"))
        .await
        .unwrap();
    let second = app
        .orchestrator
        .initiate(topup(user, 50_000, "c-2"))
        .await
        .unwrap();
    assert_eq!(second.intent.payable_amount(), 50_001);

    app.reconciler
        .match_transfer(PaymentChannel::Manual, first.intent.payable_amount())
        .await
        .unwrap();
    app.reconciler
        .match_transfer(PaymentChannel::Manual, second.intent.payable_amount())
        .await
        .unwrap();

    // Two transfers of 50_000 and 50_001 arrived; the wallet holds exactly
    // 100_000. The surcharge is never credited.
    assert_eq!(
        app.orchestrator.wallet_balance(user).await.unwrap(),
        100_000
    );
}

#[tokio::test]
async fn match_transfer_finds_the_single_owner() {
    let app = build(PaymentMode::Manual);
    let user = Uuid::new_v4();

    let outcome = app
        .orchestrator
        .initiate(topup(user, 70_000, "m-1"))
        .await
        .unwrap();
    app.orchestrator.mark_paid(outcome.intent.id).await.unwrap();

    let confirmed = app
        .reconciler
        .match_transfer(PaymentChannel::Manual, 70_000)
        .await
        .unwrap();
    assert_eq!(confirmed.id, outcome.intent.id);
    assert_eq!(confirmed.status.to_string(), "CONFIRMED");

    // No live intent holds that amount anymore
    let err = app
        .reconciler
        .match_transfer(PaymentChannel::Manual, 70_000)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn unmatched_amount_is_a_404() {
    let app = build(PaymentMode::Manual);
    let err = app
        .reconciler
        .match_transfer(PaymentChannel::Manual, 123_456)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn sweep_expires_lapsed_intents_and_reclaims_the_space() {
    let app = build_with(PaymentMode::Manual, None, Duration::from_secs(0));
    let user = Uuid::new_v4();

    let outcome = app
        .orchestrator
        .initiate(topup(user, 50_000, "e-1"))
        .await
        .unwrap();
    assert_eq!(outcome.intent.payable_amount(), 50_000);

    let (expired, _released) = app.reconciler.sweep(100).await.unwrap();
    assert_eq!(expired, 1);
    assert_eq!(app.store.reservation_count().await, 0);

    let intent = app.orchestrator.get(outcome.intent.id).await.unwrap();
    assert_eq!(intent.status.to_string(), "EXPIRED");

    // The freed amount is reusable immediately
    let next = app
        .orchestrator
        .initiate(topup(user, 50_000, "e-2"))
        .await
        .unwrap();
    assert_eq!(next.intent.payable_amount(), 50_000);
}

#[tokio::test]
async fn sweep_is_idempotent() {
    let app = build_with(PaymentMode::Manual, None, Duration::from_secs(0));
    app.orchestrator
        .initiate(topup(Uuid::new_v4(), 10_000, "s-1"))
        .await
        .unwrap();

    let (expired, _) = app.reconciler.sweep(100).await.unwrap();
    assert_eq!(expired, 1);
    let (expired, released) = app.reconciler.sweep(100).await.unwrap();
    assert_eq!(expired, 0);
    assert_eq!(released, 0);
}

#[tokio::test]
async fn lazy_expiry_on_the_read_path() {
    let app = build_with(PaymentMode::Manual, None, Duration::from_secs(0));
    let outcome = app
        .orchestrator
        .initiate(topup(Uuid::new_v4(), 30_000, "l-1"))
        .await
        .unwrap();

    // No sweep has run; the poll itself resolves the stale countdown.
    let intent = app.orchestrator.get(outcome.intent.id).await.unwrap();
    assert_eq!(intent.status.to_string(), "EXPIRED");
    assert_eq!(app.store.reservation_count().await, 0);
}

#[tokio::test]
async fn expired_intent_cannot_be_confirmed() {
    let app = build_with(PaymentMode::Manual, None, Duration::from_secs(0));
    let outcome = app
        .orchestrator
        .initiate(topup(Uuid::new_v4(), 30_000, "x-1"))
        .await
        .unwrap();
    app.reconciler.sweep(100).await.unwrap();

    let err = app.orchestrator.confirm(outcome.intent.id).await.unwrap_err();
    assert_eq!(err.status_code(), 409);
}
