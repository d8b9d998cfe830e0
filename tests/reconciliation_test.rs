//! End-to-end reconciliation behavior over the in-memory store.

mod common;

use booking_payments::database::PaymentStore;
use booking_payments::payments::error::GatewayError;
use booking_payments::payments::state::{
    BookingStatus, PaymentSignal, PaymentStatus, SignalOutcome, SignalSource, Transition,
};
use booking_payments::payments::types::{GatewayStatus, WebhookNotification};
use booking_payments::services::reconciliation::{ReconciliationError, SignalDisposition};
use chrono::Utc;
use common::{initiate_request, TestContext, CHECKOUT_URL, CUSTOMER_EMAIL, GATEWAY_TX_ID};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

fn webhook(tx_ref: &str, status: &str) -> WebhookNotification {
    WebhookNotification {
        tx_ref: tx_ref.to_string(),
        status: status.to_string(),
        id: Some(GATEWAY_TX_ID.to_string()),
        reference: None,
    }
}

#[tokio::test]
async fn webhook_settles_payment_and_later_poll_changes_nothing() {
    let ctx = TestContext::new();
    let (user_id, booking_id) = ctx.seed_booking("100.00");

    let initiated = ctx
        .engine
        .initiate(user_id, initiate_request(booking_id))
        .await
        .unwrap();
    assert_eq!(initiated.checkout_url, CHECKOUT_URL);
    assert_eq!(initiated.currency, "ETB");

    let payment = ctx.store.find_by_tx_ref(&initiated.tx_ref).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.checkout_url.as_deref(), Some(CHECKOUT_URL));
    assert_eq!(payment.gateway_tx_id.as_deref(), Some(GATEWAY_TX_ID));

    let ack = ctx
        .engine
        .handle_webhook(webhook(&initiated.tx_ref, "success"))
        .await
        .unwrap();
    assert_eq!(ack.status, PaymentStatus::Success);
    assert_eq!(ack.disposition, SignalDisposition::Applied);

    let snapshot = ctx.engine.snapshot(&initiated.tx_ref).await.unwrap();
    assert_eq!(snapshot.payment.status, PaymentStatus::Success);
    assert!(snapshot.payment.paid_at.is_some());
    assert_eq!(snapshot.booking.status, BookingStatus::Confirmed);

    let sent = ctx.mailer.wait_for(1).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, CUSTOMER_EMAIL);

    // Gateway agrees on a later poll; terminal payments are not re-queried.
    ctx.gateway.report(&initiated.tx_ref, GatewayStatus::Success);
    let polled = ctx.engine.poll(&initiated.tx_ref).await.unwrap();
    assert!(polled.is_none());

    // Even a forced poll signal is a silent duplicate.
    let record = ctx
        .engine
        .apply_signal(PaymentSignal::new(
            &initiated.tx_ref,
            SignalSource::Poll,
            SignalOutcome::Success,
        ))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.transition, Transition::Duplicate);

    assert_eq!(ctx.engine.notifier().submitted_count(), 1);
    assert_eq!(ctx.mailer.wait_for(2).await.len(), 1);
}

#[tokio::test]
async fn repeated_success_webhooks_notify_once() {
    let ctx = TestContext::new();
    let (user_id, booking_id) = ctx.seed_booking("250.50");
    let initiated = ctx
        .engine
        .initiate(user_id, initiate_request(booking_id))
        .await
        .unwrap();

    for _ in 0..3 {
        ctx.engine
            .handle_webhook(webhook(&initiated.tx_ref, "success"))
            .await
            .unwrap();
    }

    let ack = ctx
        .engine
        .handle_webhook(webhook(&initiated.tx_ref, "success"))
        .await
        .unwrap();
    assert_eq!(ack.disposition, SignalDisposition::Duplicate);
    assert_eq!(ctx.engine.notifier().submitted_count(), 1);
}

#[tokio::test]
async fn success_is_not_undone_by_late_failure() {
    let ctx = TestContext::new();
    let (user_id, booking_id) = ctx.seed_booking("100.00");
    let initiated = ctx
        .engine
        .initiate(user_id, initiate_request(booking_id))
        .await
        .unwrap();

    ctx.engine
        .handle_webhook(webhook(&initiated.tx_ref, "success"))
        .await
        .unwrap();
    let ack = ctx
        .engine
        .handle_webhook(webhook(&initiated.tx_ref, "failed"))
        .await
        .unwrap();

    assert_eq!(ack.disposition, SignalDisposition::Conflict);
    assert_eq!(ack.status, PaymentStatus::Success);
    let snapshot = ctx.engine.snapshot(&initiated.tx_ref).await.unwrap();
    assert_eq!(snapshot.booking.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn failure_is_not_undone_by_late_success() {
    let ctx = TestContext::new();
    let (user_id, booking_id) = ctx.seed_booking("100.00");
    let initiated = ctx
        .engine
        .initiate(user_id, initiate_request(booking_id))
        .await
        .unwrap();

    ctx.engine
        .handle_webhook(webhook(&initiated.tx_ref, "failed"))
        .await
        .unwrap();
    let ack = ctx
        .engine
        .handle_webhook(webhook(&initiated.tx_ref, "success"))
        .await
        .unwrap();

    assert_eq!(ack.disposition, SignalDisposition::Conflict);
    assert_eq!(ack.status, PaymentStatus::Failed);
    let snapshot = ctx.engine.snapshot(&initiated.tx_ref).await.unwrap();
    assert_eq!(snapshot.booking.status, BookingStatus::Pending);
    assert_eq!(ctx.engine.notifier().submitted_count(), 0);
}

#[tokio::test]
async fn initiation_transport_failure_fails_payment_and_keeps_booking_pending() {
    let ctx = TestContext::new();
    let (user_id, booking_id) = ctx.seed_booking("100.00");
    ctx.gateway
        .fail_initiation(GatewayError::transport("connection refused"));

    let err = ctx
        .engine
        .initiate(user_id, initiate_request(booking_id))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::Gateway(ref e) if e.is_transport()));

    let payments = ctx.store.payments_for_booking(booking_id).unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Failed);
    assert!(payments[0].error_message.is_some());
    assert!(payments[0].checkout_url.is_none());

    let booking = ctx.store.find_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
}

#[tokio::test]
async fn initiation_is_refused_for_foreign_or_settled_bookings() {
    let ctx = TestContext::new();
    let (_owner, booking_id) = ctx.seed_booking("100.00");

    let err = ctx
        .engine
        .initiate(Uuid::new_v4(), initiate_request(booking_id))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::BookingNotFound { .. }));

    let (user_id, confirmed) = ctx.seed_booking_with_status("100.00", BookingStatus::Confirmed);
    let err = ctx
        .engine
        .initiate(user_id, initiate_request(confirmed))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::BookingNotPayable { .. }));
}

#[tokio::test]
async fn each_attempt_gets_a_distinct_reference() {
    let ctx = TestContext::new();
    let (user_id, booking_id) = ctx.seed_booking("100.00");

    let mut refs = HashSet::new();
    for _ in 0..5 {
        let initiated = ctx
            .engine
            .initiate(user_id, initiate_request(booking_id))
            .await
            .unwrap();
        refs.insert(initiated.tx_ref);
    }
    assert_eq!(refs.len(), 5);
    assert_eq!(ctx.store.payments_for_booking(booking_id).unwrap().len(), 5);
}

#[tokio::test]
async fn second_paid_attempt_for_settled_booking_is_failed() {
    let ctx = TestContext::new();
    let (user_id, booking_id) = ctx.seed_booking("100.00");
    let first = ctx
        .engine
        .initiate(user_id, initiate_request(booking_id))
        .await
        .unwrap();
    let second = ctx
        .engine
        .initiate(user_id, initiate_request(booking_id))
        .await
        .unwrap();

    ctx.engine
        .handle_webhook(webhook(&first.tx_ref, "success"))
        .await
        .unwrap();
    let ack = ctx
        .engine
        .handle_webhook(webhook(&second.tx_ref, "success"))
        .await
        .unwrap();

    assert_eq!(ack.disposition, SignalDisposition::Superseded);
    assert_eq!(ack.status, PaymentStatus::Failed);
    assert_eq!(ctx.engine.notifier().submitted_count(), 1);
}

#[tokio::test]
async fn verify_fetches_gateway_state_for_owner_only() {
    let ctx = TestContext::new();
    let (user_id, booking_id) = ctx.seed_booking("100.00");
    let initiated = ctx
        .engine
        .initiate(user_id, initiate_request(booking_id))
        .await
        .unwrap();

    let err = ctx
        .engine
        .verify(Uuid::new_v4(), &initiated.tx_ref)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::PaymentNotFound { .. }));
    assert_eq!(ctx.gateway.verify_calls(), 0);

    ctx.gateway.report(&initiated.tx_ref, GatewayStatus::Success);
    let snapshot = ctx.engine.verify(user_id, &initiated.tx_ref).await.unwrap();
    assert_eq!(snapshot.payment.status, PaymentStatus::Success);
    assert_eq!(snapshot.booking.status, BookingStatus::Confirmed);

    // Terminal now: answered from the store.
    ctx.engine.verify(user_id, &initiated.tx_ref).await.unwrap();
    assert_eq!(ctx.gateway.verify_calls(), 1);
}

#[tokio::test]
async fn verify_transport_error_fails_payment_and_counts_retry() {
    let ctx = TestContext::new();
    let (user_id, booking_id) = ctx.seed_booking("100.00");
    let initiated = ctx
        .engine
        .initiate(user_id, initiate_request(booking_id))
        .await
        .unwrap();
    ctx.gateway
        .fail_verification(&initiated.tx_ref, GatewayError::transport("timed out"));

    let err = ctx
        .engine
        .verify(user_id, &initiated.tx_ref)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::Gateway(ref e) if e.is_transport()));

    let payment = ctx.store.find_by_tx_ref(&initiated.tx_ref).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.error_message.as_deref(), Some("timed out"));
    assert_eq!(payment.retry_count, 1);

    let booking = ctx.store.find_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
}

#[tokio::test]
async fn gateway_refusal_on_verify_or_poll_fails_payment() {
    let ctx = TestContext::new();
    let (user_id, booking_id) = ctx.seed_booking("100.00");
    let verified = ctx
        .engine
        .initiate(user_id, initiate_request(booking_id))
        .await
        .unwrap();
    let polled = ctx
        .engine
        .initiate(user_id, initiate_request(booking_id))
        .await
        .unwrap();
    ctx.gateway.fail_verification(
        &verified.tx_ref,
        GatewayError::business("Transaction reference not found"),
    );
    ctx.gateway
        .fail_verification(&polled.tx_ref, GatewayError::business("Invalid API key"));

    let snapshot = ctx.engine.verify(user_id, &verified.tx_ref).await.unwrap();
    assert_eq!(snapshot.payment.status, PaymentStatus::Failed);
    assert_eq!(
        snapshot.payment.error_message.as_deref(),
        Some("Transaction reference not found")
    );
    assert_eq!(snapshot.payment.retry_count, 0);

    let record = ctx.engine.poll(&polled.tx_ref).await.unwrap().unwrap();
    assert_eq!(record.payment.status, PaymentStatus::Failed);
    assert_eq!(record.payment.error_message.as_deref(), Some("Invalid API key"));
    assert_eq!(record.booking.status, BookingStatus::Pending);
    assert_eq!(ctx.engine.notifier().submitted_count(), 0);
}

#[tokio::test]
async fn cancelled_and_expired_webhooks_are_terminal() {
    let ctx = TestContext::new();
    let (user_id, booking_id) = ctx.seed_booking("100.00");

    for (status, expected) in [
        ("cancelled", PaymentStatus::Cancelled),
        ("expired", PaymentStatus::Expired),
    ] {
        let initiated = ctx
            .engine
            .initiate(user_id, initiate_request(booking_id))
            .await
            .unwrap();

        let ack = ctx
            .engine
            .handle_webhook(webhook(&initiated.tx_ref, status))
            .await
            .unwrap();
        assert_eq!(ack.status, expected);
        assert_eq!(ack.disposition, SignalDisposition::Applied);

        let payment = ctx.store.find_by_tx_ref(&initiated.tx_ref).await.unwrap().unwrap();
        assert_eq!(payment.status, expected);
        assert!(payment.error_message.is_some(), "{status} should record a message");

        let ack = ctx
            .engine
            .handle_webhook(webhook(&initiated.tx_ref, "success"))
            .await
            .unwrap();
        assert_eq!(ack.disposition, SignalDisposition::Conflict);
        assert_eq!(ack.status, expected);
    }

    let booking = ctx.store.find_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(ctx.engine.notifier().submitted_count(), 0);
}

#[tokio::test]
async fn mail_failure_does_not_roll_back_settlement() {
    let ctx = TestContext::new();
    ctx.mailer.fail_sends();
    let (user_id, booking_id) = ctx.seed_booking("100.00");
    let initiated = ctx
        .engine
        .initiate(user_id, initiate_request(booking_id))
        .await
        .unwrap();

    let ack = ctx
        .engine
        .handle_webhook(webhook(&initiated.tx_ref, "success"))
        .await
        .unwrap();
    assert_eq!(ack.status, PaymentStatus::Success);

    // The send was attempted and refused.
    assert_eq!(ctx.mailer.wait_for(1).await.len(), 1);

    let snapshot = ctx.engine.snapshot(&initiated.tx_ref).await.unwrap();
    assert_eq!(snapshot.payment.status, PaymentStatus::Success);
    assert_eq!(snapshot.booking.status, BookingStatus::Confirmed);
    assert_eq!(ctx.engine.notifier().submitted_count(), 1);
}

#[tokio::test]
async fn phone_number_longer_than_column_is_rejected_before_any_write() {
    let ctx = TestContext::new();
    let (user_id, booking_id) = ctx.seed_booking("100.00");
    let mut request = initiate_request(booking_id);
    request.phone_number = Some("+251 911 000 000 000 000".to_string());

    let err = ctx.engine.initiate(user_id, request).await.unwrap_err();
    assert!(matches!(err, ReconciliationError::Validation { ref field, .. } if field == "phone_number"));
    assert!(ctx.store.payments_for_booking(booking_id).unwrap().is_empty());

    // Surrounding whitespace does not count against the limit.
    let mut request = initiate_request(booking_id);
    request.phone_number = Some("   +251911000000   ".to_string());
    let initiated = ctx.engine.initiate(user_id, request).await.unwrap();
    let payment = ctx.store.find_by_tx_ref(&initiated.tx_ref).await.unwrap().unwrap();
    assert_eq!(payment.customer.phone.as_deref(), Some("+251911000000"));
}

#[tokio::test]
async fn unknown_and_malformed_webhook_references_are_not_found() {
    let ctx = TestContext::new();

    let err = ctx
        .engine
        .handle_webhook(webhook("TRX-UNKNOWN-1", "success"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::PaymentNotFound { .. }));

    let err = ctx
        .engine
        .handle_webhook(webhook("not a ref; drop table", "success"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::PaymentNotFound { .. }));
}

#[tokio::test]
async fn pending_webhook_leaves_payment_untouched() {
    let ctx = TestContext::new();
    let (user_id, booking_id) = ctx.seed_booking("100.00");
    let initiated = ctx
        .engine
        .initiate(user_id, initiate_request(booking_id))
        .await
        .unwrap();

    let ack = ctx
        .engine
        .handle_webhook(webhook(&initiated.tx_ref, "pending"))
        .await
        .unwrap();
    assert_eq!(ack.disposition, SignalDisposition::Pending);
    assert_eq!(ack.status, PaymentStatus::Pending);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_success_signals_apply_exactly_once() {
    let ctx = TestContext::new();
    let (user_id, booking_id) = ctx.seed_booking("100.00");
    let initiated = ctx
        .engine
        .initiate(user_id, initiate_request(booking_id))
        .await
        .unwrap();

    let sources = [
        SignalSource::Webhook,
        SignalSource::Verify,
        SignalSource::Poll,
        SignalSource::Webhook,
        SignalSource::Poll,
        SignalSource::Verify,
    ];
    let handles: Vec<_> = sources
        .into_iter()
        .map(|source| {
            let engine = Arc::clone(&ctx.engine);
            let tx_ref = initiated.tx_ref.clone();
            tokio::spawn(async move {
                engine
                    .apply_signal(PaymentSignal::new(tx_ref, source, SignalOutcome::Success))
                    .await
                    .unwrap()
                    .unwrap()
            })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        let record = handle.await.unwrap();
        if record.newly_paid() {
            applied += 1;
        } else {
            assert_eq!(record.transition, Transition::Duplicate);
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(ctx.engine.notifier().submitted_count(), 1);
}

#[tokio::test]
async fn scheduler_cycle_settles_stale_payments_only() {
    let ctx = TestContext::new();
    let (user_id, booking_id) = ctx.seed_booking("100.00");
    let stale = ctx
        .engine
        .initiate(user_id, initiate_request(booking_id))
        .await
        .unwrap();
    let fresh = ctx
        .engine
        .initiate(user_id, initiate_request(booking_id))
        .await
        .unwrap();

    ctx.store
        .set_created_at(stale.payment_id, Utc::now() - chrono::Duration::minutes(10))
        .unwrap();
    ctx.gateway.report(&stale.tx_ref, GatewayStatus::Success);
    ctx.gateway.report(&fresh.tx_ref, GatewayStatus::Success);

    let report = ctx.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.settled, 1);
    assert_eq!(report.errors, 0);

    let stale_now = ctx.store.find_by_tx_ref(&stale.tx_ref).await.unwrap().unwrap();
    let fresh_now = ctx.store.find_by_tx_ref(&fresh.tx_ref).await.unwrap().unwrap();
    assert_eq!(stale_now.status, PaymentStatus::Success);
    assert_eq!(fresh_now.status, PaymentStatus::Pending);

    // Nothing stale is left pending.
    let report = ctx.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.examined, 0);
}

#[tokio::test]
async fn scheduler_counts_unreachable_gateway_as_error_and_fails_payment() {
    let ctx = TestContext::new();
    let (user_id, booking_id) = ctx.seed_booking("100.00");
    let initiated = ctx
        .engine
        .initiate(user_id, initiate_request(booking_id))
        .await
        .unwrap();
    ctx.store
        .set_created_at(initiated.payment_id, Utc::now() - chrono::Duration::minutes(10))
        .unwrap();
    ctx.gateway
        .fail_verification(&initiated.tx_ref, GatewayError::transport("503 from gateway"));

    let report = ctx.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.errors, 1);

    let payment = ctx.store.find_by_tx_ref(&initiated.tx_ref).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.retry_count, 1);

    // Failed payments drop out of the stale set.
    let report = ctx.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.examined, 0);
}

#[tokio::test]
async fn follow_up_poll_settles_payment_after_pending_webhook() {
    let ctx = TestContext::new();
    let (user_id, booking_id) = ctx.seed_booking("100.00");
    let initiated = ctx
        .engine
        .initiate(user_id, initiate_request(booking_id))
        .await
        .unwrap();
    ctx.gateway.report(&initiated.tx_ref, GatewayStatus::Success);

    ctx.scheduler
        .schedule_follow_up(initiated.tx_ref.clone())
        .await
        .unwrap();

    let payment = ctx.store.find_by_tx_ref(&initiated.tx_ref).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(ctx.mailer.wait_for(1).await.len(), 1);
}

#[tokio::test]
async fn scheduler_stops_on_shutdown() {
    let ctx = TestContext::new();
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(ctx.scheduler.clone().run(rx));

    tx.send(true).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .expect("scheduler should stop promptly")
        .unwrap();
}
