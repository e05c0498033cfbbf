mod common;

use common::{RecordingNotifier, payment_harness, signed_notification};
use laundry_core::application::locking::{payment_create_key, payment_key};
use laundry_core::application::payments::{ADJUSTMENT_ITEM_ID, CreatePaymentRequest};
use laundry_core::domain::money::Money;
use laundry_core::domain::payment::{ChargeItem, PaymentFilter, PaymentSource, PaymentStatus};
use laundry_core::domain::page::Pagination;
use laundry_core::domain::ports::Locker;
use laundry_core::error::{AppError, ErrorKind};
use laundry_core::infrastructure::notifier::TracingNotifier;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use uuid::Uuid;

fn create_request(order_id: Uuid, payment_order_id: &str) -> CreatePaymentRequest {
    CreatePaymentRequest {
        order_id,
        payment_order_id: payment_order_id.to_string(),
        gross_amount: dec!(150000),
        payment_method: Some("bank_transfer".into()),
        items: vec![
            ChargeItem {
                id: "KEMEJA".into(),
                name: "Kemeja".into(),
                price: Money::new(dec!(50000)),
                quantity: 1,
            },
            ChargeItem {
                id: "PARFUM".into(),
                name: "Parfum".into(),
                price: Money::new(dec!(25000)),
                quantity: 2,
            },
        ],
        customer: None,
        enabled_payments: vec!["gopay".into(), "credit_card".into()],
        expiry_minutes: Some(60),
    }
}

#[tokio::test]
async fn test_snap_token_is_reused_while_pending() {
    let h = payment_harness(RecordingNotifier::default());
    let order_id = Uuid::new_v4();

    let tx = h
        .engine
        .create_snap_token(create_request(order_id, "PAY-1"))
        .await
        .unwrap();
    assert_eq!(tx.status, PaymentStatus::Pending);
    assert_eq!(tx.snap_token.as_deref(), Some("snap-PAY-1"));
    assert!(tx.expiry_time.is_some());

    let again = h
        .engine
        .create_snap_token(create_request(order_id, "PAY-1"))
        .await
        .unwrap();
    assert_eq!(again, tx);
    assert_eq!(h.gateway.created.load(Ordering::SeqCst), 1);

    let charge = h.gateway.requests.lock().unwrap()[0].clone();
    assert_eq!(charge.enabled_payments, vec!["gopay".to_string()]);
    assert_eq!(charge.items.len(), 3);
    assert_eq!(charge.items[2].id, ADJUSTMENT_ITEM_ID);
    assert_eq!(charge.items[2].price, Money::new(dec!(50000)));

    let logs = h.engine.status_logs("PAY-1").await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].source, PaymentSource::ApiCreate);
    assert_eq!(logs[0].previous_status, None);
}

#[tokio::test]
async fn test_create_validates_input() {
    let h = payment_harness(RecordingNotifier::default());
    let mut zero = create_request(Uuid::new_v4(), "PAY-0");
    zero.gross_amount = dec!(0);
    assert_eq!(
        h.engine.create_snap_token(zero).await.unwrap_err().kind(),
        ErrorKind::BadRequest
    );
    let blank = create_request(Uuid::new_v4(), "  ");
    assert!(matches!(
        h.engine.create_snap_token(blank).await,
        Err(AppError::Validation(_))
    ));
    assert_eq!(h.gateway.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_webhook_settles_and_notifies_once() {
    let h = payment_harness(RecordingNotifier::default());
    let order_id = Uuid::new_v4();
    h.engine
        .create_snap_token(create_request(order_id, "PAY-2"))
        .await
        .unwrap();

    let payload = signed_notification("PAY-2", "settlement", "150000.00");
    let tx = h.engine.process_webhook(payload.clone()).await.unwrap();

    assert_eq!(tx.status, PaymentStatus::Success);
    assert_eq!(tx.va_number.as_deref(), Some("12345678901"));
    assert_eq!(tx.biller_code.as_deref(), Some("bca"));
    assert_eq!(tx.payment_type.as_deref(), Some("bank_transfer"));
    assert!(tx.settlement_time.is_some());

    let events = h.notifier.events.lock().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].order_id, order_id);

    let logs = h.engine.status_logs("PAY-2").await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[1].source, PaymentSource::Webhook);
    assert_eq!(logs[1].previous_status, Some(PaymentStatus::Pending));
    assert_eq!(logs[1].new_status, PaymentStatus::Success);

    let hooks = h.engine.webhook_logs("PAY-2").await.unwrap();
    assert_eq!(hooks.len(), 1);
    assert!(hooks[0].signature_verified);
    assert!(hooks[0].processed_at.is_some());
    assert_eq!(hooks[0].payment_transaction_id, Some(tx.id));

    // Replaying the same notification is a no-op apart from its log row.
    let replay = h.engine.process_webhook(payload).await.unwrap();
    assert_eq!(replay, tx);
    assert_eq!(h.engine.status_logs("PAY-2").await.unwrap().len(), 2);
    assert_eq!(h.engine.webhook_logs("PAY-2").await.unwrap().len(), 2);
    assert_eq!(h.notifier.events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_signature_is_logged_and_ignored() {
    let h = payment_harness(RecordingNotifier::default());
    let before = h
        .engine
        .create_snap_token(create_request(Uuid::new_v4(), "PAY-3"))
        .await
        .unwrap();

    let mut forged = signed_notification("PAY-3", "settlement", "150000.00");
    forged["gross_amount"] = json!("1.00");
    let err = h.engine.process_webhook(forged).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(err.to_string(), "Invalid signature");

    let after = h.engine.get_by_payment_order_id("PAY-3").await.unwrap();
    assert_eq!(after, before);
    assert_eq!(h.engine.status_logs("PAY-3").await.unwrap().len(), 1);

    let hooks = h.engine.webhook_logs("PAY-3").await.unwrap();
    assert_eq!(hooks.len(), 1);
    assert!(!hooks[0].signature_verified);
    assert_eq!(hooks[0].processing_error.as_deref(), Some("Invalid signature"));
    assert!(hooks[0].processed_at.is_none());
}

#[tokio::test]
async fn test_webhook_for_unknown_transaction() {
    let h = payment_harness(RecordingNotifier::default());

    let err = h
        .engine
        .process_webhook(signed_notification("PAY-404", "settlement", "10000.00"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let hooks = h.engine.webhook_logs("PAY-404").await.unwrap();
    assert_eq!(hooks.len(), 1);
    assert!(hooks[0].signature_verified);
    assert_eq!(
        hooks[0].processing_error.as_deref(),
        Some("Payment transaction not found")
    );
}

#[tokio::test]
async fn test_malformed_webhook_is_still_logged() {
    let h = payment_harness(RecordingNotifier::default());
    let err = h
        .engine
        .process_webhook(json!({ "order_id": "PAY-5", "va_numbers": "oops" }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    let hooks = h.engine.webhook_logs("").await.unwrap();
    assert_eq!(hooks.len(), 1);
    assert!(hooks[0].processing_error.as_deref().unwrap().starts_with("Malformed payload"));
}

#[tokio::test]
async fn test_notifier_failure_keeps_payment_state() {
    let h = payment_harness(RecordingNotifier {
        fail: true,
        ..Default::default()
    });
    h.engine
        .create_snap_token(create_request(Uuid::new_v4(), "PAY-6"))
        .await
        .unwrap();

    let tx = h
        .engine
        .process_webhook(signed_notification("PAY-6", "settlement", "150000.00"))
        .await
        .unwrap();

    assert_eq!(tx.status, PaymentStatus::Success);
    assert_eq!(h.notifier.events.lock().unwrap().len(), 1);
    let stored = h.engine.get_by_payment_order_id("PAY-6").await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Success);
}

#[tokio::test]
async fn test_check_status_is_idempotent() {
    let h = payment_harness(RecordingNotifier::default());
    h.engine
        .create_snap_token(create_request(Uuid::new_v4(), "PAY-7"))
        .await
        .unwrap();

    h.gateway.script("pending", None);
    let tx = h.engine.check_status("PAY-7").await.unwrap();
    assert_eq!(tx.status, PaymentStatus::Pending);
    assert_eq!(h.engine.status_logs("PAY-7").await.unwrap().len(), 1);

    h.gateway.script("capture", Some("accept"));
    let tx = h.engine.check_status("PAY-7").await.unwrap();
    assert_eq!(tx.status, PaymentStatus::Success);
    let logs = h.engine.status_logs("PAY-7").await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[1].source, PaymentSource::ApiCheck);
    assert_eq!(h.notifier.events.lock().unwrap().len(), 1);

    let again = h.engine.check_status("PAY-7").await.unwrap();
    assert_eq!(again, tx);
    assert_eq!(h.engine.status_logs("PAY-7").await.unwrap().len(), 2);

    // A stale pending report never pulls a settled payment back.
    h.gateway.script("pending", None);
    let stale = h.engine.check_status("PAY-7").await.unwrap();
    assert_eq!(stale.status, PaymentStatus::Success);
    assert_eq!(h.gateway.queried.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_settled_payment_order_id_cannot_be_reused() {
    let h = payment_harness(RecordingNotifier::default());
    h.engine
        .create_snap_token(create_request(Uuid::new_v4(), "PAY-8"))
        .await
        .unwrap();
    h.gateway.script("expire", None);
    h.engine.check_status("PAY-8").await.unwrap();

    let err = h
        .engine
        .create_snap_token(create_request(Uuid::new_v4(), "PAY-8"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Payment order id PAY-8 is already used");
}

#[tokio::test]
async fn test_busy_payment_rejects_reconciliation() {
    let h = payment_harness(RecordingNotifier::default());
    h.engine
        .create_snap_token(create_request(Uuid::new_v4(), "PAY-9"))
        .await
        .unwrap();
    let _lease = h
        .locker
        .try_acquire(&payment_key("PAY-9"), Duration::from_secs(10))
        .await
        .unwrap()
        .unwrap();

    assert!(h.engine.check_status("PAY-9").await.unwrap_err().is_busy());
    let err = h
        .engine
        .process_webhook(signed_notification("PAY-9", "settlement", "150000.00"))
        .await
        .unwrap_err();
    assert!(err.is_busy());

    let hooks = h.engine.webhook_logs("PAY-9").await.unwrap();
    assert_eq!(hooks.len(), 1);
    assert_eq!(
        hooks[0].processing_error.as_deref(),
        Some("Resource busy, try again")
    );
    let tx = h.engine.get_by_payment_order_id("PAY-9").await.unwrap();
    assert_eq!(tx.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_history_and_sweep() {
    let h = payment_harness(RecordingNotifier::default());
    let order_id = Uuid::new_v4();
    for id in ["PAY-A", "PAY-B"] {
        h.engine
            .create_snap_token(create_request(order_id, id))
            .await
            .unwrap();
    }
    h.engine
        .create_snap_token(create_request(Uuid::new_v4(), "PAY-C"))
        .await
        .unwrap();

    assert_eq!(h.engine.history_for_order(order_id).await.unwrap().len(), 2);
    let latest = h.engine.latest_for_order(order_id).await.unwrap();
    assert_eq!(latest.order_id, order_id);
    assert_eq!(
        h.engine.latest_for_order(Uuid::new_v4()).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );

    h.gateway.script("expire", None);
    let outcomes = h.engine.sweep_pending(10).await.unwrap();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.status == Some(PaymentStatus::Expired)));

    let expired = PaymentFilter {
        status: Some(PaymentStatus::Expired),
        order_id: Some(order_id),
        ..Default::default()
    };
    let page = h.engine.list(&expired, Pagination::default()).await.unwrap();
    assert_eq!(page.total, 2);
    assert!(h.engine.sweep_pending(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_gateway_outage_persists_nothing() {
    let h = payment_harness(RecordingNotifier::default());
    h.gateway.fail_create.store(true, Ordering::SeqCst);

    let err = h
        .engine
        .create_snap_token(create_request(Uuid::new_v4(), "PAY-G"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Gateway { .. }));
    assert_eq!(err.kind(), ErrorKind::InternalServerError);
    assert_eq!(
        h.engine.get_by_payment_order_id("PAY-G").await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert!(!h.locker.is_held(&payment_create_key("PAY-G")));

    h.gateway.fail_create.store(false, Ordering::SeqCst);
    let tx = h
        .engine
        .create_snap_token(create_request(Uuid::new_v4(), "PAY-G"))
        .await
        .unwrap();
    assert_eq!(tx.status, PaymentStatus::Pending);
    assert_eq!(h.engine.status_logs("PAY-G").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_tracing_notifier_confirms_settlement() {
    let h = payment_harness(RecordingNotifier::default());
    let engine = h.engine_with(Arc::new(TracingNotifier));
    engine
        .create_snap_token(create_request(Uuid::new_v4(), "PAY-T"))
        .await
        .unwrap();

    let tx = engine
        .process_webhook(signed_notification("PAY-T", "settlement", "150000.00"))
        .await
        .unwrap();

    assert_eq!(tx.status, PaymentStatus::Success);
    assert!(h.notifier.events.lock().unwrap().is_empty());
    let logs = engine.status_logs("PAY-T").await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[1].source, PaymentSource::Webhook);
}
