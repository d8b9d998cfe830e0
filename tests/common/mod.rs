//! Shared fixtures for the integration tests.
//!
//! Everything runs against the in-memory store and a scripted gateway, so no
//! database or network is needed.

#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use booking_payments::database::{Booking, CustomerProfile, InMemoryPaymentStore};
use booking_payments::payments::error::{GatewayError, GatewayResult};
use booking_payments::payments::provider::PaymentGateway;
use booking_payments::payments::state::BookingStatus;
use booking_payments::payments::types::{
    CheckoutRequest, CheckoutSession, GatewayStatus, VerificationResult,
};
use booking_payments::payments::utils::verify_hmac_sha256_hex;
use booking_payments::services::notification::{
    EmailMessage, Mailer, NotificationConfig, NotificationDispatcher, NotificationError,
};
use booking_payments::services::reconciliation::ReconciliationEngine;
use booking_payments::workers::verification_scheduler::{SchedulerConfig, VerificationScheduler};
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const CHECKOUT_URL: &str = "https://pay/x";
pub const GATEWAY_TX_ID: &str = "GTX1";
pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const CUSTOMER_EMAIL: &str = "owner@example.com";

/// Gateway double whose answers are set per test.
///
/// Initiation succeeds with [`CHECKOUT_URL`] unless told otherwise;
/// verification reports `pending` for any reference without a scripted answer.
#[derive(Default)]
pub struct ScriptedGateway {
    initiate_reply: Mutex<Option<GatewayResult<CheckoutSession>>>,
    verify_replies: Mutex<HashMap<String, GatewayResult<VerificationResult>>>,
    verify_calls: AtomicUsize,
    secret: Option<String>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(secret: &str) -> Self {
        Self {
            secret: Some(secret.to_string()),
            ..Self::default()
        }
    }

    pub fn fail_initiation(&self, err: GatewayError) {
        *self.initiate_reply.lock().unwrap() = Some(Err(err));
    }

    pub fn report(&self, tx_ref: &str, status: GatewayStatus) {
        self.verify_replies.lock().unwrap().insert(
            tx_ref.to_string(),
            Ok(VerificationResult {
                tx_ref: tx_ref.to_string(),
                status,
                gateway_tx_id: Some(GATEWAY_TX_ID.to_string()),
                amount: None,
                currency: Some("ETB".to_string()),
                message: None,
            }),
        );
    }

    pub fn fail_verification(&self, tx_ref: &str, err: GatewayError) {
        self.verify_replies
            .lock()
            .unwrap()
            .insert(tx_ref.to_string(), Err(err));
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn initiate(&self, _request: CheckoutRequest) -> GatewayResult<CheckoutSession> {
        match self.initiate_reply.lock().unwrap().clone() {
            Some(reply) => reply,
            None => Ok(CheckoutSession {
                checkout_url: CHECKOUT_URL.to_string(),
                gateway_tx_id: Some(GATEWAY_TX_ID.to_string()),
            }),
        }
    }

    async fn verify(&self, tx_ref: &str) -> GatewayResult<VerificationResult> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.verify_replies.lock().unwrap().get(tx_ref).cloned();
        scripted.unwrap_or_else(|| {
            Ok(VerificationResult {
                tx_ref: tx_ref.to_string(),
                status: GatewayStatus::Pending,
                gateway_tx_id: None,
                amount: None,
                currency: None,
                message: None,
            })
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        match &self.secret {
            Some(secret) => verify_hmac_sha256_hex(payload, secret, signature),
            None => false,
        }
    }
}

/// Mailer that keeps every message it is handed, optionally reporting each
/// send as failed after recording it.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
    failing: AtomicBool,
}

impl RecordingMailer {
    pub fn fail_sends(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Wait for detached send tasks to land, up to one second.
    pub async fn wait_for(&self, count: usize) -> Vec<EmailMessage> {
        for _ in 0..100 {
            if self.sent.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(message);
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Transport("smtp relay refused".to_string()));
        }
        Ok(())
    }
}

pub struct TestContext {
    pub store: Arc<InMemoryPaymentStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub mailer: Arc<RecordingMailer>,
    pub engine: Arc<ReconciliationEngine>,
    pub scheduler: VerificationScheduler,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_gateway(ScriptedGateway::new())
    }

    pub fn with_gateway(gateway: ScriptedGateway) -> Self {
        let store = Arc::new(InMemoryPaymentStore::new());
        let gateway = Arc::new(gateway);
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = NotificationDispatcher::new(mailer.clone(), NotificationConfig::default());
        let engine = Arc::new(ReconciliationEngine::new(
            store.clone(),
            gateway.clone(),
            notifier,
            "ETB",
        ));
        let scheduler = VerificationScheduler::new(
            engine.clone(),
            SchedulerConfig {
                poll_interval: Duration::from_millis(50),
                grace_period: Duration::from_secs(60),
                batch_size: 50,
                concurrency: 4,
                follow_up_delay: Duration::from_millis(20),
            },
        );
        Self {
            store,
            gateway,
            mailer,
            engine,
            scheduler,
        }
    }

    /// Pending booking priced at `price` ETB, plus its owner's profile.
    /// Returns `(user_id, booking_id)`.
    pub fn seed_booking(&self, price: &str) -> (Uuid, Uuid) {
        self.seed_booking_with_status(price, BookingStatus::Pending)
    }

    pub fn seed_booking_with_status(&self, price: &str, status: BookingStatus) -> (Uuid, Uuid) {
        let user_id = Uuid::new_v4();
        let booking_id = Uuid::new_v4();
        self.store
            .insert_booking(Booking {
                id: booking_id,
                user_id,
                status,
                total_price: BigDecimal::from_str(price).unwrap(),
                check_in: NaiveDate::from_ymd_opt(2026, 12, 1),
                check_out: NaiveDate::from_ymd_opt(2026, 12, 4),
                updated_at: Utc::now(),
            })
            .unwrap();
        self.store
            .insert_customer(CustomerProfile {
                user_id,
                email: CUSTOMER_EMAIL.to_string(),
                first_name: "Abebe".to_string(),
                last_name: "Kebede".to_string(),
                phone: Some("0911000000".to_string()),
            })
            .unwrap();
        (user_id, booking_id)
    }
}

pub fn initiate_request(booking_id: Uuid) -> booking_payments::services::reconciliation::InitiatePaymentRequest {
    serde_json::from_value(serde_json::json!({ "booking_id": booking_id })).unwrap()
}
