use crate::database::error::DatabaseError;
use crate::payments::state::{BookingStatus, PaymentSignal, PaymentStatus, SignalSource, Transition};
use crate::payments::types::{CustomerContact, PaymentMethod};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// One attempt to pay for a booking. Never deleted.
#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub user_id: Uuid,
    pub tx_ref: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub status: PaymentStatus,
    pub gateway_tx_id: Option<String>,
    pub checkout_url: Option<String>,
    pub customer: CustomerContact,
    pub description: Option<String>,
    pub metadata: JsonValue,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// The slice of a booking the payment core reads and writes.
#[derive(Debug, Clone, Serialize)]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: BookingStatus,
    pub total_price: BigDecimal,
    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

/// Contact details of a user, read once when a payment is created.
#[derive(Debug, Clone, Serialize)]
pub struct CustomerProfile {
    pub user_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub booking_id: Uuid,
    pub user_id: Uuid,
    pub tx_ref: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub customer: CustomerContact,
    pub description: Option<String>,
    pub metadata: JsonValue,
}

/// Result of applying a signal: the decision plus both rows as committed.
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub transition: Transition,
    pub source: SignalSource,
    pub previous_status: PaymentStatus,
    pub payment: Payment,
    pub booking: Booking,
}

impl TransitionRecord {
    /// True exactly once per payment: when this signal moved it to `success`.
    pub fn newly_paid(&self) -> bool {
        matches!(
            self.transition,
            Transition::Apply {
                to: PaymentStatus::Success,
                ..
            }
        )
    }
}

/// Column values written to a payment when a transition is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentUpdate {
    pub status: PaymentStatus,
    pub gateway_tx_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl PaymentUpdate {
    /// `None` when the transition leaves the payment untouched.
    pub fn for_transition(transition: &Transition, signal: &PaymentSignal) -> Option<Self> {
        match transition {
            Transition::Apply {
                to: PaymentStatus::Success,
                ..
            } => Some(Self {
                status: PaymentStatus::Success,
                gateway_tx_id: signal.gateway_tx_id.clone(),
                paid_at: Some(signal.observed_at),
                error_message: None,
            }),
            Transition::Apply { to, .. } => Some(Self {
                status: *to,
                gateway_tx_id: signal.gateway_tx_id.clone(),
                paid_at: None,
                error_message: Some(signal.failure_message()),
            }),
            Transition::Superseded { settled_by } => Some(Self {
                status: PaymentStatus::Failed,
                gateway_tx_id: signal.gateway_tx_id.clone(),
                paid_at: None,
                error_message: Some(format!("booking already settled by {}", settled_by)),
            }),
            Transition::Duplicate | Transition::Conflict { .. } => None,
        }
    }

    /// Apply to an in-memory row. A missing gateway id keeps the stored one.
    pub fn apply_to(&self, payment: &mut Payment, now: DateTime<Utc>) {
        payment.status = self.status;
        if let Some(gateway_tx_id) = &self.gateway_tx_id {
            payment.gateway_tx_id = Some(gateway_tx_id.clone());
        }
        if self.paid_at.is_some() {
            payment.paid_at = self.paid_at;
        }
        if let Some(message) = &self.error_message {
            payment.error_message = Some(message.clone());
        }
        payment.updated_at = now;
    }
}

/// Durable state of payment attempts plus the narrow view of bookings and
/// users the core needs.
///
/// `apply_signal` is the only way a payment leaves `pending`, and it must be
/// atomic per payment: the read of both rows, [`crate::payments::state::decide`]
/// and the writes happen as one unit.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn find_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, DatabaseError>;

    async fn find_customer(&self, user_id: Uuid)
        -> Result<Option<CustomerProfile>, DatabaseError>;

    /// Fails with a unique violation when `tx_ref` already exists.
    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, DatabaseError>;

    async fn find_by_tx_ref(&self, tx_ref: &str) -> Result<Option<Payment>, DatabaseError>;

    /// Store the checkout session of a still-pending payment.
    async fn attach_checkout(
        &self,
        payment_id: Uuid,
        checkout_url: &str,
        gateway_tx_id: Option<&str>,
    ) -> Result<Payment, DatabaseError>;

    /// Count a verification attempt that never reached the gateway.
    async fn record_verification_error(
        &self,
        payment_id: Uuid,
        message: &str,
    ) -> Result<Payment, DatabaseError>;

    /// `Ok(None)` when no payment carries `signal.tx_ref`.
    async fn apply_signal(
        &self,
        signal: &PaymentSignal,
    ) -> Result<Option<TransitionRecord>, DatabaseError>;

    /// Pending payments created before `created_before`, oldest first.
    async fn find_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, DatabaseError>;

    async fn health_check(&self) -> Result<(), DatabaseError>;
}
