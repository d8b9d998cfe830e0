//! Reconciliation engine
//!
//! Owns every path by which a payment changes state: initiation, a
//! user-triggered verification, a gateway webhook and a scheduled poll. Each
//! path is reduced to a [`PaymentSignal`] and handed to the store, which runs
//! [`crate::payments::state::decide`] atomically. Side effects that must
//! happen exactly once (the confirmation email) are keyed off the returned
//! [`Transition`], never off the incoming signal.

use crate::database::error::DatabaseError;
use crate::database::payment_repository::{
    Booking, NewPayment, Payment, PaymentStore, TransitionRecord,
};
use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};
use crate::payments::error::GatewayError;
use crate::payments::provider::PaymentGateway;
use crate::payments::reference::{generate_tx_ref, is_well_formed};
use crate::payments::state::{
    BookingStatus, PaymentSignal, PaymentStatus, SignalOutcome, SignalSource, Transition,
};
use crate::payments::types::{
    CheckoutRequest, CustomerContact, PaymentMethod, VerificationResult, WebhookNotification,
};
use crate::services::notification::{NotificationDispatcher, PaymentConfirmation};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Width of the `customer_phone` column.
pub const MAX_PHONE_LEN: usize = 20;

#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error("booking {booking_id} not found")]
    BookingNotFound { booking_id: Uuid },

    #[error("booking {booking_id} is {status} and cannot be paid for")]
    BookingNotPayable {
        booking_id: Uuid,
        status: BookingStatus,
    },

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("payment {tx_ref} not found")]
    PaymentNotFound { tx_ref: String },

    #[error("payment reference {tx_ref} already exists")]
    DuplicateReference { tx_ref: String },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl ReconciliationError {
    fn validation(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<ReconciliationError> for AppError {
    fn from(err: ReconciliationError) -> Self {
        let kind = match err {
            ReconciliationError::BookingNotFound { booking_id } => {
                AppErrorKind::Domain(DomainError::BookingNotFound {
                    booking_id: booking_id.to_string(),
                })
            }
            ReconciliationError::BookingNotPayable { booking_id, status } => {
                AppErrorKind::Domain(DomainError::BookingNotPayable {
                    booking_id: booking_id.to_string(),
                    status: status.to_string(),
                })
            }
            ReconciliationError::Validation { field, reason } => {
                AppErrorKind::Validation(ValidationError::InvalidField { field, reason })
            }
            ReconciliationError::PaymentNotFound { tx_ref } => {
                AppErrorKind::Domain(DomainError::PaymentNotFound { tx_ref })
            }
            ReconciliationError::DuplicateReference { tx_ref } => {
                AppErrorKind::Domain(DomainError::DuplicateReference { tx_ref })
            }
            ReconciliationError::Gateway(e) => return e.into(),
            ReconciliationError::Database(e) => return e.into(),
        };
        AppError::new(kind)
    }
}

pub type ReconciliationResult<T> = Result<T, ReconciliationError>;

#[derive(Debug, Clone, Deserialize)]
pub struct InitiatePaymentRequest {
    pub booking_id: Uuid,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub return_url: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitiatedPayment {
    pub payment_id: Uuid,
    pub tx_ref: String,
    pub checkout_url: String,
    pub amount: BigDecimal,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentSnapshot {
    pub payment: Payment,
    pub booking: Booking,
}

/// How a webhook was absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalDisposition {
    Applied,
    Duplicate,
    Conflict,
    Superseded,
    /// Gateway reported a non-terminal status; nothing to apply yet.
    Pending,
}

impl From<&Transition> for SignalDisposition {
    fn from(transition: &Transition) -> Self {
        match transition {
            Transition::Apply { .. } => SignalDisposition::Applied,
            Transition::Duplicate => SignalDisposition::Duplicate,
            Transition::Conflict { .. } => SignalDisposition::Conflict,
            Transition::Superseded { .. } => SignalDisposition::Superseded,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub tx_ref: String,
    pub status: PaymentStatus,
    pub disposition: SignalDisposition,
}

pub struct ReconciliationEngine {
    store: Arc<dyn PaymentStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: NotificationDispatcher,
    currency: String,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: NotificationDispatcher,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            currency: currency.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn PaymentStore> {
        &self.store
    }

    pub fn notifier(&self) -> &NotificationDispatcher {
        &self.notifier
    }

    /// Create a payment for a pending booking and open a checkout session.
    ///
    /// Any gateway failure moves the new payment straight to `failed`.
    pub async fn initiate(
        &self,
        user_id: Uuid,
        request: InitiatePaymentRequest,
    ) -> ReconciliationResult<InitiatedPayment> {
        if let Some(url) = &request.return_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ReconciliationError::validation(
                    "return_url",
                    "must be an absolute http(s) URL",
                ));
            }
        }
        let phone_number = request
            .phone_number
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        if phone_number
            .as_ref()
            .is_some_and(|p| p.chars().count() > MAX_PHONE_LEN)
        {
            return Err(ReconciliationError::validation(
                "phone_number",
                format!("must be at most {} characters", MAX_PHONE_LEN),
            ));
        }
        let payment_method = match request.payment_method.as_deref() {
            Some(method) => PaymentMethod::from_str(method)
                .map_err(|e| ReconciliationError::validation("payment_method", e.gateway_message()))?,
            None => PaymentMethod::default(),
        };

        let booking = self
            .store
            .find_booking(request.booking_id)
            .await?
            .filter(|b| b.user_id == user_id)
            .ok_or(ReconciliationError::BookingNotFound {
                booking_id: request.booking_id,
            })?;
        if !booking.status.is_payable() {
            return Err(ReconciliationError::BookingNotPayable {
                booking_id: booking.id,
                status: booking.status,
            });
        }

        let customer = self
            .store
            .find_customer(user_id)
            .await?
            .ok_or_else(|| ReconciliationError::validation("user", "no customer profile"))?;
        let contact = CustomerContact {
            email: customer.email,
            first_name: customer.first_name,
            last_name: customer.last_name,
            phone: phone_number.or(customer.phone),
        };

        let tx_ref = generate_tx_ref();
        let description = format!("Payment for booking {}", booking.id);
        let payment = self
            .store
            .insert_payment(NewPayment {
                booking_id: booking.id,
                user_id,
                tx_ref: tx_ref.clone(),
                amount: booking.total_price.clone(),
                currency: self.currency.clone(),
                payment_method,
                customer: contact.clone(),
                description: Some(description.clone()),
                metadata: serde_json::json!({
                    "booking_id": booking.id,
                    "check_in": booking.check_in,
                    "check_out": booking.check_out,
                }),
            })
            .await
            .map_err(|e| {
                if e.is_unique_violation() {
                    ReconciliationError::DuplicateReference {
                        tx_ref: tx_ref.clone(),
                    }
                } else {
                    ReconciliationError::Database(e)
                }
            })?;

        info!(
            tx_ref = %tx_ref,
            payment_id = %payment.id,
            booking_id = %booking.id,
            amount = %payment.amount,
            currency = %payment.currency,
            "payment created"
        );

        let checkout = CheckoutRequest {
            tx_ref: tx_ref.clone(),
            amount: payment.amount.clone(),
            currency: payment.currency.clone(),
            customer: contact,
            return_url: request.return_url,
            title: None,
            description: Some(description),
        };

        match self.gateway.initiate(checkout).await {
            Ok(session) => {
                let payment = self
                    .store
                    .attach_checkout(
                        payment.id,
                        &session.checkout_url,
                        session.gateway_tx_id.as_deref(),
                    )
                    .await?;
                Ok(InitiatedPayment {
                    payment_id: payment.id,
                    tx_ref,
                    checkout_url: session.checkout_url,
                    amount: payment.amount,
                    currency: payment.currency,
                })
            }
            Err(err) => {
                warn!(
                    tx_ref = %tx_ref,
                    gateway = self.gateway.name(),
                    error = %err,
                    "checkout initiation failed"
                );
                let signal =
                    PaymentSignal::new(&tx_ref, SignalSource::Initiation, SignalOutcome::Failed)
                        .with_message(err.gateway_message());
                if let Err(e) = self.apply_signal(signal).await {
                    error!(tx_ref = %tx_ref, error = %e, "failed to record initiation failure");
                }
                Err(err.into())
            }
        }
    }

    /// Re-check a payment with the gateway on the owner's request.
    ///
    /// Terminal payments are answered from the store without a gateway call.
    pub async fn verify(&self, user_id: Uuid, tx_ref: &str) -> ReconciliationResult<PaymentSnapshot> {
        let payment = self
            .store
            .find_by_tx_ref(tx_ref)
            .await?
            .filter(|p| p.user_id == user_id)
            .ok_or_else(|| ReconciliationError::PaymentNotFound {
                tx_ref: tx_ref.to_string(),
            })?;

        if !payment.status.is_terminal() {
            if let Some(record) = self.reconcile_with_gateway(&payment, SignalSource::Verify).await? {
                return Ok(PaymentSnapshot {
                    payment: record.payment,
                    booking: record.booking,
                });
            }
        }

        self.snapshot(tx_ref).await
    }

    /// Absorb a gateway webhook. Unknown and malformed references are both
    /// reported as not found.
    pub async fn handle_webhook(
        &self,
        notification: WebhookNotification,
    ) -> ReconciliationResult<WebhookAck> {
        if !is_well_formed(&notification.tx_ref) {
            debug!(tx_ref = %notification.tx_ref, "webhook carries a malformed reference");
            return Err(ReconciliationError::PaymentNotFound {
                tx_ref: notification.tx_ref,
            });
        }

        let gateway_status = notification.gateway_status();
        let Some(outcome) = gateway_status.outcome() else {
            let payment = self
                .store
                .find_by_tx_ref(&notification.tx_ref)
                .await?
                .ok_or_else(|| ReconciliationError::PaymentNotFound {
                    tx_ref: notification.tx_ref.clone(),
                })?;
            debug!(
                tx_ref = %payment.tx_ref,
                gateway_status = %notification.status,
                "webhook carries no terminal status"
            );
            return Ok(WebhookAck {
                tx_ref: payment.tx_ref,
                status: payment.status,
                disposition: SignalDisposition::Pending,
            });
        };

        let signal = PaymentSignal::new(&notification.tx_ref, SignalSource::Webhook, outcome)
            .with_gateway_tx_id(notification.gateway_tx_id());
        let record = self
            .apply_signal(signal)
            .await?
            .ok_or_else(|| ReconciliationError::PaymentNotFound {
                tx_ref: notification.tx_ref.clone(),
            })?;

        Ok(WebhookAck {
            tx_ref: record.payment.tx_ref.clone(),
            status: record.payment.status,
            disposition: SignalDisposition::from(&record.transition),
        })
    }

    /// Scheduled re-check of one payment. `Ok(None)` when nothing changed.
    pub async fn poll(&self, tx_ref: &str) -> ReconciliationResult<Option<TransitionRecord>> {
        let payment = self
            .store
            .find_by_tx_ref(tx_ref)
            .await?
            .ok_or_else(|| ReconciliationError::PaymentNotFound {
                tx_ref: tx_ref.to_string(),
            })?;
        if payment.status.is_terminal() {
            return Ok(None);
        }
        self.reconcile_with_gateway(&payment, SignalSource::Poll).await
    }

    pub async fn snapshot(&self, tx_ref: &str) -> ReconciliationResult<PaymentSnapshot> {
        let payment = self
            .store
            .find_by_tx_ref(tx_ref)
            .await?
            .ok_or_else(|| ReconciliationError::PaymentNotFound {
                tx_ref: tx_ref.to_string(),
            })?;
        let booking = self
            .store
            .find_booking(payment.booking_id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Booking", payment.booking_id))?;
        Ok(PaymentSnapshot { payment, booking })
    }

    /// Feed one normalized signal through the state machine.
    ///
    /// The confirmation email goes out only when this call is the one that
    /// moved the payment to `success`.
    pub async fn apply_signal(
        &self,
        signal: PaymentSignal,
    ) -> ReconciliationResult<Option<TransitionRecord>> {
        let Some(record) = self.store.apply_signal(&signal).await? else {
            warn!(tx_ref = %signal.tx_ref, source = %signal.source, "signal for unknown payment");
            return Ok(None);
        };

        match &record.transition {
            Transition::Apply { to, confirm_booking } => info!(
                tx_ref = %signal.tx_ref,
                payment_id = %record.payment.id,
                booking_id = %record.booking.id,
                source = %signal.source,
                from = %record.previous_status,
                to = %to,
                booking_confirmed = *confirm_booking,
                "payment transitioned"
            ),
            Transition::Duplicate => debug!(
                tx_ref = %signal.tx_ref,
                source = %signal.source,
                status = %record.payment.status,
                "duplicate signal ignored"
            ),
            Transition::Conflict { current, requested } => warn!(
                tx_ref = %signal.tx_ref,
                source = %signal.source,
                current = %current,
                requested = %requested,
                "signal conflicts with terminal payment state; ignored"
            ),
            Transition::Superseded { settled_by } => error!(
                tx_ref = %signal.tx_ref,
                booking_id = %record.booking.id,
                settled_by = %settled_by,
                source = %signal.source,
                "second successful payment for an already settled booking; marked failed"
            ),
        }

        if record.newly_paid() {
            self.notifier
                .notify_success(PaymentConfirmation::new(&record.payment, &record.booking));
        }

        Ok(Some(record))
    }

    /// Ask the gateway about a pending payment and apply whatever it reports.
    ///
    /// Any gateway error fails the payment with the gateway's message. A
    /// transport failure also bumps the retry counter and is still returned
    /// so the caller sees the gateway as unavailable.
    async fn reconcile_with_gateway(
        &self,
        payment: &Payment,
        source: SignalSource,
    ) -> ReconciliationResult<Option<TransitionRecord>> {
        match self.gateway.verify(&payment.tx_ref).await {
            Ok(result) => self.apply_verification(payment, source, result).await,
            Err(err) if err.is_transport() => {
                warn!(
                    tx_ref = %payment.tx_ref,
                    source = %source,
                    retry_count = payment.retry_count + 1,
                    error = %err,
                    "gateway unreachable during verification"
                );
                self.store
                    .record_verification_error(payment.id, err.gateway_message())
                    .await?;
                let signal = PaymentSignal::new(&payment.tx_ref, source, SignalOutcome::Failed)
                    .with_message(err.gateway_message());
                if let Err(e) = self.apply_signal(signal).await {
                    error!(
                        tx_ref = %payment.tx_ref,
                        error = %e,
                        "failed to record verification failure"
                    );
                }
                Err(err.into())
            }
            Err(err) => {
                let signal = PaymentSignal::new(&payment.tx_ref, source, SignalOutcome::Failed)
                    .with_message(err.gateway_message());
                self.apply_signal(signal).await
            }
        }
    }

    async fn apply_verification(
        &self,
        payment: &Payment,
        source: SignalSource,
        result: VerificationResult,
    ) -> ReconciliationResult<Option<TransitionRecord>> {
        let Some(outcome) = result.status.outcome() else {
            debug!(tx_ref = %payment.tx_ref, source = %source, "gateway still reports pending");
            return Ok(None);
        };

        if let Some(reported) = result
            .amount
            .as_deref()
            .and_then(|a| BigDecimal::from_str(a).ok())
        {
            if reported != payment.amount {
                warn!(
                    tx_ref = %payment.tx_ref,
                    expected = %payment.amount,
                    reported = %reported,
                    "gateway reports a different amount"
                );
            }
        }

        let mut signal = PaymentSignal::new(&payment.tx_ref, source, outcome)
            .with_gateway_tx_id(result.gateway_tx_id);
        if outcome != SignalOutcome::Success {
            if let Some(message) = result.message {
                signal = signal.with_message(message);
            }
        }
        self.apply_signal(signal).await
    }
}
