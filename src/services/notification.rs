use crate::config::{env_or, ConfigError};
use crate::database::payment_repository::{Booking, Payment};
use crate::logging::mask_email;
use crate::payments::types::PaymentMethod;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub from_address: String,
    pub send_timeout: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            from_address: "noreply@travel.example".to_string(),
            send_timeout: Duration::from_secs(10),
        }
    }
}

impl NotificationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            from_address: std::env::var("MAIL_FROM").unwrap_or(defaults.from_address),
            send_timeout: Duration::from_secs(env_or("MAIL_SEND_TIMEOUT_SECS", 10u64)?),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.from_address.contains('@') {
            return Err(ConfigError::InvalidValue("MAIL_FROM".to_string()));
        }
        if self.send_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "MAIL_SEND_TIMEOUT_SECS".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("mail transport failed: {0}")]
    Transport(String),

    #[error("mail send timed out after {0:?}")]
    Timeout(Duration),
}

/// Facts needed to tell a customer their payment went through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub payment_id: Uuid,
    pub tx_ref: String,
    pub booking_id: Uuid,
    pub recipient_email: String,
    pub customer_name: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
}

impl PaymentConfirmation {
    pub fn new(payment: &Payment, booking: &Booking) -> Self {
        Self {
            payment_id: payment.id,
            tx_ref: payment.tx_ref.clone(),
            booking_id: booking.id,
            recipient_email: payment.customer.email.clone(),
            customer_name: payment.customer.full_name(),
            amount: payment.amount.clone(),
            currency: payment.currency.clone(),
            payment_method: payment.payment_method,
            check_in: booking.check_in,
            check_out: booking.check_out,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outbound mail transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), NotificationError>;
}

/// Writes outgoing mail to the log instead of delivering it.
///
/// This is the only transport the binary ships with, so no confirmation
/// email leaves the process. Real delivery (SMTP or a mail API) plugs in as
/// another [`Mailer`] handed to [`NotificationDispatcher::new`].
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), NotificationError> {
        info!(
            to = %mask_email(&message.to),
            subject = %message.subject,
            body_len = message.body.len(),
            "email dispatched to log transport"
        );
        Ok(())
    }
}

fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "n/a".to_string())
}

pub fn render_confirmation(confirmation: &PaymentConfirmation, from: &str) -> EmailMessage {
    let body = format!(
        "Dear {name},\n\n\
         Your payment of {amount} {currency} has been confirmed.\n\n\
         Booking Details:\n\
         - Booking ID: {booking}\n\
         - Check-in: {check_in}\n\
         - Check-out: {check_out}\n\
         - Total Paid: {amount} {currency}\n\
         - Payment Method: {method}\n\
         - Reference: {tx_ref}\n\n\
         Thank you for choosing our service!\n\n\
         Best regards,\n\
         Travel Booking Team\n",
        name = confirmation.customer_name,
        amount = confirmation.amount,
        currency = confirmation.currency,
        booking = confirmation.booking_id,
        check_in = format_date(confirmation.check_in),
        check_out = format_date(confirmation.check_out),
        method = confirmation.payment_method.display_name(),
        tx_ref = confirmation.tx_ref,
    );

    EmailMessage {
        from: from.to_string(),
        to: confirmation.recipient_email.clone(),
        subject: format!("Payment Confirmation - Booking #{}", confirmation.booking_id),
        body,
    }
}

/// Fire-and-forget delivery of payment confirmations.
///
/// Sends run on detached tasks: the caller never waits for them, and a mail
/// failure never reaches payment state.
#[derive(Clone)]
pub struct NotificationDispatcher {
    mailer: Arc<dyn Mailer>,
    config: NotificationConfig,
    submitted: Arc<AtomicU64>,
}

impl NotificationDispatcher {
    pub fn new(mailer: Arc<dyn Mailer>, config: NotificationConfig) -> Self {
        Self {
            mailer,
            config,
            submitted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of confirmations handed to the mailer since startup.
    pub fn submitted_count(&self) -> u64 {
        self.submitted.load(Ordering::SeqCst)
    }

    pub fn notify_success(&self, confirmation: PaymentConfirmation) -> JoinHandle<()> {
        self.submitted.fetch_add(1, Ordering::SeqCst);

        let mailer = self.mailer.clone();
        let timeout = self.config.send_timeout;
        let message = render_confirmation(&confirmation, &self.config.from_address);

        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, mailer.send(message)).await {
                Ok(result) => result,
                Err(_) => Err(NotificationError::Timeout(timeout)),
            };

            match result {
                Ok(()) => info!(
                    payment_id = %confirmation.payment_id,
                    booking_id = %confirmation.booking_id,
                    to = %mask_email(&confirmation.recipient_email),
                    "payment confirmation sent"
                ),
                Err(NotificationError::Timeout(after)) => warn!(
                    payment_id = %confirmation.payment_id,
                    timeout = ?after,
                    "payment confirmation timed out"
                ),
                Err(e) => error!(
                    payment_id = %confirmation.payment_id,
                    error = %e,
                    "payment confirmation failed"
                ),
            }
        })
    }
}
