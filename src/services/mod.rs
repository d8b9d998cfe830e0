//! Services module for business logic and integrations

pub mod notification;
pub mod reconciliation;

pub use notification::{LogMailer, Mailer, NotificationDispatcher, PaymentConfirmation};
pub use reconciliation::{ReconciliationEngine, ReconciliationError};
