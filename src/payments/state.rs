//! Payment state machine.
//!
//! Every status change a payment can undergo is decided here, by one pure
//! function, regardless of whether the signal came from the initiation call,
//! a user-triggered verification, a gateway webhook or a scheduled poll. The
//! stores apply the returned [`Transition`] atomically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
    Expired,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_db_status())
    }
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status.to_lowercase().as_str() {
            "pending" => Some(PaymentStatus::Pending),
            "success" => Some(PaymentStatus::Success),
            "failed" => Some(PaymentStatus::Failed),
            "cancelled" => Some(PaymentStatus::Cancelled),
            "expired" => Some(PaymentStatus::Expired),
            _ => None,
        }
    }

    pub fn to_db_status(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_db_status())
    }
}

impl BookingStatus {
    pub fn from_db_status(status: &str) -> Option<Self> {
        match status.to_lowercase().as_str() {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "completed" => Some(BookingStatus::Completed),
            _ => None,
        }
    }

    pub fn to_db_status(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    /// Only pending bookings accept new payment attempts.
    pub fn is_payable(&self) -> bool {
        matches!(self, BookingStatus::Pending)
    }
}

/// Where a signal originated. Recorded for the audit log only; it never
/// influences the decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Initiation,
    Verify,
    Webhook,
    Poll,
}

impl std::fmt::Display for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SignalSource::Initiation => "initiation",
            SignalSource::Verify => "verify",
            SignalSource::Webhook => "webhook",
            SignalSource::Poll => "poll",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignalOutcome {
    Success,
    Failed,
    Cancelled,
    Expired,
}

impl SignalOutcome {
    pub fn target_status(&self) -> PaymentStatus {
        match self {
            SignalOutcome::Success => PaymentStatus::Success,
            SignalOutcome::Failed => PaymentStatus::Failed,
            SignalOutcome::Cancelled => PaymentStatus::Cancelled,
            SignalOutcome::Expired => PaymentStatus::Expired,
        }
    }
}

/// Normalized terminal signal for one payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSignal {
    pub tx_ref: String,
    pub source: SignalSource,
    pub outcome: SignalOutcome,
    pub gateway_tx_id: Option<String>,
    pub message: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl PaymentSignal {
    pub fn new(tx_ref: impl Into<String>, source: SignalSource, outcome: SignalOutcome) -> Self {
        Self {
            tx_ref: tx_ref.into(),
            source,
            outcome,
            gateway_tx_id: None,
            message: None,
            observed_at: Utc::now(),
        }
    }

    pub fn with_gateway_tx_id(mut self, gateway_tx_id: Option<String>) -> Self {
        self.gateway_tx_id = gateway_tx_id;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Error message persisted for non-success outcomes.
    pub fn failure_message(&self) -> String {
        self.message.clone().unwrap_or_else(|| match self.outcome {
            SignalOutcome::Success => String::new(),
            SignalOutcome::Failed => "Payment failed".to_string(),
            SignalOutcome::Cancelled => "Payment cancelled".to_string(),
            SignalOutcome::Expired => "Payment expired".to_string(),
        })
    }
}

/// What a store must do with a signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    /// Move the pending payment to `to`; confirm the booking when asked.
    Apply {
        to: PaymentStatus,
        confirm_booking: bool,
    },
    /// Same terminal state already recorded; nothing to do.
    Duplicate,
    /// Payment is terminal in a different state; the signal is ignored.
    Conflict {
        current: PaymentStatus,
        requested: PaymentStatus,
    },
    /// Another payment already settled the booking; this one is failed.
    Superseded { settled_by: String },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Apply { .. } | Transition::Superseded { .. })
    }
}

/// Decide how `outcome` affects a payment currently in `payment`, whose
/// booking is in `booking`. `settled_by` names another payment of the same
/// booking that already reached `success`, if any.
pub fn decide(
    payment: PaymentStatus,
    booking: BookingStatus,
    settled_by: Option<&str>,
    outcome: SignalOutcome,
) -> Transition {
    let requested = outcome.target_status();

    if payment.is_terminal() {
        return if payment == requested {
            Transition::Duplicate
        } else {
            Transition::Conflict {
                current: payment,
                requested,
            }
        };
    }

    match (outcome, settled_by) {
        (SignalOutcome::Success, Some(other)) => Transition::Superseded {
            settled_by: other.to_string(),
        },
        (SignalOutcome::Success, None) => Transition::Apply {
            to: PaymentStatus::Success,
            confirm_booking: booking != BookingStatus::Confirmed,
        },
        (_, _) => Transition::Apply {
            to: requested,
            confirm_booking: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_OUTCOMES: [SignalOutcome; 4] = [
        SignalOutcome::Success,
        SignalOutcome::Failed,
        SignalOutcome::Cancelled,
        SignalOutcome::Expired,
    ];

    #[test]
    fn pending_payment_moves_to_requested_state() {
        for outcome in ALL_OUTCOMES {
            let transition = decide(
                PaymentStatus::Pending,
                BookingStatus::Pending,
                None,
                outcome,
            );
            assert_eq!(
                transition,
                Transition::Apply {
                    to: outcome.target_status(),
                    confirm_booking: outcome == SignalOutcome::Success,
                }
            );
        }
    }

    #[test]
    fn success_does_not_reconfirm_confirmed_booking() {
        let transition = decide(
            PaymentStatus::Pending,
            BookingStatus::Confirmed,
            None,
            SignalOutcome::Success,
        );
        assert_eq!(
            transition,
            Transition::Apply {
                to: PaymentStatus::Success,
                confirm_booking: false,
            }
        );
    }

    #[test]
    fn repeated_terminal_signal_is_duplicate() {
        for outcome in ALL_OUTCOMES {
            let transition = decide(
                outcome.target_status(),
                BookingStatus::Confirmed,
                None,
                outcome,
            );
            assert_eq!(transition, Transition::Duplicate);
        }
    }

    #[test]
    fn success_is_sticky_against_failure() {
        let transition = decide(
            PaymentStatus::Success,
            BookingStatus::Confirmed,
            None,
            SignalOutcome::Failed,
        );
        assert_eq!(
            transition,
            Transition::Conflict {
                current: PaymentStatus::Success,
                requested: PaymentStatus::Failed,
            }
        );
    }

    #[test]
    fn failure_is_sticky_against_success() {
        let transition = decide(
            PaymentStatus::Failed,
            BookingStatus::Pending,
            None,
            SignalOutcome::Success,
        );
        assert!(matches!(transition, Transition::Conflict { .. }));
        assert!(!transition.is_applied());
    }

    #[test]
    fn success_on_already_settled_booking_is_superseded() {
        let transition = decide(
            PaymentStatus::Pending,
            BookingStatus::Confirmed,
            Some("TRX-OTHER-1"),
            SignalOutcome::Success,
        );
        assert_eq!(
            transition,
            Transition::Superseded {
                settled_by: "TRX-OTHER-1".to_string()
            }
        );
    }

    #[test]
    fn only_success_ever_confirms_a_booking() {
        for outcome in [
            SignalOutcome::Failed,
            SignalOutcome::Cancelled,
            SignalOutcome::Expired,
        ] {
            for settled_by in [None, Some("TRX-OTHER-1")] {
                let transition =
                    decide(PaymentStatus::Pending, BookingStatus::Pending, settled_by, outcome);
                assert!(!matches!(
                    transition,
                    Transition::Apply {
                        confirm_booking: true,
                        ..
                    }
                ));
            }
        }
    }

    #[test]
    fn status_db_round_trip() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Success,
            PaymentStatus::Failed,
            PaymentStatus::Cancelled,
            PaymentStatus::Expired,
        ] {
            assert_eq!(
                PaymentStatus::from_db_status(status.to_db_status()),
                Some(status)
            );
        }
        assert_eq!(PaymentStatus::from_db_status("refunded"), None);
        assert_eq!(
            BookingStatus::from_db_status("confirmed"),
            Some(BookingStatus::Confirmed)
        );
    }

    #[test]
    fn failure_message_defaults_per_outcome() {
        let signal = PaymentSignal::new("TRX-1", SignalSource::Webhook, SignalOutcome::Cancelled);
        assert_eq!(signal.failure_message(), "Payment cancelled");
        let signal = signal.with_message("customer abandoned checkout");
        assert_eq!(signal.failure_message(), "customer abandoned checkout");
    }
}
