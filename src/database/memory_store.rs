use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::payment_repository::{
    Booking, CustomerProfile, NewPayment, Payment, PaymentStore, PaymentUpdate, TransitionRecord,
};
use crate::payments::state::{decide, BookingStatus, PaymentSignal, PaymentStatus, Transition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    bookings: HashMap<Uuid, Booking>,
    customers: HashMap<Uuid, CustomerProfile>,
    payments: HashMap<Uuid, Payment>,
    by_tx_ref: HashMap<String, Uuid>,
}

/// Process-local [`PaymentStore`].
///
/// Every operation runs inside one synchronous critical section, so a
/// transition is atomic with respect to every other store call. Used when no
/// `DATABASE_URL` is configured and throughout the test suite.
#[derive(Default)]
pub struct InMemoryPaymentStore {
    state: Mutex<MemoryState>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, DatabaseError> {
        self.state.lock().map_err(|_| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: "in-memory store lock poisoned".to_string(),
            })
        })
    }

    /// Register a booking owned by the listings application.
    pub fn insert_booking(&self, booking: Booking) -> Result<(), DatabaseError> {
        self.lock()?.bookings.insert(booking.id, booking);
        Ok(())
    }

    pub fn insert_customer(&self, customer: CustomerProfile) -> Result<(), DatabaseError> {
        self.lock()?.customers.insert(customer.user_id, customer);
        Ok(())
    }

    /// All payments of one booking, oldest first.
    pub fn payments_for_booking(&self, booking_id: Uuid) -> Result<Vec<Payment>, DatabaseError> {
        let state = self.lock()?;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.booking_id == booking_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    /// Backdate a payment so the verification scheduler treats it as stale.
    pub fn set_created_at(
        &self,
        payment_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let mut state = self.lock()?;
        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| DatabaseError::not_found("Payment", payment_id))?;
        payment.created_at = created_at;
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn find_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, DatabaseError> {
        Ok(self.lock()?.bookings.get(&booking_id).cloned())
    }

    async fn find_customer(
        &self,
        user_id: Uuid,
    ) -> Result<Option<CustomerProfile>, DatabaseError> {
        Ok(self.lock()?.customers.get(&user_id).cloned())
    }

    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, DatabaseError> {
        let mut state = self.lock()?;
        if state.by_tx_ref.contains_key(&payment.tx_ref) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "payments_tx_ref_key".to_string(),
            }));
        }

        let now = Utc::now();
        let row = Payment {
            id: Uuid::new_v4(),
            booking_id: payment.booking_id,
            user_id: payment.user_id,
            tx_ref: payment.tx_ref,
            amount: payment.amount,
            currency: payment.currency,
            payment_method: payment.payment_method,
            status: PaymentStatus::Pending,
            gateway_tx_id: None,
            checkout_url: None,
            customer: payment.customer,
            description: payment.description,
            metadata: payment.metadata,
            error_message: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            paid_at: None,
        };
        state.by_tx_ref.insert(row.tx_ref.clone(), row.id);
        state.payments.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_by_tx_ref(&self, tx_ref: &str) -> Result<Option<Payment>, DatabaseError> {
        let state = self.lock()?;
        Ok(state
            .by_tx_ref
            .get(tx_ref)
            .and_then(|id| state.payments.get(id))
            .cloned())
    }

    async fn attach_checkout(
        &self,
        payment_id: Uuid,
        checkout_url: &str,
        gateway_tx_id: Option<&str>,
    ) -> Result<Payment, DatabaseError> {
        let mut state = self.lock()?;
        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| DatabaseError::not_found("Payment", payment_id))?;
        payment.checkout_url = Some(checkout_url.to_string());
        if payment.gateway_tx_id.is_none() {
            payment.gateway_tx_id = gateway_tx_id.map(str::to_string);
        }
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn record_verification_error(
        &self,
        payment_id: Uuid,
        message: &str,
    ) -> Result<Payment, DatabaseError> {
        let mut state = self.lock()?;
        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| DatabaseError::not_found("Payment", payment_id))?;
        if payment.status == PaymentStatus::Pending {
            payment.retry_count += 1;
            payment.error_message = Some(message.to_string());
            payment.updated_at = Utc::now();
        }
        Ok(payment.clone())
    }

    async fn apply_signal(
        &self,
        signal: &PaymentSignal,
    ) -> Result<Option<TransitionRecord>, DatabaseError> {
        let mut state = self.lock()?;
        let Some(payment_id) = state.by_tx_ref.get(&signal.tx_ref).copied() else {
            return Ok(None);
        };
        let mut payment = state
            .payments
            .get(&payment_id)
            .cloned()
            .ok_or_else(|| DatabaseError::not_found("Payment", payment_id))?;
        let mut booking = state
            .bookings
            .get(&payment.booking_id)
            .cloned()
            .ok_or_else(|| DatabaseError::not_found("Booking", payment.booking_id))?;

        let settled_by = state
            .payments
            .values()
            .filter(|p| {
                p.booking_id == payment.booking_id
                    && p.id != payment.id
                    && p.status == PaymentStatus::Success
            })
            .min_by_key(|p| p.paid_at)
            .map(|p| p.tx_ref.clone());

        let previous_status = payment.status;
        let transition = decide(
            payment.status,
            booking.status,
            settled_by.as_deref(),
            signal.outcome,
        );

        let now = Utc::now();
        if let Some(update) = PaymentUpdate::for_transition(&transition, signal) {
            update.apply_to(&mut payment, now);
            state.payments.insert(payment.id, payment.clone());
        }
        if let Transition::Apply {
            confirm_booking: true,
            ..
        } = transition
        {
            booking.status = BookingStatus::Confirmed;
            booking.updated_at = now;
            state.bookings.insert(booking.id, booking.clone());
        }

        Ok(Some(TransitionRecord {
            transition,
            source: signal.source,
            previous_status,
            payment,
            booking,
        }))
    }

    async fn find_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, DatabaseError> {
        let state = self.lock()?;
        let mut stale: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Pending && p.created_at < created_before)
            .cloned()
            .collect();
        stale.sort_by_key(|p| p.created_at);
        stale.truncate(usize::try_from(limit.max(0)).unwrap_or(0));
        Ok(stale)
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        self.lock().map(|_| ())
    }
}
