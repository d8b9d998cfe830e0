use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::auth::AuthenticatedUser;
use crate::error::{AppError, AppErrorKind, ValidationError};
use crate::middleware::error::tag_request;
use crate::payments::provider::PaymentGateway;
use crate::payments::types::WebhookNotification;
use crate::services::reconciliation::{InitiatePaymentRequest, ReconciliationEngine};
use crate::workers::verification_scheduler::VerificationScheduler;

/// Signature headers the gateway may send, checked in order.
const SIGNATURE_HEADERS: [&str; 2] = ["chapa-signature", "x-chapa-signature"];

#[derive(Clone)]
pub struct PaymentsState {
    pub engine: Arc<ReconciliationEngine>,
    pub scheduler: VerificationScheduler,
    pub gateway: Arc<dyn PaymentGateway>,
    /// Reject unsigned or badly signed webhooks. Off only when no webhook
    /// secret is configured.
    pub require_signature: bool,
}

pub fn router(state: PaymentsState) -> Router {
    Router::new()
        .route("/payments/initiate", post(initiate_payment))
        .route("/payments/verify/{tx_ref}", get(verify_payment))
        .route("/payments/webhook", post(payment_webhook))
        .with_state(state)
}

fn malformed_body(reason: impl Into<String>) -> AppError {
    AppError::new(AppErrorKind::Validation(ValidationError::MalformedBody {
        reason: reason.into(),
    }))
}

/// POST /payments/initiate
pub async fn initiate_payment(
    State(state): State<PaymentsState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    headers: HeaderMap,
    body: Result<Json<InitiatePaymentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = body.map_err(|e| tag_request(malformed_body(e.body_text()), &headers))?;

    let booking_id = request.booking_id;
    let initiated = state
        .engine
        .initiate(user_id, request)
        .await
        .map_err(|e| tag_request(e, &headers))?;

    info!(
        user_id = %user_id,
        booking_id = %booking_id,
        tx_ref = %initiated.tx_ref,
        "checkout session opened"
    );
    Ok((StatusCode::OK, Json(initiated)))
}

/// GET /payments/verify/{tx_ref}
pub async fn verify_payment(
    State(state): State<PaymentsState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(tx_ref): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let snapshot = state
        .engine
        .verify(user_id, &tx_ref)
        .await
        .map_err(|e| tag_request(e, &headers))?;
    Ok(Json(snapshot))
}

/// POST /payments/webhook
///
/// The body is taken raw so the signature is checked over the exact bytes
/// the gateway signed.
pub async fn payment_webhook(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, AppError> {
    if state.require_signature {
        let signature = SIGNATURE_HEADERS
            .iter()
            .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()));

        let Some(signature) = signature else {
            warn!(gateway = state.gateway.name(), "Missing webhook signature");
            return Err(tag_request(
                AppError::unauthenticated("missing webhook signature"),
                &headers,
            ));
        };
        if !state
            .gateway
            .verify_webhook_signature(body.as_bytes(), signature)
        {
            warn!(gateway = state.gateway.name(), "Invalid webhook signature");
            return Err(tag_request(
                AppError::unauthenticated("invalid webhook signature"),
                &headers,
            ));
        }
    }

    let notification: WebhookNotification = serde_json::from_str(&body).map_err(|e| {
        warn!(gateway = state.gateway.name(), error = %e, "Invalid webhook payload");
        tag_request(malformed_body(e.to_string()), &headers)
    })?;

    info!(
        tx_ref = %notification.tx_ref,
        status = %notification.status,
        "Received payment webhook"
    );

    let ack = state
        .engine
        .handle_webhook(notification)
        .await
        .map_err(|e| tag_request(e, &headers))?;

    // Re-verify with the gateway regardless of what the webhook claimed.
    state.scheduler.schedule_follow_up(ack.tx_ref.clone());

    Ok((StatusCode::OK, Json(ack)))
}
