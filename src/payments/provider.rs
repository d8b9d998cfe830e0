use crate::payments::error::GatewayResult;
use crate::payments::types::{CheckoutRequest, CheckoutSession, VerificationResult};
use async_trait::async_trait;

/// Outbound adapter to the hosted-checkout gateway.
///
/// Implementations only perform I/O; interpreting the result and mutating
/// payments is the reconciliation engine's job.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate(&self, request: CheckoutRequest) -> GatewayResult<CheckoutSession>;

    async fn verify(&self, tx_ref: &str) -> GatewayResult<VerificationResult>;

    fn name(&self) -> &'static str;

    /// Check a webhook body against its signature header.
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool;
}
