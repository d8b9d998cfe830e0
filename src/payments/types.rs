use crate::payments::error::GatewayError;
use crate::payments::state::SignalOutcome;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Chapa,
    Telebirr,
    Bank,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Chapa => "chapa",
            PaymentMethod::Telebirr => "telebirr",
            PaymentMethod::Bank => "bank",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PaymentMethod::Chapa => "Chapa",
            PaymentMethod::Telebirr => "Telebirr",
            PaymentMethod::Bank => "Bank Transfer",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "chapa" => Ok(PaymentMethod::Chapa),
            "telebirr" => Ok(PaymentMethod::Telebirr),
            "bank" | "bank_transfer" => Ok(PaymentMethod::Bank),
            _ => Err(GatewayError::Configuration {
                message: format!("unsupported payment method: {}", value),
            }),
        }
    }
}

/// Transaction status as reported by the gateway.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
    Expired,
    Unknown,
}

impl GatewayStatus {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "success" | "successful" => GatewayStatus::Success,
            "failed" | "failure" => GatewayStatus::Failed,
            "cancelled" | "canceled" => GatewayStatus::Cancelled,
            "expired" => GatewayStatus::Expired,
            "pending" => GatewayStatus::Pending,
            _ => GatewayStatus::Unknown,
        }
    }

    /// Terminal outcome carried by this status, `None` while the gateway is
    /// still waiting on the customer.
    pub fn outcome(&self) -> Option<SignalOutcome> {
        match self {
            GatewayStatus::Success => Some(SignalOutcome::Success),
            GatewayStatus::Failed => Some(SignalOutcome::Failed),
            GatewayStatus::Cancelled => Some(SignalOutcome::Cancelled),
            GatewayStatus::Expired => Some(SignalOutcome::Expired),
            GatewayStatus::Pending | GatewayStatus::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomerContact {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

impl CustomerContact {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Everything the gateway needs to open a hosted checkout session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub tx_ref: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub customer: CustomerContact,
    pub return_url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckoutSession {
    pub checkout_url: String,
    pub gateway_tx_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub tx_ref: String,
    pub status: GatewayStatus,
    pub gateway_tx_id: Option<String>,
    pub amount: Option<String>,
    pub currency: Option<String>,
    pub message: Option<String>,
}

/// Webhook body posted by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookNotification {
    pub tx_ref: String,
    pub status: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
}

impl WebhookNotification {
    pub fn gateway_status(&self) -> GatewayStatus {
        GatewayStatus::parse(&self.status)
    }

    pub fn gateway_tx_id(&self) -> Option<String> {
        self.id
            .clone()
            .or_else(|| self.reference.clone())
            .filter(|v| !v.trim().is_empty())
    }
}
