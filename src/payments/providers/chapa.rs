use crate::config::ConfigError;
use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{CheckoutRequest, CheckoutSession, GatewayStatus, VerificationResult};
use crate::payments::utils::{verify_hmac_sha256_hex, GatewayHttpClient, GatewayReply};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_CHAPA_BASE_URL: &str = "https://api.chapa.co";

/// Upper bound for `CHAPA_MAX_RETRIES`; a user-facing verify waits through
/// every retry.
pub const MAX_CHAPA_RETRIES: u32 = 5;

#[derive(Debug, Clone)]
pub struct ChapaConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    /// Webhook URL handed to the gateway as `callback_url`.
    pub callback_url: Option<String>,
    /// Where the customer lands after checkout unless the request overrides it.
    pub return_url: Option<String>,
    pub checkout_title: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ChapaConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: None,
            base_url: DEFAULT_CHAPA_BASE_URL.to_string(),
            callback_url: None,
            return_url: None,
            checkout_title: "Booking Payment".to_string(),
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

impl ChapaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret_key = std::env::var("CHAPA_SECRET_KEY")
            .map_err(|_| ConfigError::MissingVariable("CHAPA_SECRET_KEY".to_string()))?;

        let defaults = Self::default();
        Ok(Self {
            secret_key,
            webhook_secret: std::env::var("CHAPA_WEBHOOK_SECRET")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            base_url: std::env::var("CHAPA_BASE_URL").unwrap_or(defaults.base_url),
            callback_url: std::env::var("CHAPA_CALLBACK_URL").ok(),
            return_url: std::env::var("CHAPA_RETURN_URL").ok(),
            checkout_title: std::env::var("CHAPA_CHECKOUT_TITLE")
                .unwrap_or(defaults.checkout_title),
            timeout_secs: std::env::var("CHAPA_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("CHAPA_TIMEOUT_SECS".to_string()))?,
            max_retries: std::env::var("CHAPA_MAX_RETRIES")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("CHAPA_MAX_RETRIES".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue("CHAPA_SECRET_KEY".to_string()));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "CHAPA_BASE_URL must be a valid URL".to_string(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("CHAPA_TIMEOUT_SECS".to_string()));
        }

        if self.max_retries > MAX_CHAPA_RETRIES {
            return Err(ConfigError::InvalidValue(format!(
                "CHAPA_MAX_RETRIES must be at most {}",
                MAX_CHAPA_RETRIES
            )));
        }

        Ok(())
    }
}

pub struct ChapaGateway {
    config: ChapaConfig,
    http: GatewayHttpClient,
}

impl ChapaGateway {
    pub fn new(config: ChapaConfig) -> GatewayResult<Self> {
        let http =
            GatewayHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn has_webhook_secret(&self) -> bool {
        self.config.webhook_secret.is_some()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Turn a non-success reply into a business error carrying the gateway's message.
    fn ensure_success<T>(reply: &GatewayReply<ChapaEnvelope<T>>) -> GatewayResult<()> {
        if reply.is_success() && reply.body.status.eq_ignore_ascii_case("success") {
            return Ok(());
        }
        Err(GatewayError::Business {
            message: reply.body.message_text(),
            http_status: Some(reply.http_status),
        })
    }
}

#[async_trait]
impl PaymentGateway for ChapaGateway {
    async fn initiate(&self, request: CheckoutRequest) -> GatewayResult<CheckoutSession> {
        let payload = serde_json::json!({
            "amount": request.amount.to_string(),
            "currency": request.currency,
            "email": request.customer.email,
            "first_name": request.customer.first_name,
            "last_name": request.customer.last_name,
            "phone_number": request.customer.phone,
            "tx_ref": request.tx_ref,
            "callback_url": self.config.callback_url,
            "return_url": request.return_url.or_else(|| self.config.return_url.clone()),
            "customization": {
                "title": request.title.unwrap_or_else(|| self.config.checkout_title.clone()),
                "description": request.description,
            },
        });

        let reply: GatewayReply<ChapaEnvelope<ChapaInitializeData>> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/transaction/initialize"),
                &self.config.secret_key,
                Some(&payload),
            )
            .await?;
        Self::ensure_success(&reply)?;

        let data = reply.body.data.ok_or_else(|| GatewayError::Transport {
            message: "gateway response is missing checkout data".to_string(),
            http_status: Some(reply.http_status),
        })?;
        info!(tx_ref = %request.tx_ref, "chapa checkout session created");

        Ok(CheckoutSession {
            checkout_url: data.checkout_url,
            gateway_tx_id: data.reference.or(data.id),
        })
    }

    async fn verify(&self, tx_ref: &str) -> GatewayResult<VerificationResult> {
        let reply: GatewayReply<ChapaEnvelope<ChapaVerifyData>> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/transaction/verify/{}", tx_ref)),
                &self.config.secret_key,
                None,
            )
            .await?;
        Self::ensure_success(&reply)?;

        let message = reply.body.message_text();
        let data = reply.body.data.ok_or_else(|| GatewayError::Transport {
            message: "gateway response is missing transaction data".to_string(),
            http_status: Some(reply.http_status),
        })?;

        let status = GatewayStatus::parse(&data.status);
        if status == GatewayStatus::Unknown {
            warn!(tx_ref = %tx_ref, gateway_status = %data.status, "unrecognized chapa status");
        }

        Ok(VerificationResult {
            tx_ref: data.tx_ref.unwrap_or_else(|| tx_ref.to_string()),
            status,
            gateway_tx_id: data.reference,
            amount: data.amount.map(|v| match v {
                JsonValue::String(s) => s,
                other => other.to_string(),
            }),
            currency: data.currency,
            message: Some(message),
        })
    }

    fn name(&self) -> &'static str {
        "chapa"
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        match self.config.webhook_secret.as_deref() {
            Some(secret) => verify_hmac_sha256_hex(payload, secret, signature),
            None => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChapaEnvelope<T> {
    #[serde(default)]
    message: JsonValue,
    #[serde(default)]
    status: String,
    data: Option<T>,
}

impl<T> ChapaEnvelope<T> {
    /// Chapa sends either a plain string or a map of field errors.
    fn message_text(&self) -> String {
        match &self.message {
            JsonValue::String(s) => s.clone(),
            JsonValue::Null => format!("gateway returned status '{}'", self.status),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChapaInitializeData {
    checkout_url: String,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChapaVerifyData {
    status: String,
    #[serde(default)]
    tx_ref: Option<String>,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    amount: Option<JsonValue>,
    #[serde(default)]
    currency: Option<String>,
}
