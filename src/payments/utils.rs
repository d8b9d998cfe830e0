use crate::payments::error::{GatewayError, GatewayResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// Longest pause between two attempts.
const MAX_BACKOFF_SHIFT: u32 = 5;

/// Exponential backoff for the given zero-based attempt, capped at 32s.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(MAX_BACKOFF_SHIFT))
}

/// Decoded gateway response together with its HTTP status.
#[derive(Debug, Clone)]
pub struct GatewayReply<T> {
    pub http_status: u16,
    pub body: T,
}

impl<T> GatewayReply<T> {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.http_status)
    }
}

#[derive(Clone)]
pub struct GatewayHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl GatewayHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Configuration {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    /// Send a JSON request and decode the body.
    ///
    /// Connection failures, 429 and 5xx answers are retried with exponential
    /// backoff and end up as [`GatewayError::Transport`]. A 4xx answer whose
    /// body still decodes as `T` is handed back so the caller can read the
    /// gateway's own message; an undecodable 4xx body is a business failure.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: &str,
        body: Option<&JsonValue>,
    ) -> GatewayResult<GatewayReply<T>> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self
                .client
                .request(method.clone(), url)
                .timeout(self.timeout)
                .bearer_auth(bearer_token);
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    let message = if e.is_timeout() {
                        format!("gateway request timed out after {:?}", self.timeout)
                    } else {
                        format!("gateway request failed: {}", e)
                    };
                    last_error = Some(GatewayError::transport(message));
                    if attempt < self.max_retries {
                        warn!(attempt = attempt + 1, url = %url, "gateway unreachable, retrying");
                        tokio::time::sleep(backoff_delay(attempt)).await;
                    }
                    continue;
                }
            };

            let status = response.status();
            let text = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    last_error = Some(GatewayError::Transport {
                        message: format!("failed to read gateway response: {}", e),
                        http_status: Some(status.as_u16()),
                    });
                    continue;
                }
            };

            if status.as_u16() == 429 || status.is_server_error() {
                last_error = Some(GatewayError::Transport {
                    message: format!("HTTP {}: {}", status, text),
                    http_status: Some(status.as_u16()),
                });
                if attempt < self.max_retries {
                    warn!(
                        status = %status,
                        attempt = attempt + 1,
                        "gateway server error, retrying"
                    );
                    tokio::time::sleep(backoff_delay(attempt)).await;
                }
                continue;
            }

            return match serde_json::from_str::<T>(&text) {
                Ok(body) => Ok(GatewayReply {
                    http_status: status.as_u16(),
                    body,
                }),
                Err(e) if status.is_success() => Err(GatewayError::Transport {
                    message: format!("invalid gateway JSON response: {}", e),
                    http_status: Some(status.as_u16()),
                }),
                Err(_) => Err(GatewayError::Business {
                    message: format!("HTTP {}: {}", status, text),
                    http_status: Some(status.as_u16()),
                }),
            };
        }

        Err(last_error.unwrap_or_else(|| GatewayError::transport("gateway request failed")))
    }
}

/// Hex-encoded HMAC-SHA256 of `payload`.
pub fn hmac_sha256_hex(payload: &[u8], secret: &str) -> Option<String> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    match hmac_sha256_hex(payload, secret) {
        Some(computed) => secure_eq(
            computed.as_bytes(),
            signature.trim().to_lowercase().as_bytes(),
        ),
        None => false,
    }
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
