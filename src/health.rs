//! Service health. Only the payment store is checked; gateway availability
//! does not affect the result.

use crate::database::payment_repository::PaymentStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error};

const STORE_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub version: &'static str,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Up,
    Down,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

impl ComponentHealth {
    fn up(elapsed: Duration) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms: Some(elapsed.as_millis()),
            details: None,
        }
    }

    fn down(details: impl Into<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details: Some(details.into()),
        }
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn PaymentStore>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn PaymentStore>) -> Self {
        Self { store }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let started = Instant::now();
        let store = match timeout(STORE_CHECK_TIMEOUT, self.store.health_check()).await {
            Ok(Ok(())) => {
                debug!(elapsed_ms = started.elapsed().as_millis() as u64, "payment store reachable");
                ComponentHealth::up(started.elapsed())
            }
            Ok(Err(e)) => {
                error!(error = %e, "payment store health check failed");
                ComponentHealth::down(e.to_string())
            }
            Err(_) => {
                error!(timeout = ?STORE_CHECK_TIMEOUT, "payment store health check timed out");
                ComponentHealth::down("timeout")
            }
        };

        let status = if store.status == ComponentState::Up {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        };

        HealthStatus {
            status,
            version: env!("CARGO_PKG_VERSION"),
            checks: HashMap::from([("payment_store".to_string(), store)]),
            timestamp: chrono::Utc::now(),
        }
    }
}
