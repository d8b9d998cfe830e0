pub mod auth;
pub mod health;
pub mod payments;

use crate::health::HealthChecker;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub use payments::PaymentsState;

/// Full HTTP surface with request-id and access-log layers applied.
pub fn app(payments: PaymentsState, checker: HealthChecker) -> Router {
    Router::new()
        .merge(payments::router(payments))
        .merge(health::router(checker))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}
