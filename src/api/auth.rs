use crate::error::AppError;
use crate::middleware::error::tag_request;
use axum::extract::FromRequestParts;
use http::request::Parts;
use uuid::Uuid;

/// Header set by the upstream auth proxy once it has authenticated the caller.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Identity of the caller, as asserted by the auth proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub Uuid);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let reject = |reason: &str| tag_request(AppError::unauthenticated(reason), &parts.headers);

        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| reject("missing user identity"))?;

        Uuid::parse_str(value.trim())
            .map(AuthenticatedUser)
            .map_err(|_| reject("invalid user identity"))
    }
}
