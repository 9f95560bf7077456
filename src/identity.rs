use crate::entity::UserId;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

/// Header the authenticating gateway sets on every request it lets through.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The already-authenticated caller of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity(pub UserId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i64>().ok())
            .map(|id| Identity(UserId(id)))
            .ok_or((StatusCode::UNAUTHORIZED, "missing or invalid user identity"))
    }
}
