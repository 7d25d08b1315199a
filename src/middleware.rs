use axum::{
    async_trait,
    extract::{rejection::JsonRejection, ConnectInfo, FromRequest, FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use validator::Validate;

use std::{net::SocketAddr, sync::Arc};

use crate::{
    auth::{self, AuthError},
    data::model::User,
    error::{failure, ApiError},
    rate_limit::RateLimiter,
    AppState,
};

/// Why a presented bearer token did not yield a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    Expired,
    Invalid,
    UnknownUser,
    Disabled,
}

impl From<AuthFailure> for ApiError {
    fn from(failure: AuthFailure) -> Self {
        match failure {
            AuthFailure::Expired => ApiError::Unauthorized("Token expired, please log in again"),
            AuthFailure::Invalid => ApiError::Unauthorized("Invalid authentication token"),
            AuthFailure::UnknownUser => {
                ApiError::Unauthorized("User does not exist or has been disabled")
            }
            AuthFailure::Disabled => ApiError::Forbidden("Account has been disabled"),
        }
    }
}

/// Identity attached to every API request by [`extract_user`].
#[derive(Debug, Clone)]
pub enum Session {
    Anonymous,
    User(User),
    Invalid(AuthFailure),
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub async fn extract_user<B>(
    State(state): State<Arc<AppState>>,
    mut req: Request<B>,
    next: Next<B>,
) -> Result<Response, ApiError>
where
    B: Send + 'static,
{
    let token = bearer_token(req.headers()).map(str::to_string);
    let session = match token {
        None => Session::Anonymous,
        Some(token) => match auth::verify_token(&token, &state.config.jwt_secret) {
            Err(AuthError::Expired) => Session::Invalid(AuthFailure::Expired),
            Err(_) => Session::Invalid(AuthFailure::Invalid),
            Ok(claims) => match state.users.find_by_id(claims.user_id).await? {
                Some(user) if user.is_active => Session::User(user),
                Some(_) => Session::Invalid(AuthFailure::Disabled),
                None => Session::Invalid(AuthFailure::UnknownUser),
            },
        },
    };

    if let Session::Invalid(failure) = &session {
        tracing::debug!("rejected bearer token: {:?}", failure);
    }

    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}

/// An authenticated, active user. Rejects with 401/403 otherwise.
pub struct RequireUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for RequireUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Session>() {
            Some(Session::User(user)) => Ok(RequireUser(user.clone())),
            Some(Session::Invalid(failure)) => Err((*failure).into()),
            _ => Err(ApiError::Unauthorized("Authentication token required")),
        }
    }
}

pub struct RequireAdmin(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let RequireUser(user) = RequireUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ApiError::Forbidden("Administrator permission required"));
        }
        Ok(RequireAdmin(user))
    }
}

/// Optional authentication: a missing or bad token is treated as anonymous.
pub struct MaybeUser(pub Option<User>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Session>() {
            Some(Session::User(user)) => Ok(MaybeUser(Some(user.clone()))),
            _ => Ok(MaybeUser(None)),
        }
    }
}

/// JSON body that has passed its `validator` rules.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S, B> FromRequest<S, B> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    Json<T>: FromRequest<S, B, Rejection = JsonRejection>,
    S: Send + Sync,
    B: Send + 'static,
{
    type Rejection = ApiError;

    async fn from_request(req: Request<B>, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        value.validate()?;
        Ok(ValidatedJson(value))
    }
}

/// First `X-Forwarded-For` entry, else the peer address.
pub fn client_key<B>(req: &Request<B>) -> String {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

async fn admit<B>(
    limiter: &RateLimiter,
    message: &'static str,
    req: Request<B>,
    next: Next<B>,
) -> Result<Response, ApiError>
where
    B: Send + 'static,
{
    let key = client_key(&req);
    if !limiter.check(&key) {
        tracing::warn!("rate limit exceeded for {}", key);
        return Err(ApiError::TooManyRequests(message));
    }
    Ok(next.run(req).await)
}

pub async fn api_rate_limit<B>(
    State(state): State<Arc<AppState>>,
    req: Request<B>,
    next: Next<B>,
) -> Result<Response, ApiError>
where
    B: Send + 'static,
{
    admit(
        &state.api_limiter,
        "Too many requests, please try again later",
        req,
        next,
    )
    .await
}

pub async fn ai_rate_limit<B>(
    State(state): State<Arc<AppState>>,
    req: Request<B>,
    next: Next<B>,
) -> Result<Response, ApiError>
where
    B: Send + 'static,
{
    admit(
        &state.ai_limiter,
        "Too many AI requests, please try again later",
        req,
        next,
    )
    .await
}

/// Hides internal error details outside development.
pub async fn handle_error<B>(
    State(state): State<Arc<AppState>>,
    req: Request<B>,
    next: Next<B>,
) -> Response
where
    B: Send + 'static,
{
    let response = next.run(req).await;

    if response.status() == StatusCode::INTERNAL_SERVER_ERROR && !state.config.is_dev() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(failure("Internal server error")),
        )
            .into_response();
    }

    response
}
