use std::sync::Arc;

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};

use crate::{AppState, errors::AppError, lifecycle::Actor, models::Claims, utils::decode_jwt};

/// Authentication middleware validating JWT access tokens.
///
/// On success the request carries an [`Actor`] extension for the handlers.
///
/// # Errors
/// Returns unauthorized if the token is missing, invalid or a refresh token.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AppError::Unauthorized)?;
    let claims: Claims = decode_jwt(token, &state.config)?;
    if claims.refresh {
        return Err(AppError::Unauthorized);
    }

    let key = claims.sub.to_string();
    if state.rate_limiter.check_key(&key).is_err() {
        return Err(AppError::RateLimited);
    }

    req.extensions_mut().insert(Actor {
        user_id: claims.sub,
        role: claims.role,
    });

    Ok(next.run(req).await)
}

/// Rejects non-admin actors. Must run after [`auth_middleware`].
///
/// # Errors
/// Returns unauthorized without an actor, forbidden for readers.
pub async fn require_admin(req: Request<Body>, next: Next) -> Result<Response, AppError> {
    let actor = req
        .extensions()
        .get::<Actor>()
        .copied()
        .ok_or(AppError::Unauthorized)?;
    if !actor.is_admin() {
        return Err(AppError::Forbidden("admin role required".into()));
    }
    Ok(next.run(req).await)
}
