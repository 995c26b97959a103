use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use tradepost_auth::{AuthError, TokenResolver};

use crate::app::errors::json_error;
use crate::context::UserContext;

#[derive(Clone)]
pub struct AuthState {
    pub resolver: Arc<dyn TokenResolver>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_bearer(req.headers())?;

    let claims = state
        .resolver
        .resolve(token, Utc::now())
        .map_err(|e| match e {
            AuthError::Expired => {
                json_error(StatusCode::UNAUTHORIZED, "token_expired", "token has expired")
            }
            AuthError::Unauthorized => {
                json_error(StatusCode::UNAUTHORIZED, "unauthorized", "invalid token")
            }
        })?;

    req.extensions_mut()
        .insert(UserContext::new(claims.sub, claims.roles.clone()));

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, Response> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| {
            json_error(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing Authorization header",
            )
        })?;

    let header = header.to_str().map_err(|_| {
        json_error(StatusCode::UNAUTHORIZED, "unauthorized", "malformed Authorization header")
    })?;

    let header = header.strip_prefix("Bearer ").ok_or_else(|| {
        json_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Authorization must use the Bearer scheme",
        )
    })?;

    let token = header.trim();
    if token.is_empty() {
        return Err(json_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "empty bearer token",
        ));
    }

    Ok(token)
}
