use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use shared_config::AppConfig;
use shared_models::auth::{Actor, User};
use shared_models::error::AppError;

use crate::jwt::validate_token;

fn bearer_token(request: &Request<Body>) -> Result<Option<&str>, AppError> {
    let Some(header) = request.headers().get("Authorization") else {
        return Ok(None);
    };

    let value = header
        .to_str()
        .map_err(|_| AppError::Auth("Invalid authorization header format".to_string()))?;

    value
        .strip_prefix("Bearer ")
        .map(Some)
        .ok_or_else(|| AppError::Auth("Invalid authorization header format".to_string()))
}

/// Requires a valid bearer token and stores the `User` and its `Actor` in the
/// request extensions.
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&request)?
        .ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))?;

    let user = validate_token(token, &config.supabase_jwt_secret)
        .map_err(|e| AppError::Auth(e.to_string()))?;

    request.extensions_mut().insert(user.actor());
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

/// Like `auth_middleware`, but lets requests without a token through as the
/// anonymous actor. A token that is present must still be valid.
pub async fn optional_auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let user = match bearer_token(&request)? {
        Some(token) => Some(
            validate_token(token, &config.supabase_jwt_secret)
                .map_err(|e| AppError::Auth(e.to_string()))?,
        ),
        None => None,
    };

    match user {
        Some(user) => {
            request.extensions_mut().insert(user.actor());
            request.extensions_mut().insert(user);
        }
        None => {
            request.extensions_mut().insert(Actor::anonymous());
        }
    }

    Ok(next.run(request).await)
}

pub fn extract_user<B>(request: &Request<B>) -> Result<User, AppError> {
    request
        .extensions()
        .get::<User>()
        .cloned()
        .ok_or_else(|| AppError::Auth("User not found in request extensions".to_string()))
}
