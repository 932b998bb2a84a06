//! Request authentication via the `token` cookie or a bearer header.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use super::error::ApiError;
use super::AppState;
use crate::models::User;

pub const TOKEN_COOKIE: &str = "token";

/// The signed-in user behind a request.
pub struct CurrentUser {
    pub user: User,
    pub token: String,
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = token_from_parts(parts).ok_or(ApiError::Unauthorized("No token"))?;

        match state.db.get_session_user(&token)? {
            Some(user) => Ok(Self { user, token }),
            None => {
                tracing::warn!("Rejected unknown or expired session token");
                Err(ApiError::Unauthorized("Token invalid"))
            }
        }
    }
}

/// A signed-in user with administrator rights.
pub struct AdminUser(pub User);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let CurrentUser { user, .. } = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            tracing::warn!("User {} attempted an admin action", user.id);
            return Err(ApiError::Forbidden("Not admin"));
        }
        Ok(Self(user))
    }
}

/// Cookie first, then `Authorization: Bearer <token>`.
fn token_from_parts(parts: &Parts) -> Option<String> {
    let from_cookie = parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == TOKEN_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string());

    from_cookie.or_else(|| {
        parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    })
}

pub fn session_cookie(token: &str, max_age_secs: i64) -> String {
    format!(
        "{}={}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}",
        TOKEN_COOKIE, token, max_age_secs
    )
}

pub fn cleared_cookie() -> String {
    session_cookie("", 0)
}
