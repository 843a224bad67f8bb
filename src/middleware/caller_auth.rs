use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::db::{AppState, queries};
use crate::error::AppError;
use crate::models::{Caller, User};
use crate::util::extract_bearer_token;

/// Authenticated identity, inserted into request extensions.
#[derive(Clone)]
pub struct CallerContext {
    pub user: User,
    pub caller: Caller,
}

/// Resolve the bearer API key to a user.
fn authenticate_user(state: &AppState, headers: &HeaderMap) -> Result<User, AppError> {
    let api_key = extract_bearer_token(headers).ok_or(AppError::Unauthorized)?;
    let conn = state.db.get()?;
    queries::get_user_by_api_key(&conn, api_key)?.ok_or(AppError::Unauthorized)
}

/// Any authenticated user: customers act on their own licenses.
pub async fn caller_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = authenticate_user(&state, request.headers())?;
    let caller = Caller::from_user(&user);
    request
        .extensions_mut()
        .insert(CallerContext { user, caller });
    Ok(next.run(request).await)
}

/// Admin-only routes.
pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = authenticate_user(&state, request.headers())?;
    let caller = Caller::from_user(&user);
    if !caller.is_privileged() {
        tracing::debug!(user_id = %user.id, path = %request.uri().path(), "Admin route refused");
        return Err(AppError::Forbidden("Admin access required".into()));
    }
    request
        .extensions_mut()
        .insert(CallerContext { user, caller });
    Ok(next.run(request).await)
}
