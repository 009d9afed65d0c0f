//! API middleware.

#![allow(missing_docs)]

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use huddle_core::ConversationService;
use huddle_db::repositories::UserRepository;

use crate::delivery::DeliveryRegistry;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub conversation_service: ConversationService,
    pub user_repo: UserRepository,
    pub delivery: DeliveryRegistry,
}

/// Authentication middleware.
///
/// The session layer in front of this service has already verified the
/// caller; the bearer token carries the opaque user id it vouched for.
/// This middleware only resolves that id to a user row.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(auth_header) = req.headers().get("Authorization")
        && let Ok(auth_str) = auth_header.to_str()
        && let Some(user_id) = auth_str.strip_prefix("Bearer ")
        && let Ok(Some(user)) = state.user_repo.find_by_id(user_id).await
    {
        req.extensions_mut().insert(user);
    }

    next.run(req).await
}
