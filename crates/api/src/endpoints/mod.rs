//! API endpoints.

mod messaging;

use axum::Router;

use crate::middleware::AppState;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new().nest("/messaging", messaging::router())
}
