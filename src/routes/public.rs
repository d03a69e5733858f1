use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without a session. Handlers that read compounds enforce visibility
/// themselves: anonymous callers only ever see public records.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        .route("/health", get(handlers::health))
        // GET /csrf
        // Sets the `csrftoken` cookie that every state-changing request must echo back.
        .route("/csrf", get(handlers::auth::csrf_token))
        // --- Account ---
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        // Logout is idempotent: it succeeds with or without a session.
        .route("/auth/logout", post(handlers::auth::logout))
        // GET /auth/me
        // 200 with the user when logged in, 401 `{"authenticated": false}` otherwise.
        .route("/auth/me", get(handlers::auth::me))
        // --- Compounds ---
        .route(
            "/compounds/public",
            get(handlers::compounds::list_public_compounds),
        )
        // GET /compounds/{id}
        // Private compounds answer 404 to anonymous callers.
        .route("/compounds/{id}", get(handlers::compounds::get_compound))
}
