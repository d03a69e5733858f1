use axum::{
    Router,
    extract::{DefaultBodyLimit, FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Modules ---

pub mod auth;
pub mod config;
pub mod cookies;
pub mod csrf;
pub mod error;
pub mod forms;
pub mod handlers;
pub mod models;
pub mod password;
pub mod repository;
pub mod session;
pub mod storage;

// Route tables split by access level.
pub mod routes;
use auth::{AdminUser, CurrentUser};
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use repository::{PostgresRepository, RepositoryState};
pub use session::{MemorySessionStore, PostgresSessionStore, SessionState};
pub use storage::{MockStorageService, S3StorageClient, StorageState};

/// ApiDoc
///
/// Aggregates every `#[utoipa::path]` handler and `ToSchema` model into the OpenAPI document
/// served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::auth::csrf_token, handlers::auth::register, handlers::auth::login,
        handlers::auth::logout, handlers::auth::me, handlers::auth::update_profile,
        handlers::auth::change_password,
        handlers::compounds::list_public_compounds, handlers::compounds::list_all_compounds,
        handlers::compounds::get_compound, handlers::compounds::create_compound,
        handlers::compounds::update_compound, handlers::compounds::delete_compound,
        handlers::admin::list_users, handlers::admin::set_user_active,
        handlers::admin::set_user_admin, handlers::admin::list_compounds,
        handlers::admin::update_compound, handlers::admin::delete_compound,
    ),
    components(
        schemas(
            models::Role, models::RegisterRequest, models::LoginRequest,
            models::UpdateProfileRequest, models::ChangePasswordRequest,
            models::SetActiveRequest, models::SetAdminRequest, models::UserSummary,
            models::AdminUserView, models::OwnerRef, models::CompoundResponse,
            models::MessageResponse, models::CompoundEnvelope, models::UserEnvelope,
            models::AdminUserEnvelope, models::MeResponse, models::CsrfResponse,
        )
    ),
    tags(
        (name = "chem-registry", description = "Chemical compound registry API")
    )
)]
pub struct ApiDoc;

/// AppState
///
/// The single shared container of services and configuration, cloned into every request.
/// Handlers and extractors pick the part they need through `FromRef`.
#[derive(Clone)]
pub struct AppState {
    /// Users and compounds.
    pub repo: RepositoryState,
    /// Structure files (S3/MinIO).
    pub storage: StorageState,
    /// Server-side sessions.
    pub sessions: SessionState,
    pub config: AppConfig,
}

// --- FromRef: state parts for extractors ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for StorageState {
    fn from_ref(app_state: &AppState) -> StorageState {
        app_state.storage.clone()
    }
}

impl FromRef<AppState> for SessionState {
    fn from_ref(app_state: &AppState) -> SessionState {
        app_state.sessions.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Guards `authenticated_routes`. Extracting `CurrentUser` rejects the request with 401
/// when no valid session is attached, before the handler or its body extractor runs.
async fn auth_middleware(_current: CurrentUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// admin_middleware
///
/// Guards `admin_routes`: 403 unless the caller holds a session with admin rights.
async fn admin_middleware(_admin: AdminUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles the routing table, applies the guards and the global middleware stack, and
/// registers the application state.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Routes, guards and request-level middleware
    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        .nest(
            "/admin",
            admin::admin_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                admin_middleware,
            )),
        )
        // CSRF runs before every guard, so a forged request never reaches session lookup.
        .layer(middleware::from_fn_with_state(
            state.clone(),
            csrf::csrf_middleware,
        ))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .with_state(state);

    // 3. Request id, tracing span and CORS
    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Opens the per-request span, tagged with the `x-request-id` set by `SetRequestIdLayer`
/// so every log line of a request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
