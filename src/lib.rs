use axum::{
    Router,
    extract::FromRef,
    http::HeaderName,
    middleware,
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod security;
pub mod service;
pub mod views;

// Routing split (public vs. authenticated).
pub mod routes;
use routes::{authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use repository::{PostgresRepository, RepositoryState};
pub use security::SecurityPolicy;
pub use service::DoctorService;

/// ApiDoc
///
/// OpenAPI document for the JSON-facing endpoints, served at `/api-docs/openapi.json`.
/// The page handlers return views and are not listed.
#[derive(OpenApi)]
#[openapi(
    paths(handlers::listar_medicos_por_especialidade, handlers::excluir),
    components(schemas(models::DoctorListing, models::Specialty, models::Role)),
    tags((name = "clinic-portal", description = "Clinic doctor management"))
)]
struct ApiDoc;

/// AppState
///
/// The single, immutable container shared by every request. Everything in it is built
/// once at start up.
#[derive(Clone)]
pub struct AppState {
    /// Persistence seam. The security filter reads users from it; doctor rows are only
    /// written through `doctors`.
    pub repo: RepositoryState,
    pub doctors: DoctorService,
    /// Process-wide security configuration. Never mutated after construction.
    pub policy: Arc<SecurityPolicy>,
    pub config: AppConfig,
}

impl AppState {
    /// Wires the service and the security policy on top of a repository.
    pub fn new(repo: RepositoryState, config: AppConfig) -> Self {
        let policy = Arc::new(SecurityPolicy::from_config(&config));
        Self {
            doctors: DoctorService::new(repo.clone()),
            repo,
            policy,
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for DoctorService {
    fn from_ref(app_state: &AppState) -> DoctorService {
        app_state.doctors.clone()
    }
}

impl FromRef<AppState> for Arc<SecurityPolicy> {
    fn from_ref(app_state: &AppState) -> Arc<SecurityPolicy> {
        app_state.policy.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles every route, puts the security filter in front of all of them (static
/// files and the 404 fallback included), then adds the observability layers.
pub fn create_router(state: AppState) -> Router {
    // Same-origin pages only; no cross-origin grants.
    let cors = CorsLayer::new();

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes(&state.config.static_dir))
        .merge(authenticated::authenticated_routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            security::security_filter,
        ))
        .with_state(state);

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
/// Opens the `http_request` span for `TraceLayer`, tagged with the `x-request-id` set by
/// the outer layer so every log line of one request can be correlated.
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
