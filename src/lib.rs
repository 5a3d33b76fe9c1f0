use axum::{
    Json, Router,
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderName, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use serde_json::json;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    LatencyUnit,
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
pub mod rating;
pub mod repository;
pub mod storage;

// Routing split by access level (Public, Authenticated).
pub mod routes;
use auth::AuthUser;
use handlers::{books, users};
use routes::{authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use error::{ApiError, ApiResult};
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};
pub use storage::{ImageStoreState, LocalDiskImageStore, MockImageStore, S3ImageStore};

/// ApiDoc
///
/// Aggregates every `#[utoipa::path]` handler and `ToSchema` payload into the OpenAPI
/// document served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        users::signup, users::login, users::logout, users::get_profile,
        users::update_user, users::delete_profile, users::upload_profile_photo,
        users::delete_profile_photo,
        books::add_book, books::update_book, books::delete_book, books::rate_book,
        books::get_my_books, books::get_single_book, books::get_all_books,
        books::get_books_by_name, books::get_books_by_type, books::get_books_by_rate,
        books::search_books
    ),
    components(
        schemas(
            models::Book, models::Rating, models::UserProfile, models::TokenResponse,
            models::RateResponse, models::SignupRequest, models::LoginRequest,
            models::UpdateUserRequest, models::CreateBookRequest, models::UpdateBookRequest,
            models::RateBookRequest,
        )
    ),
    tags(
        (name = "book-catalog", description = "Book Catalog API")
    )
)]
pub struct ApiDoc;

/// AppState
///
/// The single shared container of services and configuration, cloned into every
/// request.
#[derive(Clone)]
pub struct AppState {
    /// Users, books and ratings.
    pub repo: RepositoryState,
    /// Where uploaded book covers and profile photos go.
    pub images: ImageStoreState,
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for ImageStoreState {
    fn from_ref(app_state: &AppState) -> ImageStoreState {
        app_state.images.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Guards `authenticated_routes`. Resolves the `AuthUser` once, rejects the request
/// with 401 on failure, and otherwise stores it in the request extensions where the
/// handler's own `AuthUser` argument picks it up.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let auth_user = match AuthUser::from_request_parts(&mut parts, &state).await {
        Ok(user) => user,
        Err(rejection) => return rejection.into_response(),
    };

    parts.extensions.insert(auth_user);
    next.run(Request::from_parts(parts, body)).await
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "page not found" })))
}

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Public and guarded routes, the API docs and the JSON 404, bound to `state`.
fn api_routes(state: AppState) -> Router {
    let guarded = authenticated::authenticated_routes().route_layer(
        middleware::from_fn_with_state(state.clone(), auth_middleware),
    );

    Router::new()
        .merge(public::public_routes())
        .merge(guarded)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Only unmatched paths land here; `route_layer` keeps the guard off them.
        .fallback(not_found)
        .with_state(state)
}

/// create_router
///
/// The full application: `api_routes` wrapped, outermost first, in CORS, request id
/// assignment, the access log span and request id echoing.
pub fn create_router(state: AppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    let access_log = TraceLayer::new_for_http()
        .make_span_with(request_span)
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    api_routes(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(access_log)
                .layer(PropagateRequestIdLayer::new(request_id)),
        )
        .layer(CorsLayer::permissive())
}

/// One span per request, keyed by the id `SetRequestIdLayer` assigned.
fn request_span(request: &Request) -> Span {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");

    tracing::info_span!(
        "request",
        %id,
        method = %request.method(),
        path = request.uri().path(),
    )
}
