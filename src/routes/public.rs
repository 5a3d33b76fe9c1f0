use crate::{
    AppState,
    handlers::{books, users},
};
use axum::{
    Router,
    response::Html,
    routing::{get, post},
};

const WELCOME_PAGE: &str = "<!doctype html><html><head><title>Book Catalog</title></head>\
<body><h1>Book Catalog API</h1><p>See <a href=\"/swagger-ui\">/swagger-ui</a> for the endpoints.</p></body></html>";

/// Public Router Module
///
/// Unauthenticated endpoints. Searches return 404 on zero matches, except
/// `/all-books`, which returns an empty list.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(|| async { Html(WELCOME_PAGE) }))
        // GET /health
        // Liveness probe for load balancers.
        .route("/health", get(|| async { "ok" }))
        // --- Accounts ---
        .route("/signup", post(users::signup))
        .route("/login", post(users::login))
        // --- Catalog reads ---
        .route("/all-books", get(books::get_all_books))
        .route("/single-book/{id}", get(books::get_single_book))
        // GET /book-by-name?bookName=...&limit=&skip=
        .route("/book-by-name", get(books::get_books_by_name))
        .route("/book-by-type", get(books::get_books_by_type))
        // GET /book-by-rate?rate=3.5
        .route("/book-by-rate", get(books::get_books_by_rate))
        // GET /search-books?q=...
        // Free text over name, type and description.
        .route("/search-books", get(books::search_books))
}
