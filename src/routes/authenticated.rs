use crate::{
    AppState,
    handlers::{books, users},
};
use axum::{
    Router,
    routing::{delete, get, patch, post},
};

/// Authenticated Router Module
///
/// Every route here sits behind `auth_middleware`, so handlers always receive a
/// validated `AuthUser` (the user record plus the token that proved it).
///
/// Ownership is checked inside the handlers: `/update-user/{id}` only for the
/// caller's own id, `/update-book/{id}` and `/delete-book/{id}` only for the book's
/// author.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // --- Session ---
        // POST /logout
        // Revokes only the presented token; other sessions stay valid.
        .route("/logout", post(users::logout))
        // --- Account ---
        .route("/profile", get(users::get_profile))
        .route("/update-user/{id}", patch(users::update_user))
        .route("/delete-profile", delete(users::delete_profile))
        .route(
            "/profile-photo",
            post(users::upload_profile_photo).delete(users::delete_profile_photo),
        )
        // --- Books ---
        .route("/add-book", post(books::add_book))
        .route("/update-book/{id}", patch(books::update_book))
        .route("/delete-book/{id}", delete(books::delete_book))
        .route("/my-books", get(books::get_my_books))
        // POST /rate-book/{id}
        // Upserts the caller's rating and recomputes the book's mean.
        .route("/rate-book/{id}", post(books::rate_book))
}
