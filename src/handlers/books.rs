use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use uuid::Uuid;

use super::{
    BOOK_IMAGE_FIELD, FormPayload, QueryParams, non_blank, parse_id, release_image,
    store_image, trimmed, validate_payload,
};
use crate::{
    AppState,
    auth::AuthUser,
    error::{ApiError, ApiResult},
    models::{
        Book, BookByNameQuery, BookByRateQuery, BookByTypeQuery, BookChanges, BookFilter,
        CreateBookRequest, NewBook, Page, PageParams, RateBookRequest, RateResponse,
        SearchQuery, UpdateBookRequest,
    },
    rating,
};

fn no_book() -> ApiError {
    ApiError::NotFound("no book found".to_string())
}

/// Loads a book and checks that `auth` authored it.
async fn owned_book(state: &AppState, auth: &AuthUser, raw_id: &str) -> ApiResult<Book> {
    let id: Uuid = parse_id(raw_id)?;
    let book = state.repo.find_book(id).await?.ok_or_else(no_book)?;
    if book.author_id != auth.id() {
        tracing::debug!(book_id = %id, user_id = %auth.id(), "rejected mutation by non-author");
        return Err(ApiError::Forbidden(
            "you are not the author of this book".to_string(),
        ));
    }
    Ok(book)
}

/// Runs a filtered listing where an empty result is reported as `NotFound(empty_message)`.
async fn search(
    state: &AppState,
    filter: BookFilter,
    page: Page,
    empty_message: &str,
) -> ApiResult<Json<Vec<Book>>> {
    let books = state.repo.list_books(filter, page).await?;
    if books.is_empty() {
        return Err(ApiError::NotFound(empty_message.to_string()));
    }
    Ok(Json(books))
}

/// Extracts a required, non-blank query parameter.
fn required(value: Option<String>, missing_message: &str) -> ApiResult<String> {
    non_blank(value).ok_or_else(|| ApiError::BadRequest(missing_message.to_string()))
}

// --- Mutations ---

/// add_book
///
/// [Authenticated Route] Creates a book authored by the caller. A multipart `image`
/// part becomes the cover.
#[utoipa::path(
    post,
    path = "/add-book",
    request_body = CreateBookRequest,
    responses(
        (status = 201, description = "Created", body = Book),
        (status = 400, description = "Not an image"),
        (status = 422, description = "Validation failed")
    )
)]
pub async fn add_book(
    auth: AuthUser,
    State(state): State<AppState>,
    mut form: FormPayload<CreateBookRequest>,
) -> ApiResult<impl IntoResponse> {
    let file = form.take_file(BOOK_IMAGE_FIELD);
    let fields = form.fields;
    let payload = CreateBookRequest {
        name: trimmed(fields.name),
        book_type: trimmed(fields.book_type),
        description: trimmed(fields.description),
    };
    validate_payload(&payload)?;

    let image = store_image(&state, file).await?;
    let created = state
        .repo
        .create_book(NewBook {
            name: payload.name,
            book_type: payload.book_type,
            description: payload.description,
            image: image.clone(),
            author_id: auth.id(),
        })
        .await;

    let book = match created {
        Ok(book) => book,
        Err(e) => {
            release_image(&state.images, image.as_deref()).await;
            return Err(e.into());
        }
    };

    tracing::info!(book_id = %book.id, author_id = %book.author_id, "book created");
    Ok((StatusCode::CREATED, Json(book)))
}

/// update_book
///
/// [Authenticated Route] Partial update; absent fields keep their stored value.
/// *Authorization*: owner only.
#[utoipa::path(
    patch,
    path = "/update-book/{id}",
    params(("id" = Uuid, Path, description = "Book ID")),
    request_body = UpdateBookRequest,
    responses(
        (status = 200, description = "Updated", body = Book),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_book(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    FormPayload { fields, .. }: FormPayload<UpdateBookRequest>,
) -> ApiResult<Json<Book>> {
    let payload = UpdateBookRequest {
        name: non_blank(fields.name),
        book_type: non_blank(fields.book_type),
        description: non_blank(fields.description),
    };
    validate_payload(&payload)?;

    let book = owned_book(&state, &auth, &raw_id).await?;
    let updated = state
        .repo
        .update_book(
            book.id,
            BookChanges {
                name: payload.name,
                book_type: payload.book_type,
                description: payload.description,
            },
        )
        .await?
        .ok_or_else(no_book)?;

    Ok(Json(updated))
}

/// delete_book
///
/// [Authenticated Route] Deletes a book and unlinks it from its author.
/// *Authorization*: owner only.
#[utoipa::path(
    delete,
    path = "/delete-book/{id}",
    params(("id" = Uuid, Path, description = "Book ID")),
    responses(
        (status = 200, description = "Deleted"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_book(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let book = owned_book(&state, &auth, &raw_id).await?;
    let deleted = state.repo.delete_book(book.id).await?.ok_or_else(no_book)?;

    release_image(&state.images, deleted.image.as_deref()).await;

    tracing::info!(book_id = %deleted.id, "book deleted");
    Ok(Json(json!({ "Deleted book": deleted })))
}

/// rate_book
///
/// [Authenticated Route] Records the caller's rating (0 to 5) and recomputes the
/// book's mean. A second rating from the same caller replaces the first.
#[utoipa::path(
    post,
    path = "/rate-book/{id}",
    params(("id" = Uuid, Path, description = "Book ID")),
    request_body = RateBookRequest,
    responses(
        (status = 201, description = "Rating stored", body = RateResponse),
        (status = 404, description = "Not Found"),
        (status = 422, description = "Rating outside 0..=5")
    )
)]
pub async fn rate_book(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    FormPayload { fields, .. }: FormPayload<RateBookRequest>,
) -> ApiResult<impl IntoResponse> {
    let book_id = parse_id(&raw_id)?;
    let rate = rating::submit_rating(state.repo.as_ref(), auth.id(), book_id, fields.rating).await?;
    Ok((StatusCode::CREATED, Json(RateResponse { rate })))
}

// --- Reads ---

/// get_my_books
///
/// [Authenticated Route] Lists the caller's books, oldest first.
#[utoipa::path(
    get,
    path = "/my-books",
    responses((status = 200, description = "The caller's books, or a message when there are none", body = [Book]))
)]
pub async fn get_my_books(
    auth: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<Response> {
    let books = state.repo.books_by_author(auth.id()).await?;
    if books.is_empty() {
        return Ok(Json(json!({ "message": "no books to display" })).into_response());
    }
    Ok(Json(books).into_response())
}

#[utoipa::path(
    get,
    path = "/single-book/{id}",
    params(("id" = Uuid, Path, description = "Book ID")),
    responses(
        (status = 200, description = "Found", body = Book),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_single_book(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<Book>> {
    let id = parse_id(&raw_id)?;
    let book = state.repo.find_book(id).await?.ok_or_else(no_book)?;
    Ok(Json(book))
}

/// get_all_books
///
/// [Public Route] Every book, oldest first. An empty catalog is an empty list.
#[utoipa::path(
    get,
    path = "/all-books",
    params(PageParams),
    responses((status = 200, description = "Books", body = [Book]))
)]
pub async fn get_all_books(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<PageParams>,
) -> ApiResult<Json<Vec<Book>>> {
    let books = state
        .repo
        .list_books(BookFilter::All, Page::new(params.limit, params.skip))
        .await?;
    Ok(Json(books))
}

#[utoipa::path(
    get,
    path = "/book-by-name",
    params(BookByNameQuery),
    responses(
        (status = 200, description = "Books with this exact name", body = [Book]),
        (status = 400, description = "Missing bookName"),
        (status = 404, description = "No match")
    )
)]
pub async fn get_books_by_name(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<BookByNameQuery>,
) -> ApiResult<Json<Vec<Book>>> {
    let name = required(query.book_name, "please provide a book name")?;
    search(
        &state,
        BookFilter::Name(name),
        Page::new(query.limit, query.skip),
        "No book with this name found",
    )
    .await
}

#[utoipa::path(
    get,
    path = "/book-by-type",
    params(BookByTypeQuery),
    responses(
        (status = 200, description = "Books of this type", body = [Book]),
        (status = 400, description = "Missing type"),
        (status = 404, description = "No match")
    )
)]
pub async fn get_books_by_type(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<BookByTypeQuery>,
) -> ApiResult<Json<Vec<Book>>> {
    let book_type = required(query.book_type, "please provide a type search")?;
    search(
        &state,
        BookFilter::Type(book_type),
        Page::new(query.limit, query.skip),
        "No book with this type found",
    )
    .await
}

/// get_books_by_rate
///
/// [Public Route] Books whose stored mean equals `rate` exactly (means are kept to one
/// decimal, so `rate=3.5` is the useful form).
#[utoipa::path(
    get,
    path = "/book-by-rate",
    params(BookByRateQuery),
    responses(
        (status = 200, description = "Books with this mean rating", body = [Book]),
        (status = 400, description = "Missing or unparsable rate"),
        (status = 404, description = "No match")
    )
)]
pub async fn get_books_by_rate(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<BookByRateQuery>,
) -> ApiResult<Json<Vec<Book>>> {
    let raw = required(query.rate, "please provide a rate search")?;
    let rate: f64 = raw
        .parse()
        .ok()
        .filter(|r: &f64| r.is_finite())
        .ok_or_else(|| ApiError::BadRequest(format!("rate must be a number, got {raw}")))?;
    search(
        &state,
        BookFilter::Rate(rate),
        Page::new(query.limit, query.skip),
        "Sorry, no book matched your search",
    )
    .await
}

/// search_books
///
/// [Public Route] Case-insensitive substring search over name, type and description.
#[utoipa::path(
    get,
    path = "/search-books",
    params(SearchQuery),
    responses(
        (status = 200, description = "Matching books", body = [Book]),
        (status = 400, description = "Missing q"),
        (status = 404, description = "No match")
    )
)]
pub async fn search_books(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<SearchQuery>,
) -> ApiResult<Json<Vec<Book>>> {
    let text = required(query.q, "please provide a search text")?;
    search(
        &state,
        BookFilter::Text(text),
        Page::new(query.limit, query.skip),
        "Sorry, no book matched your search",
    )
    .await
}
