use axum::{
    Json,
    body::Bytes,
    extract::{FromRequestParts, Path, State},
    http::{Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use book_catalog::{
    AppConfig, AppState, ApiError, InMemoryRepository, MockImageStore,
    auth::AuthUser,
    handlers::{
        BOOK_IMAGE_FIELD, FormPayload, PROFILE_PHOTO_FIELD, QueryParams, books, users,
    },
    models::{
        BookByNameQuery, BookByRateQuery, BookByTypeQuery, CreateBookRequest, LoginRequest,
        PageParams, RateBookRequest, SearchQuery, SignupRequest, UpdateBookRequest,
        UpdateUserRequest,
    },
    repository::{Repository, RepositoryError, RepositoryState},
    storage::{ImageStoreState, ImageUpload, StorageError},
};
use serde::de::IgnoredAny;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

// --- Test Utilities ---

struct TestEnv {
    state: AppState,
    repo: Arc<InMemoryRepository>,
    images: MockImageStore,
}

fn test_env() -> TestEnv {
    let repo = Arc::new(InMemoryRepository::new());
    let images = MockImageStore::new();
    let state = AppState {
        repo: repo.clone() as RepositoryState,
        images: Arc::new(images.clone()) as ImageStoreState,
        config: AppConfig::default(),
    };
    TestEnv {
        state,
        repo,
        images,
    }
}

async fn body_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn form<T>(fields: T) -> FormPayload<T> {
    FormPayload::new(fields)
}

fn png(name: &str) -> ImageUpload {
    ImageUpload {
        file_name: name.to_string(),
        content_type: Some("image/png".to_string()),
        bytes: Bytes::from_static(b"\x89PNG fake image bytes"),
    }
}

fn signup_request(email: &str) -> SignupRequest {
    SignupRequest {
        name: "reader".to_string(),
        email: email.to_string(),
        password: "abc123".to_string(),
    }
}

/// Resolves a bearer token the way a protected route would.
async fn authenticate(env: &TestEnv, token: &str) -> Result<AuthUser, ApiError> {
    let (mut parts, _) = Request::builder()
        .uri("/profile")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(())
        .unwrap()
        .into_parts();
    AuthUser::from_request_parts(&mut parts, &env.state).await
}

async fn signup(env: &TestEnv, email: &str) -> (String, AuthUser) {
    let response = users::signup(State(env.state.clone()), form(signup_request(email)))
        .await
        .unwrap()
        .into_response();
    let (status, body) = body_json(response).await;
    assert_eq!(status, StatusCode::CREATED);

    let token = body["token"].as_str().unwrap().to_string();
    let auth = authenticate(env, &token).await.unwrap();
    (token, auth)
}

async fn login(env: &TestEnv, email: &str, password: &str) -> Result<String, ApiError> {
    let request = LoginRequest {
        email: email.to_string(),
        password: password.to_string(),
    };
    let response = users::login(State(env.state.clone()), form(request))
        .await?
        .into_response();
    let (status, body) = body_json(response).await;
    assert_eq!(status, StatusCode::CREATED);
    Ok(body["token"].as_str().unwrap().to_string())
}

async fn add_book(env: &TestEnv, auth: &AuthUser, name: &str, book_type: &str) -> Value {
    let request = CreateBookRequest {
        name: name.to_string(),
        book_type: book_type.to_string(),
        description: "desert planet".to_string(),
    };
    let response = books::add_book(auth.clone(), State(env.state.clone()), form(request))
        .await
        .unwrap()
        .into_response();
    let (status, body) = body_json(response).await;
    assert_eq!(status, StatusCode::CREATED);
    body
}

async fn rate(env: &TestEnv, auth: &AuthUser, book_id: &str, rating: f64) -> Result<Value, ApiError> {
    let response = books::rate_book(
        auth.clone(),
        State(env.state.clone()),
        Path(book_id.to_string()),
        form(RateBookRequest { rating }),
    )
    .await?
    .into_response();
    Ok(body_json(response).await.1)
}

// --- Accounts ---

#[tokio::test]
async fn test_signup_then_login_issues_distinct_valid_tokens() {
    let env = test_env();
    let (t1, user) = signup(&env, "a@x.com").await;

    let t2 = login(&env, "a@x.com", "abc123").await.unwrap();
    assert_ne!(t1, t2);

    assert_eq!(authenticate(&env, &t1).await.unwrap().id(), user.id());
    assert_eq!(authenticate(&env, &t2).await.unwrap().id(), user.id());
}

#[tokio::test]
async fn test_duplicate_signup_is_rejected_without_a_second_user() {
    let env = test_env();
    signup(&env, "a@x.com").await;

    let err = users::signup(State(env.state.clone()), form(signup_request("a@x.com")))
        .await
        .err()
        .unwrap();

    let (status, body) = body_json(err.into_response()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "email already in use try another one");
    assert_eq!(env.repo.user_count().await, 1);
}

#[tokio::test]
async fn test_signup_validation_reports_one_message() {
    let env = test_env();
    let request = SignupRequest {
        name: "ab".to_string(),
        email: "not-an-email".to_string(),
        password: "abc123".to_string(),
    };

    let err = users::signup(State(env.state.clone()), form(request))
        .await
        .err()
        .unwrap();

    let (status, body) = body_json(err.into_response()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    // `email` sorts before `name`.
    assert_eq!(body["errors"], "email is invalid");
    assert_eq!(env.repo.user_count().await, 0);
}

#[tokio::test]
async fn test_signup_rejects_non_alphanumeric_password() {
    let env = test_env();
    let request = SignupRequest {
        password: "abc 123!".to_string(),
        ..signup_request("a@x.com")
    };

    let err = users::signup(State(env.state.clone()), form(request))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ApiError::Validation(ref m) if m.starts_with("password should be")));
}

#[tokio::test]
async fn test_signup_with_photo_stores_it() {
    let env = test_env();
    let payload =
        FormPayload::new(signup_request("a@x.com")).with_file(PROFILE_PHOTO_FIELD, png("me.png"));

    users::signup(State(env.state.clone()), payload).await.unwrap();

    let user = env.repo.find_user_by_email("a@x.com").await.unwrap().unwrap();
    let photo = user.profile_photo.unwrap();
    assert!(env.images.contains(&photo).await);
}

#[tokio::test]
async fn test_unknown_email_and_wrong_password_are_indistinguishable() {
    let env = test_env();
    signup(&env, "a@x.com").await;

    let unknown = login(&env, "b@x.com", "abc123").await.err().unwrap();
    let wrong = login(&env, "a@x.com", "zzz999").await.err().unwrap();

    let (s1, b1) = body_json(unknown.into_response()).await;
    let (s2, b2) = body_json(wrong.into_response()).await;
    assert_eq!(s1, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(s1, s2);
    assert_eq!(b1, b2);
}

#[tokio::test]
async fn test_logout_invalidates_only_the_presented_token() {
    let env = test_env();
    let (t1, user) = signup(&env, "a@x.com").await;
    let t2 = login(&env, "a@x.com", "abc123").await.unwrap();

    let response = users::logout(user, State(env.state.clone()))
        .await
        .unwrap()
        .into_response();
    let (status, body) = body_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], "logged out");

    assert!(authenticate(&env, &t1).await.is_err());
    assert!(authenticate(&env, &t2).await.is_ok());
}

#[tokio::test]
async fn test_profile_never_exposes_password_or_tokens() {
    let env = test_env();
    let (_, user) = signup(&env, "a@x.com").await;

    let Json(profile) = users::get_profile(user).await;
    let value = serde_json::to_value(&profile).unwrap();

    assert_eq!(value["email"], "a@x.com");
    assert!(value.get("password").is_none());
    assert!(value.get("tokens").is_none());
    assert!(value.get("profilePhoto").is_some());
}

#[tokio::test]
async fn test_update_user_is_self_only() {
    let env = test_env();
    let (_, alice) = signup(&env, "a@x.com").await;
    let (_, bob) = signup(&env, "b@x.com").await;

    let request = UpdateUserRequest {
        name: Some("mallory".to_string()),
        ..Default::default()
    };
    let err = users::update_user(
        bob,
        State(env.state.clone()),
        Path(alice.id().to_string()),
        form(request),
    )
    .await
    .err()
    .unwrap();

    assert_eq!(err.status(), StatusCode::FORBIDDEN);
    let stored = env.repo.find_user(alice.id()).await.unwrap().unwrap();
    assert_eq!(stored.name, "reader");
}

#[tokio::test]
async fn test_update_user_changes_only_given_fields_and_rehashes_password() {
    let env = test_env();
    let (_, alice) = signup(&env, "a@x.com").await;

    let request = UpdateUserRequest {
        name: Some("  alice  ".to_string()),
        email: Some(String::new()),
        password: Some("newpass1".to_string()),
    };
    let response = users::update_user(
        alice.clone(),
        State(env.state.clone()),
        Path(alice.id().to_string()),
        form(request),
    )
    .await
    .unwrap()
    .into_response();

    let (status, body) = body_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["name"], "alice");
    assert_eq!(body["result"]["email"], "a@x.com");

    assert!(login(&env, "a@x.com", "abc123").await.is_err());
    assert!(login(&env, "a@x.com", "newpass1").await.is_ok());
}

#[tokio::test]
async fn test_update_user_to_taken_email_is_a_conflict() {
    let env = test_env();
    let (_, alice) = signup(&env, "a@x.com").await;
    signup(&env, "b@x.com").await;

    let request = UpdateUserRequest {
        email: Some("b@x.com".to_string()),
        ..Default::default()
    };
    let err = users::update_user(
        alice.clone(),
        State(env.state.clone()),
        Path(alice.id().to_string()),
        form(request),
    )
    .await
    .err()
    .unwrap();

    assert!(matches!(err, ApiError::Repository(RepositoryError::Conflict)));
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_profile_photo_upload_replace_and_delete() {
    let env = test_env();
    let (_, user) = signup(&env, "a@x.com").await;

    let missing = users::upload_profile_photo(
        user.clone(),
        State(env.state.clone()),
        FormPayload::new(IgnoredAny),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(missing, ApiError::BadRequest(ref m) if m == "please upload a photo"));

    let Json(first) = users::upload_profile_photo(
        user.clone(),
        State(env.state.clone()),
        FormPayload::new(IgnoredAny).with_file(PROFILE_PHOTO_FIELD, png("one.png")),
    )
    .await
    .unwrap();
    let first_ref = first.profile_photo.clone().unwrap();
    assert!(env.images.contains(&first_ref).await);

    // Re-resolve so the AuthUser carries the stored photo.
    let token = user.token.clone();
    let user = authenticate(&env, &token).await.unwrap();
    let Json(second) = users::upload_profile_photo(
        user.clone(),
        State(env.state.clone()),
        FormPayload::new(IgnoredAny).with_file(PROFILE_PHOTO_FIELD, png("two.png")),
    )
    .await
    .unwrap();
    let second_ref = second.profile_photo.clone().unwrap();
    assert!(!env.images.contains(&first_ref).await);
    assert!(env.images.contains(&second_ref).await);

    let user = authenticate(&env, &token).await.unwrap();
    users::delete_profile_photo(user.clone(), State(env.state.clone()))
        .await
        .unwrap();
    assert!(env.images.is_empty().await);
    let stored = env.repo.find_user(user.id()).await.unwrap().unwrap();
    assert!(stored.profile_photo.is_none());
}

#[tokio::test]
async fn test_profile_photo_must_be_an_image() {
    let env = test_env();
    let (_, user) = signup(&env, "a@x.com").await;

    let err = users::upload_profile_photo(
        user,
        State(env.state.clone()),
        FormPayload::new(IgnoredAny).with_file(
            PROFILE_PHOTO_FIELD,
            ImageUpload {
                file_name: "notes.txt".to_string(),
                content_type: Some("text/plain".to_string()),
                bytes: Bytes::from_static(b"hello"),
            },
        ),
    )
    .await
    .err()
    .unwrap();

    assert!(matches!(err, ApiError::Storage(StorageError::InvalidImage(_))));
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    assert!(env.images.is_empty().await);
}

#[tokio::test]
async fn test_delete_profile_cascades_to_books_and_images() {
    let env = test_env();
    let (_, alice) = signup(&env, "a@x.com").await;
    let (_, bob) = signup(&env, "b@x.com").await;

    books::add_book(
        alice.clone(),
        State(env.state.clone()),
        FormPayload::new(CreateBookRequest {
            name: "Dune".to_string(),
            book_type: "scifi".to_string(),
            description: "desert planet".to_string(),
        })
        .with_file(BOOK_IMAGE_FIELD, png("cover.png")),
    )
    .await
    .unwrap();
    add_book(&env, &alice, "Emma", "romance").await;
    add_book(&env, &bob, "Hyperion", "scifi").await;

    let response = users::delete_profile(alice.clone(), State(env.state.clone()))
        .await
        .unwrap()
        .into_response();
    let (status, body) = body_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Deleted user"]["email"], "a@x.com");

    assert!(env.repo.books_by_author(alice.id()).await.unwrap().is_empty());
    assert_eq!(env.repo.books_by_author(bob.id()).await.unwrap().len(), 1);
    assert!(env.repo.find_user(alice.id()).await.unwrap().is_none());
    assert!(env.images.is_empty().await);
}

// --- Books ---

#[tokio::test]
async fn test_add_book_links_it_to_the_author() {
    let env = test_env();
    let (_, alice) = signup(&env, "a@x.com").await;

    let book = add_book(&env, &alice, "Dune", "scifi").await;

    assert_eq!(book["authorId"], alice.id().to_string());
    assert_eq!(book["type"], "scifi");
    assert_eq!(book["rate"], 0.0);
    let stored = env.repo.find_user(alice.id()).await.unwrap().unwrap();
    assert_eq!(stored.books.len(), 1);
    assert_eq!(stored.books[0].to_string(), book["id"].as_str().unwrap());
}

#[tokio::test]
async fn test_add_book_validation() {
    let env = test_env();
    let (_, alice) = signup(&env, "a@x.com").await;

    let request = CreateBookRequest {
        name: "Dune".to_string(),
        book_type: "scifi".to_string(),
        description: "  abc ".to_string(),
    };
    let err = books::add_book(alice, State(env.state.clone()), form(request))
        .await
        .err()
        .unwrap();

    assert!(
        matches!(err, ApiError::Validation(ref m) if m == "description should be atleast 5 characters long")
    );
}

#[tokio::test]
async fn test_only_the_author_can_update_or_delete_a_book() {
    let env = test_env();
    let (_, alice) = signup(&env, "a@x.com").await;
    let (_, bob) = signup(&env, "b@x.com").await;
    let book = add_book(&env, &alice, "Dune", "scifi").await;
    let book_id = book["id"].as_str().unwrap().to_string();

    let request = UpdateBookRequest {
        name: Some("Stolen".to_string()),
        ..Default::default()
    };
    let err = books::update_book(
        bob.clone(),
        State(env.state.clone()),
        Path(book_id.clone()),
        form(request),
    )
    .await
    .err()
    .unwrap();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);

    let err = books::delete_book(bob, State(env.state.clone()), Path(book_id.clone()))
        .await
        .err()
        .unwrap();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);

    let id = Uuid::parse_str(&book_id).unwrap();
    let stored = env.repo.find_book(id).await.unwrap().unwrap();
    assert_eq!(stored.name, "Dune");
}

#[tokio::test]
async fn test_update_book_is_partial() {
    let env = test_env();
    let (_, alice) = signup(&env, "a@x.com").await;
    let book = add_book(&env, &alice, "Dune", "scifi").await;

    let request = UpdateBookRequest {
        description: Some("spice and sandworms".to_string()),
        ..Default::default()
    };
    let Json(updated) = books::update_book(
        alice,
        State(env.state.clone()),
        Path(book["id"].as_str().unwrap().to_string()),
        form(request),
    )
    .await
    .unwrap();

    assert_eq!(updated.name, "Dune");
    assert_eq!(updated.book_type, "scifi");
    assert_eq!(updated.description, "spice and sandworms");
}

#[tokio::test]
async fn test_update_missing_book_is_not_found() {
    let env = test_env();
    let (_, alice) = signup(&env, "a@x.com").await;

    let err = books::update_book(
        alice,
        State(env.state.clone()),
        Path(Uuid::new_v4().to_string()),
        form(UpdateBookRequest::default()),
    )
    .await
    .err()
    .unwrap();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_book_unlinks_and_releases_image() {
    let env = test_env();
    let (_, alice) = signup(&env, "a@x.com").await;

    let response = books::add_book(
        alice.clone(),
        State(env.state.clone()),
        FormPayload::new(CreateBookRequest {
            name: "Dune".to_string(),
            book_type: "scifi".to_string(),
            description: "desert planet".to_string(),
        })
        .with_file(BOOK_IMAGE_FIELD, png("cover.jpg.png")),
    )
    .await
    .unwrap()
    .into_response();
    let (_, book) = body_json(response).await;
    assert_eq!(env.images.len().await, 1);

    let response = books::delete_book(
        alice.clone(),
        State(env.state.clone()),
        Path(book["id"].as_str().unwrap().to_string()),
    )
    .await
    .unwrap()
    .into_response();
    let (status, body) = body_json(response).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Deleted book"]["name"], "Dune");
    assert!(env.images.is_empty().await);
    let stored = env.repo.find_user(alice.id()).await.unwrap().unwrap();
    assert!(stored.books.is_empty());
}

#[tokio::test]
async fn test_my_books_reports_a_message_when_empty() {
    let env = test_env();
    let (_, alice) = signup(&env, "a@x.com").await;

    let response = books::get_my_books(alice.clone(), State(env.state.clone()))
        .await
        .unwrap();
    let (_, body) = body_json(response).await;
    assert_eq!(body["message"], "no books to display");

    add_book(&env, &alice, "Dune", "scifi").await;
    let response = books::get_my_books(alice, State(env.state.clone()))
        .await
        .unwrap();
    let (_, body) = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

// --- Ratings ---

#[tokio::test]
async fn test_rating_scenario_same_rater_overwrites() {
    let env = test_env();
    let (_, author) = signup(&env, "a@x.com").await;
    let (_, rater) = signup(&env, "b@x.com").await;
    let book = add_book(&env, &author, "Dune", "scifi").await;
    let book_id = book["id"].as_str().unwrap();

    let first = rate(&env, &rater, book_id, 4.0).await.unwrap();
    assert_eq!(first["rate"], 4.0);
    rate(&env, &rater, book_id, 2.0).await.unwrap();

    let stored = env
        .repo
        .find_book(Uuid::parse_str(book_id).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.rate, 2.0);
    assert_eq!(env.repo.rating_count().await, 1);
}

#[tokio::test]
async fn test_rating_mean_across_raters() {
    let env = test_env();
    let (_, author) = signup(&env, "a@x.com").await;
    let (_, b) = signup(&env, "b@x.com").await;
    let (_, c) = signup(&env, "c@x.com").await;
    let book = add_book(&env, &author, "Dune", "scifi").await;
    let book_id = book["id"].as_str().unwrap();

    rate(&env, &author, book_id, 5.0).await.unwrap();
    rate(&env, &b, book_id, 4.0).await.unwrap();
    rate(&env, &c, book_id, 4.0).await.unwrap();

    let Json(stored) = books::get_single_book(State(env.state.clone()), Path(book_id.to_string()))
        .await
        .unwrap();
    assert_eq!(stored.rate, 4.3);
}

#[tokio::test]
async fn test_rating_out_of_range_or_unknown_book() {
    let env = test_env();
    let (_, author) = signup(&env, "a@x.com").await;
    let book = add_book(&env, &author, "Dune", "scifi").await;
    let book_id = book["id"].as_str().unwrap();

    let err = rate(&env, &author, book_id, 5.5).await.err().unwrap();
    assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let err = rate(&env, &author, &Uuid::new_v4().to_string(), 3.0)
        .await
        .err()
        .unwrap();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
    assert_eq!(env.repo.rating_count().await, 0);
}

// --- Search ---

async fn seed_catalog(env: &TestEnv) {
    let (_, author) = signup(env, "a@x.com").await;
    add_book(env, &author, "Dune", "scifi").await;
    add_book(env, &author, "Emma", "romance").await;
    add_book(env, &author, "Dune", "classic").await;
}

#[tokio::test]
async fn test_all_books_is_an_empty_list_not_an_error() {
    let env = test_env();
    let Json(list) = books::get_all_books(
        State(env.state.clone()),
        QueryParams(PageParams::default()),
    )
    .await
    .unwrap();
    assert!(list.is_empty());
}

#[tokio::test]
async fn test_all_books_paginates_oldest_first() {
    let env = test_env();
    seed_catalog(&env).await;

    let Json(list) = books::get_all_books(
        State(env.state.clone()),
        QueryParams(PageParams {
            limit: Some(1),
            skip: Some(1),
        }),
    )
    .await
    .unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].name, "Emma");
}

#[tokio::test]
async fn test_book_by_name_and_type() {
    let env = test_env();
    seed_catalog(&env).await;

    let Json(dunes) = books::get_books_by_name(
        State(env.state.clone()),
        QueryParams(BookByNameQuery {
            book_name: Some("Dune".to_string()),
            ..Default::default()
        }),
    )
    .await
    .unwrap();
    assert_eq!(dunes.len(), 2);
    assert_eq!(dunes[0].book_type, "scifi");

    let Json(romance) = books::get_books_by_type(
        State(env.state.clone()),
        QueryParams(BookByTypeQuery {
            book_type: Some("romance".to_string()),
            ..Default::default()
        }),
    )
    .await
    .unwrap();
    assert_eq!(romance.len(), 1);

    let err = books::get_books_by_type(
        State(env.state.clone()),
        QueryParams(BookByTypeQuery {
            book_type: Some("horror".to_string()),
            ..Default::default()
        }),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, ApiError::NotFound(ref m) if m == "No book with this type found"));
}

#[tokio::test]
async fn test_search_parameters_are_required() {
    let env = test_env();
    seed_catalog(&env).await;

    let err = books::get_books_by_name(
        State(env.state.clone()),
        QueryParams(BookByNameQuery::default()),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, ApiError::BadRequest(ref m) if m == "please provide a book name"));

    let err = books::get_books_by_rate(
        State(env.state.clone()),
        QueryParams(BookByRateQuery::default()),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, ApiError::BadRequest(ref m) if m == "please provide a rate search"));

    let err = books::get_books_by_rate(
        State(env.state.clone()),
        QueryParams(BookByRateQuery {
            rate: Some("high".to_string()),
            ..Default::default()
        }),
    )
    .await
    .err()
    .unwrap();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);

    let err = books::search_books(
        State(env.state.clone()),
        QueryParams(SearchQuery {
            q: Some("   ".to_string()),
            ..Default::default()
        }),
    )
    .await
    .err()
    .unwrap();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_book_by_rate_matches_the_stored_mean() {
    let env = test_env();
    let (_, author) = signup(&env, "a@x.com").await;
    let book = add_book(&env, &author, "Dune", "scifi").await;
    add_book(&env, &author, "Emma", "romance").await;
    rate(&env, &author, book["id"].as_str().unwrap(), 3.5)
        .await
        .unwrap();

    let Json(found) = books::get_books_by_rate(
        State(env.state.clone()),
        QueryParams(BookByRateQuery {
            rate: Some("3.5".to_string()),
            ..Default::default()
        }),
    )
    .await
    .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "Dune");

    let err = books::get_books_by_rate(
        State(env.state.clone()),
        QueryParams(BookByRateQuery {
            rate: Some("1".to_string()),
            ..Default::default()
        }),
    )
    .await
    .err()
    .unwrap();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_free_text_search_is_case_insensitive() {
    let env = test_env();
    seed_catalog(&env).await;

    let Json(found) = books::search_books(
        State(env.state.clone()),
        QueryParams(SearchQuery {
            q: Some("ROMAN".to_string()),
            ..Default::default()
        }),
    )
    .await
    .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "Emma");

    let err = books::search_books(
        State(env.state.clone()),
        QueryParams(SearchQuery {
            q: Some("zzz".to_string()),
            ..Default::default()
        }),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, ApiError::NotFound(ref m) if m == "Sorry, no book matched your search"));

    // Wildcard characters are matched literally.
    for q in ["_", "%"] {
        let err = books::search_books(
            State(env.state.clone()),
            QueryParams(SearchQuery {
                q: Some(q.to_string()),
                ..Default::default()
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.status(), StatusCode::NOT_FOUND, "{q}");
    }
}

// --- Store Failures ---

mod store_failures {
    use super::*;
    use async_trait::async_trait;
    use book_catalog::{
        models::{
            Book, BookChanges, BookFilter, NewBook, NewUser, Page, Rating, User, UserChanges,
        },
        rating,
        repository::RepoResult,
    };

    /// In-memory store whose rating aggregate always comes back empty.
    struct EmptyAggregateRepository {
        inner: InMemoryRepository,
    }

    #[async_trait]
    impl Repository for EmptyAggregateRepository {
        async fn create_user(&self, user: NewUser) -> RepoResult<User> {
            self.inner.create_user(user).await
        }
        async fn find_user(&self, id: Uuid) -> RepoResult<Option<User>> {
            self.inner.find_user(id).await
        }
        async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
            self.inner.find_user_by_email(email).await
        }
        async fn push_token(&self, user_id: Uuid, token: &str) -> RepoResult<()> {
            self.inner.push_token(user_id, token).await
        }
        async fn remove_token(&self, user_id: Uuid, token: &str) -> RepoResult<()> {
            self.inner.remove_token(user_id, token).await
        }
        async fn update_user(&self, id: Uuid, changes: UserChanges) -> RepoResult<Option<User>> {
            self.inner.update_user(id, changes).await
        }
        async fn set_profile_photo(
            &self,
            id: Uuid,
            photo: Option<String>,
        ) -> RepoResult<Option<User>> {
            self.inner.set_profile_photo(id, photo).await
        }
        async fn delete_user(&self, id: Uuid) -> RepoResult<Option<User>> {
            self.inner.delete_user(id).await
        }
        async fn create_book(&self, book: NewBook) -> RepoResult<Book> {
            self.inner.create_book(book).await
        }
        async fn find_book(&self, id: Uuid) -> RepoResult<Option<Book>> {
            self.inner.find_book(id).await
        }
        async fn update_book(&self, id: Uuid, changes: BookChanges) -> RepoResult<Option<Book>> {
            self.inner.update_book(id, changes).await
        }
        async fn delete_book(&self, id: Uuid) -> RepoResult<Option<Book>> {
            self.inner.delete_book(id).await
        }
        async fn books_by_author(&self, author_id: Uuid) -> RepoResult<Vec<Book>> {
            self.inner.books_by_author(author_id).await
        }
        async fn list_books(&self, filter: BookFilter, page: Page) -> RepoResult<Vec<Book>> {
            self.inner.list_books(filter, page).await
        }
        async fn upsert_rating(
            &self,
            rater_id: Uuid,
            book_id: Uuid,
            value: f64,
        ) -> RepoResult<Rating> {
            self.inner.upsert_rating(rater_id, book_id, value).await
        }
        async fn average_rating(&self, _book_id: Uuid) -> RepoResult<Option<f64>> {
            Ok(None)
        }
        async fn set_book_rate(&self, book_id: Uuid, rate: f64) -> RepoResult<Option<Book>> {
            self.inner.set_book_rate(book_id, rate).await
        }
    }

    #[tokio::test]
    async fn test_rating_missing_from_aggregate_is_an_internal_error() {
        let repo = Arc::new(EmptyAggregateRepository {
            inner: InMemoryRepository::new(),
        });
        let author = repo
            .create_user(NewUser {
                id: Uuid::new_v4(),
                name: "reader".to_string(),
                email: "a@x.com".to_string(),
                password: "hash".to_string(),
                profile_photo: None,
                token: "t1".to_string(),
            })
            .await
            .unwrap();
        let book = repo
            .create_book(NewBook {
                name: "Dune".to_string(),
                book_type: "scifi".to_string(),
                description: "desert planet".to_string(),
                image: None,
                author_id: author.id,
            })
            .await
            .unwrap();

        let err = rating::submit_rating(repo.as_ref(), Uuid::new_v4(), book.id, 4.0)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::Internal(_)));

        // Same path through the handler, as the route would run it.
        let state = AppState {
            repo: repo.clone() as RepositoryState,
            images: Arc::new(MockImageStore::new()) as ImageStoreState,
            config: AppConfig::default(),
        };
        let rater = AuthUser {
            user: author,
            token: "t1".to_string(),
        };
        let err = books::rate_book(
            rater,
            State(state),
            Path(book.id.to_string()),
            form(RateBookRequest { rating: 4.0 }),
        )
        .await
        .err()
        .unwrap();

        let (status, body) = body_json(err.into_response()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "internal server error");
    }

    fn failing_images_env() -> TestEnv {
        let repo = Arc::new(InMemoryRepository::new());
        let images = MockImageStore::new_failing();
        let state = AppState {
            repo: repo.clone() as RepositoryState,
            images: Arc::new(images.clone()) as ImageStoreState,
            config: AppConfig::default(),
        };
        TestEnv {
            state,
            repo,
            images,
        }
    }

    #[tokio::test]
    async fn test_image_store_failure_on_add_book_persists_nothing() {
        let env = failing_images_env();
        let (_, alice) = signup(&env, "a@x.com").await;

        let err = books::add_book(
            alice.clone(),
            State(env.state.clone()),
            FormPayload::new(CreateBookRequest {
                name: "Dune".to_string(),
                book_type: "scifi".to_string(),
                description: "desert planet".to_string(),
            })
            .with_file(BOOK_IMAGE_FIELD, png("cover.png")),
        )
        .await
        .err()
        .unwrap();

        let (status, body) = body_json(err.into_response()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "internal server error");
        assert!(env.repo.books_by_author(alice.id()).await.unwrap().is_empty());
        let stored = env.repo.find_user(alice.id()).await.unwrap().unwrap();
        assert!(stored.books.is_empty());
    }

    #[tokio::test]
    async fn test_image_store_failure_on_signup_creates_no_account() {
        let env = failing_images_env();

        let err = users::signup(
            State(env.state.clone()),
            FormPayload::new(signup_request("a@x.com"))
                .with_file(PROFILE_PHOTO_FIELD, png("me.png")),
        )
        .await
        .err()
        .unwrap();

        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(env.repo.find_user_by_email("a@x.com").await.unwrap().is_none());
    }
}
