use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::de::IgnoredAny;
use serde_json::json;
use uuid::Uuid;

use super::{
    FormPayload, PROFILE_PHOTO_FIELD, non_blank, parse_id, release_image, store_image, trimmed,
    validate_payload,
};
use crate::{
    AppState,
    auth::{AuthUser, hash_password, issue_token, verify_password},
    error::{ApiError, ApiResult, EMAIL_TAKEN},
    models::{
        LoginRequest, NewUser, SignupRequest, TokenResponse, UpdateUserRequest, UserChanges,
        UserProfile,
    },
};

/// signup
///
/// [Public Route] Creates an account and returns its first bearer token.
/// Accepts JSON, form-encoded or multipart fields; a `profilePhoto` file part becomes
/// the profile photo.
#[utoipa::path(
    post,
    path = "/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created", body = TokenResponse),
        (status = 400, description = "Email already in use or invalid image"),
        (status = 422, description = "Validation failed")
    )
)]
pub async fn signup(
    State(state): State<AppState>,
    mut form: FormPayload<SignupRequest>,
) -> ApiResult<impl IntoResponse> {
    let file = form.take_file(PROFILE_PHOTO_FIELD);
    let fields = form.fields;
    let payload = SignupRequest {
        name: trimmed(fields.name),
        email: trimmed(fields.email),
        password: fields.password,
    };
    validate_payload(&payload)?;

    if state.repo.find_user_by_email(&payload.email).await?.is_some() {
        return Err(ApiError::Conflict(EMAIL_TAKEN.to_string()));
    }

    let password = hash_password(payload.password, state.config.bcrypt_cost).await?;
    let profile_photo = store_image(&state, file).await?;

    let id = Uuid::new_v4();
    let token = issue_token(&state.config, id, state.config.signup_token_ttl_secs)?;

    let created = state
        .repo
        .create_user(NewUser {
            id,
            name: payload.name,
            email: payload.email,
            password,
            profile_photo: profile_photo.clone(),
            token: token.clone(),
        })
        .await;

    if let Err(e) = created {
        release_image(&state.images, profile_photo.as_deref()).await;
        return Err(e.into());
    }

    tracing::info!(user_id = %id, "user signed up");
    Ok((StatusCode::CREATED, Json(TokenResponse { token })))
}

/// login
///
/// [Public Route] Exchanges credentials for a new bearer token. Existing tokens stay
/// valid. Unknown email and wrong password produce the same response.
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 201, description = "Logged in", body = TokenResponse),
        (status = 422, description = "Validation failed or invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    FormPayload { fields, .. }: FormPayload<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let payload = LoginRequest {
        email: trimmed(fields.email),
        password: fields.password,
    };
    validate_payload(&payload)?;

    let user = state
        .repo
        .find_user_by_email(&payload.email)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    if !verify_password(payload.password, user.password.clone()).await? {
        return Err(ApiError::InvalidCredentials);
    }

    let token = issue_token(&state.config, user.id, state.config.login_token_ttl_secs)?;
    state.repo.push_token(user.id, &token).await?;

    tracing::debug!(user_id = %user.id, "user logged in");
    Ok((StatusCode::CREATED, Json(TokenResponse { token })))
}

/// logout
///
/// [Authenticated Route] Revokes exactly the token this request was made with.
#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 200, description = "Logged out"),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn logout(
    auth: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    state.repo.remove_token(auth.id(), &auth.token).await?;
    Ok(Json(json!({ "success": "logged out" })))
}

#[utoipa::path(
    get,
    path = "/profile",
    responses((status = 200, description = "The caller's account", body = UserProfile))
)]
pub async fn get_profile(auth: AuthUser) -> Json<UserProfile> {
    Json(UserProfile::from(&auth.user))
}

/// update_user
///
/// [Authenticated Route] Partial update of the caller's own account. The path id must
/// be the caller's id.
#[utoipa::path(
    patch,
    path = "/update-user/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated"),
        (status = 400, description = "Email already in use"),
        (status = 403, description = "Not the caller's account"),
        (status = 422, description = "Validation failed")
    )
)]
pub async fn update_user(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    FormPayload { fields, .. }: FormPayload<UpdateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    let payload = UpdateUserRequest {
        name: non_blank(fields.name),
        email: non_blank(fields.email),
        password: fields.password.filter(|p| !p.is_empty()),
    };
    validate_payload(&payload)?;

    let id = parse_id(&raw_id)?;
    if id != auth.id() {
        return Err(ApiError::Forbidden(
            "you can only update your own account".to_string(),
        ));
    }

    let password = match payload.password {
        Some(plain) => Some(hash_password(plain, state.config.bcrypt_cost).await?),
        None => None,
    };

    let user = state
        .repo
        .update_user(
            id,
            UserChanges {
                name: payload.name,
                email: payload.email,
                password,
            },
        )
        .await?
        .ok_or_else(|| ApiError::NotFound("no user found".to_string()))?;

    Ok(Json(json!({ "result": UserProfile::from(&user) })))
}

/// delete_profile
///
/// [Authenticated Route] Deletes the caller's account together with every book they
/// authored, then releases the images those records referenced.
#[utoipa::path(
    delete,
    path = "/delete-profile",
    responses((status = 200, description = "Deleted"))
)]
pub async fn delete_profile(
    auth: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let books = state.repo.books_by_author(auth.id()).await?;

    let deleted = state
        .repo
        .delete_user(auth.id())
        .await?
        .ok_or_else(|| ApiError::NotFound("no user found".to_string()))?;

    release_image(&state.images, deleted.profile_photo.as_deref()).await;
    for book in &books {
        release_image(&state.images, book.image.as_deref()).await;
    }

    tracing::info!(user_id = %deleted.id, books = books.len(), "account deleted");
    Ok(Json(json!({ "Deleted user": UserProfile::from(&deleted) })))
}

/// upload_profile_photo
///
/// [Authenticated Route] Sets or replaces the caller's profile photo. The previous
/// photo, if any, is released after the new one is stored.
#[utoipa::path(
    post,
    path = "/profile-photo",
    responses(
        (status = 200, description = "Photo stored", body = UserProfile),
        (status = 400, description = "No file or not an image")
    )
)]
pub async fn upload_profile_photo(
    auth: AuthUser,
    State(state): State<AppState>,
    mut form: FormPayload<IgnoredAny>,
) -> ApiResult<Json<UserProfile>> {
    let Some(file) = form.take_file(PROFILE_PHOTO_FIELD) else {
        return Err(ApiError::BadRequest("please upload a photo".to_string()));
    };
    let reference = store_image(&state, Some(file)).await?;

    let user = match state.repo.set_profile_photo(auth.id(), reference.clone()).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            release_image(&state.images, reference.as_deref()).await;
            return Err(ApiError::NotFound("no user found".to_string()));
        }
        Err(e) => {
            release_image(&state.images, reference.as_deref()).await;
            return Err(e.into());
        }
    };

    release_image(&state.images, auth.user.profile_photo.as_deref()).await;
    Ok(Json(UserProfile::from(&user)))
}

#[utoipa::path(
    delete,
    path = "/profile-photo",
    responses((status = 200, description = "Photo removed"))
)]
pub async fn delete_profile_photo(
    auth: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    state.repo.set_profile_photo(auth.id(), None).await?;
    release_image(&state.images, auth.user.profile_photo.as_deref()).await;
    Ok(Json(json!({ "success": "profile photo deleted" })))
}
