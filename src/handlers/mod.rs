use axum::{
    body::Bytes,
    extract::{Form, FromRequest, FromRequestParts, Multipart, Query, Request},
    http::{header, request::Parts},
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;
use validator::Validate;

use crate::{
    AppState,
    error::{ApiError, ApiResult},
    storage::{ImageStoreState, ImageUpload, validate_image},
};

pub mod books;
pub mod users;

/// Multipart field carrying a profile photo (signup and `/profile-photo`).
pub const PROFILE_PHOTO_FIELD: &str = "profilePhoto";
/// Multipart field carrying a book cover (`/add-book`).
pub const BOOK_IMAGE_FIELD: &str = "image";

/// FormPayload
///
/// A request body that may arrive as JSON, as `application/x-www-form-urlencoded`
/// or as `multipart/form-data`. Text fields are gathered into `fields`; multipart
/// file parts are kept in `files` by field name, first part per name winning. An
/// empty JSON body deserializes as `{}`.
#[derive(Debug)]
pub struct FormPayload<T> {
    pub fields: T,
    pub files: HashMap<String, ImageUpload>,
}

impl<T> FormPayload<T> {
    pub fn new(fields: T) -> Self {
        Self {
            fields,
            files: HashMap::new(),
        }
    }

    pub fn with_file(mut self, field: &str, upload: ImageUpload) -> Self {
        self.files.insert(field.to_string(), upload);
        self
    }

    /// Removes the upload sent under `field`. Files under any other name are ignored.
    pub fn take_file(&mut self, field: &str) -> Option<ImageUpload> {
        self.files.remove(field)
    }
}

enum BodyKind {
    Json,
    UrlEncoded,
    Multipart,
}

fn body_kind(req: &Request) -> BodyKind {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if content_type.starts_with("multipart/form-data") {
        BodyKind::Multipart
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        BodyKind::UrlEncoded
    } else {
        BodyKind::Json
    }
}

impl<S, T> FromRequest<S> for FormPayload<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match body_kind(&req) {
            BodyKind::Multipart => {
                let multipart = Multipart::from_request(req, state)
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                read_multipart(multipart).await
            }
            BodyKind::UrlEncoded => {
                let Form(fields) = Form::<T>::from_request(req, state).await.map_err(|e| {
                    ApiError::Validation(format!("invalid form fields: {}", e.body_text()))
                })?;
                Ok(Self::new(fields))
            }
            BodyKind::Json => {
                let bytes = Bytes::from_request(req, state)
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                let fields = if bytes.iter().all(u8::is_ascii_whitespace) {
                    serde_json::from_value(Value::Object(Map::new()))
                } else {
                    serde_json::from_slice(&bytes)
                }
                .map_err(|e| ApiError::Validation(format!("invalid request body: {e}")))?;
                Ok(Self::new(fields))
            }
        }
    }
}

/// read_multipart
///
/// Text parts become string values keyed by field name. Parts carrying a file name
/// are kept as uploads keyed by field name; a repeated name keeps its first part.
pub async fn read_multipart<T: DeserializeOwned>(
    mut multipart: Multipart,
) -> ApiResult<FormPayload<T>> {
    let mut values = Map::new();
    let mut files = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if let Some(file_name) = field.file_name().map(str::to_string) {
            let content_type = field.content_type().map(str::to_string);
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            files.entry(name).or_insert(ImageUpload {
                file_name,
                content_type,
                bytes,
            });
        } else {
            let text = field
                .text()
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            values.insert(name, Value::String(text));
        }
    }

    let fields = serde_json::from_value(Value::Object(values))
        .map_err(|e| ApiError::Validation(format!("invalid form fields: {e}")))?;
    Ok(FormPayload { fields, files })
}

/// QueryParams
///
/// `Query<T>` whose rejection is reported as a JSON `BadRequest`.
#[derive(Debug)]
pub struct QueryParams<T>(pub T);

impl<S, T> FromRequestParts<S> for QueryParams<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| QueryParams(value))
            .map_err(|e| ApiError::BadRequest(e.body_text()))
    }
}

/// validate_payload
///
/// Runs the `validator` rules and reports only one message: the first failing rule
/// of the alphabetically first failing field.
pub fn validate_payload<T: Validate>(payload: &T) -> ApiResult<()> {
    let Err(errors) = payload.validate() else {
        return Ok(());
    };

    let ordered: BTreeMap<_, _> = errors.field_errors().into_iter().collect();
    let message = ordered
        .iter()
        .find_map(|(field, errs)| {
            errs.first().map(|err| {
                err.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{field} is invalid"))
            })
        })
        .unwrap_or_else(|| "invalid input".to_string());

    Err(ApiError::Validation(message))
}

pub fn parse_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid id: {raw}")))
}

/// Trims a required text field.
pub(crate) fn trimmed(value: String) -> String {
    value.trim().to_string()
}

/// Trims an optional text field; blank values count as absent.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validates and uploads an optional image, returning the stored reference.
pub(crate) async fn store_image(
    state: &AppState,
    file: Option<ImageUpload>,
) -> ApiResult<Option<String>> {
    let Some(image) = file else {
        return Ok(None);
    };
    validate_image(&image, state.config.max_image_bytes)?;
    let reference = state.images.upload(&image).await?;
    Ok(Some(reference))
}

/// Releases an image reference. Failures are logged and otherwise ignored.
pub(crate) async fn release_image(images: &ImageStoreState, reference: Option<&str>) {
    let Some(reference) = reference else {
        return;
    };
    if let Err(e) = images.delete(reference).await {
        tracing::error!(reference, error = %e, "failed to release image");
    }
}
