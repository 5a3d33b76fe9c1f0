use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationError};

// --- Core Application Schemas (Mapped to Database) ---

/// User
///
/// The full account row from the `users` table. Carries the password hash and the
/// active token set, so it is never serialized directly; handlers respond with
/// `UserProfile` instead.
#[derive(Debug, Clone, FromRow, Default)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    // Unique across all users.
    pub email: String,
    // bcrypt hash.
    pub password: String,
    pub profile_photo: Option<String>,
    // Active bearer tokens. A token is valid only while it is listed here.
    pub tokens: Vec<String>,
    // Ids of the books this user authored.
    pub books: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Book
///
/// A catalog entry from the `books` table. `author_id` is set at creation and never
/// changes; `rate` is the rounded mean of all ratings recorded for the book.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Book {
    pub id: Uuid,
    pub name: String,

    /// Stored as `book_type`, exposed as `type` in JSON.
    #[serde(rename = "type")]
    pub book_type: String,

    pub description: String,
    pub image: Option<String>,
    pub rate: f64,
    pub author_id: Uuid,

    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// Rating
///
/// One rater's score for one book. The `(rater_id, book_id)` pair is unique; a second
/// submission overwrites `rating`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Rating {
    pub id: Uuid,
    pub rating: f64,
    pub rater_id: Uuid,
    pub book_id: Uuid,
}

// --- Public Views (Output Schemas) ---

/// UserProfile
///
/// The serialized form of a `User`: everything except the password hash and the
/// token set.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub profile_photo: Option<String>,
    pub books: Vec<Uuid>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            profile_photo: user.profile_photo.clone(),
            books: user.books.clone(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct RateResponse {
    pub rate: f64,
}

// --- Repository Inputs ---

/// Everything needed to insert a user together with its first session token.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password: String,
    pub profile_photo: Option<String>,
    pub token: String,
}

/// Partial user update. `None` keeps the stored value; `password` is already hashed.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewBook {
    pub name: String,
    pub book_type: String,
    pub description: String,
    pub image: Option<String>,
    pub author_id: Uuid,
}

/// Partial book update. `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct BookChanges {
    pub name: Option<String>,
    pub book_type: Option<String>,
    pub description: Option<String>,
}

/// BookFilter
///
/// The read paths over the book store. Name and type are exact matches; `Text` is a
/// case-insensitive substring match over name, type and description.
#[derive(Debug, Clone, PartialEq)]
pub enum BookFilter {
    All,
    Name(String),
    Type(String),
    Rate(f64),
    Text(String),
}

/// Page
///
/// Pagination window. A missing or zero `limit` means no limit.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Page {
    pub limit: Option<i64>,
    pub skip: i64,
}

impl Page {
    pub fn new(limit: Option<i64>, skip: Option<i64>) -> Self {
        Self {
            limit: limit.filter(|l| *l > 0),
            skip: skip.unwrap_or(0).max(0),
        }
    }
}

// --- Request Payloads (Input Schemas) ---

/// Field validator: letters and digits only.
pub fn alphanumeric(value: &str) -> Result<(), ValidationError> {
    if value.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(ValidationError::new("alphanumeric"))
    }
}

/// SignupRequest
///
/// Accepted as JSON or as multipart form fields (with an optional `profilePhoto` file).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[serde(default)]
#[ts(export)]
pub struct SignupRequest {
    #[validate(length(min = 3, message = "name should be atleast 3 characters long"))]
    pub name: String,
    #[validate(email(message = "email is invalid"))]
    pub email: String,
    #[validate(
        length(
            min = 5,
            message = "password should be only text and numbers and at least 5 characters long"
        ),
        custom(
            function = "alphanumeric",
            message = "password should be only text and numbers and at least 5 characters long"
        )
    )]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[serde(default)]
#[ts(export)]
pub struct LoginRequest {
    #[validate(email(message = "email is invalid"))]
    pub email: String,
    #[validate(
        length(min = 5, message = "Password has to be valid."),
        custom(function = "alphanumeric", message = "Password has to be valid.")
    )]
    pub password: String,
}

/// UpdateUserRequest
///
/// Partial update of the caller's own account. Absent (or empty) fields keep their
/// stored value.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[serde(default)]
#[ts(export)]
pub struct UpdateUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 3, message = "name should be atleast 3 characters long"))]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(email(message = "email is invalid"))]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(
        length(
            min = 5,
            message = "password should be only text and numbers and at least 5 characters long"
        ),
        custom(
            function = "alphanumeric",
            message = "password should be only text and numbers and at least 5 characters long"
        )
    )]
    pub password: Option<String>,
}

/// CreateBookRequest
///
/// Accepted as JSON or as multipart form fields (with an optional `image` file).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[serde(default)]
#[ts(export)]
pub struct CreateBookRequest {
    #[validate(length(min = 3, message = "name should be atleast 3 characters long"))]
    pub name: String,
    #[serde(rename = "type")]
    #[validate(length(min = 1, message = "type is required"))]
    pub book_type: String,
    #[validate(length(min = 5, message = "description should be atleast 5 characters long"))]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[serde(default)]
#[ts(export)]
pub struct UpdateBookRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 3, message = "name should be atleast 3 characters long"))]
    pub name: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub book_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 5, message = "description should be atleast 5 characters long"))]
    pub description: Option<String>,
}

/// RateBookRequest
///
/// The bound check lives in the rating aggregator, not here, so every caller of
/// `submit_rating` gets it.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct RateBookRequest {
    /// A number, or its text form when sent as a form field.
    #[serde(deserialize_with = "number_or_text")]
    pub rating: f64,
}

/// Form and multipart fields always arrive as text, so a numeric field accepts
/// either a JSON number or a string holding one.
fn number_or_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("rating must be a number, got {text:?}"))),
    }
}

/// `limit` and `skip` that do not parse as integers are treated as absent.
fn lenient_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| v.trim().parse().ok()))
}

// --- Query Parameters ---

#[derive(Debug, Deserialize, IntoParams, Default)]
#[into_params(parameter_in = Query)]
pub struct PageParams {
    /// Maximum number of books to return. Zero or absent means no limit.
    #[serde(default, deserialize_with = "lenient_int")]
    pub limit: Option<i64>,
    /// Number of books to skip.
    #[serde(default, deserialize_with = "lenient_int")]
    pub skip: Option<i64>,
}

#[derive(Debug, Deserialize, IntoParams, Default)]
#[into_params(parameter_in = Query)]
pub struct BookByNameQuery {
    /// Exact book name.
    #[serde(rename = "bookName", alias = "name")]
    pub book_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub limit: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub skip: Option<i64>,
}

#[derive(Debug, Deserialize, IntoParams, Default)]
#[into_params(parameter_in = Query)]
pub struct BookByTypeQuery {
    /// Exact book type.
    #[serde(rename = "type")]
    pub book_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub limit: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub skip: Option<i64>,
}

#[derive(Debug, Deserialize, IntoParams, Default)]
#[into_params(parameter_in = Query)]
pub struct BookByRateQuery {
    /// Mean rating to match, e.g. `3.5`.
    pub rate: Option<String>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub limit: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub skip: Option<i64>,
}

#[derive(Debug, Deserialize, IntoParams, Default)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    /// Free text matched against name, type and description.
    pub q: Option<String>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub limit: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub skip: Option<i64>,
}
