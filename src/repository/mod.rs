use crate::models::{
    Book, BookChanges, BookFilter, NewBook, NewUser, Page, Rating, User, UserChanges,
};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;

/// RepositoryError
///
/// Store failures as seen by the handlers. Unique-key violations are pulled out as
/// `Conflict` so the email-uniqueness invariant can be reported as a client error.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("duplicate value for a unique field")]
    Conflict,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Repository Trait
///
/// The persistence contract for users, books and ratings. Handlers only ever see
/// `Arc<dyn Repository>`, so the Postgres store and the in-memory store are
/// interchangeable.
///
/// Multi-record mutations (`create_book`, `delete_book`, `delete_user`) are atomic
/// within one call. The rating flow is not: `upsert_rating`, `average_rating` and
/// `set_book_rate` are separate calls and concurrent raters of the same book can
/// overwrite each other's recomputed mean.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    /// Inserts the user with `token` as its only active token.
    /// Fails with `Conflict` when the email is taken.
    async fn create_user(&self, user: NewUser) -> RepoResult<User>;
    async fn find_user(&self, id: Uuid) -> RepoResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    async fn push_token(&self, user_id: Uuid, token: &str) -> RepoResult<()>;
    // Idempotent: removing an absent token is a no-op.
    async fn remove_token(&self, user_id: Uuid, token: &str) -> RepoResult<()>;
    async fn update_user(&self, id: Uuid, changes: UserChanges) -> RepoResult<Option<User>>;
    async fn set_profile_photo(&self, id: Uuid, photo: Option<String>)
    -> RepoResult<Option<User>>;
    /// Deletes the user and every book it authored.
    async fn delete_user(&self, id: Uuid) -> RepoResult<Option<User>>;

    // --- Books ---
    /// Inserts the book and appends its id to the author's book list.
    async fn create_book(&self, book: NewBook) -> RepoResult<Book>;
    async fn find_book(&self, id: Uuid) -> RepoResult<Option<Book>>;
    async fn update_book(&self, id: Uuid, changes: BookChanges) -> RepoResult<Option<Book>>;
    /// Deletes the book and removes its id from the author's book list.
    async fn delete_book(&self, id: Uuid) -> RepoResult<Option<Book>>;
    async fn books_by_author(&self, author_id: Uuid) -> RepoResult<Vec<Book>>;
    /// Filtered listing, oldest first.
    async fn list_books(&self, filter: BookFilter, page: Page) -> RepoResult<Vec<Book>>;

    // --- Ratings ---
    /// Insert-or-overwrite keyed by `(rater_id, book_id)`.
    async fn upsert_rating(&self, rater_id: Uuid, book_id: Uuid, value: f64)
    -> RepoResult<Rating>;
    /// Mean of every stored rating for the book, `None` when there are none.
    async fn average_rating(&self, book_id: Uuid) -> RepoResult<Option<f64>>;
    async fn set_book_rate(&self, book_id: Uuid, rate: f64) -> RepoResult<Option<Book>>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;
