use super::{RepoResult, Repository, RepositoryError};
use crate::models::{
    Book, BookChanges, BookFilter, NewBook, NewUser, Page, Rating, User, UserChanges,
};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, query_builder::QueryBuilder};
use uuid::Uuid;

const USER_COLUMNS: &str =
    "id, name, email, password, profile_photo, tokens, books, created_at, updated_at";
const BOOK_COLUMNS: &str =
    "id, name, book_type, description, image, rate, author_id, created_at, updated_at";

/// PostgresRepository
///
/// The production implementation of `Repository`, backed by the schema in
/// `migrations/`.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Folds unique-constraint violations into `RepositoryError::Conflict`.
fn map_unique(err: sqlx::Error) -> RepositoryError {
    let unique = err
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation());
    if unique {
        RepositoryError::Conflict
    } else {
        RepositoryError::Database(err)
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn create_user(&self, user: NewUser) -> RepoResult<User> {
        let sql = format!(
            "INSERT INTO users (id, name, email, password, profile_photo, tokens, books, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, ARRAY[$6]::TEXT[], '{{}}', NOW(), NOW()) \
             RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(user.id)
            .bind(user.name)
            .bind(user.email)
            .bind(user.password)
            .bind(user.profile_photo)
            .bind(user.token)
            .fetch_one(&self.pool)
            .await
            .map_err(map_unique)
    }

    async fn find_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn push_token(&self, user_id: Uuid, token: &str) -> RepoResult<()> {
        sqlx::query(
            "UPDATE users SET tokens = array_append(tokens, $2), updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_token(&self, user_id: Uuid, token: &str) -> RepoResult<()> {
        sqlx::query(
            "UPDATE users SET tokens = array_remove(tokens, $2), updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// COALESCE keeps the stored value for every `None` field.
    async fn update_user(&self, id: Uuid, changes: UserChanges) -> RepoResult<Option<User>> {
        let sql = format!(
            "UPDATE users \
             SET name = COALESCE($2, name), \
                 email = COALESCE($3, email), \
                 password = COALESCE($4, password), \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(changes.name)
            .bind(changes.email)
            .bind(changes.password)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_unique)
    }

    async fn set_profile_photo(
        &self,
        id: Uuid,
        photo: Option<String>,
    ) -> RepoResult<Option<User>> {
        let sql = format!(
            "UPDATE users SET profile_photo = $2, updated_at = NOW() WHERE id = $1 \
             RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(photo)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM books WHERE author_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let sql = format!("DELETE FROM users WHERE id = $1 RETURNING {USER_COLUMNS}");
        let deleted = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(deleted)
    }

    async fn create_book(&self, book: NewBook) -> RepoResult<Book> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "INSERT INTO books (id, name, book_type, description, image, rate, author_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, 0, $6, NOW(), NOW()) \
             RETURNING {BOOK_COLUMNS}"
        );
        let created = sqlx::query_as::<_, Book>(&sql)
            .bind(Uuid::new_v4())
            .bind(book.name)
            .bind(book.book_type)
            .bind(book.description)
            .bind(book.image)
            .bind(book.author_id)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("UPDATE users SET books = array_append(books, $1) WHERE id = $2")
            .bind(created.id)
            .bind(created.author_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn find_book(&self, id: Uuid) -> RepoResult<Option<Book>> {
        let sql = format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = $1");
        Ok(sqlx::query_as::<_, Book>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn update_book(&self, id: Uuid, changes: BookChanges) -> RepoResult<Option<Book>> {
        let sql = format!(
            "UPDATE books \
             SET name = COALESCE($2, name), \
                 book_type = COALESCE($3, book_type), \
                 description = COALESCE($4, description), \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {BOOK_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Book>(&sql)
            .bind(id)
            .bind(changes.name)
            .bind(changes.book_type)
            .bind(changes.description)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete_book(&self, id: Uuid) -> RepoResult<Option<Book>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("DELETE FROM books WHERE id = $1 RETURNING {BOOK_COLUMNS}");
        let deleted = sqlx::query_as::<_, Book>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(book) = &deleted {
            sqlx::query("UPDATE users SET books = array_remove(books, $1) WHERE id = $2")
                .bind(book.id)
                .bind(book.author_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(deleted)
    }

    async fn books_by_author(&self, author_id: Uuid) -> RepoResult<Vec<Book>> {
        let sql = format!(
            "SELECT {BOOK_COLUMNS} FROM books WHERE author_id = $1 ORDER BY created_at ASC"
        );
        Ok(sqlx::query_as::<_, Book>(&sql)
            .bind(author_id)
            .fetch_all(&self.pool)
            .await?)
    }

    /// list_books
    ///
    /// Builds the filtered listing with QueryBuilder so every user-supplied value is
    /// a bound parameter.
    async fn list_books(&self, filter: BookFilter, page: Page) -> RepoResult<Vec<Book>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {BOOK_COLUMNS} FROM books"));

        match filter {
            BookFilter::All => {}
            BookFilter::Name(name) => {
                builder.push(" WHERE name = ");
                builder.push_bind(name);
            }
            BookFilter::Type(book_type) => {
                builder.push(" WHERE book_type = ");
                builder.push_bind(book_type);
            }
            BookFilter::Rate(rate) => {
                builder.push(" WHERE rate = ");
                builder.push_bind(rate);
            }
            BookFilter::Text(text) => {
                let pattern = format!("%{}%", escape_like(&text));
                builder.push(" WHERE (name ILIKE ");
                builder.push_bind(pattern.clone());
                builder.push(r" ESCAPE '\' OR book_type ILIKE ");
                builder.push_bind(pattern.clone());
                builder.push(r" ESCAPE '\' OR description ILIKE ");
                builder.push_bind(pattern);
                builder.push(r" ESCAPE '\')");
            }
        }

        builder.push(" ORDER BY created_at ASC");
        if let Some(limit) = page.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit);
        }
        builder.push(" OFFSET ");
        builder.push_bind(page.skip);

        Ok(builder
            .build_query_as::<Book>()
            .fetch_all(&self.pool)
            .await?)
    }

    /// upsert_rating
    ///
    /// One statement against the `(rater_id, book_id)` unique key, so concurrent
    /// submissions for the same pair can never produce two rows.
    async fn upsert_rating(
        &self,
        rater_id: Uuid,
        book_id: Uuid,
        value: f64,
    ) -> RepoResult<Rating> {
        Ok(sqlx::query_as::<_, Rating>(
            "INSERT INTO ratings (id, rating, rater_id, book_id) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (rater_id, book_id) DO UPDATE SET rating = EXCLUDED.rating \
             RETURNING id, rating, rater_id, book_id",
        )
        .bind(Uuid::new_v4())
        .bind(value)
        .bind(rater_id)
        .bind(book_id)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn average_rating(&self, book_id: Uuid) -> RepoResult<Option<f64>> {
        Ok(
            sqlx::query_scalar::<_, Option<f64>>(
                "SELECT AVG(rating)::FLOAT8 FROM ratings WHERE book_id = $1",
            )
            .bind(book_id)
            .fetch_one(&self.pool)
            .await?,
        )
    }

    async fn set_book_rate(&self, book_id: Uuid, rate: f64) -> RepoResult<Option<Book>> {
        let sql = format!(
            "UPDATE books SET rate = $2, updated_at = NOW() WHERE id = $1 RETURNING {BOOK_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Book>(&sql)
            .bind(book_id)
            .bind(rate)
            .fetch_optional(&self.pool)
            .await?)
    }
}

/// Escapes `\`, `%` and `_` so user text matches literally inside an ILIKE pattern.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
