use super::{RepoResult, Repository, RepositoryError};
use crate::models::{
    Book, BookChanges, BookFilter, NewBook, NewUser, Page, Rating, User, UserChanges,
};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// InMemoryRepository
///
/// A process-local `Repository` used by the test suite and for running the API
/// without Postgres. Records are kept in insertion order, which doubles as creation
/// order for the book listings.
#[derive(Default)]
pub struct InMemoryRepository {
    store: Mutex<Store>,
}

#[derive(Default)]
struct Store {
    users: Vec<User>,
    books: Vec<Book>,
    ratings: Vec<Rating>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rating records. Useful for asserting upsert behaviour.
    pub async fn rating_count(&self) -> usize {
        self.store.lock().await.ratings.len()
    }

    pub async fn user_count(&self) -> usize {
        self.store.lock().await.users.len()
    }
}

impl Store {
    fn user_mut(&mut self, id: Uuid) -> Option<&mut User> {
        self.users.iter_mut().find(|u| u.id == id)
    }

    fn book_mut(&mut self, id: Uuid) -> Option<&mut Book> {
        self.books.iter_mut().find(|b| b.id == id)
    }
}

fn matches(book: &Book, filter: &BookFilter) -> bool {
    match filter {
        BookFilter::All => true,
        BookFilter::Name(name) => book.name == *name,
        BookFilter::Type(book_type) => book.book_type == *book_type,
        BookFilter::Rate(rate) => book.rate == *rate,
        BookFilter::Text(text) => {
            let needle = text.to_lowercase();
            [&book.name, &book.book_type, &book.description]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
        }
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create_user(&self, user: NewUser) -> RepoResult<User> {
        let mut store = self.store.lock().await;
        if store.users.iter().any(|u| u.email == user.email) {
            return Err(RepositoryError::Conflict);
        }

        let now = Utc::now();
        let created = User {
            id: user.id,
            name: user.name,
            email: user.email,
            password: user.password,
            profile_photo: user.profile_photo,
            tokens: vec![user.token],
            books: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        store.users.push(created.clone());
        Ok(created)
    }

    async fn find_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        let store = self.store.lock().await;
        Ok(store.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let store = self.store.lock().await;
        Ok(store.users.iter().find(|u| u.email == email).cloned())
    }

    async fn push_token(&self, user_id: Uuid, token: &str) -> RepoResult<()> {
        let mut store = self.store.lock().await;
        if let Some(user) = store.user_mut(user_id) {
            user.tokens.push(token.to_string());
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn remove_token(&self, user_id: Uuid, token: &str) -> RepoResult<()> {
        let mut store = self.store.lock().await;
        if let Some(user) = store.user_mut(user_id) {
            user.tokens.retain(|t| t != token);
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_user(&self, id: Uuid, changes: UserChanges) -> RepoResult<Option<User>> {
        let mut store = self.store.lock().await;
        if let Some(email) = &changes.email {
            if store.users.iter().any(|u| u.id != id && &u.email == email) {
                return Err(RepositoryError::Conflict);
            }
        }

        let Some(user) = store.user_mut(id) else {
            return Ok(None);
        };
        if let Some(name) = changes.name {
            user.name = name;
        }
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(password) = changes.password {
            user.password = password;
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn set_profile_photo(
        &self,
        id: Uuid,
        photo: Option<String>,
    ) -> RepoResult<Option<User>> {
        let mut store = self.store.lock().await;
        Ok(store.user_mut(id).map(|user| {
            user.profile_photo = photo;
            user.updated_at = Utc::now();
            user.clone()
        }))
    }

    async fn delete_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        let mut store = self.store.lock().await;
        let Some(position) = store.users.iter().position(|u| u.id == id) else {
            return Ok(None);
        };
        store.books.retain(|b| b.author_id != id);
        Ok(Some(store.users.remove(position)))
    }

    async fn create_book(&self, book: NewBook) -> RepoResult<Book> {
        let mut store = self.store.lock().await;
        let now = Utc::now();
        let created = Book {
            id: Uuid::new_v4(),
            name: book.name,
            book_type: book.book_type,
            description: book.description,
            image: book.image,
            rate: 0.0,
            author_id: book.author_id,
            created_at: now,
            updated_at: now,
        };

        if let Some(author) = store.user_mut(created.author_id) {
            author.books.push(created.id);
        }
        store.books.push(created.clone());
        Ok(created)
    }

    async fn find_book(&self, id: Uuid) -> RepoResult<Option<Book>> {
        let store = self.store.lock().await;
        Ok(store.books.iter().find(|b| b.id == id).cloned())
    }

    async fn update_book(&self, id: Uuid, changes: BookChanges) -> RepoResult<Option<Book>> {
        let mut store = self.store.lock().await;
        Ok(store.book_mut(id).map(|book| {
            if let Some(name) = changes.name {
                book.name = name;
            }
            if let Some(book_type) = changes.book_type {
                book.book_type = book_type;
            }
            if let Some(description) = changes.description {
                book.description = description;
            }
            book.updated_at = Utc::now();
            book.clone()
        }))
    }

    async fn delete_book(&self, id: Uuid) -> RepoResult<Option<Book>> {
        let mut store = self.store.lock().await;
        let Some(position) = store.books.iter().position(|b| b.id == id) else {
            return Ok(None);
        };
        let deleted = store.books.remove(position);
        if let Some(author) = store.user_mut(deleted.author_id) {
            author.books.retain(|b| *b != id);
        }
        Ok(Some(deleted))
    }

    async fn books_by_author(&self, author_id: Uuid) -> RepoResult<Vec<Book>> {
        let store = self.store.lock().await;
        Ok(store
            .books
            .iter()
            .filter(|b| b.author_id == author_id)
            .cloned()
            .collect())
    }

    async fn list_books(&self, filter: BookFilter, page: Page) -> RepoResult<Vec<Book>> {
        let store = self.store.lock().await;
        let matching = store
            .books
            .iter()
            .filter(|b| matches(b, &filter))
            .skip(page.skip as usize)
            .cloned();

        Ok(match page.limit {
            Some(limit) => matching.take(limit as usize).collect(),
            None => matching.collect(),
        })
    }

    async fn upsert_rating(
        &self,
        rater_id: Uuid,
        book_id: Uuid,
        value: f64,
    ) -> RepoResult<Rating> {
        let mut store = self.store.lock().await;
        if let Some(existing) = store
            .ratings
            .iter_mut()
            .find(|r| r.rater_id == rater_id && r.book_id == book_id)
        {
            existing.rating = value;
            return Ok(existing.clone());
        }

        let rating = Rating {
            id: Uuid::new_v4(),
            rating: value,
            rater_id,
            book_id,
        };
        store.ratings.push(rating.clone());
        Ok(rating)
    }

    async fn average_rating(&self, book_id: Uuid) -> RepoResult<Option<f64>> {
        let store = self.store.lock().await;
        let values: Vec<f64> = store
            .ratings
            .iter()
            .filter(|r| r.book_id == book_id)
            .map(|r| r.rating)
            .collect();

        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(values.iter().sum::<f64>() / values.len() as f64))
    }

    async fn set_book_rate(&self, book_id: Uuid, rate: f64) -> RepoResult<Option<Book>> {
        let mut store = self.store.lock().await;
        Ok(store.book_mut(book_id).map(|book| {
            book.rate = rate;
            book.updated_at = Utc::now();
            book.clone()
        }))
    }
}
