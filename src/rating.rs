use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    repository::Repository,
};

pub const MIN_RATING: f64 = 0.0;
pub const MAX_RATING: f64 = 5.0;

/// Rejects anything outside the closed interval `[0, 5]`, including NaN.
pub fn check_rating(value: f64) -> ApiResult<()> {
    if (MIN_RATING..=MAX_RATING).contains(&value) {
        Ok(())
    } else {
        Err(ApiError::Validation(format!(
            "rating must be between {MIN_RATING} and {MAX_RATING}"
        )))
    }
}

pub fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// submit_rating
///
/// Records `value` as `rater_id`'s rating of `book_id`, then recomputes the book's
/// mean and stores it on the book. Returns the stored rating value.
///
/// The three repository calls are not one transaction. Two raters of the same book
/// racing each other can each persist a mean that misses the other's rating; the next
/// submission corrects it.
pub async fn submit_rating(
    repo: &dyn Repository,
    rater_id: Uuid,
    book_id: Uuid,
    value: f64,
) -> ApiResult<f64> {
    check_rating(value)?;

    if repo.find_book(book_id).await?.is_none() {
        return Err(ApiError::NotFound("no book found".to_string()));
    }

    let stored = repo.upsert_rating(rater_id, book_id, value).await?;

    // The rating written above must be part of the aggregate.
    let Some(mean) = repo.average_rating(book_id).await? else {
        tracing::error!(%book_id, %rater_id, "rating missing from aggregate after upsert");
        return Err(ApiError::Internal(
            "rating aggregate is missing the stored rating".to_string(),
        ));
    };

    let rate = round_to_tenth(mean);
    if repo.set_book_rate(book_id, rate).await?.is_none() {
        tracing::error!(%book_id, "book disappeared while its rating was recomputed");
        return Err(ApiError::NotFound("no book found".to_string()));
    }

    tracing::info!(%book_id, %rater_id, rating = stored.rating, rate, "book rating recomputed");
    Ok(stored.rating)
}
