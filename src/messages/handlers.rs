use axum::{
    extract::{Query, State},
    Json,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::instrument;

use crate::{
    auth::extractors::AuthUser,
    error::ApiError,
    messages::{
        dto::{MessageResponse, PaginatedMessages},
        repo::Message,
    },
    state::AppState,
};

/// Fixed page size for the message center.
pub const PAGE_LIMIT: u32 = 5;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

/// Page parsing contract: absent means page 1; anything that is not a string
/// of digits with value >= 1 is rejected.
pub fn parse_page(raw: Option<&str>) -> Option<u32> {
    lazy_static! {
        static ref PAGE_RE: Regex = Regex::new(r"^\d+$").unwrap();
    }
    match raw {
        None => Some(1),
        Some(raw) => {
            if !PAGE_RE.is_match(raw) {
                return None;
            }
            match raw.parse::<u32>() {
                Ok(page) if page >= 1 => Some(page),
                _ => None,
            }
        }
    }
}

pub fn total_pages(total: i64) -> i64 {
    (total + i64::from(PAGE_LIMIT) - 1) / i64::from(PAGE_LIMIT)
}

fn paginate(page: u32, total: i64, messages: Vec<Message>) -> PaginatedMessages {
    PaginatedMessages {
        page,
        limit: PAGE_LIMIT,
        total,
        total_pages: total_pages(total),
        messages: messages.into_iter().map(MessageResponse::from).collect(),
    }
}

#[instrument(skip(state, _user))]
pub async fn past_messages(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<PaginatedMessages>, ApiError> {
    let page = parse_page(query.page.as_deref())
        .ok_or_else(|| ApiError::Validation("Page must be a positive integer".into()))?;

    let offset = i64::from(page - 1) * i64::from(PAGE_LIMIT);
    let messages = Message::list_past(&state.db, i64::from(PAGE_LIMIT), offset).await?;
    let total = Message::count_past(&state.db).await?;

    Ok(Json(paginate(page, total, messages)))
}

#[instrument(skip(state, _user))]
pub async fn scheduled_messages(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<PaginatedMessages>, ApiError> {
    let page = parse_page(query.page.as_deref())
        .ok_or_else(|| ApiError::Validation("Page must be a positive integer".into()))?;

    let offset = i64::from(page - 1) * i64::from(PAGE_LIMIT);
    let messages = Message::list_scheduled(&state.db, i64::from(PAGE_LIMIT), offset).await?;
    let total = Message::count_scheduled(&state.db).await?;

    Ok(Json(paginate(page, total, messages)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_page_defaults_to_one() {
        assert_eq!(parse_page(None), Some(1));
    }

    #[test]
    fn valid_pages_parse() {
        assert_eq!(parse_page(Some("1")), Some(1));
        assert_eq!(parse_page(Some("42")), Some(42));
    }

    #[test]
    fn zero_is_rejected() {
        assert_eq!(parse_page(Some("0")), None);
    }

    #[test]
    fn negative_is_rejected() {
        assert_eq!(parse_page(Some("-1")), None);
    }

    #[test]
    fn non_numeric_is_rejected() {
        assert_eq!(parse_page(Some("abc")), None);
        assert_eq!(parse_page(Some("1.5")), None);
        assert_eq!(parse_page(Some("")), None);
        assert_eq!(parse_page(Some(" 1")), None);
    }

    #[test]
    fn total_pages_is_ceiling_of_total_over_limit() {
        assert_eq!(total_pages(0), 0);
        assert_eq!(total_pages(1), 1);
        assert_eq!(total_pages(5), 1);
        assert_eq!(total_pages(6), 2);
        assert_eq!(total_pages(11), 3);
    }
}
