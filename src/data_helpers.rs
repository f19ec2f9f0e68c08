use chrono::{Local, NaiveDate};
use serde::Serialize;

use crate::error::{ServiceError, ServiceResult};

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

/// Business date of "now" in the shop's local time zone (`YYYY-MM-DD`).
pub(crate) fn business_date_today() -> String {
    Local::now().date_naive().format(DATE_FORMAT).to_string()
}

pub(crate) fn now_rfc3339() -> String {
    Local::now().to_rfc3339()
}

/// Parse an optional `YYYY-MM-DD` query value. Empty strings count as absent.
pub(crate) fn parse_date(field: &str, value: Option<&str>) -> ServiceResult<Option<NaiveDate>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .map(Some)
            .map_err(|_| ServiceError::Validation(format!("{field} must be YYYY-MM-DD, got '{raw}'"))),
    }
}

/// Inclusive date range; both bounds default to today.
pub(crate) fn date_range(
    start: Option<&str>,
    end: Option<&str>,
) -> ServiceResult<(String, String)> {
    let start = parse_date("startDate", start)?;
    let end = parse_date("endDate", end)?;
    let today = Local::now().date_naive();
    let (start, end) = match (start, end) {
        (Some(s), Some(e)) => (s, e),
        (Some(s), None) => (s, today.max(s)),
        (None, Some(e)) => (e, e),
        (None, None) => (today, today),
    };
    if end < start {
        return Err(ServiceError::Validation(
            "endDate must not be before startDate".into(),
        ));
    }
    Ok((
        start.format(DATE_FORMAT).to_string(),
        end.format(DATE_FORMAT).to_string(),
    ))
}

/// Trimmed, non-empty text or `None`.
pub(crate) fn clean_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub(crate) fn require_text(field: &str, value: Option<&str>) -> ServiceResult<String> {
    clean_text(value).ok_or_else(|| ServiceError::Validation(format!("{field} is required")))
}

pub(crate) fn normalize_phone(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect::<String>()
}

/// `%term%` for a LIKE filter, with LIKE wildcards in the term escaped
/// (use with `ESCAPE '\'`).
pub(crate) fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.trim().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    /// Clamp caller-supplied values: page is 1-based, limit in 1..=max.
    pub fn new(page: Option<u32>, limit: Option<u32>, default_limit: u32, max_limit: u32) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(default_limit).clamp(1, max_limit.max(1)),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.limit as i64
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub total_pages: i64,
}

impl<T> Paged<T> {
    pub fn new(items: Vec<T>, total: i64, request: PageRequest) -> Self {
        let limit = request.limit.max(1) as i64;
        Self {
            items,
            total,
            page: request.page,
            total_pages: (total + limit - 1) / limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_clamps() {
        let req = PageRequest::new(Some(0), Some(1000), 10, 100);
        assert_eq!(req, PageRequest { page: 1, limit: 100 });
        assert_eq!(PageRequest::new(None, None, 10, 100).offset(), 0);
        assert_eq!(PageRequest::new(Some(3), Some(20), 10, 100).offset(), 40);
    }

    #[test]
    fn test_total_pages_rounds_up() {
        let req = PageRequest::new(Some(1), Some(10), 10, 100);
        assert_eq!(Paged::<()>::new(vec![], 0, req).total_pages, 0);
        assert_eq!(Paged::<()>::new(vec![], 10, req).total_pages, 1);
        assert_eq!(Paged::<()>::new(vec![], 11, req).total_pages, 2);
    }

    #[test]
    fn test_date_range_validation() {
        assert_eq!(
            date_range(Some("2024-03-01"), Some("2024-03-31")).unwrap(),
            ("2024-03-01".to_string(), "2024-03-31".to_string())
        );
        assert_eq!(
            date_range(None, Some("2024-03-05")).unwrap(),
            ("2024-03-05".to_string(), "2024-03-05".to_string())
        );
        assert!(date_range(Some("2024-03-31"), Some("2024-03-01")).is_err());
        assert!(date_range(Some("31/03/2024"), None).is_err());
        let today = business_date_today();
        assert_eq!(date_range(Some(""), None).unwrap(), (today.clone(), today));
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(" cincin "), "%cincin%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn test_text_helpers() {
        assert_eq!(clean_text(Some("  ")), None);
        assert_eq!(clean_text(Some(" Budi ")), Some("Budi".into()));
        assert!(require_text("name", None).is_err());
        assert_eq!(normalize_phone("+62 812-3456"), "+628123456");
    }
}
