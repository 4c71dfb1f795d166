pub mod cache;
pub mod catalog;
pub mod client;
pub mod collection;
pub mod config;
pub mod filters;
pub mod models;
pub mod mutation;
pub mod navigation;
pub mod search;
pub mod topics;
pub mod users;

pub use client::{ApiClient, ClientError};
pub use collection::{TaskCollection, ViewStatus};
pub use filters::{FilterSpec, PaginationSpec, SortKey};
pub use models::{Event, EventDefinition, Flag, Task};
pub use mutation::{MutationReport, MutationStatus, TaskMutations};
pub use navigation::NavigationState;

/// Parse a date bound given as `YYYY-MM-DD` or RFC 3339 into epoch seconds.
///
/// A bare date resolves to midnight UTC when `end_of_day` is false and to
/// 23:59:59 UTC otherwise, so `--until 2024-05-01` includes that whole day.
pub fn parse_date_bound(raw: &str, end_of_day: bool) -> Result<i64, String> {
    let raw = raw.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.timestamp());
    }
    let date = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{}': expected YYYY-MM-DD or RFC 3339", raw))?;
    let time = if end_of_day {
        chrono::NaiveTime::from_hms_opt(23, 59, 59)
    } else {
        chrono::NaiveTime::from_hms_opt(0, 0, 0)
    }
    .ok_or_else(|| "invalid time of day".to_string())?;
    Ok(date.and_time(time).and_utc().timestamp())
}

/// First `max_chars` characters of `text` on one line, with an ellipsis when cut.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect();
    let flat = flat.trim();
    if flat.chars().count() <= max_chars {
        return flat.to_string();
    }
    let mut cut: String = flat.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
