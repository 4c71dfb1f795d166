//! # Filters: Filter, Pagination and Sort Specs
//!
//! Normalized representation of what the task table is currently asking for,
//! and the JSON bodies the backend expects for it.
//!
//! ## Invariant
//!
//! An empty or absent field means "no constraint", never "exclude all".
//! [`FilterSpec::normalized`] folds empty sets, empty lists and blank strings
//! into `None` so that two specs meaning the same thing hash to the same cache
//! key and produce the same request body.
//!
//! ## Wire Format
//!
//! | Spec field | Body field |
//! |------------|------------|
//! | `event_names` | `filters.event_name` (list) |
//! | `flag` | `filters.flag` |
//! | `last_eval_source` | `filters.last_eval_source` |
//! | `sentiment` | `filters.sentiment` |
//! | `date_range` | `filters.created_at_start` / `created_at_end` (epoch seconds) |
//! | `id_allowlist` | `filters.tasks_ids` |
//! | `PaginationSpec` | `pagination: {page, page_size}` |
//! | `SortSpec` | `sorting: [{id, desc}]` |

use crate::models::Flag;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::str::FromStr;
use tracing::debug;

/// Metric name the aggregate endpoint uses for the filtered task count.
pub const TOTAL_NB_TASKS_METRIC: &str = "total_nb_tasks";

pub const DEFAULT_PAGE_SIZE: u32 = 10;

// ── Filter Spec ─────────────────────────────────────────────────

/// Inclusive creation-time window, epoch seconds. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl DateRange {
    pub fn is_open(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterSpec {
    pub event_names: Option<BTreeSet<String>>,
    pub flag: Option<Flag>,
    pub last_eval_source: Option<String>,
    pub sentiment: Option<String>,
    pub date_range: Option<DateRange>,
    /// Task ids the table is restricted to (search results, topic members).
    pub id_allowlist: Option<Vec<String>>,
}

/// One `{id, value}` column filter as emitted by a table widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub id: String,
    #[serde(default)]
    pub value: Value,
}

impl ColumnFilter {
    pub fn new(id: &str, value: impl Into<Value>) -> Self {
        ColumnFilter {
            id: id.to_string(),
            value: value.into(),
        }
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl FilterSpec {
    /// True when no field constrains anything.
    pub fn is_unconstrained(&self) -> bool {
        self.clone().normalized() == FilterSpec::default()
    }

    /// Fold "empty" representations into `None`.
    pub fn normalized(self) -> Self {
        FilterSpec {
            event_names: self.event_names.filter(|names| !names.is_empty()),
            flag: self.flag,
            last_eval_source: blank_to_none(self.last_eval_source),
            sentiment: blank_to_none(self.sentiment),
            date_range: self.date_range.filter(|range| !range.is_open()),
            id_allowlist: self.id_allowlist.filter(|ids| !ids.is_empty()),
        }
    }

    /// Build a spec from table column filters.
    ///
    /// Recognized ids: `flag` (string or null), `event` (each string adds to
    /// the event set), `lastEvalSource`, `sentiment`, and `id` (list of task
    /// ids). Anything else is ignored.
    pub fn from_column_filters(filters: &[ColumnFilter]) -> Self {
        let mut spec = FilterSpec::default();
        for filter in filters {
            match (filter.id.as_str(), &filter.value) {
                ("flag", Value::String(s)) => spec.flag = s.parse().ok(),
                ("flag", Value::Null) => spec.flag = None,
                ("event", Value::String(s)) => {
                    spec.event_names
                        .get_or_insert_with(BTreeSet::new)
                        .insert(s.clone());
                }
                ("lastEvalSource", Value::String(s)) => spec.last_eval_source = Some(s.clone()),
                ("sentiment", Value::String(s)) => spec.sentiment = Some(s.clone()),
                ("id", Value::Array(ids)) => {
                    spec.id_allowlist = Some(
                        ids.iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect(),
                    );
                }
                (id, value) => debug!(column = id, %value, "ignoring column filter"),
            }
        }
        spec.normalized()
    }

    /// The `filters` / `tasks_filter` object sent to the backend.
    pub fn to_body(&self) -> TasksFilterBody {
        let spec = self.clone().normalized();
        let range = spec.date_range.unwrap_or_default();
        TasksFilterBody {
            event_name: spec.event_names.map(|names| names.into_iter().collect()),
            flag: spec.flag,
            last_eval_source: spec.last_eval_source,
            sentiment: spec.sentiment,
            created_at_start: range.start,
            created_at_end: range.end,
            tasks_ids: spec.id_allowlist,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TasksFilterBody {
    pub event_name: Option<Vec<String>>,
    pub flag: Option<Flag>,
    pub last_eval_source: Option<String>,
    pub sentiment: Option<String>,
    pub created_at_start: Option<i64>,
    pub created_at_end: Option<i64>,
    pub tasks_ids: Option<Vec<String>>,
}

// ── Pagination ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaginationSpec {
    pub page_index: u32,
    pub page_size: u32,
}

impl Default for PaginationSpec {
    fn default() -> Self {
        PaginationSpec {
            page_index: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PaginationSpec {
    pub fn to_body(&self) -> PaginationBody {
        PaginationBody {
            page: self.page_index,
            page_size: self.page_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaginationBody {
    pub page: u32,
    pub page_size: u32,
}

/// Number of pages for `total` matching tasks. At least 1, so an empty or
/// not-yet-counted result still shows a single (empty) page.
pub fn page_count(total: Option<u64>, page_size: u32) -> u32 {
    match total {
        Some(total) if total > 0 && page_size > 0 => {
            let pages = total.div_ceil(u64::from(page_size));
            u32::try_from(pages).unwrap_or(u32::MAX)
        }
        _ => 1,
    }
}

// ── Sorting ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub column_id: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(column_id: &str) -> Self {
        SortKey {
            column_id: column_id.to_string(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column_id: &str) -> Self {
        SortKey {
            column_id: column_id.to_string(),
            direction: SortDirection::Desc,
        }
    }

    pub fn to_body(&self) -> SortBody {
        SortBody {
            id: self.column_id.clone(),
            desc: self.direction == SortDirection::Desc,
        }
    }
}

/// Parses `column`, `column:asc`, `column:desc` or `-column` (descending).
impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(column) = s.strip_prefix('-') {
            return if column.is_empty() {
                Err("empty sort column".to_string())
            } else {
                Ok(SortKey::desc(column))
            };
        }
        let (column, direction) = match s.split_once(':') {
            Some((column, dir)) => match dir.to_ascii_lowercase().as_str() {
                "asc" => (column, SortDirection::Asc),
                "desc" => (column, SortDirection::Desc),
                other => return Err(format!("unknown sort direction '{}'", other)),
            },
            None => (s, SortDirection::Asc),
        };
        if column.is_empty() {
            return Err("empty sort column".to_string());
        }
        Ok(SortKey {
            column_id: column.to_string(),
            direction,
        })
    }
}

/// Ordered sort keys; the backend applies them and its order is trusted as-is.
pub type SortSpec = Vec<SortKey>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortBody {
    pub id: String,
    pub desc: bool,
}

// ── Request bodies ──────────────────────────────────────────────

/// Body of `POST /api/projects/{project_id}/tasks`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TasksQuery {
    pub filters: TasksFilterBody,
    pub pagination: PaginationBody,
    pub sorting: Vec<SortBody>,
}

impl TasksQuery {
    pub fn new(filters: &FilterSpec, pagination: &PaginationSpec, sorting: &[SortKey]) -> Self {
        TasksQuery {
            filters: filters.to_body(),
            pagination: pagination.to_body(),
            sorting: sorting.iter().map(SortKey::to_body).collect(),
        }
    }
}

/// Body of `POST /api/explore/{project_id}/aggregated/tasks`. Pagination and
/// sorting never reach a count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateQuery {
    pub metrics: Vec<String>,
    pub tasks_filter: TasksFilterBody,
}

impl AggregateQuery {
    pub fn total_tasks(filters: &FilterSpec) -> Self {
        AggregateQuery {
            metrics: vec![TOTAL_NB_TASKS_METRIC.to_string()],
            tasks_filter: filters.to_body(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_spec_constrains_nothing() {
        let body = serde_json::to_value(FilterSpec::default().to_body()).unwrap();
        for (field, value) in body.as_object().unwrap() {
            assert!(value.is_null(), "{} should be null, got {}", field, value);
        }
        assert!(FilterSpec::default().is_unconstrained());
    }

    #[test]
    fn empty_fields_normalize_to_none() {
        let spec = FilterSpec {
            event_names: Some(BTreeSet::new()),
            flag: None,
            last_eval_source: Some("  ".to_string()),
            sentiment: Some(String::new()),
            date_range: Some(DateRange::default()),
            id_allowlist: Some(vec![]),
        };
        assert!(spec.is_unconstrained());
        assert_eq!(spec.normalized(), FilterSpec::default());
    }

    #[test]
    fn column_filters_fold_into_spec() {
        let spec = FilterSpec::from_column_filters(&[
            ColumnFilter::new("flag", "failure"),
            ColumnFilter::new("event", "refund_request"),
            ColumnFilter::new("event", "angry_user"),
            ColumnFilter::new("lastEvalSource", "owner"),
            ColumnFilter::new("sentiment", "negative"),
            ColumnFilter::new("id", serde_json::json!(["t1", "t3"])),
            ColumnFilter::new("unknown", 3),
        ]);
        assert_eq!(spec.flag, Some(Flag::Failure));
        let events: Vec<_> = spec.event_names.clone().unwrap().into_iter().collect();
        assert_eq!(events, vec!["angry_user", "refund_request"]);
        assert_eq!(spec.last_eval_source.as_deref(), Some("owner"));
        assert_eq!(spec.sentiment.as_deref(), Some("negative"));
        assert_eq!(spec.id_allowlist, Some(vec!["t1".to_string(), "t3".to_string()]));
    }

    #[test]
    fn null_flag_column_clears_flag() {
        let spec = FilterSpec::from_column_filters(&[
            ColumnFilter::new("flag", "success"),
            ColumnFilter::new("flag", Value::Null),
        ]);
        assert_eq!(spec.flag, None);
    }

    #[test]
    fn tasks_query_wire_shape() {
        let filters = FilterSpec {
            flag: Some(Flag::Success),
            date_range: Some(DateRange {
                start: Some(100),
                end: None,
            }),
            ..Default::default()
        };
        let pagination = PaginationSpec {
            page_index: 2,
            page_size: 25,
        };
        let query = TasksQuery::new(&filters, &pagination, &[SortKey::desc("created_at")]);
        let body = serde_json::to_value(&query).unwrap();
        assert_eq!(body["filters"]["flag"], "success");
        assert_eq!(body["filters"]["created_at_start"], 100);
        assert!(body["filters"]["created_at_end"].is_null());
        assert_eq!(body["pagination"], serde_json::json!({"page": 2, "page_size": 25}));
        assert_eq!(
            body["sorting"],
            serde_json::json!([{"id": "created_at", "desc": true}])
        );
    }

    #[test]
    fn aggregate_query_carries_only_filters() {
        let filters = FilterSpec {
            sentiment: Some("positive".to_string()),
            ..Default::default()
        };
        let body = serde_json::to_value(AggregateQuery::total_tasks(&filters)).unwrap();
        assert_eq!(body["metrics"], serde_json::json!(["total_nb_tasks"]));
        assert_eq!(body["tasks_filter"]["sentiment"], "positive");
        assert!(body.get("pagination").is_none());
        assert!(body.get("sorting").is_none());
    }

    #[test]
    fn page_count_rounds_up_and_floors_at_one() {
        assert_eq!(page_count(Some(0), 10), 1);
        assert_eq!(page_count(None, 10), 1);
        assert_eq!(page_count(Some(1), 10), 1);
        assert_eq!(page_count(Some(10), 10), 1);
        assert_eq!(page_count(Some(11), 10), 2);
        assert_eq!(page_count(Some(95), 20), 5);
        assert_eq!(page_count(Some(5), 0), 1);
    }

    #[test]
    fn sort_key_parsing() {
        assert_eq!("created_at".parse::<SortKey>(), Ok(SortKey::asc("created_at")));
        assert_eq!("-created_at".parse::<SortKey>(), Ok(SortKey::desc("created_at")));
        assert_eq!("flag:DESC".parse::<SortKey>(), Ok(SortKey::desc("flag")));
        assert!("flag:sideways".parse::<SortKey>().is_err());
        assert!("-".parse::<SortKey>().is_err());
        assert!(":asc".parse::<SortKey>().is_err());
    }
}
