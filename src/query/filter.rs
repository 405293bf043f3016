//! Filter compiler. Translates the declarative filter document a client
//! sends into a typed predicate description. Scalar predicates later become
//! SQL directly; multi-valued predicates (assignees, labels, ...) become
//! id-set restrictions computed from the edge tables.
//!
//! Unknown keys are ignored. `null` and empty values are dropped before
//! compilation. An explicitly empty id set is a hard no-match. Unparseable
//! dates fail the whole request with `InvalidFilter`.

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::utils::json::{parse_date, parse_timestamp};

/// Half-open interval `[after, before)`. A missing bound leaves that side
/// unconstrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval<T> {
    pub after: Option<T>,
    pub before: Option<T>,
}

impl<T: PartialOrd + Copy> Interval<T> {
    pub fn contains(&self, value: T) -> bool {
        if let Some(after) = self.after {
            if value < after {
                return false;
            }
        }
        if let Some(before) = self.before {
            if value >= before {
                return false;
            }
        }
        true
    }
}

/// A union of intervals; a value matches if any interval contains it.
pub type IntervalSet<T> = Vec<Interval<T>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Projects,
    Teams,
}

impl Default for Scope {
    fn default() -> Self {
        Scope::Projects
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompiledFilter {
    pub state_ids: Option<Vec<Uuid>>,
    pub state_groups: Option<Vec<String>>,
    pub priorities: Option<Vec<String>>,
    pub created_by: Option<Vec<Uuid>>,
    pub parent_ids: Option<Vec<Uuid>>,
    pub type_ids: Option<Vec<Uuid>>,
    pub assignee_ids: Option<Vec<Uuid>>,
    pub label_ids: Option<Vec<Uuid>>,
    pub cycle_ids: Option<Vec<Uuid>>,
    pub module_ids: Option<Vec<Uuid>>,
    pub subscriber_ids: Option<Vec<Uuid>>,
    pub mention_ids: Option<Vec<Uuid>>,
    pub start_date: Option<IntervalSet<NaiveDate>>,
    pub target_date: Option<IntervalSet<NaiveDate>>,
    pub created_at: Option<IntervalSet<DateTime<Utc>>>,
    pub updated_at: Option<IntervalSet<DateTime<Utc>>>,
    pub completed_at: Option<IntervalSet<DateTime<Utc>>>,
    pub updated_at_gt: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub scope: Scope,
}

impl CompiledFilter {
    pub fn compile(document: &Value) -> AppResult<Self> {
        let mut compiled = CompiledFilter::default();
        let Some(map) = document.as_object() else {
            if document.is_null() {
                return Ok(compiled);
            }
            return Err(AppError::invalid_filter("filters must be a JSON object"));
        };

        for (key, value) in map {
            if value.is_null() {
                continue;
            }
            match key.as_str() {
                "state" => compiled.state_ids = uuid_set(key, value)?,
                "state_group" => compiled.state_groups = string_set(value),
                "priority" => compiled.priorities = string_set(value),
                "created_by" => compiled.created_by = uuid_set(key, value)?,
                "parent" => compiled.parent_ids = uuid_set(key, value)?,
                "type" | "issue_type" => compiled.type_ids = uuid_set(key, value)?,
                "assignees" => compiled.assignee_ids = uuid_set(key, value)?,
                "labels" => compiled.label_ids = uuid_set(key, value)?,
                "cycle" => compiled.cycle_ids = uuid_set(key, value)?,
                "module" => compiled.module_ids = uuid_set(key, value)?,
                "subscriber" => compiled.subscriber_ids = uuid_set(key, value)?,
                "mentions" => compiled.mention_ids = uuid_set(key, value)?,
                "start_date" => compiled.start_date = Some(date_intervals(key, value)?),
                "target_date" => compiled.target_date = Some(date_intervals(key, value)?),
                "created_at" => compiled.created_at = Some(timestamp_intervals(key, value)?),
                "updated_at" => compiled.updated_at = Some(timestamp_intervals(key, value)?),
                "completed_at" => compiled.completed_at = Some(timestamp_intervals(key, value)?),
                "updated_at__gt" => {
                    let raw = value.as_str().ok_or_else(|| {
                        AppError::invalid_filter("updated_at__gt must be a timestamp string")
                    })?;
                    compiled.updated_at_gt =
                        Some(parse_timestamp(raw).map_err(AppError::invalid_filter)?);
                }
                "q" => {
                    let raw = value
                        .as_str()
                        .ok_or_else(|| AppError::invalid_filter("q must be a string"))?;
                    let trimmed = raw.trim();
                    if !trimmed.is_empty() {
                        compiled.search = Some(trimmed.to_string());
                    }
                }
                "scope" => {
                    compiled.scope = match value.as_str() {
                        Some("projects") => Scope::Projects,
                        Some("teams") => Scope::Teams,
                        _ => {
                            return Err(AppError::invalid_filter(
                                "scope must be 'projects' or 'teams'",
                            ))
                        }
                    };
                }
                // Unknown filter keys are non-fatal.
                _ => {}
            }
        }

        Ok(compiled)
    }

    /// True when some predicate can never match (an explicitly empty set).
    /// The executor short-circuits to an empty result instead of querying.
    pub fn is_unsatisfiable(&self) -> bool {
        fn empty<T>(set: &Option<Vec<T>>) -> bool {
            matches!(set, Some(v) if v.is_empty())
        }
        empty(&self.state_ids)
            || empty(&self.state_groups)
            || empty(&self.priorities)
            || empty(&self.created_by)
            || empty(&self.parent_ids)
            || empty(&self.type_ids)
            || empty(&self.assignee_ids)
            || empty(&self.label_ids)
            || empty(&self.cycle_ids)
            || empty(&self.module_ids)
            || empty(&self.subscriber_ids)
            || empty(&self.mention_ids)
    }

    /// Whether any edge-table restriction is present (requires the id-set
    /// pass before the base query runs).
    pub fn needs_edge_restriction(&self) -> bool {
        self.assignee_ids.is_some()
            || self.label_ids.is_some()
            || self.cycle_ids.is_some()
            || self.module_ids.is_some()
            || self.subscriber_ids.is_some()
            || self.mention_ids.is_some()
    }
}

/// Id sets arrive as a JSON array of UUID strings or a single
/// comma-separated string. `Some(vec![])` is the hard no-match case.
fn uuid_set(key: &str, value: &Value) -> AppResult<Option<Vec<Uuid>>> {
    let raw: Vec<String> = match value {
        Value::String(s) => s
            .split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect(),
        Value::Array(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => parts.push(s.trim().to_string()),
                    other => {
                        return Err(AppError::invalid_filter(format!(
                            "filter '{key}' expects id strings, got {other}"
                        )))
                    }
                }
            }
            parts
        }
        other => {
            return Err(AppError::invalid_filter(format!(
                "filter '{key}' expects a list of ids, got {other}"
            )))
        }
    };

    let mut ids = Vec::with_capacity(raw.len());
    for part in raw {
        let id = Uuid::parse_str(&part).map_err(|_| {
            AppError::invalid_filter(format!("filter '{key}': '{part}' is not a valid UUID"))
        })?;
        ids.push(id);
    }
    ids.sort();
    ids.dedup();
    Ok(Some(ids))
}

fn string_set(value: &Value) -> Option<Vec<String>> {
    let parts: Vec<String> = match value {
        Value::String(s) => s
            .split(',')
            .map(|part| part.trim().to_lowercase())
            .filter(|part| !part.is_empty())
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str())
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => return None,
    };
    Some(parts)
}

fn date_intervals(key: &str, value: &Value) -> AppResult<IntervalSet<NaiveDate>> {
    intervals(key, value, |raw| {
        parse_date(raw).map_err(AppError::invalid_filter)
    })
    .map(|set| {
        set.into_iter()
            .map(|iv| match iv {
                IntervalForm::Exact(day) => Interval {
                    after: Some(day),
                    before: day.checked_add_days(Days::new(1)),
                },
                IntervalForm::Bounds { after, before } => Interval { after, before },
            })
            .collect()
    })
}

fn timestamp_intervals(key: &str, value: &Value) -> AppResult<IntervalSet<DateTime<Utc>>> {
    intervals(key, value, |raw| {
        parse_timestamp(raw).map_err(AppError::invalid_filter)
    })
    .map(|set| {
        set.into_iter()
            .map(|iv| match iv {
                IntervalForm::Exact(at) => Interval {
                    after: Some(at),
                    before: Some(at + chrono::Duration::days(1)),
                },
                IntervalForm::Bounds { after, before } => Interval { after, before },
            })
            .collect()
    })
}

enum IntervalForm<T> {
    /// A bare value; widened to the enclosing day by the caller.
    Exact(T),
    Bounds { after: Option<T>, before: Option<T> },
}

fn intervals<T>(
    key: &str,
    value: &Value,
    parse: impl Fn(&str) -> AppResult<T> + Copy,
) -> AppResult<Vec<IntervalForm<T>>> {
    match value {
        Value::String(raw) => Ok(vec![IntervalForm::Exact(parse(raw)?)]),
        Value::Object(bounds) => {
            let after = bounds
                .get("after")
                .and_then(|v| v.as_str())
                .map(parse)
                .transpose()?;
            let before = bounds
                .get("before")
                .and_then(|v| v.as_str())
                .map(parse)
                .transpose()?;
            if after.is_none() && before.is_none() {
                return Err(AppError::invalid_filter(format!(
                    "filter '{key}' range needs 'after' and/or 'before'"
                )));
            }
            Ok(vec![IntervalForm::Bounds { after, before }])
        }
        Value::Array(items) => {
            let mut set = Vec::with_capacity(items.len());
            for item in items {
                set.extend(intervals(key, item, parse)?);
            }
            Ok(set)
        }
        other => Err(AppError::invalid_filter(format!(
            "filter '{key}' expects a date, range, or list of ranges, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn unknown_keys_are_ignored() {
        let doc = json!({ "no_such_key": ["x"], "priority": ["high"] });
        let compiled = CompiledFilter::compile(&doc).unwrap();
        assert_eq!(compiled.priorities, Some(vec!["high".to_string()]));
    }

    #[test]
    fn null_values_are_dropped() {
        let doc = json!({ "state": null, "priority": null });
        let compiled = CompiledFilter::compile(&doc).unwrap();
        assert!(compiled.state_ids.is_none());
        assert!(compiled.priorities.is_none());
    }

    #[test]
    fn empty_id_set_is_a_hard_no_match() {
        let doc = json!({ "assignees": [] });
        let compiled = CompiledFilter::compile(&doc).unwrap();
        assert!(compiled.is_unsatisfiable());
    }

    #[test]
    fn comma_separated_ids_parse() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let doc = json!({ "labels": format!("{a}, {b}") });
        let compiled = CompiledFilter::compile(&doc).unwrap();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(compiled.label_ids, Some(expected));
    }

    #[test]
    fn malformed_uuid_fails_with_invalid_filter() {
        let doc = json!({ "state": ["not-a-uuid"] });
        let err = CompiledFilter::compile(&doc).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFilter);
    }

    #[test]
    fn bad_date_fails_with_invalid_filter() {
        let doc = json!({ "target_date": "2025-13-45" });
        let err = CompiledFilter::compile(&doc).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFilter);
    }

    #[test]
    fn single_date_widens_to_the_day() {
        let doc = json!({ "target_date": "2025-01-10" });
        let compiled = CompiledFilter::compile(&doc).unwrap();
        let set = compiled.target_date.unwrap();
        assert_eq!(set.len(), 1);
        let day = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        assert!(set[0].contains(day));
        assert!(!set[0].contains(day.succ_opt().unwrap()));
        assert!(!set[0].contains(day.pred_opt().unwrap()));
    }

    #[test]
    fn range_object_is_half_open() {
        let doc = json!({ "target_date": { "after": "2025-01-01", "before": "2025-02-01" } });
        let compiled = CompiledFilter::compile(&doc).unwrap();
        let set = compiled.target_date.unwrap();
        let jan1 = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let feb1 = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        assert!(set[0].contains(jan1));
        assert!(!set[0].contains(feb1));
    }

    #[test]
    fn range_list_forms_a_union() {
        let doc = json!({ "created_at": [
            { "after": "2025-01-01", "before": "2025-01-05" },
            "2025-03-01",
        ]});
        let compiled = CompiledFilter::compile(&doc).unwrap();
        assert_eq!(compiled.created_at.unwrap().len(), 2);
    }

    #[test]
    fn scope_parses_and_rejects_garbage() {
        let doc = json!({ "scope": "teams" });
        assert_eq!(
            CompiledFilter::compile(&doc).unwrap().scope,
            Scope::Teams
        );
        let doc = json!({ "scope": "everything" });
        assert_eq!(
            CompiledFilter::compile(&doc).unwrap_err().kind(),
            ErrorKind::InvalidFilter
        );
    }

    #[test]
    fn search_is_trimmed_and_empty_dropped() {
        let doc = json!({ "q": "  ship v1  " });
        let compiled = CompiledFilter::compile(&doc).unwrap();
        assert_eq!(compiled.search.as_deref(), Some("ship v1"));

        let doc = json!({ "q": "   " });
        assert!(CompiledFilter::compile(&doc).unwrap().search.is_none());
    }
}
