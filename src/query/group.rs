//! Grouper. Partitions an ordered row set by one or two orthogonal fields.
//! Multi-valued fields fan a row out into every group it belongs to; rows
//! with no value land in a synthetic `None` group. Group order follows the
//! field's natural enumeration where one exists and key order otherwise,
//! with `None` always last.

use std::collections::HashMap;

use crate::domain::{Priority, StateGroup};
use crate::error::{AppError, AppResult};
use crate::query::enrich::EnrichedRow;

pub const NONE_KEY: &str = "None";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupField {
    State,
    StateGroup,
    Priority,
    Assignees,
    Labels,
    Modules,
    Cycle,
    Project,
    CreatedBy,
    TargetDate,
    StartDate,
    Type,
}

impl GroupField {
    pub fn parse(token: &str) -> AppResult<Self> {
        match token {
            "state" => Ok(GroupField::State),
            "state__group" | "state_group" => Ok(GroupField::StateGroup),
            "priority" => Ok(GroupField::Priority),
            "assignees" => Ok(GroupField::Assignees),
            "labels" => Ok(GroupField::Labels),
            "modules" => Ok(GroupField::Modules),
            "cycle" => Ok(GroupField::Cycle),
            "project" => Ok(GroupField::Project),
            "created_by" => Ok(GroupField::CreatedBy),
            "target_date" => Ok(GroupField::TargetDate),
            "start_date" => Ok(GroupField::StartDate),
            "type" => Ok(GroupField::Type),
            other => Err(AppError::invalid_grouping(format!(
                "unknown group field '{other}'"
            ))),
        }
    }

    /// Group keys a row belongs to. Multi-valued fields return one key per
    /// membership; everything else returns exactly one key.
    pub fn keys(self, row: &EnrichedRow) -> Vec<String> {
        let single = |value: Option<String>| vec![value.unwrap_or_else(|| NONE_KEY.to_string())];
        let multi = |values: Vec<String>| {
            if values.is_empty() {
                vec![NONE_KEY.to_string()]
            } else {
                values
            }
        };

        match self {
            GroupField::State => single(row.item.state_id.map(|id| id.to_string())),
            GroupField::StateGroup => single(row.state_group.clone()),
            GroupField::Priority => vec![row.item.priority.clone()],
            GroupField::Assignees => {
                multi(row.assignee_ids.iter().map(|id| id.to_string()).collect())
            }
            GroupField::Labels => multi(row.label_ids.iter().map(|id| id.to_string()).collect()),
            GroupField::Modules => multi(row.module_ids.iter().map(|id| id.to_string()).collect()),
            GroupField::Cycle => single(row.cycle_id.map(|id| id.to_string())),
            GroupField::Project => vec![row.item.project_id.to_string()],
            GroupField::CreatedBy => vec![row.item.created_by.to_string()],
            GroupField::TargetDate => single(row.item.target_date.map(|d| d.to_string())),
            GroupField::StartDate => single(row.item.start_date.map(|d| d.to_string())),
            GroupField::Type => single(row.item.type_id.map(|id| id.to_string())),
        }
    }

    /// Rank used to order groups in the response.
    fn key_rank(self, key: &str) -> (usize, String) {
        if key == NONE_KEY {
            return (usize::MAX, String::new());
        }
        match self {
            GroupField::Priority => (Priority::rank_of(key), String::new()),
            GroupField::StateGroup => (StateGroup::rank_of(key), String::new()),
            _ => (0, key.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Grouping {
    pub group_by: GroupField,
    pub sub_group_by: Option<GroupField>,
}

impl Grouping {
    pub fn parse(group_by: Option<&str>, sub_group_by: Option<&str>) -> AppResult<Option<Self>> {
        let Some(group_token) = group_by.map(str::trim).filter(|t| !t.is_empty()) else {
            if sub_group_by.is_some() {
                return Err(AppError::invalid_grouping(
                    "sub_group_by requires group_by",
                ));
            }
            return Ok(None);
        };

        let group_by = GroupField::parse(group_token)?;
        let sub_group_by = sub_group_by
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(GroupField::parse)
            .transpose()?;

        if sub_group_by == Some(group_by) {
            return Err(AppError::invalid_grouping(
                "group_by and sub_group_by must differ",
            ));
        }

        Ok(Some(Grouping {
            group_by,
            sub_group_by,
        }))
    }
}

/// A partition of the row set. `rows` are indices into the input slice and
/// keep the input's order, so pages within a group inherit the compiled
/// ordering.
#[derive(Debug)]
pub struct GroupBucket {
    pub key: String,
    pub sub_key: Option<String>,
    pub rows: Vec<usize>,
}

pub fn partition(rows: &[EnrichedRow], grouping: &Grouping) -> Vec<GroupBucket> {
    let buckets = bucket_by(rows, (0..rows.len()).collect(), grouping.group_by);

    match grouping.sub_group_by {
        None => buckets
            .into_iter()
            .map(|(key, rows)| GroupBucket {
                key,
                sub_key: None,
                rows,
            })
            .collect(),
        Some(sub_field) => {
            let mut out = Vec::new();
            for (key, indices) in buckets {
                for (sub_key, sub_rows) in bucket_by(rows, indices, sub_field) {
                    out.push(GroupBucket {
                        key: key.clone(),
                        sub_key: Some(sub_key),
                        rows: sub_rows,
                    });
                }
            }
            out
        }
    }
}

fn bucket_by(
    rows: &[EnrichedRow],
    indices: Vec<usize>,
    field: GroupField,
) -> Vec<(String, Vec<usize>)> {
    let mut by_key: HashMap<String, Vec<usize>> = HashMap::new();
    for index in indices {
        for key in field.keys(&rows[index]) {
            by_key.entry(key).or_default().push(index);
        }
    }

    let mut ordered: Vec<(String, Vec<usize>)> = by_key.into_iter().collect();
    ordered.sort_by_key(|(key, _)| field.key_rank(key));
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn equal_group_and_sub_group_is_rejected() {
        let err = Grouping::parse(Some("priority"), Some("priority")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidGrouping);
    }

    #[test]
    fn unknown_group_field_is_rejected() {
        let err = Grouping::parse(Some("flavour"), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidGrouping);
    }

    #[test]
    fn sub_group_without_group_is_rejected() {
        let err = Grouping::parse(None, Some("priority")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidGrouping);
    }

    #[test]
    fn absent_group_by_means_flat() {
        assert!(Grouping::parse(None, None).unwrap().is_none());
        assert!(Grouping::parse(Some("  "), None).unwrap().is_none());
    }

    #[test]
    fn priority_groups_follow_enumeration_order() {
        let field = GroupField::Priority;
        assert!(field.key_rank("urgent") < field.key_rank("high"));
        assert!(field.key_rank("low") < field.key_rank("none"));
        assert!(field.key_rank("none") < field.key_rank(NONE_KEY));
    }
}
