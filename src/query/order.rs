//! Order compiler. Parses an order token (`±field`) into a total order over
//! enriched rows. Scalar fields compare the column directly; the synthetic
//! fields (`priority`, `state__group`, `labels__name`,
//! `assignees__first_name`) compare derived per-row keys so multi-valued
//! fields still produce a stable order. `-created_at` then id is always the
//! final tie-break.

use std::cmp::Ordering;

use crate::domain::{Priority, StateGroup};
use crate::error::{AppError, AppResult};
use crate::query::enrich::EnrichedRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderField {
    CreatedAt,
    UpdatedAt,
    Name,
    SequenceId,
    StartDate,
    TargetDate,
    CompletedAt,
    Priority,
    StateGroup,
    LabelsName,
    AssigneesFirstName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub field: OrderField,
    pub descending: bool,
}

impl Default for OrderBy {
    fn default() -> Self {
        OrderBy {
            field: OrderField::CreatedAt,
            descending: true,
        }
    }
}

impl OrderBy {
    pub fn parse(token: Option<&str>) -> AppResult<Self> {
        let Some(raw) = token.map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(OrderBy::default());
        };

        let (descending, name) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let field = match name {
            "created_at" => OrderField::CreatedAt,
            "updated_at" => OrderField::UpdatedAt,
            "name" => OrderField::Name,
            "sequence_id" => OrderField::SequenceId,
            "start_date" => OrderField::StartDate,
            "target_date" => OrderField::TargetDate,
            "completed_at" => OrderField::CompletedAt,
            "priority" => OrderField::Priority,
            "state__group" => OrderField::StateGroup,
            "labels__name" => OrderField::LabelsName,
            "assignees__first_name" => OrderField::AssigneesFirstName,
            other => {
                return Err(AppError::invalid_filter(format!(
                    "unknown order field '{other}'"
                )))
            }
        };

        Ok(OrderBy { field, descending })
    }

    /// Sorts rows in place. Missing values (unset dates, no labels) always
    /// sort after present ones regardless of direction.
    pub fn sort(&self, rows: &mut [EnrichedRow]) {
        let order = *self;
        rows.sort_by(|a, b| order.compare(a, b));
    }

    pub fn compare(&self, a: &EnrichedRow, b: &EnrichedRow) -> Ordering {
        let primary = self.compare_field(a, b);
        let primary = if self.descending {
            primary.reverse()
        } else {
            primary
        };
        primary.then_with(|| tie_break(a, b))
    }

    fn compare_field(&self, a: &EnrichedRow, b: &EnrichedRow) -> Ordering {
        match self.field {
            OrderField::CreatedAt => a.item.created_at.cmp(&b.item.created_at),
            OrderField::UpdatedAt => a.item.updated_at.cmp(&b.item.updated_at),
            OrderField::Name => a
                .item
                .name
                .to_lowercase()
                .cmp(&b.item.name.to_lowercase()),
            OrderField::SequenceId => a.item.sequence_id.cmp(&b.item.sequence_id),
            OrderField::StartDate => cmp_missing_last(
                a.item.start_date.as_ref(),
                b.item.start_date.as_ref(),
                self.descending,
            ),
            OrderField::TargetDate => cmp_missing_last(
                a.item.target_date.as_ref(),
                b.item.target_date.as_ref(),
                self.descending,
            ),
            OrderField::CompletedAt => cmp_missing_last(
                a.item.completed_at.as_ref(),
                b.item.completed_at.as_ref(),
                self.descending,
            ),
            OrderField::Priority => {
                Priority::rank_of(&a.item.priority).cmp(&Priority::rank_of(&b.item.priority))
            }
            OrderField::StateGroup => {
                let ra = a
                    .state_group
                    .as_deref()
                    .map(StateGroup::rank_of)
                    .unwrap_or(usize::MAX);
                let rb = b
                    .state_group
                    .as_deref()
                    .map(StateGroup::rank_of)
                    .unwrap_or(usize::MAX);
                ra.cmp(&rb)
            }
            OrderField::LabelsName => cmp_missing_last(
                multi_value_key(&a.label_names, self.descending).as_ref(),
                multi_value_key(&b.label_names, self.descending).as_ref(),
                self.descending,
            ),
            OrderField::AssigneesFirstName => cmp_missing_last(
                multi_value_key(&a.assignee_first_names, self.descending).as_ref(),
                multi_value_key(&b.assignee_first_names, self.descending).as_ref(),
                self.descending,
            ),
        }
    }
}

/// Per-row key for multi-valued names: min for ascending, max for
/// descending, so each row keeps one stable representative.
fn multi_value_key(names: &[String], descending: bool) -> Option<String> {
    let iter = names.iter().map(|n| n.to_lowercase());
    if descending {
        iter.max()
    } else {
        iter.min()
    }
}

fn cmp_missing_last<T: Ord>(a: Option<&T>, b: Option<&T>, descending: bool) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (None, None) => Ordering::Equal,
        // Compensate for the outer reverse so None stays last either way.
        (None, Some(_)) => {
            if descending {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (Some(_), None) => {
            if descending {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
    }
}

fn tie_break(a: &EnrichedRow, b: &EnrichedRow) -> Ordering {
    b.item
        .created_at
        .cmp(&a.item.created_at)
        .then_with(|| a.item.id.cmp(&b.item.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn defaults_to_created_at_descending() {
        let order = OrderBy::parse(None).unwrap();
        assert_eq!(order.field, OrderField::CreatedAt);
        assert!(order.descending);
    }

    #[test]
    fn parses_sign_prefix() {
        let order = OrderBy::parse(Some("-priority")).unwrap();
        assert_eq!(order.field, OrderField::Priority);
        assert!(order.descending);

        let order = OrderBy::parse(Some("target_date")).unwrap();
        assert_eq!(order.field, OrderField::TargetDate);
        assert!(!order.descending);
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = OrderBy::parse(Some("no_such_column")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFilter);
    }

    #[test]
    fn multi_value_key_picks_min_or_max() {
        let names = vec!["beta".to_string(), "Alpha".to_string()];
        assert_eq!(multi_value_key(&names, false).as_deref(), Some("alpha"));
        assert_eq!(multi_value_key(&names, true).as_deref(), Some("beta"));
        assert_eq!(multi_value_key(&[], false), None);
    }
}
