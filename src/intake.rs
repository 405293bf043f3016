//! Intake state machine for externally submitted work items. An intake row
//! shadows its work item until triage resolves it; while the row is pending
//! or snoozed the item stays out of default project queries.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use crate::access::ProjectAccess;
use crate::activity::{self, differs, ActivityContext};
use crate::error::{AppError, AppResult};
use crate::models::{IntakeItem, NewIntakeItem, WorkItem};
use crate::mutation::{self, CreateWorkItem, MutationOptions};
use crate::schema::{intake_items, work_items};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeStatus {
    Pending,
    Rejected,
    Snoozed,
    Accepted,
    Duplicate,
}

impl IntakeStatus {
    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            -2 => Some(IntakeStatus::Pending),
            -1 => Some(IntakeStatus::Rejected),
            0 => Some(IntakeStatus::Snoozed),
            1 => Some(IntakeStatus::Accepted),
            2 => Some(IntakeStatus::Duplicate),
            _ => None,
        }
    }

    pub fn as_i16(self) -> i16 {
        match self {
            IntakeStatus::Pending => -2,
            IntakeStatus::Rejected => -1,
            IntakeStatus::Snoozed => 0,
            IntakeStatus::Accepted => 1,
            IntakeStatus::Duplicate => 2,
        }
    }

    /// Pending and snoozed items stay invisible to default listings.
    pub fn in_triage(self) -> bool {
        matches!(self, IntakeStatus::Pending | IntakeStatus::Snoozed)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntakeTransition {
    pub status: i16,
    #[serde(default)]
    pub snoozed_till: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duplicate_to: Option<Uuid>,
}

/// Files a new work item through intake: the item is created quietly and a
/// pending intake row is attached. Notification fan-out waits for triage.
pub fn submit(
    state: &AppState,
    gate: &ProjectAccess,
    payload: CreateWorkItem,
    source: &str,
) -> AppResult<(WorkItem, IntakeItem)> {
    let item = mutation::create_work_item(
        state,
        gate,
        payload,
        MutationOptions {
            notification: false,
            ..MutationOptions::default()
        },
    )?;

    let ctx = ActivityContext {
        workspace_id: gate.project.workspace_id,
        project_id: gate.project.id,
        actor_id: gate.requester.user_id,
        epoch: mutation::next_epoch(),
    };

    let mut conn = state.db()?;
    let intake = conn.transaction::<_, AppError, _>(|conn| {
        let intake: IntakeItem = diesel::insert_into(intake_items::table)
            .values(&NewIntakeItem {
                id: Uuid::new_v4(),
                project_id: gate.project.id,
                work_item_id: item.id,
                status: IntakeStatus::Pending.as_i16(),
                source: source.to_string(),
            })
            .get_result(conn)?;

        activity::record(
            conn,
            &ctx,
            item.id,
            vec![differs::intake_transition(None, intake.status)],
        )?;

        Ok(intake)
    })?;

    Ok((item, intake))
}

/// Applies a triage decision. Snoozing needs a future wake time; marking a
/// duplicate needs a live target. Nothing ever transitions back to pending.
pub fn transition(
    state: &AppState,
    gate: &ProjectAccess,
    intake_id: Uuid,
    change: IntakeTransition,
    opts: MutationOptions,
) -> AppResult<IntakeItem> {
    gate.require_mutation()?;

    let next = IntakeStatus::from_i16(change.status)
        .ok_or_else(|| AppError::invalid_payload(format!("unknown intake status {}", change.status)))?;
    if next == IntakeStatus::Pending {
        return Err(AppError::invalid_payload(
            "an intake item cannot return to pending",
        ));
    }

    let snoozed_till = match next {
        IntakeStatus::Snoozed => {
            let till = change.snoozed_till.ok_or_else(|| {
                AppError::invalid_payload("snoozing requires snoozed_till")
            })?;
            if till <= Utc::now() {
                return Err(AppError::invalid_payload("snoozed_till must be in the future"));
            }
            Some(till)
        }
        _ => None,
    };

    let ctx = ActivityContext {
        workspace_id: gate.project.workspace_id,
        project_id: gate.project.id,
        actor_id: gate.requester.user_id,
        epoch: mutation::next_epoch(),
    };

    let mut conn = state.db()?;
    let (intake, activity_ids) = conn.transaction::<_, AppError, _>(|conn| {
        let current: IntakeItem = intake_items::table
            .find(intake_id)
            .filter(intake_items::project_id.eq(gate.project.id))
            .first(conn)?;

        let duplicate_to = match next {
            IntakeStatus::Duplicate => {
                let target = change.duplicate_to.ok_or_else(|| {
                    AppError::invalid_payload("marking a duplicate requires duplicate_to")
                })?;
                let live: i64 = work_items::table
                    .filter(work_items::id.eq(target))
                    .filter(work_items::project_id.eq(gate.project.id))
                    .filter(work_items::deleted_at.is_null())
                    .count()
                    .get_result(conn)?;
                if live == 0 {
                    return Err(AppError::invalid_payload(
                        "duplicate_to does not reference a live work item",
                    ));
                }
                Some(target)
            }
            _ => None,
        };

        let intake: IntakeItem = diesel::update(intake_items::table.find(current.id))
            .set((
                intake_items::status.eq(next.as_i16()),
                intake_items::snoozed_till.eq(snoozed_till),
                intake_items::duplicate_to.eq(duplicate_to),
                intake_items::updated_at.eq(Utc::now()),
            ))
            .get_result(conn)?;

        // Accepting publishes the item.
        if next == IntakeStatus::Accepted {
            diesel::update(work_items::table.find(current.work_item_id))
                .set((
                    work_items::is_draft.eq(false),
                    work_items::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;
        }

        let activity_ids = if opts.skip_activity {
            Vec::new()
        } else {
            activity::record(
                conn,
                &ctx,
                current.work_item_id,
                vec![differs::intake_transition(Some(current.status), intake.status)],
            )?
        };

        Ok((intake, activity_ids))
    })?;

    activity::dispatch(
        state.tasks.as_ref(),
        state.origin_hints.as_ref(),
        &ctx,
        "intake.status",
        intake.work_item_id,
        &activity_ids,
        opts.origin.as_deref(),
        opts.notification,
    );

    Ok(intake)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_form_round_trips() {
        for status in [
            IntakeStatus::Pending,
            IntakeStatus::Rejected,
            IntakeStatus::Snoozed,
            IntakeStatus::Accepted,
            IntakeStatus::Duplicate,
        ] {
            assert_eq!(IntakeStatus::from_i16(status.as_i16()), Some(status));
        }
        assert_eq!(IntakeStatus::from_i16(7), None);
    }

    #[test]
    fn only_pending_and_snoozed_hide_the_item() {
        assert!(IntakeStatus::Pending.in_triage());
        assert!(IntakeStatus::Snoozed.in_triage());
        assert!(!IntakeStatus::Accepted.in_triage());
        assert!(!IntakeStatus::Rejected.in_triage());
        assert!(!IntakeStatus::Duplicate.in_triage());
    }
}
