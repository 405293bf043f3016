//! Activity engine. Turns snapshot diffs into persisted activity records in
//! the mutation's own transaction, then (after commit) hands the batch to
//! the notification task queue and drops the webhook origin hint.
//!
//! The differs are pure; everything storage-facing lives here.

pub mod differs;

use chrono::Utc;
use diesel::prelude::*;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppResult;
use crate::hints::OriginHints;
use crate::jobs::{TaskClient, TASK_NOTIFY};
use crate::models::{NewWorkItemActivity, WorkItemActivity};
use crate::schema::work_item_activities;
use differs::ActivityDraft;

/// Everything a batch of drafts needs to become rows: who did it, where,
/// and the mutation epoch the records and their notification share.
#[derive(Debug, Clone, Copy)]
pub struct ActivityContext {
    pub workspace_id: Uuid,
    pub project_id: Uuid,
    pub actor_id: Uuid,
    pub epoch: i64,
}

/// Persists a batch of drafts for one work item inside the caller's
/// transaction. Returns the ids of the records the batch produced,
/// including any record refreshed by description coalescing.
pub fn record(
    conn: &mut PgConnection,
    ctx: &ActivityContext,
    work_item_id: Uuid,
    drafts: Vec<ActivityDraft>,
) -> AppResult<Vec<Uuid>> {
    if drafts.is_empty() {
        return Ok(Vec::new());
    }

    let mut activity_ids = Vec::with_capacity(drafts.len());
    let mut rows = Vec::with_capacity(drafts.len());

    for draft in drafts {
        if draft.field.as_deref() == Some("description") {
            if let Some(refreshed) = coalesce_description(conn, ctx, work_item_id, &draft)? {
                activity_ids.push(refreshed);
                continue;
            }
        }

        let id = Uuid::new_v4();
        activity_ids.push(id);
        rows.push(NewWorkItemActivity {
            id,
            work_item_id,
            project_id: ctx.project_id,
            workspace_id: ctx.workspace_id,
            actor_id: ctx.actor_id,
            verb: draft.verb,
            field: draft.field,
            old_value: draft.old_value,
            new_value: draft.new_value,
            old_identifier: draft.old_identifier,
            new_identifier: draft.new_identifier,
            comment_id: draft.comment_id,
            epoch: ctx.epoch,
        });
    }

    if !rows.is_empty() {
        diesel::insert_into(work_item_activities::table)
            .values(&rows)
            .execute(conn)?;
    }

    Ok(activity_ids)
}

/// Keystroke-level description edits collapse into one record: when the
/// item's most recent activity is a description change by the same actor,
/// refresh it in place instead of appending.
fn coalesce_description(
    conn: &mut PgConnection,
    ctx: &ActivityContext,
    work_item_id: Uuid,
    draft: &ActivityDraft,
) -> AppResult<Option<Uuid>> {
    let latest: Option<WorkItemActivity> = work_item_activities::table
        .filter(work_item_activities::work_item_id.eq(work_item_id))
        .order((
            work_item_activities::created_at.desc(),
            work_item_activities::id.desc(),
        ))
        .first(conn)
        .optional()?;

    let Some(latest) = latest else {
        return Ok(None);
    };
    if !refreshes_latest(latest.field.as_deref(), latest.actor_id, ctx.actor_id) {
        return Ok(None);
    }

    // Conditional update so a concurrent append cannot be overwritten.
    let refreshed = diesel::update(
        work_item_activities::table
            .find(latest.id)
            .filter(work_item_activities::field.eq("description"))
            .filter(work_item_activities::actor_id.eq(ctx.actor_id)),
    )
    .set((
        work_item_activities::created_at.eq(Utc::now()),
        work_item_activities::new_value.eq(draft.new_value.clone()),
        work_item_activities::epoch.eq(ctx.epoch),
    ))
    .execute(conn)?;

    if refreshed == 0 {
        return Ok(None);
    }
    Ok(Some(latest.id))
}

/// A description draft refreshes the item's newest record only when that
/// record is itself a description change by the same actor. Anything else
/// appends.
fn refreshes_latest(latest_field: Option<&str>, latest_actor: Uuid, actor: Uuid) -> bool {
    latest_field == Some("description") && latest_actor == actor
}

/// Post-commit fan-out. Enqueue failures are logged, not surfaced: the
/// reconciliation sweep re-enqueues any activity left without `notified_at`.
#[allow(clippy::too_many_arguments)]
pub fn dispatch(
    tasks: &dyn TaskClient,
    hints: &dyn OriginHints,
    ctx: &ActivityContext,
    kind: &str,
    work_item_id: Uuid,
    activity_ids: &[Uuid],
    origin: Option<&str>,
    notification: bool,
) {
    if let Some(origin) = origin {
        hints.set(work_item_id, origin);
    }

    if !notification || activity_ids.is_empty() {
        return;
    }

    let payload = json!({
        "kind": kind,
        "workspace_id": ctx.workspace_id,
        "project_id": ctx.project_id,
        "work_item_id": work_item_id,
        "actor_id": ctx.actor_id,
        "epoch": ctx.epoch,
        "activity_ids": activity_ids,
    });
    let key = format!("{TASK_NOTIFY}:{kind}:{work_item_id}:{}", ctx.epoch);

    if let Err(err) = tasks.enqueue(TASK_NOTIFY, payload, Some(&key)) {
        warn!(
            work_item_id = %work_item_id,
            error = %err,
            "failed to enqueue notification task; reconciliation will retry"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_description_edits_by_one_actor_coalesce() {
        let actor = Uuid::new_v4();
        assert!(refreshes_latest(Some("description"), actor, actor));
    }

    #[test]
    fn another_actors_description_edit_appends() {
        let (earlier, later) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(!refreshes_latest(Some("description"), earlier, later));
    }

    #[test]
    fn non_description_history_never_coalesces() {
        let actor = Uuid::new_v4();
        assert!(!refreshes_latest(Some("name"), actor, actor));
        assert!(!refreshes_latest(None, actor, actor));
    }
}
