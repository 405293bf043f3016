//! Mutation coordinator. Every write to a work item funnels through here:
//! payload validation, sequence allocation, the row + edge writes, the
//! pre/post snapshots the activity engine diffs, and the post-commit
//! notification hand-off. A change is never committed without its activity
//! records; the two ride the same transaction.

use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::access::ProjectAccess;
use crate::activity::{self, differs, ActivityContext};
use crate::domain::{Priority, StateGroup};
use crate::error::{AppError, AppResult};
use crate::models::{
    NewWorkItem, NewWorkItemAssignee, NewWorkItemLabel, NewWorkItemMention, NewWorkItemSubscriber,
    State, WorkItem,
};
use crate::schema::{
    cycle_work_items, cycles, estimate_points, labels, module_work_items, modules,
    project_members, projects, recent_visits, states, users, work_item_assignees,
    work_item_labels, work_item_links, work_item_mentions, work_item_subscribers, work_items,
};
use crate::state::AppState;
use crate::utils::json::{classify_date, classify_string, classify_uuid, classify_uuid_list};
use crate::utils::text::{extract_mention_ids, is_parsable_html};

/// Options every mutation accepts alongside its payload.
#[derive(Debug, Clone)]
pub struct MutationOptions {
    /// `false` suppresses the notification fan-out, not the records.
    pub notification: bool,
    /// Skips activity emission entirely (data migrations, imports).
    pub skip_activity: bool,
    /// Request origin recorded as a webhook echo-suppression hint.
    pub origin: Option<String>,
}

impl Default for MutationOptions {
    fn default() -> Self {
        MutationOptions {
            notification: true,
            skip_activity: false,
            origin: None,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreateWorkItem {
    pub name: String,
    #[serde(default)]
    pub description_html: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default, alias = "state")]
    pub state_id: Option<Uuid>,
    #[serde(default)]
    pub type_id: Option<Uuid>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub target_date: Option<NaiveDate>,
    #[serde(default)]
    pub estimate_point_id: Option<Uuid>,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    #[serde(default, alias = "assignees")]
    pub assignee_ids: Vec<Uuid>,
    #[serde(default, alias = "labels")]
    pub label_ids: Vec<Uuid>,
    #[serde(default)]
    pub is_draft: bool,
}

/// Closed patch. The outer `Option` is key presence, the inner is
/// null-vs-value, so clearing a date is distinguishable from leaving it
/// alone.
#[derive(Debug, Clone, Default)]
pub struct UpdateWorkItem {
    pub name: Option<String>,
    pub description_html: Option<String>,
    pub priority: Option<String>,
    pub state_id: Option<Option<Uuid>>,
    pub type_id: Option<Option<Uuid>>,
    pub estimate_point_id: Option<Option<Uuid>>,
    pub parent_id: Option<Option<Uuid>>,
    pub start_date: Option<Option<NaiveDate>>,
    pub target_date: Option<Option<NaiveDate>>,
    pub assignee_ids: Option<Vec<Uuid>>,
    pub label_ids: Option<Vec<Uuid>>,
    pub cycle_id: Option<Option<Uuid>>,
    pub module_ids: Option<Vec<Uuid>>,
    pub is_draft: Option<bool>,
}

impl UpdateWorkItem {
    pub fn from_json(patch: &Value) -> AppResult<Self> {
        let Some(map) = patch.as_object() else {
            return Err(AppError::invalid_payload("patch must be a JSON object"));
        };

        let string_field = |key: &str| {
            classify_string(map.get(key))
                .map_err(|msg| AppError::invalid_payload(format!("{key}: {msg}")))
        };
        let uuid_field = |key: &str| {
            classify_uuid(map.get(key))
                .map(|v| v.into_patch())
                .map_err(|msg| AppError::invalid_payload(format!("{key}: {msg}")))
        };
        let date_field = |key: &str| {
            classify_date(map.get(key))
                .map(|v| v.into_patch())
                .map_err(|msg| AppError::invalid_payload(format!("{key}: {msg}")))
        };
        let list_field = |key: &str, alias: &str| {
            classify_uuid_list(map.get(key).or_else(|| map.get(alias)))
                .map_err(|msg| AppError::invalid_payload(format!("{key}: {msg}")))
        };

        let name = match string_field("name")?.into_patch() {
            Some(None) => return Err(AppError::invalid_payload("name cannot be null")),
            other => other.flatten(),
        };

        Ok(UpdateWorkItem {
            name,
            description_html: string_field("description_html")?.into_patch().flatten(),
            priority: string_field("priority")?.into_patch().flatten(),
            state_id: uuid_field("state_id")?.or(uuid_field("state")?),
            type_id: uuid_field("type_id")?,
            estimate_point_id: uuid_field("estimate_point_id")?,
            parent_id: uuid_field("parent_id")?,
            start_date: date_field("start_date")?,
            target_date: date_field("target_date")?,
            assignee_ids: list_field("assignee_ids", "assignees")?,
            label_ids: list_field("label_ids", "labels")?,
            cycle_id: uuid_field("cycle_id")?,
            module_ids: list_field("module_ids", "modules")?,
            is_draft: map.get("is_draft").and_then(Value::as_bool),
        })
    }
}

pub fn create_work_item(
    state: &AppState,
    gate: &ProjectAccess,
    payload: CreateWorkItem,
    opts: MutationOptions,
) -> AppResult<WorkItem> {
    gate.require_mutation()?;

    let project = &gate.project;
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::invalid_payload("name is required"));
    }
    if name.len() > 255 {
        return Err(AppError::invalid_payload("name exceeds 255 characters"));
    }
    let priority = validate_priority(payload.priority.as_deref())?;
    validate_date_order(payload.start_date, payload.target_date)?;
    let description_html = payload.description_html.unwrap_or_default();
    validate_rich_text(&description_html)?;

    let mut assignee_ids = payload.assignee_ids.clone();
    assignee_ids.sort();
    assignee_ids.dedup();
    if assignee_ids.is_empty() {
        if let Some(default) = project.default_assignee_id {
            assignee_ids.push(default);
        }
    }

    let ctx = ActivityContext {
        workspace_id: project.workspace_id,
        project_id: project.id,
        actor_id: gate.requester.user_id,
        epoch: next_epoch(),
    };

    let mut conn = state.db()?;
    let (item, activity_ids) = conn.transaction::<_, AppError, _>(|conn| {
        validate_references(
            conn,
            project.id,
            payload.state_id,
            payload.parent_id,
            payload.estimate_point_id,
            &payload.label_ids,
            &assignee_ids,
        )?;

        let sequence_id = allocate_sequence(conn, project.id)?;
        let state_id = match payload.state_id {
            Some(id) => Some(id),
            None => default_state(conn, project.id)?,
        };

        let item: WorkItem = diesel::insert_into(work_items::table)
            .values(&NewWorkItem {
                id: Uuid::new_v4(),
                workspace_id: project.workspace_id,
                project_id: project.id,
                sequence_id,
                name,
                description_html,
                priority: priority.as_str().to_string(),
                state_id,
                type_id: payload.type_id,
                start_date: payload.start_date,
                target_date: payload.target_date,
                estimate_point_id: payload.estimate_point_id,
                parent_id: payload.parent_id,
                created_by: gate.requester.user_id,
                is_draft: payload.is_draft,
            })
            .get_result(conn)?;

        add_assignees(conn, item.id, &assignee_ids)?;
        add_labels(conn, item.id, &payload.label_ids)?;
        sync_mentions(conn, item.id, &extract_mention_ids(&item.description_html))?;
        ensure_subscribers(conn, item.id, &assignee_ids)?;
        ensure_subscribers(conn, item.id, &[gate.requester.user_id])?;

        let activity_ids = if opts.skip_activity {
            Vec::new()
        } else {
            let after = snapshot_work_item(conn, &item)?;
            activity::record(conn, &ctx, item.id, differs::created_work_item(&after))?
        };

        Ok((item, activity_ids))
    })?;

    activity::dispatch(
        state.tasks.as_ref(),
        state.origin_hints.as_ref(),
        &ctx,
        "work_item.created",
        item.id,
        &activity_ids,
        opts.origin.as_deref(),
        opts.notification,
    );

    Ok(item)
}

pub fn update_work_item(
    state: &AppState,
    gate: &ProjectAccess,
    item_id: Uuid,
    patch: UpdateWorkItem,
    opts: MutationOptions,
) -> AppResult<WorkItem> {
    gate.require_mutation()?;

    if let Some(ref name) = patch.name {
        if name.trim().is_empty() {
            return Err(AppError::invalid_payload("name is required"));
        }
        if name.len() > 255 {
            return Err(AppError::invalid_payload("name exceeds 255 characters"));
        }
    }
    let priority = patch
        .priority
        .as_deref()
        .map(|p| validate_priority(Some(p)))
        .transpose()?;
    if let Some(ref html) = patch.description_html {
        validate_rich_text(html)?;
    }

    let ctx = ActivityContext {
        workspace_id: gate.project.workspace_id,
        project_id: gate.project.id,
        actor_id: gate.requester.user_id,
        epoch: next_epoch(),
    };

    let mut conn = state.db()?;
    let (item, activity_ids) = conn.transaction::<_, AppError, _>(|conn| {
        let current: WorkItem = work_items::table
            .find(item_id)
            .filter(work_items::project_id.eq(gate.project.id))
            .filter(work_items::deleted_at.is_null())
            .first(conn)?;

        let before = snapshot_work_item(conn, &current)?;

        let name = patch.name.clone().unwrap_or_else(|| current.name.clone());
        let description_html = patch
            .description_html
            .clone()
            .unwrap_or_else(|| current.description_html.clone());
        let priority = priority
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| current.priority.clone());
        let state_id = patch.state_id.unwrap_or(current.state_id);
        let type_id = patch.type_id.unwrap_or(current.type_id);
        let estimate_point_id = patch.estimate_point_id.unwrap_or(current.estimate_point_id);
        let parent_id = patch.parent_id.unwrap_or(current.parent_id);
        let start_date = patch.start_date.unwrap_or(current.start_date);
        let target_date = patch.target_date.unwrap_or(current.target_date);
        let is_draft = patch.is_draft.unwrap_or(current.is_draft);

        validate_date_order(start_date, target_date)?;
        if parent_id == Some(current.id) {
            return Err(AppError::invalid_payload("an item cannot be its own parent"));
        }
        validate_references(
            conn,
            gate.project.id,
            state_id.filter(|id| patch.state_id.is_some() && Some(*id) != current.state_id),
            parent_id.filter(|id| patch.parent_id.is_some() && Some(*id) != current.parent_id),
            estimate_point_id
                .filter(|id| patch.estimate_point_id.is_some() && Some(*id) != current.estimate_point_id),
            patch.label_ids.as_deref().unwrap_or(&[]),
            patch.assignee_ids.as_deref().unwrap_or(&[]),
        )?;

        // Completion timestamp follows the state group.
        let completed_at = match state_id {
            Some(sid) if state_id != current.state_id => {
                let group: String = states::table
                    .find(sid)
                    .select(states::group)
                    .first(conn)?;
                if group == StateGroup::Completed.as_str() {
                    Some(Utc::now())
                } else {
                    None
                }
            }
            Some(_) => current.completed_at,
            None => None,
        };

        let item: WorkItem = diesel::update(work_items::table.find(current.id))
            .set((
                work_items::name.eq(&name),
                work_items::description_html.eq(&description_html),
                work_items::priority.eq(&priority),
                work_items::state_id.eq(state_id),
                work_items::type_id.eq(type_id),
                work_items::estimate_point_id.eq(estimate_point_id),
                work_items::parent_id.eq(parent_id),
                work_items::start_date.eq(start_date),
                work_items::target_date.eq(target_date),
                work_items::completed_at.eq(completed_at),
                work_items::is_draft.eq(is_draft),
                // Bumped even when only edge tables changed.
                work_items::updated_at.eq(Utc::now()),
            ))
            .get_result(conn)?;

        let mut extra_drafts = Vec::new();

        if let Some(ref wanted) = patch.assignee_ids {
            sync_assignees(conn, item.id, wanted)?;
            ensure_subscribers(conn, item.id, wanted)?;
        }
        if let Some(ref wanted) = patch.label_ids {
            sync_labels(conn, item.id, wanted)?;
        }
        if patch.description_html.is_some() {
            sync_mentions(conn, item.id, &extract_mention_ids(&item.description_html))?;
        }
        if let Some(wanted) = patch.cycle_id {
            if let Some(draft) = sync_cycle(conn, item.id, wanted)? {
                extra_drafts.push(draft);
            }
        }
        if let Some(ref wanted) = patch.module_ids {
            extra_drafts.extend(sync_modules(conn, item.id, wanted)?);
        }
        if let Some(draft) = differs::draft_flag(current.is_draft, item.is_draft) {
            extra_drafts.push(draft);
        }

        let activity_ids = if opts.skip_activity {
            Vec::new()
        } else {
            let after = snapshot_work_item(conn, &item)?;
            let mut drafts = differs::diff_work_item(&before, &after);
            drafts.extend(extra_drafts);
            activity::record(conn, &ctx, item.id, drafts)?
        };

        Ok((item, activity_ids))
    })?;

    activity::dispatch(
        state.tasks.as_ref(),
        state.origin_hints.as_ref(),
        &ctx,
        "work_item.updated",
        item.id,
        &activity_ids,
        opts.origin.as_deref(),
        opts.notification,
    );

    Ok(item)
}

pub fn delete_work_item(
    state: &AppState,
    gate: &ProjectAccess,
    item_id: Uuid,
    opts: MutationOptions,
) -> AppResult<()> {
    let mut conn = state.db()?;

    let ctx = ActivityContext {
        workspace_id: gate.project.workspace_id,
        project_id: gate.project.id,
        actor_id: gate.requester.user_id,
        epoch: next_epoch(),
    };

    let activity_ids = conn.transaction::<_, AppError, _>(|conn| {
        let current: WorkItem = work_items::table
            .find(item_id)
            .filter(work_items::project_id.eq(gate.project.id))
            .filter(work_items::deleted_at.is_null())
            .first(conn)?;

        gate.require_delete(current.created_by)?;

        let before = snapshot_work_item(conn, &current)?;
        let now = Utc::now();

        diesel::update(work_items::table.find(current.id))
            .set((
                work_items::deleted_at.eq(Some(now)),
                work_items::updated_at.eq(now),
            ))
            .execute(conn)?;

        // Owned edges follow the soft delete so future diffs see no live
        // membership.
        diesel::update(
            work_item_assignees::table
                .filter(work_item_assignees::work_item_id.eq(current.id))
                .filter(work_item_assignees::deleted_at.is_null()),
        )
        .set(work_item_assignees::deleted_at.eq(Some(now)))
        .execute(conn)?;
        diesel::update(
            work_item_labels::table
                .filter(work_item_labels::work_item_id.eq(current.id))
                .filter(work_item_labels::deleted_at.is_null()),
        )
        .set(work_item_labels::deleted_at.eq(Some(now)))
        .execute(conn)?;
        diesel::update(
            cycle_work_items::table
                .filter(cycle_work_items::work_item_id.eq(current.id))
                .filter(cycle_work_items::deleted_at.is_null()),
        )
        .set(cycle_work_items::deleted_at.eq(Some(now)))
        .execute(conn)?;
        diesel::update(
            module_work_items::table
                .filter(module_work_items::work_item_id.eq(current.id))
                .filter(module_work_items::deleted_at.is_null()),
        )
        .set(module_work_items::deleted_at.eq(Some(now)))
        .execute(conn)?;
        diesel::update(
            work_item_subscribers::table
                .filter(work_item_subscribers::work_item_id.eq(current.id))
                .filter(work_item_subscribers::deleted_at.is_null()),
        )
        .set(work_item_subscribers::deleted_at.eq(Some(now)))
        .execute(conn)?;
        diesel::update(
            work_item_mentions::table
                .filter(work_item_mentions::work_item_id.eq(current.id))
                .filter(work_item_mentions::deleted_at.is_null()),
        )
        .set(work_item_mentions::deleted_at.eq(Some(now)))
        .execute(conn)?;
        diesel::update(
            work_item_links::table
                .filter(work_item_links::work_item_id.eq(current.id))
                .filter(work_item_links::deleted_at.is_null()),
        )
        .set(work_item_links::deleted_at.eq(Some(now)))
        .execute(conn)?;

        diesel::delete(recent_visits::table.filter(recent_visits::work_item_id.eq(current.id)))
            .execute(conn)?;

        if opts.skip_activity {
            Ok(Vec::new())
        } else {
            activity::record(
                conn,
                &ctx,
                current.id,
                vec![differs::deleted_work_item(&before)],
            )
        }
    })?;

    state.visits.forget_item(item_id);

    activity::dispatch(
        state.tasks.as_ref(),
        state.origin_hints.as_ref(),
        &ctx,
        "work_item.deleted",
        item_id,
        &activity_ids,
        opts.origin.as_deref(),
        opts.notification,
    );

    Ok(())
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DateUpdate {
    pub id: Uuid,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub target_date: Option<NaiveDate>,
}

/// Applies a batch of date shifts in one transaction and emits one activity
/// record per changed date field per item.
pub fn bulk_update_dates(
    state: &AppState,
    gate: &ProjectAccess,
    updates: Vec<DateUpdate>,
    opts: MutationOptions,
) -> AppResult<usize> {
    gate.require_mutation()?;

    let ctx = ActivityContext {
        workspace_id: gate.project.workspace_id,
        project_id: gate.project.id,
        actor_id: gate.requester.user_id,
        epoch: next_epoch(),
    };

    let mut conn = state.db()?;
    let touched = conn.transaction::<_, AppError, _>(|conn| {
        let mut touched = Vec::new();

        for update in &updates {
            let current: WorkItem = work_items::table
                .find(update.id)
                .filter(work_items::project_id.eq(gate.project.id))
                .filter(work_items::deleted_at.is_null())
                .first(conn)?;

            let start = update.start_date.or(current.start_date);
            let target = update.target_date.or(current.target_date);
            validate_date_order(start, target)?;

            if start == current.start_date && target == current.target_date {
                continue;
            }

            diesel::update(work_items::table.find(current.id))
                .set((
                    work_items::start_date.eq(start),
                    work_items::target_date.eq(target),
                    work_items::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;

            if !opts.skip_activity {
                let mut drafts = Vec::new();
                if start != current.start_date {
                    drafts.push(date_draft("start_date", current.start_date, start));
                }
                if target != current.target_date {
                    drafts.push(date_draft("target_date", current.target_date, target));
                }
                let ids = activity::record(conn, &ctx, current.id, drafts)?;
                touched.push((current.id, ids));
            } else {
                touched.push((current.id, Vec::new()));
            }
        }

        Ok(touched)
    })?;

    for (item_id, activity_ids) in &touched {
        activity::dispatch(
            state.tasks.as_ref(),
            state.origin_hints.as_ref(),
            &ctx,
            "work_item.updated",
            *item_id,
            activity_ids,
            opts.origin.as_deref(),
            opts.notification,
        );
    }

    Ok(touched.len())
}

fn date_draft(
    field: &str,
    old: Option<NaiveDate>,
    new: Option<NaiveDate>,
) -> differs::ActivityDraft {
    let before = json!({ field: old.map(|d| d.to_string()) });
    let after = json!({ field: new.map(|d| d.to_string()) });
    // The generic differ produces exactly one draft for a single changed
    // scalar field.
    differs::diff_work_item(&before, &after)
        .into_iter()
        .next()
        .unwrap_or_else(|| differs::ActivityDraft {
            verb: differs::VERB_UPDATED.to_string(),
            field: Some(field.to_string()),
            old_value: old.map(|d| d.to_string()),
            new_value: new.map(|d| d.to_string()),
            old_identifier: None,
            new_identifier: None,
            comment_id: None,
        })
}

/// Builds the JSON snapshot the differs consume, with display names already
/// resolved so diffing stays a pure function.
pub fn snapshot_work_item(conn: &mut PgConnection, item: &WorkItem) -> AppResult<Value> {
    let state = match item.state_id {
        Some(sid) => {
            let state: State = states::table.find(sid).first(conn)?;
            json!({ "id": state.id.to_string(), "name": state.name })
        }
        None => Value::Null,
    };

    let parent = match item.parent_id {
        Some(pid) => {
            let name: String = work_items::table
                .find(pid)
                .select(work_items::name)
                .first(conn)?;
            json!({ "id": pid.to_string(), "name": name })
        }
        None => Value::Null,
    };

    let estimate_point = match item.estimate_point_id {
        Some(eid) => {
            let value: String = estimate_points::table
                .find(eid)
                .select(estimate_points::value)
                .first(conn)?;
            json!({ "id": eid.to_string(), "name": value })
        }
        None => Value::Null,
    };

    let label_rows: Vec<(Uuid, String)> = work_item_labels::table
        .inner_join(labels::table)
        .filter(work_item_labels::work_item_id.eq(item.id))
        .filter(work_item_labels::deleted_at.is_null())
        .select((labels::id, labels::name))
        .load(conn)?;

    let assignee_rows: Vec<(Uuid, String)> = work_item_assignees::table
        .inner_join(users::table.on(users::id.eq(work_item_assignees::assignee_id)))
        .filter(work_item_assignees::work_item_id.eq(item.id))
        .filter(work_item_assignees::deleted_at.is_null())
        .select((users::id, users::display_name))
        .load(conn)?;

    Ok(json!({
        "name": item.name,
        "description_html": item.description_html,
        "priority": item.priority,
        "state": state,
        "parent": parent,
        "estimate_point": estimate_point,
        "start_date": item.start_date.map(|d| d.to_string()),
        "target_date": item.target_date.map(|d| d.to_string()),
        "archived_at": item.archived_at.map(|t| t.to_rfc3339()),
        "labels": label_rows
            .into_iter()
            .map(|(id, name)| json!({ "id": id.to_string(), "name": name }))
            .collect::<Vec<_>>(),
        "assignees": assignee_rows
            .into_iter()
            .map(|(id, name)| json!({ "id": id.to_string(), "name": name }))
            .collect::<Vec<_>>(),
    }))
}

/// Epoch shared by a mutation's activity batch and its notification task.
pub fn next_epoch() -> i64 {
    Utc::now().timestamp_millis()
}

/// The only cross-request contention point: one atomic increment per
/// project, returning the allocated value.
fn allocate_sequence(conn: &mut PgConnection, project_id: Uuid) -> AppResult<i64> {
    let sequence: i64 = diesel::update(projects::table.find(project_id))
        .set(projects::last_sequence.eq(projects::last_sequence + 1))
        .returning(projects::last_sequence)
        .get_result(conn)?;
    Ok(sequence)
}

fn default_state(conn: &mut PgConnection, project_id: Uuid) -> AppResult<Option<Uuid>> {
    let id = states::table
        .filter(states::project_id.eq(project_id))
        .filter(states::is_default.eq(true))
        .select(states::id)
        .first(conn)
        .optional()?;
    Ok(id)
}

fn validate_priority(raw: Option<&str>) -> AppResult<Priority> {
    match raw {
        None => Ok(Priority::None),
        Some(value) => Priority::parse(value)
            .ok_or_else(|| AppError::invalid_payload(format!("unknown priority '{value}'"))),
    }
}

fn validate_date_order(start: Option<NaiveDate>, target: Option<NaiveDate>) -> AppResult<()> {
    if let (Some(start), Some(target)) = (start, target) {
        if start > target {
            return Err(AppError::invalid_payload(
                "start date must not be after target date",
            ));
        }
    }
    Ok(())
}

fn validate_rich_text(html: &str) -> AppResult<()> {
    if !is_parsable_html(html) {
        return Err(AppError::invalid_payload("description is not parsable rich text"));
    }
    Ok(())
}

/// Every referenced id must resolve inside the project; unknown ids are the
/// caller's mistake, not a missing row.
fn validate_references(
    conn: &mut PgConnection,
    project_id: Uuid,
    state_id: Option<Uuid>,
    parent_id: Option<Uuid>,
    estimate_point_id: Option<Uuid>,
    label_ids: &[Uuid],
    assignee_ids: &[Uuid],
) -> AppResult<()> {
    if let Some(sid) = state_id {
        let found: i64 = states::table
            .filter(states::id.eq(sid))
            .filter(states::project_id.eq(project_id))
            .count()
            .get_result(conn)?;
        if found == 0 {
            return Err(AppError::invalid_payload(format!("unknown state id {sid}")));
        }
    }

    if let Some(pid) = parent_id {
        let found: i64 = work_items::table
            .filter(work_items::id.eq(pid))
            .filter(work_items::project_id.eq(project_id))
            .filter(work_items::deleted_at.is_null())
            .count()
            .get_result(conn)?;
        if found == 0 {
            return Err(AppError::invalid_payload(format!("unknown parent id {pid}")));
        }
    }

    if let Some(eid) = estimate_point_id {
        let found: i64 = estimate_points::table
            .filter(estimate_points::id.eq(eid))
            .filter(estimate_points::project_id.eq(project_id))
            .count()
            .get_result(conn)?;
        if found == 0 {
            return Err(AppError::invalid_payload(format!(
                "unknown estimate point id {eid}"
            )));
        }
    }

    if !label_ids.is_empty() {
        let found: i64 = labels::table
            .filter(labels::id.eq_any(label_ids))
            .filter(labels::project_id.eq(project_id))
            .count()
            .get_result(conn)?;
        if found != label_ids.len() as i64 {
            return Err(AppError::invalid_payload(
                "one or more labels do not belong to this project",
            ));
        }
    }

    if !assignee_ids.is_empty() {
        let found: i64 = project_members::table
            .filter(project_members::project_id.eq(project_id))
            .filter(project_members::user_id.eq_any(assignee_ids))
            .filter(project_members::is_active.eq(true))
            .count()
            .get_result(conn)?;
        if found != assignee_ids.len() as i64 {
            return Err(AppError::invalid_payload(
                "one or more assignees are not project members",
            ));
        }
    }

    Ok(())
}

fn add_assignees(conn: &mut PgConnection, item_id: Uuid, ids: &[Uuid]) -> AppResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    // Revive soft-deleted edges first so the unique index stays clean.
    diesel::update(
        work_item_assignees::table
            .filter(work_item_assignees::work_item_id.eq(item_id))
            .filter(work_item_assignees::assignee_id.eq_any(ids))
            .filter(work_item_assignees::deleted_at.is_not_null()),
    )
    .set(work_item_assignees::deleted_at.eq(None::<chrono::DateTime<Utc>>))
    .execute(conn)?;

    let rows: Vec<NewWorkItemAssignee> = ids
        .iter()
        .map(|assignee_id| NewWorkItemAssignee {
            id: Uuid::new_v4(),
            work_item_id: item_id,
            assignee_id: *assignee_id,
        })
        .collect();
    diesel::insert_into(work_item_assignees::table)
        .values(&rows)
        .on_conflict_do_nothing()
        .execute(conn)?;
    Ok(())
}

fn add_labels(conn: &mut PgConnection, item_id: Uuid, ids: &[Uuid]) -> AppResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    diesel::update(
        work_item_labels::table
            .filter(work_item_labels::work_item_id.eq(item_id))
            .filter(work_item_labels::label_id.eq_any(ids))
            .filter(work_item_labels::deleted_at.is_not_null()),
    )
    .set(work_item_labels::deleted_at.eq(None::<chrono::DateTime<Utc>>))
    .execute(conn)?;

    let rows: Vec<NewWorkItemLabel> = ids
        .iter()
        .map(|label_id| NewWorkItemLabel {
            id: Uuid::new_v4(),
            work_item_id: item_id,
            label_id: *label_id,
        })
        .collect();
    diesel::insert_into(work_item_labels::table)
        .values(&rows)
        .on_conflict_do_nothing()
        .execute(conn)?;
    Ok(())
}

fn sync_assignees(conn: &mut PgConnection, item_id: Uuid, wanted: &[Uuid]) -> AppResult<()> {
    let current: Vec<Uuid> = work_item_assignees::table
        .filter(work_item_assignees::work_item_id.eq(item_id))
        .filter(work_item_assignees::deleted_at.is_null())
        .select(work_item_assignees::assignee_id)
        .load(conn)?;

    let removed: Vec<Uuid> = current
        .iter()
        .filter(|id| !wanted.contains(id))
        .copied()
        .collect();
    if !removed.is_empty() {
        diesel::update(
            work_item_assignees::table
                .filter(work_item_assignees::work_item_id.eq(item_id))
                .filter(work_item_assignees::assignee_id.eq_any(&removed))
                .filter(work_item_assignees::deleted_at.is_null()),
        )
        .set(work_item_assignees::deleted_at.eq(Some(Utc::now())))
        .execute(conn)?;
    }

    let added: Vec<Uuid> = wanted
        .iter()
        .filter(|id| !current.contains(id))
        .copied()
        .collect();
    add_assignees(conn, item_id, &added)
}

fn sync_labels(conn: &mut PgConnection, item_id: Uuid, wanted: &[Uuid]) -> AppResult<()> {
    let current: Vec<Uuid> = work_item_labels::table
        .filter(work_item_labels::work_item_id.eq(item_id))
        .filter(work_item_labels::deleted_at.is_null())
        .select(work_item_labels::label_id)
        .load(conn)?;

    let removed: Vec<Uuid> = current
        .iter()
        .filter(|id| !wanted.contains(id))
        .copied()
        .collect();
    if !removed.is_empty() {
        diesel::update(
            work_item_labels::table
                .filter(work_item_labels::work_item_id.eq(item_id))
                .filter(work_item_labels::label_id.eq_any(&removed))
                .filter(work_item_labels::deleted_at.is_null()),
        )
        .set(work_item_labels::deleted_at.eq(Some(Utc::now())))
        .execute(conn)?;
    }

    let added: Vec<Uuid> = wanted
        .iter()
        .filter(|id| !current.contains(id))
        .copied()
        .collect();
    add_labels(conn, item_id, &added)
}

/// Mention edges mirror the mention nodes currently present in the
/// description body.
fn sync_mentions(conn: &mut PgConnection, item_id: Uuid, wanted: &[Uuid]) -> AppResult<()> {
    let current: Vec<Uuid> = work_item_mentions::table
        .filter(work_item_mentions::work_item_id.eq(item_id))
        .filter(work_item_mentions::deleted_at.is_null())
        .select(work_item_mentions::user_id)
        .load(conn)?;

    let removed: Vec<Uuid> = current
        .iter()
        .filter(|id| !wanted.contains(id))
        .copied()
        .collect();
    if !removed.is_empty() {
        diesel::update(
            work_item_mentions::table
                .filter(work_item_mentions::work_item_id.eq(item_id))
                .filter(work_item_mentions::user_id.eq_any(&removed))
                .filter(work_item_mentions::deleted_at.is_null()),
        )
        .set(work_item_mentions::deleted_at.eq(Some(Utc::now())))
        .execute(conn)?;
    }

    let added: Vec<Uuid> = wanted
        .iter()
        .filter(|id| !current.contains(id))
        .copied()
        .collect();
    if added.is_empty() {
        return Ok(());
    }
    diesel::update(
        work_item_mentions::table
            .filter(work_item_mentions::work_item_id.eq(item_id))
            .filter(work_item_mentions::user_id.eq_any(&added))
            .filter(work_item_mentions::deleted_at.is_not_null()),
    )
    .set(work_item_mentions::deleted_at.eq(None::<chrono::DateTime<Utc>>))
    .execute(conn)?;

    let rows: Vec<NewWorkItemMention> = added
        .iter()
        .map(|user_id| NewWorkItemMention {
            id: Uuid::new_v4(),
            work_item_id: item_id,
            user_id: *user_id,
        })
        .collect();
    diesel::insert_into(work_item_mentions::table)
        .values(&rows)
        .on_conflict_do_nothing()
        .execute(conn)?;
    Ok(())
}

/// Moves an item between cycles (or in/out of one) and returns the
/// membership activity draft when anything changed.
fn sync_cycle(
    conn: &mut PgConnection,
    item_id: Uuid,
    wanted: Option<Uuid>,
) -> AppResult<Option<differs::ActivityDraft>> {
    let current: Option<Uuid> = cycle_work_items::table
        .filter(cycle_work_items::work_item_id.eq(item_id))
        .filter(cycle_work_items::deleted_at.is_null())
        .order(cycle_work_items::created_at.desc())
        .select(cycle_work_items::cycle_id)
        .first(conn)
        .optional()?;

    if current == wanted {
        return Ok(None);
    }

    if current.is_some() {
        diesel::update(
            cycle_work_items::table
                .filter(cycle_work_items::work_item_id.eq(item_id))
                .filter(cycle_work_items::deleted_at.is_null()),
        )
        .set(cycle_work_items::deleted_at.eq(Some(Utc::now())))
        .execute(conn)?;
    }
    if let Some(cycle_id) = wanted {
        diesel::insert_into(cycle_work_items::table)
            .values(&crate::models::NewCycleWorkItem {
                id: Uuid::new_v4(),
                cycle_id,
                work_item_id: item_id,
            })
            .on_conflict_do_nothing()
            .execute(conn)?;
    }

    let old = match current {
        Some(id) => Some((id, cycle_name(conn, id)?)),
        None => None,
    };
    let new = match wanted {
        Some(id) => Some((id, cycle_name(conn, id)?)),
        None => None,
    };
    Ok(differs::cycle_membership(old, new))
}

fn cycle_name(conn: &mut PgConnection, cycle_id: Uuid) -> AppResult<String> {
    let name = cycles::table
        .find(cycle_id)
        .select(cycles::name)
        .first(conn)?;
    Ok(name)
}

fn sync_modules(
    conn: &mut PgConnection,
    item_id: Uuid,
    wanted: &[Uuid],
) -> AppResult<Vec<differs::ActivityDraft>> {
    let current: Vec<Uuid> = module_work_items::table
        .filter(module_work_items::work_item_id.eq(item_id))
        .filter(module_work_items::deleted_at.is_null())
        .select(module_work_items::module_id)
        .load(conn)?;

    let mut drafts = Vec::new();

    let removed: Vec<Uuid> = current
        .iter()
        .filter(|id| !wanted.contains(id))
        .copied()
        .collect();
    if !removed.is_empty() {
        diesel::update(
            module_work_items::table
                .filter(module_work_items::work_item_id.eq(item_id))
                .filter(module_work_items::module_id.eq_any(&removed))
                .filter(module_work_items::deleted_at.is_null()),
        )
        .set(module_work_items::deleted_at.eq(Some(Utc::now())))
        .execute(conn)?;
        for module_id in removed {
            let name = module_name(conn, module_id)?;
            if let Some(draft) = differs::module_membership(Some((module_id, name)), None) {
                drafts.push(draft);
            }
        }
    }

    let added: Vec<Uuid> = wanted
        .iter()
        .filter(|id| !current.contains(id))
        .copied()
        .collect();
    for module_id in added {
        diesel::insert_into(module_work_items::table)
            .values(&crate::models::NewModuleWorkItem {
                id: Uuid::new_v4(),
                module_id,
                work_item_id: item_id,
            })
            .on_conflict_do_nothing()
            .execute(conn)?;
        let name = module_name(conn, module_id)?;
        if let Some(draft) = differs::module_membership(None, Some((module_id, name))) {
            drafts.push(draft);
        }
    }

    Ok(drafts)
}

fn module_name(conn: &mut PgConnection, module_id: Uuid) -> AppResult<String> {
    let name = modules::table
        .find(module_id)
        .select(modules::name)
        .first(conn)?;
    Ok(name)
}

/// Subscribes users to an item, reviving soft-deleted rows. Adding an
/// assignee always subscribes them.
pub fn ensure_subscribers(
    conn: &mut PgConnection,
    item_id: Uuid,
    user_ids: &[Uuid],
) -> AppResult<()> {
    if user_ids.is_empty() {
        return Ok(());
    }
    diesel::update(
        work_item_subscribers::table
            .filter(work_item_subscribers::work_item_id.eq(item_id))
            .filter(work_item_subscribers::subscriber_id.eq_any(user_ids))
            .filter(work_item_subscribers::deleted_at.is_not_null()),
    )
    .set(work_item_subscribers::deleted_at.eq(None::<chrono::DateTime<Utc>>))
    .execute(conn)?;

    let existing: Vec<Uuid> = work_item_subscribers::table
        .filter(work_item_subscribers::work_item_id.eq(item_id))
        .filter(work_item_subscribers::subscriber_id.eq_any(user_ids))
        .select(work_item_subscribers::subscriber_id)
        .load(conn)?;

    let rows: Vec<NewWorkItemSubscriber> = user_ids
        .iter()
        .filter(|id| !existing.contains(id))
        .map(|subscriber_id| NewWorkItemSubscriber {
            id: Uuid::new_v4(),
            work_item_id: item_id,
            subscriber_id: *subscriber_id,
        })
        .collect();
    if !rows.is_empty() {
        diesel::insert_into(work_item_subscribers::table)
            .values(&rows)
            .on_conflict_do_nothing()
            .execute(conn)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn start_after_target_is_rejected() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 12).unwrap();
        let target = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let err = validate_date_order(Some(start), Some(target)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPayload);
        assert!(err.message().contains("start date"));
    }

    #[test]
    fn single_unset_date_is_fine() {
        let day = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        assert!(validate_date_order(Some(day), None).is_ok());
        assert!(validate_date_order(None, Some(day)).is_ok());
    }

    #[test]
    fn unknown_priority_is_invalid_payload() {
        let err = validate_priority(Some("blazing")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPayload);
        assert_eq!(validate_priority(None).unwrap(), Priority::None);
    }

    #[test]
    fn patch_distinguishes_absent_null_and_value() {
        let patch = UpdateWorkItem::from_json(&json!({
            "target_date": null,
            "start_date": "2025-01-10",
            "priority": "urgent",
        }))
        .unwrap();

        assert_eq!(patch.target_date, Some(None));
        assert_eq!(
            patch.start_date,
            Some(Some(NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()))
        );
        assert!(patch.state_id.is_none());
        assert_eq!(patch.priority.as_deref(), Some("urgent"));
    }

    #[test]
    fn null_name_is_rejected() {
        let err = UpdateWorkItem::from_json(&json!({ "name": null })).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPayload);
    }

    #[test]
    fn patch_accepts_edge_aliases() {
        let id = Uuid::new_v4();
        let patch = UpdateWorkItem::from_json(&json!({
            "assignees": [id.to_string()],
        }))
        .unwrap();
        assert_eq!(patch.assignee_ids, Some(vec![id]));
    }
}
