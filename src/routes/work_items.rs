use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::access::{load_project_access, load_visible_item, Requester};
use crate::error::{AppError, AppResult};
use crate::models::WorkItemActivity;
use crate::mutation::{self, CreateWorkItem, DateUpdate, MutationOptions, UpdateWorkItem};
use crate::query::{self, CountFilter, ItemSelector, ListParams, Page, WorkItemView};
use crate::schema::{work_item_subscribers, work_items};
use crate::state::AppState;

use super::AuthenticatedUser;

#[derive(Deserialize)]
pub struct ListQuery {
    /// Filter document, URL-encoded JSON.
    pub filters: Option<String>,
    pub order_by: Option<String>,
    pub group_by: Option<String>,
    pub sub_group_by: Option<String>,
    pub cursor: Option<String>,
    pub per_page: Option<i64>,
    #[serde(default)]
    pub include_drafts: bool,
    #[serde(default)]
    pub count_all: bool,
    pub anchor: Option<String>,
}

#[derive(Deserialize)]
pub struct MutationQuery {
    #[serde(default)]
    pub skip_activity: bool,
    pub notification: Option<bool>,
    pub origin: Option<String>,
}

impl MutationQuery {
    pub fn options(&self) -> MutationOptions {
        MutationOptions {
            notification: self.notification.unwrap_or(true),
            skip_activity: self.skip_activity,
            origin: self.origin.clone(),
        }
    }
}

#[derive(Deserialize)]
pub struct ReadQuery {
    pub anchor: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
    Query(params): Query<ListQuery>,
) -> AppResult<Json<Page>> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    gate.require_read(params.anchor.as_deref())?;

    let filters: Value = match params.filters.as_deref() {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|err| AppError::invalid_filter(format!("filters is not valid JSON: {err}")))?,
        None => Value::Null,
    };

    let page = query::list_work_items(
        &mut conn,
        &state.config,
        &gate,
        ListParams {
            filters,
            order_by: params.order_by,
            group_by: params.group_by,
            sub_group_by: params.sub_group_by,
            cursor: params.cursor,
            per_page: params.per_page,
            include_drafts: params.include_drafts,
            count_filter: if params.count_all {
                CountFilter::All
            } else {
                CountFilter::ExcludeDrafts
            },
        },
    )?;
    Ok(Json(page))
}

pub async fn get(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id)): Path<(Uuid, Uuid)>,
    Query(params): Query<ReadQuery>,
) -> AppResult<Json<WorkItemView>> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    gate.require_read(params.anchor.as_deref())?;

    let view = query::get_work_item(&mut conn, &gate, ItemSelector::Id(item_id))?;
    state.visits.record(user.user_id, view.id);
    Ok(Json(view))
}

pub async fn get_by_sequence(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, sequence)): Path<(Uuid, i64)>,
    Query(params): Query<ReadQuery>,
) -> AppResult<Json<WorkItemView>> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    gate.require_read(params.anchor.as_deref())?;

    let view = query::get_work_item(&mut conn, &gate, ItemSelector::Sequence(sequence))?;
    state.visits.record(user.user_id, view.id);
    Ok(Json(view))
}

pub async fn create(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
    Query(opts): Query<MutationQuery>,
    Json(payload): Json<CreateWorkItem>,
) -> AppResult<(StatusCode, Json<WorkItemView>)> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    drop(conn);

    let item = mutation::create_work_item(&state, &gate, payload, opts.options())?;

    let mut conn = state.db()?;
    let view = query::get_work_item(&mut conn, &gate, ItemSelector::Id(item.id))?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn update(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id)): Path<(Uuid, Uuid)>,
    Query(opts): Query<MutationQuery>,
    Json(patch): Json<Value>,
) -> AppResult<Json<WorkItemView>> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    drop(conn);

    let patch = UpdateWorkItem::from_json(&patch)?;
    let item = mutation::update_work_item(&state, &gate, item_id, patch, opts.options())?;

    let mut conn = state.db()?;
    let view = query::get_work_item(&mut conn, &gate, ItemSelector::Id(item.id))?;
    Ok(Json(view))
}

pub async fn remove(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id)): Path<(Uuid, Uuid)>,
    Query(opts): Query<MutationQuery>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    drop(conn);

    mutation::delete_work_item(&state, &gate, item_id, opts.options())?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn bulk_dates(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
    Query(opts): Query<MutationQuery>,
    Json(updates): Json<Vec<DateUpdate>>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    drop(conn);

    let updated = mutation::bulk_update_dates(&state, &gate, updates, opts.options())?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}

/// Wire shape of one timeline entry.
#[derive(Serialize)]
pub struct ActivityResponse {
    pub id: Uuid,
    pub issue_id: Uuid,
    pub actor_id: Uuid,
    pub verb: String,
    pub field: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub old_identifier: Option<Uuid>,
    pub new_identifier: Option<Uuid>,
    pub comment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub epoch: i64,
}

impl From<WorkItemActivity> for ActivityResponse {
    fn from(row: WorkItemActivity) -> Self {
        ActivityResponse {
            id: row.id,
            issue_id: row.work_item_id,
            actor_id: row.actor_id,
            verb: row.verb,
            field: row.field,
            old_value: row.old_value,
            new_value: row.new_value,
            old_identifier: row.old_identifier,
            new_identifier: row.new_identifier,
            comment_id: row.comment_id,
            created_at: row.created_at,
            epoch: row.epoch,
        }
    }
}

/// Activity stays readable after the work item is soft-deleted.
pub async fn list_activities(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id)): Path<(Uuid, Uuid)>,
    Query(params): Query<ReadQuery>,
) -> AppResult<Json<Vec<ActivityResponse>>> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    gate.require_read(params.anchor.as_deref())?;

    // No deleted_at filter: the timeline survives the soft delete. The
    // guest scope still applies to it.
    let created_by: Uuid = work_items::table
        .filter(work_items::id.eq(item_id))
        .filter(work_items::project_id.eq(project_id))
        .select(work_items::created_by)
        .first(&mut conn)?;
    gate.require_item_visible(created_by)?;

    use crate::schema::work_item_activities;
    let rows: Vec<WorkItemActivity> = work_item_activities::table
        .filter(work_item_activities::work_item_id.eq(item_id))
        .order((
            work_item_activities::created_at.asc(),
            work_item_activities::id.asc(),
        ))
        .load(&mut conn)?;

    Ok(Json(rows.into_iter().map(ActivityResponse::from).collect()))
}

pub async fn subscribe(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    gate.require_read(None)?;
    load_visible_item(&mut conn, &gate, item_id)?;

    mutation::ensure_subscribers(&mut conn, item_id, &[user.user_id])?;
    Ok(StatusCode::CREATED)
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    gate.require_read(None)?;

    diesel::update(
        work_item_subscribers::table
            .filter(work_item_subscribers::work_item_id.eq(item_id))
            .filter(work_item_subscribers::subscriber_id.eq(user.user_id))
            .filter(work_item_subscribers::deleted_at.is_null()),
    )
    .set(work_item_subscribers::deleted_at.eq(Some(Utc::now())))
    .execute(&mut conn)?;
    Ok(StatusCode::NO_CONTENT)
}
