use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::access::{load_project_access, load_visible_item, Requester};
use crate::activity::{self, differs, ActivityContext};
use crate::error::{AppError, AppResult};
use crate::models::{NewWorkItemLink, WorkItemLink};
use crate::mutation;
use crate::schema::work_item_links;
use crate::state::AppState;

use super::work_items::MutationQuery;
use super::AuthenticatedUser;

#[derive(Deserialize)]
pub struct CreateLink {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Deserialize)]
pub struct UpdateLink {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Serialize)]
pub struct LinkResponse {
    pub id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub metadata: Value,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<WorkItemLink> for LinkResponse {
    fn from(link: WorkItemLink) -> Self {
        LinkResponse {
            id: link.id,
            url: link.url,
            title: link.title,
            metadata: link.metadata,
            created_by: link.created_by,
            created_at: link.created_at,
        }
    }
}

fn validate_url(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim();
    Url::parse(trimmed)
        .map_err(|_| AppError::invalid_payload(format!("'{trimmed}' is not a valid URL")))?;
    Ok(trimmed.to_string())
}

pub async fn list(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Vec<LinkResponse>>> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    gate.require_read(None)?;
    load_visible_item(&mut conn, &gate, item_id)?;

    let links: Vec<WorkItemLink> = work_item_links::table
        .filter(work_item_links::work_item_id.eq(item_id))
        .filter(work_item_links::deleted_at.is_null())
        .order(work_item_links::created_at.asc())
        .load(&mut conn)?;
    Ok(Json(links.into_iter().map(LinkResponse::from).collect()))
}

pub async fn create(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id)): Path<(Uuid, Uuid)>,
    Query(opts): Query<MutationQuery>,
    Json(payload): Json<CreateLink>,
) -> AppResult<(StatusCode, Json<LinkResponse>)> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    gate.require_mutation()?;

    let url = validate_url(&payload.url)?;
    let item = load_visible_item(&mut conn, &gate, item_id)?;

    let ctx = ActivityContext {
        workspace_id: gate.project.workspace_id,
        project_id: gate.project.id,
        actor_id: user.user_id,
        epoch: mutation::next_epoch(),
    };

    let opts = opts.options();
    let (link, activity_ids) = conn.transaction::<_, AppError, _>(|conn| {
        let duplicate: i64 = work_item_links::table
            .filter(work_item_links::work_item_id.eq(item.id))
            .filter(work_item_links::url.eq(&url))
            .filter(work_item_links::deleted_at.is_null())
            .count()
            .get_result(conn)?;
        if duplicate > 0 {
            return Err(AppError::conflict("a link with this URL already exists"));
        }

        let link: WorkItemLink = diesel::insert_into(work_item_links::table)
            .values(&NewWorkItemLink {
                id: Uuid::new_v4(),
                work_item_id: item.id,
                url: url.clone(),
                title: payload.title.clone(),
                metadata: payload.metadata.clone().unwrap_or(Value::Null),
                created_by: user.user_id,
            })
            .get_result(conn)?;

        let activity_ids = if opts.skip_activity {
            Vec::new()
        } else {
            activity::record(
                conn,
                &ctx,
                item.id,
                vec![differs::link_activity(differs::VERB_CREATED, link.id, &link.url)],
            )?
        };
        Ok((link, activity_ids))
    })?;

    activity::dispatch(
        state.tasks.as_ref(),
        state.origin_hints.as_ref(),
        &ctx,
        "link",
        item.id,
        &activity_ids,
        opts.origin.as_deref(),
        opts.notification,
    );

    Ok((StatusCode::CREATED, Json(LinkResponse::from(link))))
}

pub async fn update(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id, link_id)): Path<(Uuid, Uuid, Uuid)>,
    Query(opts): Query<MutationQuery>,
    Json(payload): Json<UpdateLink>,
) -> AppResult<Json<LinkResponse>> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    let item = load_visible_item(&mut conn, &gate, item_id)?;

    let ctx = ActivityContext {
        workspace_id: gate.project.workspace_id,
        project_id: gate.project.id,
        actor_id: user.user_id,
        epoch: mutation::next_epoch(),
    };

    let opts = opts.options();
    let (link, activity_ids) = conn.transaction::<_, AppError, _>(|conn| {
        let current: WorkItemLink = work_item_links::table
            .find(link_id)
            .filter(work_item_links::work_item_id.eq(item.id))
            .filter(work_item_links::deleted_at.is_null())
            .first(conn)?;

        gate.require_self_mutation(current.created_by)?;

        let url = match payload.url.as_deref() {
            Some(raw) => validate_url(raw)?,
            None => current.url.clone(),
        };
        if url != current.url {
            let duplicate: i64 = work_item_links::table
                .filter(work_item_links::work_item_id.eq(item.id))
                .filter(work_item_links::url.eq(&url))
                .filter(work_item_links::deleted_at.is_null())
                .count()
                .get_result(conn)?;
            if duplicate > 0 {
                return Err(AppError::conflict("a link with this URL already exists"));
            }
        }

        let link: WorkItemLink = diesel::update(work_item_links::table.find(current.id))
            .set((
                work_item_links::url.eq(&url),
                work_item_links::title.eq(payload.title.clone().or(current.title.clone())),
                work_item_links::updated_at.eq(Utc::now()),
            ))
            .get_result(conn)?;

        let activity_ids = if opts.skip_activity {
            Vec::new()
        } else {
            activity::record(
                conn,
                &ctx,
                item.id,
                vec![differs::link_activity(differs::VERB_UPDATED, link.id, &link.url)],
            )?
        };
        Ok((link, activity_ids))
    })?;

    activity::dispatch(
        state.tasks.as_ref(),
        state.origin_hints.as_ref(),
        &ctx,
        "link",
        item.id,
        &activity_ids,
        opts.origin.as_deref(),
        opts.notification,
    );

    Ok(Json(LinkResponse::from(link)))
}

pub async fn remove(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id, link_id)): Path<(Uuid, Uuid, Uuid)>,
    Query(opts): Query<MutationQuery>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    let item = load_visible_item(&mut conn, &gate, item_id)?;

    let ctx = ActivityContext {
        workspace_id: gate.project.workspace_id,
        project_id: gate.project.id,
        actor_id: user.user_id,
        epoch: mutation::next_epoch(),
    };

    let opts = opts.options();
    let activity_ids = conn.transaction::<_, AppError, _>(|conn| {
        let current: WorkItemLink = work_item_links::table
            .find(link_id)
            .filter(work_item_links::work_item_id.eq(item.id))
            .filter(work_item_links::deleted_at.is_null())
            .first(conn)?;

        gate.require_self_mutation(current.created_by)?;

        diesel::update(work_item_links::table.find(current.id))
            .set(work_item_links::deleted_at.eq(Some(Utc::now())))
            .execute(conn)?;

        if opts.skip_activity {
            Ok(Vec::new())
        } else {
            activity::record(
                conn,
                &ctx,
                item.id,
                vec![differs::link_activity(
                    differs::VERB_DELETED,
                    current.id,
                    &current.url,
                )],
            )
        }
    })?;

    activity::dispatch(
        state.tasks.as_ref(),
        state.origin_hints.as_ref(),
        &ctx,
        "link",
        item.id,
        &activity_ids,
        opts.origin.as_deref(),
        opts.notification,
    );

    Ok(StatusCode::NO_CONTENT)
}
