use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::{load_project_access, load_visible_item, ProjectAccess, Requester};
use crate::activity::{self, differs, ActivityContext};
use crate::domain::{
    COMMENT_ACCESS_EXTERNAL, COMMENT_ACCESS_INTERNAL, ENTITY_COMMENT, ENTITY_WORK_ITEM,
};
use crate::error::{AppError, AppResult};
use crate::models::{Comment, NewComment, NewReaction};
use crate::mutation;
use crate::schema::{comments, reactions};
use crate::state::AppState;
use crate::utils::text::{is_parsable_html, strip_html};

use super::work_items::MutationQuery;
use super::AuthenticatedUser;

#[derive(Deserialize)]
pub struct CreateComment {
    pub comment_html: String,
    #[serde(default)]
    pub access: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateComment {
    pub comment_html: String,
}

#[derive(Deserialize)]
pub struct AddReaction {
    pub code: String,
}

#[derive(Serialize)]
pub struct CommentResponse {
    pub id: Uuid,
    pub work_item_id: Uuid,
    pub actor_id: Uuid,
    pub comment_html: String,
    pub comment_stripped: String,
    pub access: String,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Comment> for CommentResponse {
    fn from(comment: Comment) -> Self {
        CommentResponse {
            id: comment.id,
            work_item_id: comment.work_item_id,
            actor_id: comment.actor_id,
            comment_html: comment.comment_html,
            comment_stripped: comment.comment_stripped,
            access: comment.access,
            edited_at: comment.edited_at,
            created_at: comment.created_at,
        }
    }
}

fn validate_access(raw: Option<&str>) -> AppResult<String> {
    match raw {
        None => Ok(COMMENT_ACCESS_INTERNAL.to_string()),
        Some(COMMENT_ACCESS_INTERNAL) => Ok(COMMENT_ACCESS_INTERNAL.to_string()),
        Some(COMMENT_ACCESS_EXTERNAL) => Ok(COMMENT_ACCESS_EXTERNAL.to_string()),
        Some(other) => Err(AppError::invalid_payload(format!(
            "unknown comment access '{other}'"
        ))),
    }
}

fn validate_comment_html(html: &str) -> AppResult<()> {
    if strip_html(html).is_empty() {
        return Err(AppError::invalid_payload("comment cannot be empty"));
    }
    if !is_parsable_html(html) {
        return Err(AppError::invalid_payload("comment is not parsable rich text"));
    }
    Ok(())
}

fn assert_live_item(conn: &mut PgConnection, gate: &ProjectAccess, item_id: Uuid) -> AppResult<()> {
    load_visible_item(conn, gate, item_id)?;
    Ok(())
}

fn activity_ctx(gate: &ProjectAccess, actor_id: Uuid) -> ActivityContext {
    ActivityContext {
        workspace_id: gate.project.workspace_id,
        project_id: gate.project.id,
        actor_id,
        epoch: mutation::next_epoch(),
    }
}

pub async fn list(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Vec<CommentResponse>>> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    gate.require_read(None)?;
    assert_live_item(&mut conn, &gate, item_id)?;

    let rows: Vec<Comment> = comments::table
        .filter(comments::work_item_id.eq(item_id))
        .filter(comments::deleted_at.is_null())
        .order(comments::created_at.asc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(CommentResponse::from).collect()))
}

pub async fn create(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id)): Path<(Uuid, Uuid)>,
    Query(opts): Query<MutationQuery>,
    Json(payload): Json<CreateComment>,
) -> AppResult<(StatusCode, Json<CommentResponse>)> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    // Commenting is a self-mutation: read access suffices.
    gate.require_self_mutation(user.user_id)?;
    assert_live_item(&mut conn, &gate, item_id)?;

    validate_comment_html(&payload.comment_html)?;
    let access = validate_access(payload.access.as_deref())?;

    let ctx = activity_ctx(&gate, user.user_id);
    let opts = opts.options();

    let (comment, activity_ids) = conn.transaction::<_, AppError, _>(|conn| {
        let comment: Comment = diesel::insert_into(comments::table)
            .values(&NewComment {
                id: Uuid::new_v4(),
                work_item_id: item_id,
                actor_id: user.user_id,
                comment_stripped: strip_html(&payload.comment_html),
                comment_html: payload.comment_html.clone(),
                access,
            })
            .get_result(conn)?;

        mutation::ensure_subscribers(conn, item_id, &[user.user_id])?;

        let activity_ids = if opts.skip_activity {
            Vec::new()
        } else {
            activity::record(
                conn,
                &ctx,
                item_id,
                vec![differs::comment_activity(
                    differs::VERB_CREATED,
                    comment.id,
                    &comment.comment_stripped,
                )],
            )?
        };
        Ok((comment, activity_ids))
    })?;

    activity::dispatch(
        state.tasks.as_ref(),
        state.origin_hints.as_ref(),
        &ctx,
        "comment",
        item_id,
        &activity_ids,
        opts.origin.as_deref(),
        opts.notification,
    );

    Ok((StatusCode::CREATED, Json(CommentResponse::from(comment))))
}

pub async fn update(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id, comment_id)): Path<(Uuid, Uuid, Uuid)>,
    Query(opts): Query<MutationQuery>,
    Json(payload): Json<UpdateComment>,
) -> AppResult<Json<CommentResponse>> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    assert_live_item(&mut conn, &gate, item_id)?;
    validate_comment_html(&payload.comment_html)?;

    let ctx = activity_ctx(&gate, user.user_id);
    let opts = opts.options();

    let (comment, activity_ids) = conn.transaction::<_, AppError, _>(|conn| {
        let current: Comment = comments::table
            .find(comment_id)
            .filter(comments::work_item_id.eq(item_id))
            .filter(comments::deleted_at.is_null())
            .first(conn)?;

        gate.require_self_mutation(current.actor_id)?;

        let comment: Comment = diesel::update(comments::table.find(current.id))
            .set((
                comments::comment_html.eq(&payload.comment_html),
                comments::comment_stripped.eq(strip_html(&payload.comment_html)),
                comments::edited_at.eq(Some(Utc::now())),
                comments::updated_at.eq(Utc::now()),
            ))
            .get_result(conn)?;

        let activity_ids = if opts.skip_activity {
            Vec::new()
        } else {
            activity::record(
                conn,
                &ctx,
                item_id,
                vec![differs::comment_activity(
                    differs::VERB_UPDATED,
                    comment.id,
                    &comment.comment_stripped,
                )],
            )?
        };
        Ok((comment, activity_ids))
    })?;

    activity::dispatch(
        state.tasks.as_ref(),
        state.origin_hints.as_ref(),
        &ctx,
        "comment",
        item_id,
        &activity_ids,
        opts.origin.as_deref(),
        opts.notification,
    );

    Ok(Json(CommentResponse::from(comment)))
}

pub async fn remove(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id, comment_id)): Path<(Uuid, Uuid, Uuid)>,
    Query(opts): Query<MutationQuery>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    assert_live_item(&mut conn, &gate, item_id)?;

    let ctx = activity_ctx(&gate, user.user_id);
    let opts = opts.options();

    let activity_ids = conn.transaction::<_, AppError, _>(|conn| {
        let current: Comment = comments::table
            .find(comment_id)
            .filter(comments::work_item_id.eq(item_id))
            .filter(comments::deleted_at.is_null())
            .first(conn)?;

        gate.require_self_mutation(current.actor_id)?;

        diesel::update(comments::table.find(current.id))
            .set(comments::deleted_at.eq(Some(Utc::now())))
            .execute(conn)?;

        if opts.skip_activity {
            Ok(Vec::new())
        } else {
            activity::record(
                conn,
                &ctx,
                item_id,
                vec![differs::comment_activity(
                    differs::VERB_DELETED,
                    current.id,
                    &current.comment_stripped,
                )],
            )
        }
    })?;

    activity::dispatch(
        state.tasks.as_ref(),
        state.origin_hints.as_ref(),
        &ctx,
        "comment",
        item_id,
        &activity_ids,
        opts.origin.as_deref(),
        opts.notification,
    );

    Ok(StatusCode::NO_CONTENT)
}

fn validate_reaction_code(code: &str) -> AppResult<String> {
    let trimmed = code.trim();
    if trimmed.is_empty() || trimmed.len() > 16 {
        return Err(AppError::invalid_payload("invalid reaction code"));
    }
    Ok(trimmed.to_string())
}

fn add_reaction(
    state: &AppState,
    gate: &ProjectAccess,
    actor_id: Uuid,
    item_id: Uuid,
    entity_type: &str,
    entity_id: Uuid,
    code: &str,
    opts: &crate::mutation::MutationOptions,
) -> AppResult<()> {
    let code = validate_reaction_code(code)?;
    let ctx = activity_ctx(gate, actor_id);

    let mut conn = state.db()?;
    let activity_ids = conn.transaction::<_, AppError, _>(|conn| {
        // Re-adding a previously removed reaction revives the row.
        let revived = diesel::update(
            reactions::table
                .filter(reactions::entity_type.eq(entity_type))
                .filter(reactions::entity_id.eq(entity_id))
                .filter(reactions::actor_id.eq(actor_id))
                .filter(reactions::code.eq(&code))
                .filter(reactions::deleted_at.is_not_null()),
        )
        .set(reactions::deleted_at.eq(None::<DateTime<Utc>>))
        .execute(conn)?;

        if revived == 0 {
            diesel::insert_into(reactions::table)
                .values(&NewReaction {
                    id: Uuid::new_v4(),
                    entity_type: entity_type.to_string(),
                    entity_id,
                    actor_id,
                    code: code.clone(),
                })
                .on_conflict_do_nothing()
                .execute(conn)?;
        }

        if opts.skip_activity {
            Ok(Vec::new())
        } else {
            activity::record(
                conn,
                &ctx,
                item_id,
                vec![differs::reaction_activity(differs::VERB_CREATED, &code)],
            )
        }
    })?;

    activity::dispatch(
        state.tasks.as_ref(),
        state.origin_hints.as_ref(),
        &ctx,
        "reaction",
        item_id,
        &activity_ids,
        opts.origin.as_deref(),
        opts.notification,
    );
    Ok(())
}

fn remove_reaction(
    state: &AppState,
    gate: &ProjectAccess,
    actor_id: Uuid,
    item_id: Uuid,
    entity_type: &str,
    entity_id: Uuid,
    code: &str,
    opts: &crate::mutation::MutationOptions,
) -> AppResult<()> {
    let ctx = activity_ctx(gate, actor_id);

    let mut conn = state.db()?;
    let activity_ids = conn.transaction::<_, AppError, _>(|conn| {
        let removed = diesel::update(
            reactions::table
                .filter(reactions::entity_type.eq(entity_type))
                .filter(reactions::entity_id.eq(entity_id))
                .filter(reactions::actor_id.eq(actor_id))
                .filter(reactions::code.eq(code))
                .filter(reactions::deleted_at.is_null()),
        )
        .set(reactions::deleted_at.eq(Some(Utc::now())))
        .execute(conn)?;
        if removed == 0 {
            return Err(AppError::not_found());
        }

        if opts.skip_activity {
            Ok(Vec::new())
        } else {
            activity::record(
                conn,
                &ctx,
                item_id,
                vec![differs::reaction_activity(differs::VERB_DELETED, code)],
            )
        }
    })?;

    activity::dispatch(
        state.tasks.as_ref(),
        state.origin_hints.as_ref(),
        &ctx,
        "reaction",
        item_id,
        &activity_ids,
        opts.origin.as_deref(),
        opts.notification,
    );
    Ok(())
}

pub async fn add_item_reaction(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id)): Path<(Uuid, Uuid)>,
    Query(opts): Query<MutationQuery>,
    Json(payload): Json<AddReaction>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    gate.require_self_mutation(user.user_id)?;
    assert_live_item(&mut conn, &gate, item_id)?;
    drop(conn);

    add_reaction(
        &state,
        &gate,
        user.user_id,
        item_id,
        ENTITY_WORK_ITEM,
        item_id,
        &payload.code,
        &opts.options(),
    )?;
    Ok(StatusCode::CREATED)
}

pub async fn remove_item_reaction(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id, code)): Path<(Uuid, Uuid, String)>,
    Query(opts): Query<MutationQuery>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    gate.require_self_mutation(user.user_id)?;
    assert_live_item(&mut conn, &gate, item_id)?;
    drop(conn);

    remove_reaction(
        &state,
        &gate,
        user.user_id,
        item_id,
        ENTITY_WORK_ITEM,
        item_id,
        &code,
        &opts.options(),
    )?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_comment_reaction(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id, comment_id)): Path<(Uuid, Uuid, Uuid)>,
    Query(opts): Query<MutationQuery>,
    Json(payload): Json<AddReaction>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    gate.require_self_mutation(user.user_id)?;
    assert_live_item(&mut conn, &gate, item_id)?;

    let found: i64 = comments::table
        .filter(comments::id.eq(comment_id))
        .filter(comments::work_item_id.eq(item_id))
        .filter(comments::deleted_at.is_null())
        .count()
        .get_result(&mut conn)?;
    if found == 0 {
        return Err(AppError::not_found());
    }
    drop(conn);

    add_reaction(
        &state,
        &gate,
        user.user_id,
        item_id,
        ENTITY_COMMENT,
        comment_id,
        &payload.code,
        &opts.options(),
    )?;
    Ok(StatusCode::CREATED)
}

pub async fn remove_comment_reaction(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id, comment_id, code)): Path<(Uuid, Uuid, Uuid, String)>,
    Query(opts): Query<MutationQuery>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    gate.require_self_mutation(user.user_id)?;
    assert_live_item(&mut conn, &gate, item_id)?;
    drop(conn);

    remove_reaction(
        &state,
        &gate,
        user.user_id,
        item_id,
        ENTITY_COMMENT,
        comment_id,
        &code,
        &opts.options(),
    )?;
    Ok(StatusCode::NO_CONTENT)
}
