use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::access::{load_project_access, load_visible_item, ProjectAccess, Requester};
use crate::activity::{self, differs, ActivityContext};
use crate::domain::ENTITY_ISSUE_ATTACHMENT;
use crate::error::{AppError, AppResult};
use crate::models::{FileAsset, NewFileAsset};
use crate::mutation;
use crate::schema::file_assets;
use crate::state::AppState;

use super::work_items::MutationQuery;
use super::AuthenticatedUser;

/// Registers an already-uploaded asset against a work item. Storage itself
/// (presigning, upload) is the enclosing application's concern; the core
/// only tracks the reference and its activity.
#[derive(Deserialize)]
pub struct CreateAttachment {
    pub asset_key: String,
    pub size: i64,
    #[serde(default)]
    pub attributes: Option<Value>,
}

#[derive(Serialize)]
pub struct AttachmentResponse {
    pub id: Uuid,
    pub asset_key: String,
    pub size: i64,
    pub attributes: Value,
    pub created_at: DateTime<Utc>,
}

impl From<FileAsset> for AttachmentResponse {
    fn from(asset: FileAsset) -> Self {
        AttachmentResponse {
            id: asset.id,
            asset_key: asset.asset_key,
            size: asset.size,
            attributes: asset.attributes,
            created_at: asset.created_at,
        }
    }
}

fn assert_live_item(conn: &mut PgConnection, gate: &ProjectAccess, item_id: Uuid) -> AppResult<()> {
    load_visible_item(conn, gate, item_id)?;
    Ok(())
}

pub async fn list(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Vec<AttachmentResponse>>> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    gate.require_read(None)?;
    assert_live_item(&mut conn, &gate, item_id)?;

    let assets: Vec<FileAsset> = file_assets::table
        .filter(file_assets::entity_type.eq(ENTITY_ISSUE_ATTACHMENT))
        .filter(file_assets::entity_id.eq(Some(item_id)))
        .filter(file_assets::is_deleted.eq(false))
        .filter(file_assets::is_uploaded.eq(true))
        .order(file_assets::created_at.asc())
        .load(&mut conn)?;
    Ok(Json(assets.into_iter().map(AttachmentResponse::from).collect()))
}

pub async fn create(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id)): Path<(Uuid, Uuid)>,
    Query(opts): Query<MutationQuery>,
    Json(payload): Json<CreateAttachment>,
) -> AppResult<(StatusCode, Json<AttachmentResponse>)> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    gate.require_mutation()?;
    assert_live_item(&mut conn, &gate, item_id)?;

    if payload.asset_key.trim().is_empty() {
        return Err(AppError::invalid_payload("asset_key is required"));
    }
    if payload.size < 0 {
        return Err(AppError::invalid_payload("size must not be negative"));
    }

    let ctx = ActivityContext {
        workspace_id: gate.project.workspace_id,
        project_id: gate.project.id,
        actor_id: user.user_id,
        epoch: mutation::next_epoch(),
    };

    let opts = opts.options();
    let (asset, activity_ids) = conn.transaction::<_, AppError, _>(|conn| {
        let asset: FileAsset = diesel::insert_into(file_assets::table)
            .values(&NewFileAsset {
                id: Uuid::new_v4(),
                workspace_id: gate.project.workspace_id,
                project_id: Some(gate.project.id),
                entity_type: ENTITY_ISSUE_ATTACHMENT.to_string(),
                entity_id: Some(item_id),
                asset_key: payload.asset_key.trim().to_string(),
                size: payload.size,
                attributes: payload.attributes.clone().unwrap_or(Value::Null),
                is_uploaded: true,
            })
            .get_result(conn)?;

        let activity_ids = if opts.skip_activity {
            Vec::new()
        } else {
            activity::record(
                conn,
                &ctx,
                item_id,
                vec![differs::attachment_activity(differs::VERB_CREATED, asset.id)],
            )?
        };
        Ok((asset, activity_ids))
    })?;

    activity::dispatch(
        state.tasks.as_ref(),
        state.origin_hints.as_ref(),
        &ctx,
        "attachment",
        item_id,
        &activity_ids,
        opts.origin.as_deref(),
        opts.notification,
    );

    Ok((StatusCode::CREATED, Json(AttachmentResponse::from(asset))))
}

pub async fn remove(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id, asset_id)): Path<(Uuid, Uuid, Uuid)>,
    Query(opts): Query<MutationQuery>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    gate.require_mutation()?;
    assert_live_item(&mut conn, &gate, item_id)?;

    let ctx = ActivityContext {
        workspace_id: gate.project.workspace_id,
        project_id: gate.project.id,
        actor_id: user.user_id,
        epoch: mutation::next_epoch(),
    };

    let opts = opts.options();
    let activity_ids = conn.transaction::<_, AppError, _>(|conn| {
        let removed = diesel::update(
            file_assets::table
                .filter(file_assets::id.eq(asset_id))
                .filter(file_assets::entity_type.eq(ENTITY_ISSUE_ATTACHMENT))
                .filter(file_assets::entity_id.eq(Some(item_id)))
                .filter(file_assets::is_deleted.eq(false)),
        )
        .set((
            file_assets::is_deleted.eq(true),
            file_assets::deleted_at.eq(Some(Utc::now())),
        ))
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
                vec![differs::attachment_activity(differs::VERB_DELETED, asset_id)],
            )
        }
    })?;

    activity::dispatch(
        state.tasks.as_ref(),
        state.origin_hints.as_ref(),
        &ctx,
        "attachment",
        item_id,
        &activity_ids,
        opts.origin.as_deref(),
        opts.notification,
    );

    Ok(StatusCode::NO_CONTENT)
}
