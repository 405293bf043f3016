use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use crate::access::{load_project_access, ProjectAccess, Requester};
use crate::activity::{self, differs, ActivityContext};
use crate::domain::RelationType;
use crate::error::{AppError, AppResult};
use crate::models::{NewWorkItemRelation, WorkItem};
use crate::mutation;
use crate::schema::{work_item_relations, work_items};
use crate::state::AppState;

use super::work_items::MutationQuery;
use super::AuthenticatedUser;

#[derive(Deserialize)]
pub struct CreateRelation {
    pub relation_type: String,
    pub related_id: Uuid,
}

#[derive(Deserialize)]
pub struct RemoveRelationQuery {
    pub relation_type: String,
    #[serde(flatten)]
    pub mutation: MutationQuery,
}

fn load_live_item(
    conn: &mut PgConnection,
    gate: &ProjectAccess,
    item_id: Uuid,
) -> AppResult<WorkItem> {
    let item = work_items::table
        .find(item_id)
        .filter(work_items::project_id.eq(gate.project.id))
        .filter(work_items::deleted_at.is_null())
        .first(conn)?;
    Ok(item)
}

/// Relations are stored pairwise: the row the caller asked for plus its
/// mirror with the inverse type, so both timelines read naturally and either
/// side can be queried without a union.
pub async fn create(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id)): Path<(Uuid, Uuid)>,
    Query(opts): Query<MutationQuery>,
    Json(payload): Json<CreateRelation>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    gate.require_mutation()?;

    let relation = RelationType::parse(&payload.relation_type)?;
    if payload.related_id == item_id {
        return Err(AppError::invalid_payload(
            "an item cannot be related to itself",
        ));
    }

    let item = load_live_item(&mut conn, &gate, item_id)?;
    let related = load_live_item(&mut conn, &gate, payload.related_id)?;

    let ctx = ActivityContext {
        workspace_id: gate.project.workspace_id,
        project_id: gate.project.id,
        actor_id: user.user_id,
        epoch: mutation::next_epoch(),
    };

    let opts = opts.options();
    let recorded = conn.transaction::<_, AppError, _>(|conn| {
        let existing: i64 = work_item_relations::table
            .filter(work_item_relations::work_item_id.eq(item.id))
            .filter(work_item_relations::related_work_item_id.eq(related.id))
            .filter(work_item_relations::relation_type.eq(relation.as_str()))
            .filter(work_item_relations::deleted_at.is_null())
            .count()
            .get_result(conn)?;
        if existing > 0 {
            return Err(AppError::conflict("relation already exists"));
        }

        let rows = vec![
            NewWorkItemRelation {
                id: Uuid::new_v4(),
                work_item_id: item.id,
                related_work_item_id: related.id,
                relation_type: relation.as_str().to_string(),
            },
            NewWorkItemRelation {
                id: Uuid::new_v4(),
                work_item_id: related.id,
                related_work_item_id: item.id,
                relation_type: relation.inverse().as_str().to_string(),
            },
        ];
        diesel::insert_into(work_item_relations::table)
            .values(&rows)
            .on_conflict_do_nothing()
            .execute(conn)?;

        let mut recorded = Vec::new();
        for (target, draft) in differs::relation_pair(
            relation,
            (item.id, &item.name),
            (related.id, &related.name),
            false,
        ) {
            if !opts.skip_activity {
                let ids = activity::record(conn, &ctx, target, vec![draft])?;
                recorded.push((target, ids));
            }
        }
        Ok(recorded)
    })?;

    for (target, activity_ids) in &recorded {
        activity::dispatch(
            state.tasks.as_ref(),
            state.origin_hints.as_ref(),
            &ctx,
            "relation",
            *target,
            activity_ids,
            opts.origin.as_deref(),
            opts.notification,
        );
    }

    Ok(StatusCode::CREATED)
}

/// Deleting a relation retires both rows of the pair and emits the
/// symmetric deletion records.
pub async fn remove(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, item_id, related_id)): Path<(Uuid, Uuid, Uuid)>,
    Query(params): Query<RemoveRelationQuery>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    gate.require_mutation()?;

    let relation = RelationType::parse(&params.relation_type)?;
    let item = load_live_item(&mut conn, &gate, item_id)?;
    let related = load_live_item(&mut conn, &gate, related_id)?;

    let ctx = ActivityContext {
        workspace_id: gate.project.workspace_id,
        project_id: gate.project.id,
        actor_id: user.user_id,
        epoch: mutation::next_epoch(),
    };

    let opts = params.mutation.options();
    let recorded = conn.transaction::<_, AppError, _>(|conn| {
        let now = Utc::now();
        let forward = diesel::update(
            work_item_relations::table
                .filter(work_item_relations::work_item_id.eq(item.id))
                .filter(work_item_relations::related_work_item_id.eq(related.id))
                .filter(work_item_relations::relation_type.eq(relation.as_str()))
                .filter(work_item_relations::deleted_at.is_null()),
        )
        .set(work_item_relations::deleted_at.eq(Some(now)))
        .execute(conn)?;
        if forward == 0 {
            return Err(AppError::not_found());
        }

        diesel::update(
            work_item_relations::table
                .filter(work_item_relations::work_item_id.eq(related.id))
                .filter(work_item_relations::related_work_item_id.eq(item.id))
                .filter(work_item_relations::relation_type.eq(relation.inverse().as_str()))
                .filter(work_item_relations::deleted_at.is_null()),
        )
        .set(work_item_relations::deleted_at.eq(Some(now)))
        .execute(conn)?;

        let mut recorded = Vec::new();
        for (target, draft) in differs::relation_pair(
            relation,
            (item.id, &item.name),
            (related.id, &related.name),
            true,
        ) {
            if !opts.skip_activity {
                let ids = activity::record(conn, &ctx, target, vec![draft])?;
                recorded.push((target, ids));
            }
        }
        Ok(recorded)
    })?;

    for (target, activity_ids) in &recorded {
        activity::dispatch(
            state.tasks.as_ref(),
            state.origin_hints.as_ref(),
            &ctx,
            "relation",
            *target,
            activity_ids,
            opts.origin.as_deref(),
            opts.notification,
        );
    }

    Ok(StatusCode::NO_CONTENT)
}
