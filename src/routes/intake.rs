use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::{load_project_access, Requester};
use crate::error::AppResult;
use crate::intake::{self, IntakeTransition};
use crate::models::IntakeItem;
use crate::mutation::CreateWorkItem;
use crate::state::AppState;

use super::work_items::MutationQuery;
use super::AuthenticatedUser;

#[derive(Deserialize)]
pub struct SubmitQuery {
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "IN_APP".to_string()
}

#[derive(Serialize)]
pub struct IntakeResponse {
    pub id: Uuid,
    pub work_item_id: Uuid,
    pub status: i16,
    pub snoozed_till: Option<DateTime<Utc>>,
    pub duplicate_to: Option<Uuid>,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<IntakeItem> for IntakeResponse {
    fn from(row: IntakeItem) -> Self {
        IntakeResponse {
            id: row.id,
            work_item_id: row.work_item_id,
            status: row.status,
            snoozed_till: row.snoozed_till,
            duplicate_to: row.duplicate_to,
            source: row.source,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub async fn submit(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
    Query(params): Query<SubmitQuery>,
    Json(payload): Json<CreateWorkItem>,
) -> AppResult<(StatusCode, Json<IntakeResponse>)> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    drop(conn);

    let (_, intake) = intake::submit(&state, &gate, payload, &params.source)?;
    Ok((StatusCode::CREATED, Json(IntakeResponse::from(intake))))
}

pub async fn transition(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, intake_id)): Path<(Uuid, Uuid)>,
    Query(opts): Query<MutationQuery>,
    Json(change): Json<IntakeTransition>,
) -> AppResult<Json<IntakeResponse>> {
    let mut conn = state.db()?;
    let gate = load_project_access(&mut conn, Requester { user_id: user.user_id }, project_id)?;
    drop(conn);

    let intake = intake::transition(&state, &gate, intake_id, change, opts.options())?;
    Ok(Json(IntakeResponse::from(intake)))
}
