use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::jobs::{retry_delay, TASK_NOTIFY};
use crate::models::{Job, NewNotification, WorkItemActivity};
use crate::schema::{notifications, work_item_activities, work_item_subscribers};
use crate::state::AppState;

use super::{JobExecution, JobHandler};

#[derive(Debug, Deserialize)]
struct NotifyPayload {
    work_item_id: Uuid,
    actor_id: Uuid,
    activity_ids: Vec<Uuid>,
}

/// Fans a batch of activity records out to the item's subscribers. Only
/// activities still missing `notified_at` produce rows, so replays of the
/// same batch are harmless.
pub struct NotifyJob;

impl NotifyJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NotifyJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for NotifyJob {
    fn job_type(&self) -> &'static str {
        TASK_NOTIFY
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let payload: NotifyPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Dead {
                    error: format!("malformed notify payload: {err}"),
                }
            }
        };

        let mut conn = match state.db() {
            Ok(conn) => conn,
            Err(err) => {
                return JobExecution::Retry {
                    delay: retry_delay(job.attempts),
                    error: format!("database pool error: {err}"),
                }
            }
        };

        let outcome = conn.transaction::<usize, AppError, _>(|conn| {
            let pending: Vec<WorkItemActivity> = work_item_activities::table
                .filter(work_item_activities::id.eq_any(&payload.activity_ids))
                .filter(work_item_activities::notified_at.is_null())
                .load(conn)?;
            if pending.is_empty() {
                return Ok(0);
            }

            let receivers: Vec<Uuid> = work_item_subscribers::table
                .filter(work_item_subscribers::work_item_id.eq(payload.work_item_id))
                .filter(work_item_subscribers::deleted_at.is_null())
                .select(work_item_subscribers::subscriber_id)
                .load(conn)?;

            let rows: Vec<NewNotification> = pending
                .iter()
                .flat_map(|activity| {
                    receivers
                        .iter()
                        .filter(|receiver| **receiver != payload.actor_id)
                        .map(move |receiver| NewNotification {
                            id: Uuid::new_v4(),
                            workspace_id: activity.workspace_id,
                            project_id: activity.project_id,
                            work_item_id: activity.work_item_id,
                            receiver_id: *receiver,
                            triggered_by_id: payload.actor_id,
                            activity_id: activity.id,
                        })
                })
                .collect();

            if !rows.is_empty() {
                diesel::insert_into(notifications::table)
                    .values(&rows)
                    .execute(conn)?;
            }

            let pending_ids: Vec<Uuid> = pending.iter().map(|activity| activity.id).collect();
            diesel::update(
                work_item_activities::table.filter(work_item_activities::id.eq_any(&pending_ids)),
            )
            .set(work_item_activities::notified_at.eq(Some(Utc::now())))
            .execute(conn)?;

            Ok(rows.len())
        });

        match outcome {
            Ok(delivered) => {
                info!(
                    work_item_id = %payload.work_item_id,
                    delivered,
                    "notification fan-out complete"
                );
                JobExecution::Success
            }
            Err(err) => {
                warn!(work_item_id = %payload.work_item_id, error = %err, "notification fan-out failed");
                JobExecution::Retry {
                    delay: retry_delay(job.attempts),
                    error: err.to_string(),
                }
            }
        }
    }
}
