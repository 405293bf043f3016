use std::collections::HashMap;
use std::env;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use serde_json::json;
use uuid::Uuid;

use workcore::config::AppConfig;
use workcore::db;
use workcore::jobs::{enqueue_job, TASK_NOTIFY};
use workcore::schema::work_item_activities;

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("requeue-notifications") => requeue_notifications()?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\nUsage: maintenance requeue-notifications");
            std::process::exit(1);
        }
        None => {
            eprintln!("Usage: maintenance requeue-notifications");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Sweeps for activity records that never got their notification fan-out
/// (enqueue failures are tolerated on the mutation path) and re-enqueues
/// them. The idempotency key absorbs duplicates of batches still in flight.
fn requeue_notifications() -> Result<()> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        storage_dsn = %config.redacted_storage_dsn(),
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.storage_dsn, 1)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let horizon = Utc::now() - Duration::minutes(5);
    let stale: Vec<(Uuid, Uuid, Uuid, Uuid, i64)> = work_item_activities::table
        .filter(work_item_activities::notified_at.is_null())
        .filter(work_item_activities::created_at.lt(horizon))
        .select((
            work_item_activities::id,
            work_item_activities::work_item_id,
            work_item_activities::workspace_id,
            work_item_activities::actor_id,
            work_item_activities::epoch,
        ))
        .load(&mut conn)
        .context("failed to load unnotified activities")?;

    if stale.is_empty() {
        println!("No unnotified activities found.");
        return Ok(());
    }

    // One batch per mutation: the same grouping the original enqueue used.
    let mut batches: HashMap<(Uuid, Uuid, Uuid, i64), Vec<Uuid>> = HashMap::new();
    for (id, work_item_id, workspace_id, actor_id, epoch) in stale {
        batches
            .entry((work_item_id, workspace_id, actor_id, epoch))
            .or_default()
            .push(id);
    }

    let total = batches.len();
    for ((work_item_id, workspace_id, actor_id, epoch), activity_ids) in batches {
        let payload = json!({
            "kind": "reconcile",
            "workspace_id": workspace_id,
            "work_item_id": work_item_id,
            "actor_id": actor_id,
            "epoch": epoch,
            "activity_ids": activity_ids,
        });
        let key = format!("{TASK_NOTIFY}:reconcile:{work_item_id}:{epoch}");
        enqueue_job(&mut conn, TASK_NOTIFY, payload, None, Some(&key))
            .context("failed to enqueue notification batch")?;
    }

    println!("Re-enqueued {total} notification batches.");
    Ok(())
}
