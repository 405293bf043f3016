//! Capability interfaces for the small pieces of cross-request state the
//! core is not allowed to keep as globals: the short-lived origin hint used
//! by webhook delivery, and per-user recent-visit tracking.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use diesel::prelude::*;
use tracing::warn;
use uuid::Uuid;

use crate::db::PgPool;
use crate::models::NewRecentVisit;
use crate::schema::recent_visits;

/// Records which request origin last touched a work item so webhook delivery
/// can skip echoing a change back to its source. Hints expire quickly; a
/// missing hint is never an error.
pub trait OriginHints: Send + Sync {
    fn set(&self, work_item_id: Uuid, origin: &str);
    fn take(&self, work_item_id: Uuid) -> Option<String>;
}

/// Tracks per-user recently visited work items. Deleting a work item must
/// remove it from every user's recents.
pub trait VisitTracker: Send + Sync {
    fn record(&self, user_id: Uuid, work_item_id: Uuid);
    fn forget_item(&self, work_item_id: Uuid);
}

const HINT_TTL: Duration = Duration::from_secs(60);

#[derive(Default)]
pub struct InMemoryOriginHints {
    entries: Mutex<HashMap<Uuid, (String, Instant)>>,
}

impl OriginHints for InMemoryOriginHints {
    fn set(&self, work_item_id: Uuid, origin: &str) {
        let mut guard = self.entries.lock().expect("origin hint lock poisoned");
        guard.insert(work_item_id, (origin.to_string(), Instant::now()));
    }

    fn take(&self, work_item_id: Uuid) -> Option<String> {
        let mut guard = self.entries.lock().expect("origin hint lock poisoned");
        let (origin, stored_at) = guard.remove(&work_item_id)?;
        if stored_at.elapsed() > HINT_TTL {
            return None;
        }
        Some(origin)
    }
}

#[derive(Default)]
pub struct InMemoryVisitTracker {
    visits: Mutex<HashMap<Uuid, Vec<Uuid>>>,
}

impl VisitTracker for InMemoryVisitTracker {
    fn record(&self, user_id: Uuid, work_item_id: Uuid) {
        let mut guard = self.visits.lock().expect("visit tracker lock poisoned");
        let recents = guard.entry(user_id).or_default();
        recents.retain(|id| *id != work_item_id);
        recents.insert(0, work_item_id);
        recents.truncate(20);
    }

    fn forget_item(&self, work_item_id: Uuid) {
        let mut guard = self.visits.lock().expect("visit tracker lock poisoned");
        for recents in guard.values_mut() {
            recents.retain(|id| *id != work_item_id);
        }
    }
}

/// Durable visit tracking on `recent_visits`. Failures are logged and
/// swallowed; losing a visit never fails the read that caused it.
pub struct PgVisitTracker {
    pool: PgPool,
}

impl PgVisitTracker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl VisitTracker for PgVisitTracker {
    fn record(&self, user_id: Uuid, work_item_id: Uuid) {
        let result = self.pool.get().map_err(|err| err.to_string()).and_then(|mut conn| {
            diesel::insert_into(recent_visits::table)
                .values(&NewRecentVisit {
                    id: Uuid::new_v4(),
                    user_id,
                    work_item_id,
                    visited_at: Utc::now(),
                })
                .on_conflict((recent_visits::user_id, recent_visits::work_item_id))
                .do_update()
                .set(recent_visits::visited_at.eq(Utc::now()))
                .execute(&mut conn)
                .map_err(|err| err.to_string())
        });
        if let Err(err) = result {
            warn!(%user_id, %work_item_id, error = %err, "failed to record visit");
        }
    }

    fn forget_item(&self, work_item_id: Uuid) {
        let result = self.pool.get().map_err(|err| err.to_string()).and_then(|mut conn| {
            diesel::delete(recent_visits::table.filter(recent_visits::work_item_id.eq(work_item_id)))
                .execute(&mut conn)
                .map_err(|err| err.to_string())
        });
        if let Err(err) = result {
            warn!(%work_item_id, error = %err, "failed to clear visits for deleted item");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_hint_is_consumed_once() {
        let hints = InMemoryOriginHints::default();
        let id = Uuid::new_v4();
        hints.set(id, "session-abc");
        assert_eq!(hints.take(id).as_deref(), Some("session-abc"));
        assert_eq!(hints.take(id), None);
    }

    #[test]
    fn deleting_item_clears_all_recents() {
        let visits = InMemoryVisitTracker::default();
        let item = Uuid::new_v4();
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
        visits.record(u1, item);
        visits.record(u2, item);
        visits.forget_item(item);
        let guard = visits.visits.lock().unwrap();
        assert!(guard.values().all(|v| v.is_empty()));
    }
}
