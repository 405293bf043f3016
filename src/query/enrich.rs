//! Row enricher. For a batch of base rows it computes the derived fields
//! clients expect on every listing without expanding the row set: counts,
//! edge-id arrays, and the state/cycle lookups the synthetic orderings and
//! groupings read. Everything is loaded with one batched query per concern
//! on the caller's connection, so all derivations share the read snapshot
//! of the base query.

use std::collections::HashMap;

use diesel::dsl::count_star;
use diesel::prelude::*;
use tracing::warn;
use uuid::Uuid;

use crate::domain::ENTITY_ISSUE_ATTACHMENT;
use crate::error::AppResult;
use crate::models::WorkItem;
use crate::schema::{
    cycle_work_items, file_assets, labels, module_work_items, states, users, work_item_assignees,
    work_item_labels, work_item_links, work_items,
};

#[derive(Debug, Clone)]
pub struct EnrichedRow {
    pub item: WorkItem,
    pub state_name: Option<String>,
    pub state_group: Option<String>,
    pub sub_issues_count: i64,
    pub link_count: i64,
    pub attachment_count: i64,
    pub cycle_id: Option<Uuid>,
    pub module_ids: Vec<Uuid>,
    pub label_ids: Vec<Uuid>,
    pub assignee_ids: Vec<Uuid>,
    pub label_names: Vec<String>,
    pub assignee_first_names: Vec<String>,
}

pub fn enrich(conn: &mut PgConnection, items: Vec<WorkItem>) -> AppResult<Vec<EnrichedRow>> {
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = items.iter().map(|item| item.id).collect();
    let state_ids: Vec<Uuid> = items.iter().filter_map(|item| item.state_id).collect();

    let state_map = load_states(conn, &state_ids)?;
    let sub_issue_counts = load_sub_issue_counts(conn, &ids)?;
    let link_counts = load_link_counts(conn, &ids)?;
    let attachment_counts = load_attachment_counts(conn, &ids)?;
    let cycle_map = load_cycle_ids(conn, &ids)?;
    let module_map = load_module_ids(conn, &ids)?;
    let label_map = load_labels(conn, &ids)?;
    let assignee_map = load_assignees(conn, &ids)?;

    let rows = items
        .into_iter()
        .map(|item| {
            let (state_name, state_group) = item
                .state_id
                .and_then(|sid| state_map.get(&sid).cloned())
                .map(|(name, group)| (Some(name), Some(group)))
                .unwrap_or((None, None));
            let (label_ids, label_names) = label_map.get(&item.id).cloned().unwrap_or_default();
            let (assignee_ids, assignee_first_names) =
                assignee_map.get(&item.id).cloned().unwrap_or_default();

            EnrichedRow {
                sub_issues_count: *sub_issue_counts.get(&item.id).unwrap_or(&0),
                link_count: *link_counts.get(&item.id).unwrap_or(&0),
                attachment_count: *attachment_counts.get(&item.id).unwrap_or(&0),
                cycle_id: cycle_map.get(&item.id).copied(),
                module_ids: module_map.get(&item.id).cloned().unwrap_or_default(),
                label_ids,
                label_names,
                assignee_ids,
                assignee_first_names,
                state_name,
                state_group,
                item,
            }
        })
        .collect();

    Ok(rows)
}

fn load_states(
    conn: &mut PgConnection,
    state_ids: &[Uuid],
) -> AppResult<HashMap<Uuid, (String, String)>> {
    if state_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(Uuid, String, String)> = states::table
        .filter(states::id.eq_any(state_ids))
        .select((states::id, states::name, states::group))
        .load(conn)?;
    Ok(rows
        .into_iter()
        .map(|(id, name, group)| (id, (name, group)))
        .collect())
}

fn load_sub_issue_counts(
    conn: &mut PgConnection,
    ids: &[Uuid],
) -> AppResult<HashMap<Uuid, i64>> {
    let rows: Vec<(Option<Uuid>, i64)> = work_items::table
        .filter(work_items::parent_id.eq_any(ids.iter().map(|id| Some(*id))))
        .filter(work_items::deleted_at.is_null())
        .group_by(work_items::parent_id)
        .select((work_items::parent_id, count_star()))
        .load(conn)?;
    Ok(rows
        .into_iter()
        .filter_map(|(parent, count)| parent.map(|p| (p, count)))
        .collect())
}

fn load_link_counts(conn: &mut PgConnection, ids: &[Uuid]) -> AppResult<HashMap<Uuid, i64>> {
    let rows: Vec<(Uuid, i64)> = work_item_links::table
        .filter(work_item_links::work_item_id.eq_any(ids))
        .filter(work_item_links::deleted_at.is_null())
        .group_by(work_item_links::work_item_id)
        .select((work_item_links::work_item_id, count_star()))
        .load(conn)?;
    Ok(rows.into_iter().collect())
}

fn load_attachment_counts(
    conn: &mut PgConnection,
    ids: &[Uuid],
) -> AppResult<HashMap<Uuid, i64>> {
    let rows: Vec<(Option<Uuid>, i64)> = file_assets::table
        .filter(file_assets::entity_type.eq(ENTITY_ISSUE_ATTACHMENT))
        .filter(file_assets::entity_id.eq_any(ids.iter().map(|id| Some(*id))))
        .filter(file_assets::is_deleted.eq(false))
        .filter(file_assets::is_uploaded.eq(true))
        .group_by(file_assets::entity_id)
        .select((file_assets::entity_id, count_star()))
        .load(conn)?;
    Ok(rows
        .into_iter()
        .filter_map(|(entity, count)| entity.map(|e| (e, count)))
        .collect())
}

/// At most one live cycle edge should exist per item. More than one is an
/// invariant violation: take the most recent and log the rest.
fn load_cycle_ids(conn: &mut PgConnection, ids: &[Uuid]) -> AppResult<HashMap<Uuid, Uuid>> {
    let rows: Vec<(Uuid, Uuid)> = cycle_work_items::table
        .filter(cycle_work_items::work_item_id.eq_any(ids))
        .filter(cycle_work_items::deleted_at.is_null())
        .order(cycle_work_items::created_at.asc())
        .select((cycle_work_items::work_item_id, cycle_work_items::cycle_id))
        .load(conn)?;

    let mut map: HashMap<Uuid, Uuid> = HashMap::new();
    for (work_item_id, cycle_id) in rows {
        if let Some(previous) = map.insert(work_item_id, cycle_id) {
            warn!(
                work_item_id = %work_item_id,
                superseded_cycle_id = %previous,
                cycle_id = %cycle_id,
                "work item has more than one live cycle membership"
            );
        }
    }
    Ok(map)
}

fn load_module_ids(conn: &mut PgConnection, ids: &[Uuid]) -> AppResult<HashMap<Uuid, Vec<Uuid>>> {
    let rows: Vec<(Uuid, Uuid)> = module_work_items::table
        .filter(module_work_items::work_item_id.eq_any(ids))
        .filter(module_work_items::deleted_at.is_null())
        .select((module_work_items::work_item_id, module_work_items::module_id))
        .load(conn)?;

    let mut map: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (work_item_id, module_id) in rows {
        let entry = map.entry(work_item_id).or_default();
        if !entry.contains(&module_id) {
            entry.push(module_id);
        }
    }
    Ok(map)
}

type IdsAndNames = (Vec<Uuid>, Vec<String>);

fn load_labels(
    conn: &mut PgConnection,
    ids: &[Uuid],
) -> AppResult<HashMap<Uuid, IdsAndNames>> {
    let rows: Vec<(Uuid, Uuid, String)> = work_item_labels::table
        .inner_join(labels::table)
        .filter(work_item_labels::work_item_id.eq_any(ids))
        .filter(work_item_labels::deleted_at.is_null())
        .select((work_item_labels::work_item_id, labels::id, labels::name))
        .load(conn)?;

    let mut map: HashMap<Uuid, IdsAndNames> = HashMap::new();
    for (work_item_id, label_id, name) in rows {
        let entry = map.entry(work_item_id).or_default();
        if !entry.0.contains(&label_id) {
            entry.0.push(label_id);
            entry.1.push(name);
        }
    }
    Ok(map)
}

fn load_assignees(
    conn: &mut PgConnection,
    ids: &[Uuid],
) -> AppResult<HashMap<Uuid, IdsAndNames>> {
    let rows: Vec<(Uuid, Uuid, String)> = work_item_assignees::table
        .inner_join(users::table.on(users::id.eq(work_item_assignees::assignee_id)))
        .filter(work_item_assignees::work_item_id.eq_any(ids))
        .filter(work_item_assignees::deleted_at.is_null())
        .select((
            work_item_assignees::work_item_id,
            users::id,
            users::first_name,
        ))
        .load(conn)?;

    let mut map: HashMap<Uuid, IdsAndNames> = HashMap::new();
    for (work_item_id, user_id, first_name) in rows {
        let entry = map.entry(work_item_id).or_default();
        if !entry.0.contains(&user_id) {
            entry.0.push(user_id);
            entry.1.push(first_name);
        }
    }
    Ok(map)
}
