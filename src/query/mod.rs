//! Work-item query pipeline. A list request flows access gate → filter
//! compiler → order compiler → row enricher → grouper → paginator; this
//! module owns the storage-facing composition of those pieces.

pub mod enrich;
pub mod filter;
pub mod group;
pub mod order;
pub mod paginate;

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::{Bool, Nullable};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::access::ProjectAccess;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::models::WorkItem;
use crate::schema::{
    cycle_work_items, intake_items, module_work_items, teamspace_members, teamspace_projects,
    work_item_assignees, work_item_labels, work_item_mentions, work_item_subscribers, work_items,
};
use enrich::EnrichedRow;
use filter::{CompiledFilter, Interval, Scope};
use group::Grouping;
use order::OrderBy;
use paginate::{slice_page, Cursor, DEFAULT_PER_PAGE};

/// Boxed predicate over the work_items table. Everything is widened to
/// `Nullable<Bool>` so predicates over nullable and non-null columns
/// compose under `and`/`or`.
type Cond = Box<dyn BoxableExpression<work_items::table, Pg, SqlType = Nullable<Bool>>>;

/// Intake statuses that keep a work item out of default listings.
const TRIAGE_STATUSES: [i16; 2] = [-2, 0];

#[derive(Debug, Default)]
pub struct ListParams {
    pub filters: Value,
    pub order_by: Option<String>,
    pub group_by: Option<String>,
    pub sub_group_by: Option<String>,
    pub cursor: Option<String>,
    pub per_page: Option<i64>,
    pub include_drafts: bool,
    pub count_filter: CountFilter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CountFilter {
    /// Group totals count every row the query matched.
    All,
    /// Group totals skip drafts even when the listing includes them.
    #[default]
    ExcludeDrafts,
}

impl CountFilter {
    fn admits(self, row: &EnrichedRow) -> bool {
        match self {
            CountFilter::All => true,
            CountFilter::ExcludeDrafts => !row.item.is_draft,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WorkItemView {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub project_id: Uuid,
    pub sequence_id: i64,
    pub name: String,
    pub priority: String,
    pub state_id: Option<Uuid>,
    pub state_name: Option<String>,
    pub state_group: Option<String>,
    pub type_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub target_date: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimate_point_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
    pub created_by: Uuid,
    pub is_draft: bool,
    pub sub_issues_count: i64,
    pub link_count: i64,
    pub attachment_count: i64,
    pub cycle_id: Option<Uuid>,
    pub module_ids: Vec<Uuid>,
    pub label_ids: Vec<Uuid>,
    pub assignee_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&EnrichedRow> for WorkItemView {
    fn from(row: &EnrichedRow) -> Self {
        WorkItemView {
            id: row.item.id,
            workspace_id: row.item.workspace_id,
            project_id: row.item.project_id,
            sequence_id: row.item.sequence_id,
            name: row.item.name.clone(),
            priority: row.item.priority.clone(),
            state_id: row.item.state_id,
            state_name: row.state_name.clone(),
            state_group: row.state_group.clone(),
            type_id: row.item.type_id,
            start_date: row.item.start_date,
            target_date: row.item.target_date,
            completed_at: row.item.completed_at,
            estimate_point_id: row.item.estimate_point_id,
            parent_id: row.item.parent_id,
            created_by: row.item.created_by,
            is_draft: row.item.is_draft,
            sub_issues_count: row.sub_issues_count,
            link_count: row.link_count,
            attachment_count: row.attachment_count,
            cycle_id: row.cycle_id,
            module_ids: row.module_ids.clone(),
            label_ids: row.label_ids.clone(),
            assignee_ids: row.assignee_ids.clone(),
            created_at: row.item.created_at,
            updated_at: row.item.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FlatPage {
    pub total_count: i64,
    pub per_page: i64,
    pub next_cursor: String,
    pub prev_cursor: String,
    pub next_page_results: bool,
    pub prev_page_results: bool,
    pub results: Vec<WorkItemView>,
}

#[derive(Debug, Serialize)]
pub struct GroupSlice {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_key: Option<String>,
    pub total_count: i64,
    pub next_cursor: String,
    pub next_page_results: bool,
    pub results: Vec<WorkItemView>,
}

#[derive(Debug, Serialize)]
pub struct GroupedPage {
    pub total_count: i64,
    pub per_page: i64,
    pub groups: Vec<GroupSlice>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Page {
    Flat(FlatPage),
    Grouped(GroupedPage),
}

pub fn list_work_items(
    conn: &mut PgConnection,
    config: &AppConfig,
    gate: &ProjectAccess,
    params: ListParams,
) -> AppResult<Page> {
    let compiled = CompiledFilter::compile(&params.filters)?;
    let grouping = Grouping::parse(params.group_by.as_deref(), params.sub_group_by.as_deref())?;
    let order = OrderBy::parse(params.order_by.as_deref())?;

    let per_page = params.per_page.unwrap_or(DEFAULT_PER_PAGE);
    let cursor = match params.cursor.as_deref() {
        Some(token) => Cursor::decode(token, &config.cursor_secret)?,
        None => Cursor::first_page(per_page),
    };

    if compiled.is_unsatisfiable() {
        return Ok(empty_page(&cursor, grouping.is_some()));
    }

    let deadline = config.query_deadline_secs;
    let rows = conn.transaction::<_, AppError, _>(|conn| {
        diesel::sql_query(format!("SET LOCAL statement_timeout = '{deadline}s'"))
            .execute(conn)?;
        let items = load_matching_items(conn, gate, &compiled, params.include_drafts)?;
        enrich::enrich(conn, items)
    })?;

    let mut rows = rows;
    order.sort(&mut rows);

    match grouping {
        None => Ok(Page::Flat(flat_page(&rows, &cursor, config))),
        Some(grouping) => Ok(Page::Grouped(grouped_page(
            &rows,
            &grouping,
            &cursor,
            params.count_filter,
            config,
        ))),
    }
}

fn empty_page(cursor: &Cursor, grouped: bool) -> Page {
    if grouped {
        Page::Grouped(GroupedPage {
            total_count: 0,
            per_page: cursor.per_page,
            groups: Vec::new(),
        })
    } else {
        Page::Flat(FlatPage {
            total_count: 0,
            per_page: cursor.per_page,
            next_cursor: String::new(),
            prev_cursor: String::new(),
            next_page_results: false,
            prev_page_results: false,
            results: Vec::new(),
        })
    }
}

fn flat_page(rows: &[EnrichedRow], cursor: &Cursor, config: &AppConfig) -> FlatPage {
    let page = slice_page(rows, cursor);
    FlatPage {
        total_count: page.total_count,
        per_page: cursor.per_page,
        next_cursor: cursor.next().encode(&config.cursor_secret),
        prev_cursor: cursor.prev().encode(&config.cursor_secret),
        next_page_results: page.has_next,
        prev_page_results: page.has_prev,
        results: page.rows.iter().map(WorkItemView::from).collect(),
    }
}

fn grouped_page(
    rows: &[EnrichedRow],
    grouping: &Grouping,
    cursor: &Cursor,
    count_filter: CountFilter,
    config: &AppConfig,
) -> GroupedPage {
    let buckets = group::partition(rows, grouping);

    let mut groups = Vec::with_capacity(buckets.len());
    for bucket in &buckets {
        // A group-scoped cursor pages within that group only.
        if let Some(wanted) = cursor.group_key.as_deref() {
            if bucket.key != wanted || bucket.sub_key.as_deref() != cursor.sub_group_key.as_deref()
            {
                continue;
            }
        }

        let group_rows: Vec<&EnrichedRow> = bucket.rows.iter().map(|&i| &rows[i]).collect();
        let total_count = group_rows
            .iter()
            .filter(|row| count_filter.admits(row))
            .count() as i64;

        let group_cursor = if cursor.group_key.is_some() {
            cursor.clone()
        } else {
            Cursor::for_group(cursor.per_page, bucket.key.clone(), bucket.sub_key.clone())
        };
        let page = slice_page(&group_rows, &group_cursor);

        groups.push(GroupSlice {
            key: bucket.key.clone(),
            sub_key: bucket.sub_key.clone(),
            total_count,
            next_cursor: group_cursor.next().encode(&config.cursor_secret),
            next_page_results: page.has_next,
            results: page.rows.iter().map(|row| WorkItemView::from(*row)).collect(),
        });
    }

    GroupedPage {
        total_count: rows.len() as i64,
        per_page: cursor.per_page,
        groups,
    }
}

/// How a single-item read names its target: by id, or by the per-project
/// sequence number users see.
#[derive(Debug, Clone, Copy)]
pub enum ItemSelector {
    Id(Uuid),
    Sequence(i64),
}

pub fn get_work_item(
    conn: &mut PgConnection,
    gate: &ProjectAccess,
    selector: ItemSelector,
) -> AppResult<WorkItemView> {
    let mut query = work_items::table
        .filter(work_items::project_id.eq(gate.project.id))
        .filter(work_items::deleted_at.is_null())
        .into_boxed();
    query = match selector {
        ItemSelector::Id(id) => query.filter(work_items::id.eq(id)),
        ItemSelector::Sequence(sequence) => query.filter(work_items::sequence_id.eq(sequence)),
    };
    let item: WorkItem = query.first(conn)?;

    // The row exists; a scoped guest is denied, not told it is missing.
    gate.require_item_visible(item.created_by)?;

    let rows = enrich::enrich(conn, vec![item])?;
    let row = rows
        .first()
        .ok_or_else(crate::error::AppError::not_found)?;
    Ok(WorkItemView::from(row))
}

fn load_matching_items(
    conn: &mut PgConnection,
    gate: &ProjectAccess,
    compiled: &CompiledFilter,
    include_drafts: bool,
) -> AppResult<Vec<WorkItem>> {
    let project_id = gate.project.id;

    if compiled.scope == Scope::Teams && !project_in_requester_teams(conn, gate, project_id)? {
        return Ok(Vec::new());
    }

    let mut query = work_items::table
        .filter(work_items::project_id.eq(project_id))
        .filter(work_items::deleted_at.is_null())
        .filter(work_items::archived_at.is_null())
        .into_boxed();

    if !include_drafts {
        query = query.filter(work_items::is_draft.eq(false));
    }

    // Items still in triage are invisible to default queries.
    let triaged: Vec<Uuid> = intake_items::table
        .filter(intake_items::project_id.eq(project_id))
        .filter(intake_items::status.eq_any(TRIAGE_STATUSES))
        .select(intake_items::work_item_id)
        .load(conn)?;
    if !triaged.is_empty() {
        query = query.filter(work_items::id.ne_all(triaged));
    }

    if let Some(creator) = gate.guest_created_by_restriction() {
        query = query.filter(work_items::created_by.eq(creator));
    }

    if let Some(ref ids) = compiled.state_ids {
        query = query.filter(work_items::state_id.eq_any(ids.iter().map(|id| Some(*id))));
    }
    if let Some(ref groups) = compiled.state_groups {
        let state_ids: Vec<Uuid> = crate::schema::states::table
            .filter(crate::schema::states::project_id.eq(project_id))
            .filter(crate::schema::states::group.eq_any(groups))
            .select(crate::schema::states::id)
            .load(conn)?;
        query = query.filter(work_items::state_id.eq_any(state_ids.into_iter().map(Some)));
    }
    if let Some(ref priorities) = compiled.priorities {
        query = query.filter(work_items::priority.eq_any(priorities));
    }
    if let Some(ref creators) = compiled.created_by {
        query = query.filter(work_items::created_by.eq_any(creators));
    }
    if let Some(ref parents) = compiled.parent_ids {
        query = query.filter(work_items::parent_id.eq_any(parents.iter().map(|id| Some(*id))));
    }
    if let Some(ref types) = compiled.type_ids {
        query = query.filter(work_items::type_id.eq_any(types.iter().map(|id| Some(*id))));
    }
    if let Some(cutoff) = compiled.updated_at_gt {
        query = query.filter(work_items::updated_at.gt(cutoff));
    }

    if let Some(ref set) = compiled.start_date {
        query = query.filter(date_cond(set, DateColumn::Start));
    }
    if let Some(ref set) = compiled.target_date {
        query = query.filter(date_cond(set, DateColumn::Target));
    }
    if let Some(ref set) = compiled.created_at {
        query = query.filter(timestamp_cond(set, TimestampColumn::Created));
    }
    if let Some(ref set) = compiled.updated_at {
        query = query.filter(timestamp_cond(set, TimestampColumn::Updated));
    }
    if let Some(ref set) = compiled.completed_at {
        query = query.filter(timestamp_cond(set, TimestampColumn::Completed));
    }

    if let Some(ref needle) = compiled.search {
        query = query.filter(search_cond(needle));
    }

    if compiled.needs_edge_restriction() {
        match edge_restriction(conn, compiled)? {
            Some(ids) if ids.is_empty() => return Ok(Vec::new()),
            Some(ids) => {
                let ids: Vec<Uuid> = ids.into_iter().collect();
                query = query.filter(work_items::id.eq_any(ids));
            }
            None => {}
        }
    }

    let items = query.order(work_items::created_at.desc()).load(conn)?;
    Ok(items)
}

fn project_in_requester_teams(
    conn: &mut PgConnection,
    gate: &ProjectAccess,
    project_id: Uuid,
) -> AppResult<bool> {
    let visible: Vec<Uuid> = teamspace_projects::table
        .inner_join(
            teamspace_members::table
                .on(teamspace_members::teamspace_id.eq(teamspace_projects::teamspace_id)),
        )
        .filter(teamspace_members::user_id.eq(gate.requester.user_id))
        .filter(teamspace_projects::project_id.eq(project_id))
        .select(teamspace_projects::project_id)
        .limit(1)
        .load(conn)?;
    Ok(!visible.is_empty())
}

enum DateColumn {
    Start,
    Target,
}

fn date_cond(set: &[Interval<NaiveDate>], column: DateColumn) -> Cond {
    let mut combined: Option<Cond> = None;
    for interval in set {
        let mut cond: Option<Cond> = None;
        if let Some(after) = interval.after {
            let piece: Cond = match column {
                DateColumn::Start => Box::new(work_items::start_date.ge(after)),
                DateColumn::Target => Box::new(work_items::target_date.ge(after)),
            };
            cond = Some(piece);
        }
        if let Some(before) = interval.before {
            let piece: Cond = match column {
                DateColumn::Start => Box::new(work_items::start_date.lt(before)),
                DateColumn::Target => Box::new(work_items::target_date.lt(before)),
            };
            cond = Some(match cond {
                Some(existing) => Box::new(existing.and(piece)),
                None => piece,
            });
        }
        let interval_cond = cond.unwrap_or_else(|| always_true());
        combined = Some(match combined {
            Some(existing) => Box::new(existing.or(interval_cond)),
            None => interval_cond,
        });
    }
    combined.unwrap_or_else(always_true)
}

enum TimestampColumn {
    Created,
    Updated,
    Completed,
}

fn timestamp_cond(set: &[Interval<DateTime<Utc>>], column: TimestampColumn) -> Cond {
    let mut combined: Option<Cond> = None;
    for interval in set {
        let mut cond: Option<Cond> = None;
        if let Some(after) = interval.after {
            let piece: Cond = match column {
                TimestampColumn::Created => {
                    Box::new(work_items::created_at.ge(after).nullable())
                }
                TimestampColumn::Updated => {
                    Box::new(work_items::updated_at.ge(after).nullable())
                }
                TimestampColumn::Completed => Box::new(work_items::completed_at.ge(after)),
            };
            cond = Some(piece);
        }
        if let Some(before) = interval.before {
            let piece: Cond = match column {
                TimestampColumn::Created => {
                    Box::new(work_items::created_at.lt(before).nullable())
                }
                TimestampColumn::Updated => {
                    Box::new(work_items::updated_at.lt(before).nullable())
                }
                TimestampColumn::Completed => Box::new(work_items::completed_at.lt(before)),
            };
            cond = Some(match cond {
                Some(existing) => Box::new(existing.and(piece)),
                None => piece,
            });
        }
        let interval_cond = cond.unwrap_or_else(|| always_true());
        combined = Some(match combined {
            Some(existing) => Box::new(existing.or(interval_cond)),
            None => interval_cond,
        });
    }
    combined.unwrap_or_else(always_true)
}

fn always_true() -> Cond {
    Box::new(diesel::dsl::sql::<Nullable<Bool>>("TRUE"))
}

/// Case-insensitive substring over the name plus a numeric match on the
/// per-project sequence.
fn search_cond(needle: &str) -> Cond {
    let escaped = needle.replace('%', "\\%").replace('_', "\\_");
    let pattern = format!("%{escaped}%");
    let name_match: Cond = Box::new(work_items::name.ilike(pattern).nullable());
    match needle.trim().parse::<i64>() {
        Ok(sequence) => Box::new(
            name_match.or(Box::new(work_items::sequence_id.eq(sequence).nullable()) as Cond),
        ),
        Err(_) => name_match,
    }
}

/// Intersects the id sets produced by each multi-valued predicate, the same
/// way the edge-table filters short-circuit: any empty intersection stops
/// the query before it reaches the base table.
fn edge_restriction(
    conn: &mut PgConnection,
    compiled: &CompiledFilter,
) -> AppResult<Option<HashSet<Uuid>>> {
    let mut restriction: Option<HashSet<Uuid>> = None;

    let mut intersect = |matching: HashSet<Uuid>, restriction: &mut Option<HashSet<Uuid>>| {
        *restriction = Some(match restriction.take() {
            Some(existing) => existing.intersection(&matching).copied().collect(),
            None => matching,
        });
    };

    if let Some(ref ids) = compiled.assignee_ids {
        let matching: Vec<Uuid> = work_item_assignees::table
            .filter(work_item_assignees::assignee_id.eq_any(ids))
            .filter(work_item_assignees::deleted_at.is_null())
            .select(work_item_assignees::work_item_id)
            .load(conn)?;
        intersect(matching.into_iter().collect(), &mut restriction);
    }
    if let Some(ref ids) = compiled.label_ids {
        let matching: Vec<Uuid> = work_item_labels::table
            .filter(work_item_labels::label_id.eq_any(ids))
            .filter(work_item_labels::deleted_at.is_null())
            .select(work_item_labels::work_item_id)
            .load(conn)?;
        intersect(matching.into_iter().collect(), &mut restriction);
    }
    if let Some(ref ids) = compiled.cycle_ids {
        let matching: Vec<Uuid> = cycle_work_items::table
            .filter(cycle_work_items::cycle_id.eq_any(ids))
            .filter(cycle_work_items::deleted_at.is_null())
            .select(cycle_work_items::work_item_id)
            .load(conn)?;
        intersect(matching.into_iter().collect(), &mut restriction);
    }
    if let Some(ref ids) = compiled.module_ids {
        let matching: Vec<Uuid> = module_work_items::table
            .filter(module_work_items::module_id.eq_any(ids))
            .filter(module_work_items::deleted_at.is_null())
            .select(module_work_items::work_item_id)
            .load(conn)?;
        intersect(matching.into_iter().collect(), &mut restriction);
    }
    if let Some(ref ids) = compiled.subscriber_ids {
        let matching: Vec<Uuid> = work_item_subscribers::table
            .filter(work_item_subscribers::subscriber_id.eq_any(ids))
            .filter(work_item_subscribers::deleted_at.is_null())
            .select(work_item_subscribers::work_item_id)
            .load(conn)?;
        intersect(matching.into_iter().collect(), &mut restriction);
    }
    if let Some(ref ids) = compiled.mention_ids {
        let matching: Vec<Uuid> = work_item_mentions::table
            .filter(work_item_mentions::user_id.eq_any(ids))
            .filter(work_item_mentions::deleted_at.is_null())
            .select(work_item_mentions::work_item_id)
            .load(conn)?;
        intersect(matching.into_iter().collect(), &mut restriction);
    }

    Ok(restriction)
}
