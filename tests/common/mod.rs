use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use uuid::Uuid;

use workcore::models::WorkItem;
use workcore::query::enrich::EnrichedRow;

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

/// Builds an enriched row with neutral defaults; tests override the fields
/// they care about. `seq` staggers `created_at` so the default tie-break
/// stays deterministic.
pub struct RowBuilder {
    row: EnrichedRow,
}

impl RowBuilder {
    pub fn new(seq: i64) -> Self {
        let created = base_time() + Duration::minutes(seq);
        let item = WorkItem {
            id: Uuid::new_v4(),
            workspace_id: Uuid::nil(),
            project_id: Uuid::nil(),
            sequence_id: seq,
            name: format!("item {seq}"),
            description_html: String::new(),
            priority: "none".to_string(),
            state_id: None,
            type_id: None,
            start_date: None,
            target_date: None,
            completed_at: None,
            estimate_point_id: None,
            parent_id: None,
            created_by: Uuid::nil(),
            is_draft: false,
            archived_at: None,
            deleted_at: None,
            created_at: created,
            updated_at: created,
        };
        RowBuilder {
            row: EnrichedRow {
                item,
                state_name: None,
                state_group: None,
                sub_issues_count: 0,
                link_count: 0,
                attachment_count: 0,
                cycle_id: None,
                module_ids: Vec::new(),
                label_ids: Vec::new(),
                assignee_ids: Vec::new(),
                label_names: Vec::new(),
                assignee_first_names: Vec::new(),
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.row.item.name = name.to_string();
        self
    }

    pub fn priority(mut self, priority: &str) -> Self {
        self.row.item.priority = priority.to_string();
        self
    }

    pub fn target_date(mut self, date: NaiveDate) -> Self {
        self.row.item.target_date = Some(date);
        self
    }

    pub fn state_group(mut self, group: &str) -> Self {
        self.row.state_group = Some(group.to_string());
        self
    }

    pub fn labels(mut self, labels: &[(Uuid, &str)]) -> Self {
        self.row.label_ids = labels.iter().map(|(id, _)| *id).collect();
        self.row.label_names = labels.iter().map(|(_, name)| name.to_string()).collect();
        self
    }

    pub fn assignees(mut self, ids: &[Uuid]) -> Self {
        self.row.assignee_ids = ids.to_vec();
        self
    }

    pub fn build(self) -> EnrichedRow {
        self.row
    }
}

pub fn names(rows: &[EnrichedRow]) -> Vec<&str> {
    rows.iter().map(|row| row.item.name.as_str()).collect()
}
