use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = workspaces)]
pub struct Workspace {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = workspaces)]
pub struct NewWorkspace {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = workspace_members)]
pub struct WorkspaceMember {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub role: i16,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = workspace_members)]
pub struct NewWorkspaceMember {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub role: i16,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = projects)]
#[diesel(belongs_to(Workspace))]
pub struct Project {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub identifier: String,
    pub guest_view_all_features: bool,
    pub public_anchor: Option<String>,
    pub default_assignee_id: Option<Uuid>,
    pub last_sequence: i64,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = projects)]
pub struct NewProject {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub identifier: String,
    pub guest_view_all_features: bool,
    pub public_anchor: Option<String>,
    pub default_assignee_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = project_members)]
#[diesel(belongs_to(Project))]
pub struct ProjectMember {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub role: i16,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = project_members)]
pub struct NewProjectMember {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub role: i16,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = states)]
#[diesel(belongs_to(Project))]
pub struct State {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub group: String,
    pub is_default: bool,
    pub sequence: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = states)]
pub struct NewState {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub group: String,
    pub is_default: bool,
    pub sequence: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = labels)]
#[diesel(belongs_to(Project))]
pub struct Label {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = labels)]
pub struct NewLabel {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = estimate_points)]
pub struct EstimatePoint {
    pub id: Uuid,
    pub project_id: Uuid,
    pub key: i32,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = estimate_points)]
pub struct NewEstimatePoint {
    pub id: Uuid,
    pub project_id: Uuid,
    pub key: i32,
    pub value: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = cycles)]
#[diesel(belongs_to(Project))]
pub struct Cycle {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = cycles)]
pub struct NewCycle {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = modules)]
#[diesel(belongs_to(Project))]
pub struct Module {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = modules)]
pub struct NewModule {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = work_items)]
#[diesel(belongs_to(Project))]
pub struct WorkItem {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub project_id: Uuid,
    pub sequence_id: i64,
    pub name: String,
    pub description_html: String,
    pub priority: String,
    pub state_id: Option<Uuid>,
    pub type_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub target_date: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimate_point_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
    pub created_by: Uuid,
    pub is_draft: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = work_items)]
pub struct NewWorkItem {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub project_id: Uuid,
    pub sequence_id: i64,
    pub name: String,
    pub description_html: String,
    pub priority: String,
    pub state_id: Option<Uuid>,
    pub type_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub target_date: Option<NaiveDate>,
    pub estimate_point_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
    pub created_by: Uuid,
    pub is_draft: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = work_item_assignees)]
pub struct WorkItemAssignee {
    pub id: Uuid,
    pub work_item_id: Uuid,
    pub assignee_id: Uuid,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = work_item_assignees)]
pub struct NewWorkItemAssignee {
    pub id: Uuid,
    pub work_item_id: Uuid,
    pub assignee_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = work_item_labels)]
pub struct WorkItemLabel {
    pub id: Uuid,
    pub work_item_id: Uuid,
    pub label_id: Uuid,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = work_item_labels)]
pub struct NewWorkItemLabel {
    pub id: Uuid,
    pub work_item_id: Uuid,
    pub label_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = cycle_work_items)]
pub struct CycleWorkItem {
    pub id: Uuid,
    pub cycle_id: Uuid,
    pub work_item_id: Uuid,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = cycle_work_items)]
pub struct NewCycleWorkItem {
    pub id: Uuid,
    pub cycle_id: Uuid,
    pub work_item_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = module_work_items)]
pub struct ModuleWorkItem {
    pub id: Uuid,
    pub module_id: Uuid,
    pub work_item_id: Uuid,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = module_work_items)]
pub struct NewModuleWorkItem {
    pub id: Uuid,
    pub module_id: Uuid,
    pub work_item_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = work_item_subscribers)]
pub struct WorkItemSubscriber {
    pub id: Uuid,
    pub work_item_id: Uuid,
    pub subscriber_id: Uuid,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = work_item_subscribers)]
pub struct NewWorkItemSubscriber {
    pub id: Uuid,
    pub work_item_id: Uuid,
    pub subscriber_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = work_item_mentions)]
pub struct WorkItemMention {
    pub id: Uuid,
    pub work_item_id: Uuid,
    pub user_id: Uuid,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = work_item_mentions)]
pub struct NewWorkItemMention {
    pub id: Uuid,
    pub work_item_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = work_item_links)]
pub struct WorkItemLink {
    pub id: Uuid,
    pub work_item_id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub metadata: serde_json::Value,
    pub created_by: Uuid,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = work_item_links)]
pub struct NewWorkItemLink {
    pub id: Uuid,
    pub work_item_id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub metadata: serde_json::Value,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = file_assets)]
pub struct FileAsset {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub project_id: Option<Uuid>,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub asset_key: String,
    pub size: i64,
    pub attributes: serde_json::Value,
    pub is_uploaded: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = file_assets)]
pub struct NewFileAsset {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub project_id: Option<Uuid>,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub asset_key: String,
    pub size: i64,
    pub attributes: serde_json::Value,
    pub is_uploaded: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = comments)]
pub struct Comment {
    pub id: Uuid,
    pub work_item_id: Uuid,
    pub actor_id: Uuid,
    pub comment_html: String,
    pub comment_stripped: String,
    pub access: String,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = comments)]
pub struct NewComment {
    pub id: Uuid,
    pub work_item_id: Uuid,
    pub actor_id: Uuid,
    pub comment_html: String,
    pub comment_stripped: String,
    pub access: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = reactions)]
pub struct Reaction {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub actor_id: Uuid,
    pub code: String,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = reactions)]
pub struct NewReaction {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub actor_id: Uuid,
    pub code: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = work_item_relations)]
pub struct WorkItemRelation {
    pub id: Uuid,
    pub work_item_id: Uuid,
    pub related_work_item_id: Uuid,
    pub relation_type: String,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = work_item_relations)]
pub struct NewWorkItemRelation {
    pub id: Uuid,
    pub work_item_id: Uuid,
    pub related_work_item_id: Uuid,
    pub relation_type: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = intake_items)]
pub struct IntakeItem {
    pub id: Uuid,
    pub project_id: Uuid,
    pub work_item_id: Uuid,
    pub status: i16,
    pub snoozed_till: Option<DateTime<Utc>>,
    pub duplicate_to: Option<Uuid>,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = intake_items)]
pub struct NewIntakeItem {
    pub id: Uuid,
    pub project_id: Uuid,
    pub work_item_id: Uuid,
    pub status: i16,
    pub source: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = work_item_activities)]
pub struct WorkItemActivity {
    pub id: Uuid,
    pub work_item_id: Uuid,
    pub project_id: Uuid,
    pub workspace_id: Uuid,
    pub actor_id: Uuid,
    pub verb: String,
    pub field: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub old_identifier: Option<Uuid>,
    pub new_identifier: Option<Uuid>,
    pub comment_id: Option<Uuid>,
    pub epoch: i64,
    pub notified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = work_item_activities)]
pub struct NewWorkItemActivity {
    pub id: Uuid,
    pub work_item_id: Uuid,
    pub project_id: Uuid,
    pub workspace_id: Uuid,
    pub actor_id: Uuid,
    pub verb: String,
    pub field: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub old_identifier: Option<Uuid>,
    pub new_identifier: Option<Uuid>,
    pub comment_id: Option<Uuid>,
    pub epoch: i64,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub project_id: Uuid,
    pub work_item_id: Uuid,
    pub receiver_id: Uuid,
    pub triggered_by_id: Uuid,
    pub activity_id: Uuid,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub project_id: Uuid,
    pub work_item_id: Uuid,
    pub receiver_id: Uuid,
    pub triggered_by_id: Uuid,
    pub activity_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = recent_visits)]
pub struct RecentVisit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub work_item_id: Uuid,
    pub visited_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = recent_visits)]
pub struct NewRecentVisit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub work_item_id: Uuid,
    pub visited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: DateTime<Utc>,
    pub idempotency_key: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: DateTime<Utc>,
    pub idempotency_key: Option<String>,
}
