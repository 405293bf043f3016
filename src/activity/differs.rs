//! Pure snapshot differs. Snapshots are JSON objects built by the mutation
//! coordinator with display names already resolved (`state`, `parent`,
//! `labels`, ... carry `{id, name}`), so everything here is a pure function
//! from two snapshots to a list of activity drafts.

use serde_json::Value;
use uuid::Uuid;

use crate::domain::RelationType;

pub const VERB_CREATED: &str = "created";
pub const VERB_UPDATED: &str = "updated";
pub const VERB_DELETED: &str = "deleted";

/// One activity record before it is stamped with actor, epoch, and ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityDraft {
    pub verb: String,
    pub field: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub old_identifier: Option<Uuid>,
    pub new_identifier: Option<Uuid>,
    pub comment_id: Option<Uuid>,
}

impl ActivityDraft {
    fn new(verb: &str, field: Option<&str>) -> Self {
        ActivityDraft {
            verb: verb.to_string(),
            field: field.map(str::to_string),
            old_value: None,
            new_value: None,
            old_identifier: None,
            new_identifier: None,
            comment_id: None,
        }
    }
}

enum FieldKind {
    /// Plain string in the snapshot; compared and reported verbatim.
    Scalar,
    /// `{id, name}` object; the name is the display value, the id the
    /// round-trippable identifier.
    Reference,
}

/// Tracked scalar and reference fields: (snapshot key, activity field).
const TRACKED_FIELDS: [(&str, &str, FieldKind); 10] = [
    ("name", "name", FieldKind::Scalar),
    ("description_html", "description", FieldKind::Scalar),
    ("priority", "priority", FieldKind::Scalar),
    ("start_date", "start_date", FieldKind::Scalar),
    ("target_date", "target_date", FieldKind::Scalar),
    ("archived_at", "archived_at", FieldKind::Scalar),
    ("state", "state", FieldKind::Reference),
    ("parent", "parent", FieldKind::Reference),
    ("estimate_point", "estimate_point", FieldKind::Reference),
    ("closed_to", "closed_to", FieldKind::Reference),
];

/// Multi-valued fields: one draft per id added and per id removed.
const TRACKED_LISTS: [(&str, &str); 2] = [("assignees", "assignees"), ("labels", "labels")];

/// Drafts for a freshly created work item: the headline `created` record
/// plus one membership record per initial assignee and label.
pub fn created_work_item(after: &Value) -> Vec<ActivityDraft> {
    let mut drafts = Vec::new();

    let mut head = ActivityDraft::new(VERB_CREATED, None);
    head.new_value = str_field(after, "name");
    drafts.push(head);

    for (snapshot_key, field) in TRACKED_LISTS {
        for (id, name) in list_field(after, snapshot_key) {
            let mut draft = ActivityDraft::new(VERB_UPDATED, Some(field));
            draft.new_value = Some(name);
            draft.new_identifier = Some(id);
            drafts.push(draft);
        }
    }

    drafts
}

/// The single record a soft delete leaves behind.
pub fn deleted_work_item(before: &Value) -> ActivityDraft {
    let mut draft = ActivityDraft::new(VERB_DELETED, None);
    draft.old_value = str_field(before, "name");
    draft
}

/// Field-by-field diff of two snapshots of the same work item.
pub fn diff_work_item(before: &Value, after: &Value) -> Vec<ActivityDraft> {
    let mut drafts = Vec::new();

    for (snapshot_key, field, kind) in TRACKED_FIELDS {
        match kind {
            FieldKind::Scalar => {
                let old = str_field(before, snapshot_key);
                let new = str_field(after, snapshot_key);
                if old != new {
                    let mut draft = ActivityDraft::new(transition_verb(&old, &new), Some(field));
                    draft.old_value = old;
                    draft.new_value = new;
                    drafts.push(draft);
                }
            }
            FieldKind::Reference => {
                let old = ref_field(before, snapshot_key);
                let new = ref_field(after, snapshot_key);
                if old.as_ref().map(|(id, _)| id) != new.as_ref().map(|(id, _)| id) {
                    let mut draft = ActivityDraft::new(
                        transition_verb(&old.as_ref().map(|_| ()), &new.as_ref().map(|_| ())),
                        Some(field),
                    );
                    if let Some((id, name)) = old {
                        draft.old_value = Some(name);
                        draft.old_identifier = Some(id);
                    }
                    if let Some((id, name)) = new {
                        draft.new_value = Some(name);
                        draft.new_identifier = Some(id);
                    }
                    drafts.push(draft);
                }
            }
        }
    }

    for (snapshot_key, field) in TRACKED_LISTS {
        let old = list_field(before, snapshot_key);
        let new = list_field(after, snapshot_key);

        for (id, name) in &old {
            if !new.iter().any(|(new_id, _)| new_id == id) {
                let mut draft = ActivityDraft::new(VERB_UPDATED, Some(field));
                draft.old_value = Some(name.clone());
                draft.old_identifier = Some(*id);
                drafts.push(draft);
            }
        }
        for (id, name) in &new {
            if !old.iter().any(|(old_id, _)| old_id == id) {
                let mut draft = ActivityDraft::new(VERB_UPDATED, Some(field));
                draft.new_value = Some(name.clone());
                draft.new_identifier = Some(*id);
                drafts.push(draft);
            }
        }
    }

    drafts
}

/// Cycle membership change: `None → Some` is an add, `Some → Some` a
/// transfer, `Some → None` a removal. Same shape for modules.
pub fn cycle_membership(
    old: Option<(Uuid, String)>,
    new: Option<(Uuid, String)>,
) -> Option<ActivityDraft> {
    membership_change("cycles", old, new)
}

pub fn module_membership(
    old: Option<(Uuid, String)>,
    new: Option<(Uuid, String)>,
) -> Option<ActivityDraft> {
    membership_change("modules", old, new)
}

fn membership_change(
    field: &str,
    old: Option<(Uuid, String)>,
    new: Option<(Uuid, String)>,
) -> Option<ActivityDraft> {
    if old.as_ref().map(|(id, _)| id) == new.as_ref().map(|(id, _)| id) {
        return None;
    }
    let verb = transition_verb(&old.as_ref().map(|_| ()), &new.as_ref().map(|_| ()));
    let mut draft = ActivityDraft::new(verb, Some(field));
    if let Some((id, name)) = old {
        draft.old_value = Some(name);
        draft.old_identifier = Some(id);
    }
    if let Some((id, name)) = new {
        draft.new_value = Some(name);
        draft.new_identifier = Some(id);
    }
    Some(draft)
}

/// The pair of records a relation change produces: one on the owning item
/// and a mirror on the related item with the inverse field name. Returns
/// `(target_work_item_id, draft)` tuples.
pub fn relation_pair(
    relation: RelationType,
    item: (Uuid, &str),
    related: (Uuid, &str),
    deleted: bool,
) -> Vec<(Uuid, ActivityDraft)> {
    let verb = if deleted { VERB_DELETED } else { VERB_CREATED };

    let mut on_item = ActivityDraft::new(verb, Some(relation.activity_field()));
    let mut on_related = ActivityDraft::new(verb, Some(relation.inverse().activity_field()));

    if deleted {
        on_item.old_value = Some(related.1.to_string());
        on_item.old_identifier = Some(related.0);
        on_related.old_value = Some(item.1.to_string());
        on_related.old_identifier = Some(item.0);
    } else {
        on_item.new_value = Some(related.1.to_string());
        on_item.new_identifier = Some(related.0);
        on_related.new_value = Some(item.1.to_string());
        on_related.new_identifier = Some(item.0);
    }

    vec![(item.0, on_item), (related.0, on_related)]
}

pub fn comment_activity(verb: &str, comment_id: Uuid, stripped: &str) -> ActivityDraft {
    let mut draft = ActivityDraft::new(verb, Some("comment"));
    draft.comment_id = Some(comment_id);
    match verb {
        VERB_DELETED => draft.old_value = Some(stripped.to_string()),
        _ => draft.new_value = Some(stripped.to_string()),
    }
    draft
}

pub fn link_activity(verb: &str, link_id: Uuid, url: &str) -> ActivityDraft {
    let mut draft = ActivityDraft::new(verb, Some("link"));
    match verb {
        VERB_DELETED => {
            draft.old_value = Some(url.to_string());
            draft.old_identifier = Some(link_id);
        }
        _ => {
            draft.new_value = Some(url.to_string());
            draft.new_identifier = Some(link_id);
        }
    }
    draft
}

pub fn attachment_activity(verb: &str, asset_id: Uuid) -> ActivityDraft {
    let mut draft = ActivityDraft::new(verb, Some("attachment"));
    match verb {
        VERB_DELETED => draft.old_identifier = Some(asset_id),
        _ => draft.new_identifier = Some(asset_id),
    }
    draft
}

pub fn reaction_activity(verb: &str, code: &str) -> ActivityDraft {
    let mut draft = ActivityDraft::new(verb, Some("reaction"));
    match verb {
        VERB_DELETED => draft.old_value = Some(code.to_string()),
        _ => draft.new_value = Some(code.to_string()),
    }
    draft
}

/// Draft-flag flip (`is_draft`).
pub fn draft_flag(was_draft: bool, is_draft: bool) -> Option<ActivityDraft> {
    if was_draft == is_draft {
        return None;
    }
    let mut draft = ActivityDraft::new(VERB_UPDATED, Some("draft"));
    draft.old_value = Some(was_draft.to_string());
    draft.new_value = Some(is_draft.to_string());
    Some(draft)
}

/// Intake transitions carry the numeric status as the verb.
pub fn intake_transition(old_status: Option<i16>, new_status: i16) -> ActivityDraft {
    ActivityDraft {
        verb: new_status.to_string(),
        field: Some("intake".to_string()),
        old_value: old_status.map(|s| s.to_string()),
        new_value: Some(new_status.to_string()),
        old_identifier: None,
        new_identifier: None,
        comment_id: None,
    }
}

fn transition_verb<T>(old: &Option<T>, new: &Option<T>) -> &'static str {
    match (old, new) {
        (None, Some(_)) => VERB_CREATED,
        (Some(_), None) => VERB_DELETED,
        _ => VERB_UPDATED,
    }
}

fn str_field(snapshot: &Value, key: &str) -> Option<String> {
    snapshot.get(key).and_then(Value::as_str).map(str::to_string)
}

fn ref_field(snapshot: &Value, key: &str) -> Option<(Uuid, String)> {
    let object = snapshot.get(key)?.as_object()?;
    let id = object.get("id")?.as_str()?.parse().ok()?;
    let name = object
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some((id, name))
}

fn list_field(snapshot: &Value, key: &str) -> Vec<(Uuid, String)> {
    snapshot
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let object = item.as_object()?;
                    let id = object.get("id")?.as_str()?.parse().ok()?;
                    let name = object
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    Some((id, name))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(priority: &str, state: Option<(&Uuid, &str)>, assignees: &[(Uuid, &str)]) -> Value {
        json!({
            "name": "Ship v1",
            "description_html": "<p>plan</p>",
            "priority": priority,
            "state": state.map(|(id, name)| json!({ "id": id.to_string(), "name": name })),
            "assignees": assignees
                .iter()
                .map(|(id, name)| json!({ "id": id.to_string(), "name": name }))
                .collect::<Vec<_>>(),
            "labels": [],
        })
    }

    #[test]
    fn scalar_change_emits_one_record_with_both_values() {
        let before = snapshot("high", None, &[]);
        let after = snapshot("urgent", None, &[]);
        let drafts = diff_work_item(&before, &after);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].field.as_deref(), Some("priority"));
        assert_eq!(drafts[0].verb, VERB_UPDATED);
        assert_eq!(drafts[0].old_value.as_deref(), Some("high"));
        assert_eq!(drafts[0].new_value.as_deref(), Some("urgent"));
    }

    #[test]
    fn state_change_reports_names_and_ids() {
        let backlog = Uuid::new_v4();
        let started = Uuid::new_v4();
        let before = snapshot("high", Some((&backlog, "Backlog")), &[]);
        let after = snapshot("high", Some((&started, "Started")), &[]);
        let drafts = diff_work_item(&before, &after);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].field.as_deref(), Some("state"));
        assert_eq!(drafts[0].old_value.as_deref(), Some("Backlog"));
        assert_eq!(drafts[0].new_value.as_deref(), Some("Started"));
        assert_eq!(drafts[0].old_identifier, Some(backlog));
        assert_eq!(drafts[0].new_identifier, Some(started));
    }

    #[test]
    fn assignee_add_and_remove_emit_one_record_per_id() {
        let keep = Uuid::new_v4();
        let removed = Uuid::new_v4();
        let added = Uuid::new_v4();
        let before = snapshot("high", None, &[(keep, "Keep"), (removed, "Gone")]);
        let after = snapshot("high", None, &[(keep, "Keep"), (added, "New")]);

        let drafts = diff_work_item(&before, &after);
        assert_eq!(drafts.len(), 2);

        let removal = drafts
            .iter()
            .find(|d| d.old_identifier == Some(removed))
            .unwrap();
        assert_eq!(removal.verb, VERB_UPDATED);
        assert_eq!(removal.old_value.as_deref(), Some("Gone"));
        assert!(removal.new_identifier.is_none());

        let addition = drafts
            .iter()
            .find(|d| d.new_identifier == Some(added))
            .unwrap();
        assert_eq!(addition.verb, VERB_UPDATED);
        assert_eq!(addition.new_value.as_deref(), Some("New"));
    }

    #[test]
    fn identical_snapshots_emit_nothing() {
        let state = Uuid::new_v4();
        let before = snapshot("high", Some((&state, "Backlog")), &[]);
        assert!(diff_work_item(&before, &before.clone()).is_empty());
    }

    #[test]
    fn creation_emits_headline_then_memberships() {
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        let after = snapshot("high", None, &[(u1, "One"), (u2, "Two")]);
        let drafts = created_work_item(&after);
        assert_eq!(drafts.len(), 3);
        assert_eq!(drafts[0].verb, VERB_CREATED);
        assert!(drafts[0].field.is_none());
        assert_eq!(drafts[1].new_identifier, Some(u1));
        assert_eq!(drafts[2].new_identifier, Some(u2));
    }

    #[test]
    fn relation_add_emits_mirrored_pair() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let pair = relation_pair(RelationType::BlockedBy, (a, "A"), (b, "B"), false);
        assert_eq!(pair.len(), 2);

        let (on_a_target, on_a) = &pair[0];
        assert_eq!(*on_a_target, a);
        assert_eq!(on_a.field.as_deref(), Some("blocked_by"));
        assert_eq!(on_a.new_identifier, Some(b));

        let (on_b_target, on_b) = &pair[1];
        assert_eq!(*on_b_target, b);
        assert_eq!(on_b.field.as_deref(), Some("blocking"));
        assert_eq!(on_b.new_identifier, Some(a));
    }

    #[test]
    fn relation_delete_reverses_the_pair() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let pair = relation_pair(RelationType::BlockedBy, (a, "A"), (b, "B"), true);
        assert!(pair.iter().all(|(_, d)| d.verb == VERB_DELETED));
        assert_eq!(pair[0].1.old_identifier, Some(b));
        assert_eq!(pair[1].1.old_identifier, Some(a));
    }

    #[test]
    fn cycle_transfer_is_an_update_with_both_sides() {
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();
        let draft =
            cycle_membership(Some((old, "Sprint 1".into())), Some((new, "Sprint 2".into())))
                .unwrap();
        assert_eq!(draft.verb, VERB_UPDATED);
        assert_eq!(draft.field.as_deref(), Some("cycles"));
        assert_eq!(draft.old_value.as_deref(), Some("Sprint 1"));
        assert_eq!(draft.new_value.as_deref(), Some("Sprint 2"));

        let added = cycle_membership(None, Some((new, "Sprint 2".into()))).unwrap();
        assert_eq!(added.verb, VERB_CREATED);

        assert!(cycle_membership(Some((old, "x".into())), Some((old, "x".into()))).is_none());
    }

    #[test]
    fn intake_transition_uses_numeric_verb() {
        let draft = intake_transition(Some(-2), 1);
        assert_eq!(draft.verb, "1");
        assert_eq!(draft.old_value.as_deref(), Some("-2"));
        assert_eq!(draft.new_value.as_deref(), Some("1"));
    }
}
