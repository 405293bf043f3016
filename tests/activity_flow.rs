use serde_json::json;
use uuid::Uuid;

use workcore::activity::differs::{
    self, VERB_CREATED, VERB_DELETED, VERB_UPDATED,
};
use workcore::domain::RelationType;

fn snapshot(name: &str, state: Option<(Uuid, &str)>, assignees: &[(Uuid, &str)]) -> serde_json::Value {
    json!({
        "name": name,
        "description_html": "<p>body</p>",
        "priority": "medium",
        "start_date": serde_json::Value::Null,
        "target_date": serde_json::Value::Null,
        "archived_at": serde_json::Value::Null,
        "state": state.map(|(id, n)| json!({ "id": id, "name": n })),
        "parent": serde_json::Value::Null,
        "estimate_point": serde_json::Value::Null,
        "closed_to": serde_json::Value::Null,
        "assignees": assignees
            .iter()
            .map(|(id, n)| json!({ "id": id, "name": n }))
            .collect::<Vec<_>>(),
        "labels": [],
    })
}

#[test]
fn lifecycle_produces_created_then_field_records_then_deleted() {
    let todo = (Uuid::new_v4(), "Todo");
    let doing = (Uuid::new_v4(), "In Progress");
    let alice = (Uuid::new_v4(), "Alice");

    let created = snapshot("Ship login", Some(todo), &[]);
    let drafts = differs::created_work_item(&created);
    assert_eq!(drafts[0].verb, VERB_CREATED);
    assert_eq!(drafts[0].field, None);
    assert_eq!(drafts[0].new_value.as_deref(), Some("Ship login"));

    let updated = snapshot("Ship login", Some(doing), &[alice]);
    let drafts = differs::diff_work_item(&created, &updated);
    assert_eq!(drafts.len(), 2);

    let state_change = drafts.iter().find(|d| d.field.as_deref() == Some("state")).unwrap();
    assert_eq!(state_change.verb, VERB_UPDATED);
    assert_eq!(state_change.old_identifier, Some(todo.0));
    assert_eq!(state_change.new_identifier, Some(doing.0));
    assert_eq!(state_change.new_value.as_deref(), Some("In Progress"));

    let assignment = drafts
        .iter()
        .find(|d| d.field.as_deref() == Some("assignees"))
        .unwrap();
    assert_eq!(assignment.new_identifier, Some(alice.0));
    assert!(assignment.old_identifier.is_none());

    let deleted = differs::deleted_work_item(&updated);
    assert_eq!(deleted.verb, VERB_DELETED);
    assert_eq!(deleted.old_value.as_deref(), Some("Ship login"));
}

#[test]
fn clearing_a_reference_uses_the_deleted_verb() {
    let parent = (Uuid::new_v4(), "Epic");
    let with_parent = json!({ "parent": { "id": parent.0, "name": parent.1 } });
    let without_parent = json!({ "parent": null });

    let drafts = differs::diff_work_item(&with_parent, &without_parent);
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].verb, VERB_DELETED);
    assert_eq!(drafts[0].old_identifier, Some(parent.0));
    assert!(drafts[0].new_identifier.is_none());
}

#[test]
fn identical_snapshots_produce_nothing() {
    let state = (Uuid::new_v4(), "Todo");
    let snap = snapshot("Quiet", Some(state), &[]);
    assert!(differs::diff_work_item(&snap, &snap.clone()).is_empty());
}

#[test]
fn blocks_relation_mirrors_as_blocked_by() {
    let blocker = (Uuid::new_v4(), "API rewrite");
    let blocked = (Uuid::new_v4(), "Docs refresh");

    let pair = differs::relation_pair(
        RelationType::Blocks,
        (blocker.0, blocker.1),
        (blocked.0, blocked.1),
        false,
    );
    assert_eq!(pair.len(), 2);

    let (target, on_item) = &pair[0];
    assert_eq!(*target, blocker.0);
    assert_eq!(on_item.field.as_deref(), Some("blocking"));
    assert_eq!(on_item.new_identifier, Some(blocked.0));

    let (target, on_related) = &pair[1];
    assert_eq!(*target, blocked.0);
    assert_eq!(on_related.field.as_deref(), Some("blocked_by"));
    assert_eq!(on_related.new_identifier, Some(blocker.0));
}

#[test]
fn relation_removal_swaps_values_to_the_old_side() {
    let a = (Uuid::new_v4(), "a");
    let b = (Uuid::new_v4(), "b");
    let pair = differs::relation_pair(RelationType::RelatesTo, (a.0, a.1), (b.0, b.1), true);
    for (_, draft) in &pair {
        assert_eq!(draft.verb, VERB_DELETED);
        assert!(draft.new_identifier.is_none());
        assert!(draft.old_identifier.is_some());
    }
}

#[test]
fn cycle_transfer_reports_both_sides() {
    let sprint_1 = (Uuid::new_v4(), "Sprint 1".to_string());
    let sprint_2 = (Uuid::new_v4(), "Sprint 2".to_string());

    let draft = differs::cycle_membership(Some(sprint_1.clone()), Some(sprint_2.clone())).unwrap();
    assert_eq!(draft.verb, VERB_UPDATED);
    assert_eq!(draft.old_identifier, Some(sprint_1.0));
    assert_eq!(draft.new_identifier, Some(sprint_2.0));

    assert!(differs::cycle_membership(Some(sprint_1.clone()), Some(sprint_1)).is_none());
}

#[test]
fn draft_flag_only_fires_on_change() {
    assert!(differs::draft_flag(true, true).is_none());
    let publish = differs::draft_flag(true, false).unwrap();
    assert_eq!(publish.old_value.as_deref(), Some("true"));
    assert_eq!(publish.new_value.as_deref(), Some("false"));
}
