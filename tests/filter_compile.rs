use chrono::NaiveDate;
use serde_json::json;
use uuid::Uuid;

use workcore::error::ErrorKind;
use workcore::query::filter::{CompiledFilter, Interval, Scope};

#[test]
fn null_document_compiles_to_the_empty_filter() {
    let compiled = CompiledFilter::compile(&serde_json::Value::Null).unwrap();
    assert!(compiled.state_ids.is_none());
    assert!(compiled.search.is_none());
    assert_eq!(compiled.scope, Scope::Projects);
    assert!(!compiled.is_unsatisfiable());
    assert!(!compiled.needs_edge_restriction());
}

#[test]
fn non_object_document_is_rejected() {
    let err = CompiledFilter::compile(&json!([1, 2, 3])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFilter);
}

#[test]
fn issue_type_is_an_alias_for_type() {
    let id = Uuid::new_v4();
    let compiled = CompiledFilter::compile(&json!({ "issue_type": [id] })).unwrap();
    assert_eq!(compiled.type_ids, Some(vec![id]));

    let compiled = CompiledFilter::compile(&json!({ "type": [id] })).unwrap();
    assert_eq!(compiled.type_ids, Some(vec![id]));
}

#[test]
fn edge_filters_are_flagged_for_the_id_set_pass() {
    let id = Uuid::new_v4();
    for key in ["assignees", "labels", "cycle", "module", "subscriber", "mentions"] {
        let compiled = CompiledFilter::compile(&json!({ key: [id] })).unwrap();
        assert!(compiled.needs_edge_restriction(), "{key} should need edges");
    }
    let compiled = CompiledFilter::compile(&json!({ "state": [id] })).unwrap();
    assert!(!compiled.needs_edge_restriction());
}

#[test]
fn intervals_are_half_open() {
    let date = |d: u32| NaiveDate::from_ymd_opt(2025, 6, d).unwrap();
    let interval = Interval {
        after: Some(date(10)),
        before: Some(date(20)),
    };
    assert!(interval.contains(date(10)));
    assert!(interval.contains(date(19)));
    assert!(!interval.contains(date(20)));
    assert!(!interval.contains(date(9)));

    let open_ended = Interval::<NaiveDate> {
        after: None,
        before: None,
    };
    assert!(open_ended.contains(date(1)));
}
