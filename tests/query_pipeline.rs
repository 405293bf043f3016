mod common;

use chrono::NaiveDate;
use uuid::Uuid;

use common::{names, RowBuilder};
use workcore::query::group::{partition, GroupField, Grouping, NONE_KEY};
use workcore::query::order::OrderBy;
use workcore::query::paginate::{slice_page, Cursor};

#[test]
fn priority_order_follows_severity_not_alphabet() {
    let mut rows = vec![
        RowBuilder::new(1).name("low").priority("low").build(),
        RowBuilder::new(2).name("urgent").priority("urgent").build(),
        RowBuilder::new(3).name("none").priority("none").build(),
        RowBuilder::new(4).name("high").priority("high").build(),
    ];
    OrderBy::parse(Some("priority")).unwrap().sort(&mut rows);
    assert_eq!(names(&rows), vec!["urgent", "high", "low", "none"]);
}

#[test]
fn missing_dates_sort_last_in_both_directions() {
    let date = |d: u32| NaiveDate::from_ymd_opt(2025, 6, d).unwrap();
    let mut rows = vec![
        RowBuilder::new(1).name("late").target_date(date(20)).build(),
        RowBuilder::new(2).name("unset").build(),
        RowBuilder::new(3).name("early").target_date(date(5)).build(),
    ];

    OrderBy::parse(Some("target_date")).unwrap().sort(&mut rows);
    assert_eq!(names(&rows), vec!["early", "late", "unset"]);

    OrderBy::parse(Some("-target_date")).unwrap().sort(&mut rows);
    assert_eq!(names(&rows), vec!["late", "early", "unset"]);
}

#[test]
fn equal_keys_fall_back_to_newest_first() {
    let mut rows = vec![
        RowBuilder::new(1).name("older").priority("high").build(),
        RowBuilder::new(2).name("newer").priority("high").build(),
    ];
    OrderBy::parse(Some("priority")).unwrap().sort(&mut rows);
    assert_eq!(names(&rows), vec!["newer", "older"]);
}

#[test]
fn multi_label_rows_appear_in_every_label_group() {
    let bug = (Uuid::new_v4(), "bug");
    let infra = (Uuid::new_v4(), "infra");
    let rows = vec![
        RowBuilder::new(1).name("both").labels(&[bug, infra]).build(),
        RowBuilder::new(2).name("bug only").labels(&[bug]).build(),
        RowBuilder::new(3).name("bare").build(),
    ];

    let grouping = Grouping {
        group_by: GroupField::Labels,
        sub_group_by: None,
    };
    let buckets = partition(&rows, &grouping);

    assert_eq!(buckets.len(), 3);
    let bug_bucket = buckets
        .iter()
        .find(|b| b.key == bug.0.to_string())
        .unwrap();
    assert_eq!(bug_bucket.rows.len(), 2);

    // The unlabelled row lands in the synthetic group, ordered last.
    assert_eq!(buckets.last().unwrap().key, NONE_KEY);
    assert_eq!(buckets.last().unwrap().rows, vec![2]);

    // Fan-out means bucket sizes may sum past the row count.
    let total: usize = buckets.iter().map(|b| b.rows.len()).sum();
    assert_eq!(total, 4);
}

#[test]
fn sub_grouping_partitions_within_each_group() {
    let rows = vec![
        RowBuilder::new(1)
            .state_group("started")
            .priority("urgent")
            .build(),
        RowBuilder::new(2)
            .state_group("started")
            .priority("low")
            .build(),
        RowBuilder::new(3)
            .state_group("backlog")
            .priority("urgent")
            .build(),
    ];

    let grouping = Grouping {
        group_by: GroupField::StateGroup,
        sub_group_by: Some(GroupField::Priority),
    };
    let buckets = partition(&rows, &grouping);

    let keys: Vec<(&str, &str)> = buckets
        .iter()
        .map(|b| (b.key.as_str(), b.sub_key.as_deref().unwrap()))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("backlog", "urgent"),
            ("started", "urgent"),
            ("started", "low"),
        ]
    );
}

#[test]
fn bucket_rows_keep_the_compiled_order() {
    let assignee = Uuid::new_v4();
    let mut rows = vec![
        RowBuilder::new(1)
            .name("b")
            .assignees(&[assignee])
            .build(),
        RowBuilder::new(2)
            .name("a")
            .assignees(&[assignee])
            .build(),
    ];
    OrderBy::parse(Some("name")).unwrap().sort(&mut rows);

    let grouping = Grouping {
        group_by: GroupField::Assignees,
        sub_group_by: None,
    };
    let buckets = partition(&rows, &grouping);
    assert_eq!(buckets.len(), 1);
    assert_eq!(rows[buckets[0].rows[0]].item.name, "a");
    assert_eq!(rows[buckets[0].rows[1]].item.name, "b");
}

#[test]
fn pages_reassemble_the_full_ordered_set() {
    let mut rows = Vec::new();
    for seq in 0..23 {
        rows.push(RowBuilder::new(seq).name(&format!("row {seq:02}")).build());
    }
    OrderBy::parse(Some("name")).unwrap().sort(&mut rows);

    let mut cursor = Cursor::first_page(10);
    let mut collected = Vec::new();
    loop {
        let page = slice_page(&rows, &cursor);
        collected.extend(page.rows.iter().map(|row| row.item.name.clone()));
        if !page.has_next {
            break;
        }
        cursor = cursor.next();
    }

    let expected: Vec<String> = rows.iter().map(|row| row.item.name.clone()).collect();
    assert_eq!(collected, expected);
}

#[test]
fn group_cursor_survives_the_wire_and_stays_scoped() {
    let secret = "pipeline-secret";
    let cursor = Cursor::for_group(25, "backlog".to_string(), Some("urgent".to_string()));
    let token = cursor.encode(secret);

    let decoded = Cursor::decode(&token, secret).unwrap();
    assert_eq!(decoded.group_key.as_deref(), Some("backlog"));
    assert_eq!(decoded.sub_group_key.as_deref(), Some("urgent"));
    assert_eq!(decoded.next().offset, 25);
    assert_eq!(decoded.prev().offset, 0);
}
